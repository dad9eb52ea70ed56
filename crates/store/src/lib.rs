//! # bourse-store
//!
//! 账本存储的 SQLite 适配器。所有端口实现共享同一个 [`database::Database`] 句柄，
//! 结算等跨表操作在单个事务内完成。

pub mod account;
pub mod database;
pub(crate) mod error;
pub mod history;
pub mod order;
pub mod portfolio;
pub mod settlement;
pub mod stock;
