//! # bourse-core
//!
//! 领域核心层：实体、端口 (Port) 与错误类型。
//! 本 crate 不包含任何 I/O 实现，所有持久化与缓存均由下游适配器 crate 通过 Trait 注入。

pub mod cache;
pub mod common;
pub mod config;
pub mod stock;
pub mod store;
pub mod trade;
