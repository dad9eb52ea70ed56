//! # bourse-trade
//!
//! 订单执行引擎与现金账户服务。两者只依赖 `bourse-core` 中的端口，
//! 存储实现由应用层注入。

pub mod account;
pub mod service;
