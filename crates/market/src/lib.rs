//! # bourse-market
//!
//! 股票目录：管理端的标的维护，以及带读穿缓存的列表视图。
//! 缓存只服务展示，订单定价一律走 `PriceOracle`。

pub mod catalog;
