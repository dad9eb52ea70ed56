//! # bourse-cache
//!
//! `Cache` 端口的进程内实现。

pub mod mem;
