//! 配置管理
//!
//! 配置按以下顺序叠加：结构体默认值、TOML 配置文件、`TASKQ_` 前缀的环境变量。
//! 嵌套字段以 `__` 分隔，例如 `TASKQ_DISPATCHER__SWEEP_INTERVAL_SECONDS=3`。

pub mod models;

pub use models::*;
