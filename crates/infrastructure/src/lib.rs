//! 基础设施层
//!
//! SQLite 存储实现以及日志与指标初始化。

pub mod database;
pub mod observability;

pub use database::{DatabaseManager, SqliteStatsAggregator, SqliteTaskStore, SqliteWorkerRegistry};
pub use observability::{init_logging, init_metrics};
