pub mod sqlite_stats;
pub mod sqlite_task_store;
pub mod sqlite_worker_registry;

pub use sqlite_stats::SqliteStatsAggregator;
pub use sqlite_task_store::SqliteTaskStore;
pub use sqlite_worker_registry::SqliteWorkerRegistry;
