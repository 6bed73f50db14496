//! 任务队列核心库
//!
//! 领域模型、错误类型、存储层接口以及配置模型。

pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use errors::{TaskQueueError, TaskQueueResult};
pub use models::{
    ListOrder, QueueStats, StateTransition, Task, TaskFilter, TaskLog, TaskLogLevel, TaskPriority,
    TaskSpec, TaskStatus, TransitionFields, WorkerHeartbeat, WorkerInfo, WorkerRegistration,
    WorkerStatus,
};
pub use traits::{StatsAggregator, TaskStore, WorkerRegistry};
