//! 调度层
//!
//! 任务领取、租约回收、重试退避与终止任务清理，以及对外的引擎入口。

pub mod cleanup_service;
pub mod engine;
pub mod lease_manager;
pub mod metrics;
pub mod retry_policy;
pub mod scheduler;

pub use cleanup_service::{CleanupService, CleanupStats};
pub use engine::{ReportOutcome, TaskQueueEngine};
pub use lease_manager::{LeaseManager, SweepReport};
pub use retry_policy::{RetryDecision, RetryPolicy};
pub use scheduler::TaskScheduler;
