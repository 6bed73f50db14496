//! 存储层接口定义
//!
//! - `TaskStore` - 任务记录的唯一写入方，所有已存在任务的修改都经由 `transition_state`
//! - `WorkerRegistry` - Worker注册、心跳与过期检测
//! - `StatsAggregator` - 按队列聚合的统计视图
//!
//! 所有接口均为 `Send + Sync`，以 `Arc<dyn Trait>` 的形式在组件间共享。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::TaskQueueResult;
use crate::models::{
    QueueStats, StateTransition, Task, TaskFilter, TaskLog, TaskSpec, WorkerHeartbeat, WorkerInfo,
    WorkerRegistration,
};

/// 任务存储
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 校验并插入一个 `pending` 任务，返回分配的ID
    async fn submit(&self, spec: &TaskSpec) -> TaskQueueResult<i64>;

    /// 按ID获取任务，不存在时返回 `TaskNotFound`
    async fn get(&self, task_id: i64) -> TaskQueueResult<Task>;

    /// 分页列出任务，默认按 `created_at` 降序
    async fn list(&self, filter: &TaskFilter, limit: i64, offset: i64)
        -> TaskQueueResult<Vec<Task>>;

    /// compare-and-swap 状态流转
    ///
    /// 与统计更新、审计日志写入处于同一事务。当前状态与期望不符时返回
    /// `Conflict`，持有者不符时返回 `OwnershipConflict`；重试计数与快照不符、
    /// 或领取时尚未到 `scheduled_at`，返回 `StaleSnapshot`。
    async fn transition_state(&self, transition: &StateTransition) -> TaskQueueResult<Task>;

    /// 按领取顺序返回给定队列中可执行的任务
    async fn find_candidates(
        &self,
        queues: &[String],
        now: DateTime<Utc>,
        limit: i64,
    ) -> TaskQueueResult<Vec<Task>>;

    /// 所有运行中的任务
    async fn list_running(&self) -> TaskQueueResult<Vec<Task>>;

    /// 删除 `completed_at < cutoff` 的终止任务（至多 `batch` 条），返回删除数量
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>, batch: i64)
        -> TaskQueueResult<u64>;

    /// 追加审计日志
    async fn append_log(&self, entry: &TaskLog) -> TaskQueueResult<i64>;

    /// 按时间顺序列出任务的审计日志
    async fn list_logs(&self, task_id: i64) -> TaskQueueResult<Vec<TaskLog>>;
}

/// Worker注册表
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// 幂等注册，重复注册会重置状态为active并刷新心跳
    async fn register(&self, registration: &WorkerRegistration) -> TaskQueueResult<WorkerInfo>;

    /// 刷新心跳，已停止的Worker返回 `false`
    async fn heartbeat(&self, heartbeat: &WorkerHeartbeat) -> TaskQueueResult<bool>;

    /// 注销：标记为stopped，运行中的任务留给租约过期回收
    async fn deregister(&self, worker_id: &str) -> TaskQueueResult<()>;

    async fn get(&self, worker_id: &str) -> TaskQueueResult<Option<WorkerInfo>>;

    async fn list(&self) -> TaskQueueResult<Vec<WorkerInfo>>;

    /// 心跳早于 `now - staleness_seconds` 且未停止的Worker
    async fn list_stale(&self, now: DateTime<Utc>, staleness_seconds: i64)
        -> TaskQueueResult<Vec<String>>;

    async fn mark_stopped(&self, worker_id: &str) -> TaskQueueResult<()>;

    /// 删除停止时间早于 `before` 的Worker，返回删除数量
    async fn remove_stopped_before(&self, before: DateTime<Utc>) -> TaskQueueResult<u64>;

    async fn remove(&self, worker_id: &str) -> TaskQueueResult<()>;
}

/// 队列统计
#[async_trait]
pub trait StatsAggregator: Send + Sync {
    /// 获取队列统计，未知队列返回全零
    async fn get_stats(&self, queue_name: &str) -> TaskQueueResult<QueueStats>;

    async fn list_stats(&self) -> TaskQueueResult<Vec<QueueStats>>;

    /// 根据任务表重建队列统计并写回
    async fn recompute(&self, queue_name: &str) -> TaskQueueResult<QueueStats>;
}
