use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use taskq_core::config::{CleanupConfig, DispatcherConfig, RetryConfig};
use taskq_core::{
    QueueStats, StateTransition, StatsAggregator, Task, TaskFilter, TaskLog, TaskQueueError,
    TaskQueueResult, TaskSpec, TaskStatus, TaskStore, WorkerInfo, WorkerRegistration,
    WorkerRegistry,
};

use crate::cleanup_service::{CleanupService, CleanupStats};
use crate::lease_manager::{LeaseManager, SweepReport};
use crate::metrics;
use crate::retry_policy::{RetryDecision, RetryPolicy};
use crate::scheduler::TaskScheduler;

/// Worker上报执行结果后的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    Completed,
    /// 已安排重试
    Retrying { next_scheduled_at: DateTime<Utc> },
    Failed,
    /// 上报者已不再持有该任务（租约已被回收或任务已结束），上报被丢弃
    Dropped,
}

/// 任务队列引擎
///
/// 面向提交方与Worker的统一入口，组合存储、调度、租约与重试。
pub struct TaskQueueEngine {
    task_store: Arc<dyn TaskStore>,
    worker_registry: Arc<dyn WorkerRegistry>,
    stats: Arc<dyn StatsAggregator>,
    scheduler: TaskScheduler,
    lease_manager: Arc<LeaseManager>,
    retry_policy: Arc<RetryPolicy>,
    cleanup: Arc<CleanupService>,
}

impl TaskQueueEngine {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        worker_registry: Arc<dyn WorkerRegistry>,
        stats: Arc<dyn StatsAggregator>,
        dispatcher_config: DispatcherConfig,
        retry_config: RetryConfig,
        cleanup_config: CleanupConfig,
    ) -> Self {
        let retry_policy = Arc::new(RetryPolicy::new(retry_config));
        let scheduler = TaskScheduler::new(
            task_store.clone(),
            worker_registry.clone(),
            dispatcher_config.clone(),
        );
        let lease_manager = Arc::new(LeaseManager::new(
            task_store.clone(),
            worker_registry.clone(),
            retry_policy.clone(),
            dispatcher_config,
        ));
        let cleanup = Arc::new(CleanupService::new(task_store.clone(), cleanup_config));

        Self {
            task_store,
            worker_registry,
            stats,
            scheduler,
            lease_manager,
            retry_policy,
            cleanup,
        }
    }

    pub fn lease_manager(&self) -> Arc<LeaseManager> {
        self.lease_manager.clone()
    }

    pub fn cleanup_service(&self) -> Arc<CleanupService> {
        self.cleanup.clone()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    // ---- 提交与查询 ----

    pub async fn submit(&self, spec: &TaskSpec) -> TaskQueueResult<i64> {
        let id = self.task_store.submit(spec).await?;
        info!("提交任务 {} ({}) 到队列 {}", id, spec.name, spec.queue_name);
        Ok(id)
    }

    pub async fn get(&self, task_id: i64) -> TaskQueueResult<Task> {
        self.task_store.get(task_id).await
    }

    pub async fn list(
        &self,
        filter: &TaskFilter,
        limit: i64,
        offset: i64,
    ) -> TaskQueueResult<Vec<Task>> {
        self.task_store.list(filter, limit, offset).await
    }

    pub async fn cancel(&self, task_id: i64) -> TaskQueueResult<Task> {
        let task = self.task_store.get(task_id).await?;
        if !task.status.is_claimable() {
            return Err(TaskQueueError::Conflict {
                id: task_id,
                expected: TaskStatus::Pending,
                actual: task.status,
            });
        }

        let cancelled = self
            .task_store
            .transition_state(&StateTransition::cancel(task_id, task.status, Utc::now()))
            .await?;
        info!("任务 {} 已取消", task_id);
        Ok(cancelled)
    }

    // ---- Worker侧 ----

    pub async fn register_worker(
        &self,
        registration: &WorkerRegistration,
    ) -> TaskQueueResult<WorkerInfo> {
        let worker = self.worker_registry.register(registration).await?;
        info!(
            "Worker {} 已注册 (队列: {:?}, 并发: {})",
            worker.worker_id, worker.queues, worker.concurrency
        );
        Ok(worker)
    }

    pub async fn deregister_worker(&self, worker_id: &str) -> TaskQueueResult<()> {
        self.worker_registry.deregister(worker_id).await?;
        info!("Worker {} 已注销", worker_id);
        Ok(())
    }

    pub async fn get_worker(&self, worker_id: &str) -> TaskQueueResult<Option<WorkerInfo>> {
        self.worker_registry.get(worker_id).await
    }

    pub async fn list_workers(&self) -> TaskQueueResult<Vec<WorkerInfo>> {
        self.worker_registry.list().await
    }

    /// 领取任务，`lease_seconds` 为空时使用默认租约
    pub async fn claim(
        &self,
        queue_names: &[String],
        worker_id: &str,
        lease_seconds: Option<i64>,
    ) -> TaskQueueResult<Option<Task>> {
        let lease = lease_seconds.unwrap_or_else(|| self.scheduler.default_lease_seconds());
        self.scheduler.claim(queue_names, worker_id, lease).await
    }

    pub async fn heartbeat(&self, worker_id: &str, current_tasks: i32) -> TaskQueueResult<bool> {
        self.lease_manager.heartbeat(worker_id, current_tasks).await
    }

    pub async fn complete(
        &self,
        task_id: i64,
        worker_id: &str,
        result: Option<serde_json::Value>,
    ) -> TaskQueueResult<ReportOutcome> {
        let transition = StateTransition::complete(task_id, worker_id, result, Utc::now());
        match self.task_store.transition_state(&transition).await {
            Ok(task) => {
                metrics::record_completed(&task.queue_name);
                info!(
                    "任务 {} 由Worker {} 完成, 耗时 {}ms",
                    task_id,
                    worker_id,
                    task.processing_time_ms().unwrap_or_default()
                );
                Ok(ReportOutcome::Completed)
            }
            Err(e) if e.is_conflict() => {
                warn!("丢弃Worker {} 对任务 {} 的完成上报: {}", worker_id, task_id, e);
                Ok(ReportOutcome::Dropped)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn fail(
        &self,
        task_id: i64,
        worker_id: &str,
        error_message: &str,
    ) -> TaskQueueResult<ReportOutcome> {
        let task = self.task_store.get(task_id).await?;
        if !task.is_owned_by(worker_id) {
            warn!(
                "丢弃Worker {} 对任务 {} 的失败上报: 当前状态 {}, 持有者 {:?}",
                worker_id, task_id, task.status, task.worker_id
            );
            return Ok(ReportOutcome::Dropped);
        }

        let (decision, transition) =
            self.retry_policy
                .failure_transition(&task, error_message, Utc::now());
        match self.task_store.transition_state(&transition).await {
            Ok(_) => match decision {
                RetryDecision::Retry {
                    next_scheduled_at,
                    next_retries,
                    ..
                } => {
                    metrics::record_retry(&task.queue_name);
                    warn!(
                        "任务 {} 执行失败，第 {} 次重试安排在 {}: {}",
                        task_id, next_retries, next_scheduled_at, error_message
                    );
                    Ok(ReportOutcome::Retrying { next_scheduled_at })
                }
                RetryDecision::TerminalFail => {
                    metrics::record_failed(&task.queue_name);
                    warn!("任务 {} 最终失败: {}", task_id, error_message);
                    Ok(ReportOutcome::Failed)
                }
            },
            Err(e) if e.is_conflict() => {
                warn!("丢弃Worker {} 对任务 {} 的失败上报: {}", worker_id, task_id, e);
                Ok(ReportOutcome::Dropped)
            }
            Err(e) => Err(e),
        }
    }

    // ---- 日志 ----

    pub async fn append_log(&self, log: &TaskLog) -> TaskQueueResult<i64> {
        self.task_store.append_log(log).await
    }

    pub async fn list_logs(&self, task_id: i64) -> TaskQueueResult<Vec<TaskLog>> {
        self.task_store.list_logs(task_id).await
    }

    // ---- 统计 ----

    pub async fn get_stats(&self, queue_name: &str) -> TaskQueueResult<QueueStats> {
        self.stats.get_stats(queue_name).await
    }

    pub async fn list_stats(&self) -> TaskQueueResult<Vec<QueueStats>> {
        self.stats.list_stats().await
    }

    pub async fn recompute_stats(&self, queue_name: &str) -> TaskQueueResult<QueueStats> {
        self.stats.recompute(queue_name).await
    }

    // ---- 维护 ----

    pub async fn reclaim_expired(&self, now: DateTime<Utc>) -> TaskQueueResult<SweepReport> {
        self.lease_manager.reclaim_expired(now).await
    }

    pub async fn cleanup_terminal(&self, cutoff: DateTime<Utc>) -> TaskQueueResult<CleanupStats> {
        self.cleanup.cleanup_before(cutoff).await
    }
}
