use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use taskq_core::config::DispatcherConfig;
use taskq_core::{
    StateTransition, Task, TaskQueueError, TaskQueueResult, TaskStore, WorkerInfo, WorkerRegistry,
};

use crate::metrics;

/// 任务领取调度器
///
/// 按 优先级 > scheduled_at > created_at 的顺序挑选候选任务，
/// 逐个尝试 CAS，冲突时继续下一个候选，保证同一任务只会被一个Worker领取。
pub struct TaskScheduler {
    task_store: Arc<dyn TaskStore>,
    worker_registry: Arc<dyn WorkerRegistry>,
    config: DispatcherConfig,
}

impl TaskScheduler {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        worker_registry: Arc<dyn WorkerRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            task_store,
            worker_registry,
            config,
        }
    }

    pub fn default_lease_seconds(&self) -> i64 {
        self.config.default_lease_seconds
    }

    /// 领取一个可执行任务，没有可领取的任务时返回 `None`
    ///
    /// `queue_names` 为空时使用Worker注册时声明的队列。
    pub async fn claim(
        &self,
        queue_names: &[String],
        worker_id: &str,
        lease_seconds: i64,
    ) -> TaskQueueResult<Option<Task>> {
        self.claim_at(queue_names, worker_id, lease_seconds, Utc::now())
            .await
    }

    pub async fn claim_at(
        &self,
        queue_names: &[String],
        worker_id: &str,
        lease_seconds: i64,
        now: DateTime<Utc>,
    ) -> TaskQueueResult<Option<Task>> {
        if lease_seconds < self.config.min_lease_seconds {
            return Err(TaskQueueError::Validation(format!(
                "租约 {}s 小于最短租约 {}s",
                lease_seconds, self.config.min_lease_seconds
            )));
        }

        let worker = self
            .worker_registry
            .get(worker_id)
            .await?
            .ok_or_else(|| TaskQueueError::WorkerNotFound {
                id: worker_id.to_string(),
            })?;

        if worker.is_stopped() {
            debug!("Worker {} 已停止，拒绝领取", worker_id);
            return Ok(None);
        }

        if let Err(e) = Self::check_capacity(&worker) {
            debug!("{}", e);
            return Ok(None);
        }

        let queues: &[String] = if queue_names.is_empty() {
            &worker.queues
        } else {
            queue_names
        };
        if queues.is_empty() {
            return Ok(None);
        }

        let candidates = self
            .task_store
            .find_candidates(queues, now, self.config.claim_scan_limit)
            .await?;
        debug!(
            "Worker {} 在队列 {:?} 中找到 {} 个候选任务",
            worker_id,
            queues,
            candidates.len()
        );

        for candidate in candidates {
            let transition = StateTransition::claim(
                &candidate,
                worker_id,
                Some(worker.hostname.as_str()),
                lease_seconds,
                now,
            );

            match self.task_store.transition_state(&transition).await {
                Ok(task) => {
                    metrics::record_claim(&task.queue_name);
                    info!(
                        "任务 {} ({}) 被Worker {} 领取, 租约 {}s",
                        task.id, task.name, worker_id, lease_seconds
                    );
                    return Ok(Some(task));
                }
                Err(e) if e.is_conflict() || e.is_not_found() => {
                    // 被其他Worker抢先领取、取消或已被清理
                    metrics::record_claim_conflict();
                    debug!("领取任务 {} 失败，尝试下一个候选: {}", candidate.id, e);
                }
                Err(e) => {
                    warn!("领取任务 {} 时出错: {}", candidate.id, e);
                    return Err(e);
                }
            }
        }

        Ok(None)
    }

    /// 检查Worker是否还有空闲槽位
    pub fn check_capacity(worker: &WorkerInfo) -> TaskQueueResult<()> {
        if worker.has_capacity() {
            Ok(())
        } else {
            Err(TaskQueueError::CapacityExceeded {
                worker_id: worker.worker_id.clone(),
                concurrency: worker.concurrency,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskq_core::{WorkerRegistration, WorkerStatus};

    #[test]
    fn test_check_capacity() {
        let registration =
            WorkerRegistration::new("w1", "host", vec!["default".to_string()], 2);
        let mut worker = WorkerInfo::new(registration, Utc::now());
        assert!(TaskScheduler::check_capacity(&worker).is_ok());

        worker.current_tasks = 2;
        let err = TaskScheduler::check_capacity(&worker).unwrap_err();
        assert!(matches!(
            err,
            TaskQueueError::CapacityExceeded { concurrency: 2, .. }
        ));

        worker.current_tasks = 0;
        worker.status = WorkerStatus::Stopped;
        assert!(TaskScheduler::check_capacity(&worker).is_err());
    }
}
