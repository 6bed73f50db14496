use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use taskq_core::config::DispatcherConfig;
use taskq_core::{
    Task, TaskQueueResult, TaskStore, WorkerHeartbeat, WorkerInfo, WorkerRegistry,
};

use crate::metrics;
use crate::retry_policy::{RetryDecision, RetryPolicy};

/// 一次租约回收的结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// 转入 retrying 的任务数
    pub retried: usize,
    /// 重试耗尽转入 failed 的任务数
    pub failed: usize,
    /// 回收时CAS失败（任务已被完成或重新分配）的任务数
    pub skipped: usize,
    pub errors: usize,
    /// 本轮被标记为停止的Worker数
    pub workers_stopped: usize,
    pub workers_purged: u64,
}

impl SweepReport {
    pub fn reclaimed(&self) -> usize {
        self.retried + self.failed
    }

    pub fn is_empty(&self) -> bool {
        *self == SweepReport::default()
    }
}

/// 租约管理器
///
/// 接收Worker心跳，周期性回收租约过期的运行中任务。租约起点取领取时间
/// 与持有者最近一次心跳中的较晚者，持有者已被删除时只看领取时间。
/// 任务被回收时其持有者同样被视为失联并标记为停止，之后的心跳会被拒绝。
pub struct LeaseManager {
    task_store: Arc<dyn TaskStore>,
    worker_registry: Arc<dyn WorkerRegistry>,
    retry_policy: Arc<RetryPolicy>,
    config: DispatcherConfig,
}

impl LeaseManager {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        worker_registry: Arc<dyn WorkerRegistry>,
        retry_policy: Arc<RetryPolicy>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            task_store,
            worker_registry,
            retry_policy,
            config,
        }
    }

    /// 记录Worker心跳，Worker已停止时返回 `false`
    pub async fn heartbeat(&self, worker_id: &str, current_tasks: i32) -> TaskQueueResult<bool> {
        let accepted = self
            .worker_registry
            .heartbeat(&WorkerHeartbeat::new(worker_id, current_tasks))
            .await?;
        if !accepted {
            warn!("拒绝已停止Worker {} 的心跳", worker_id);
        }
        Ok(accepted)
    }

    /// 执行一轮回收
    pub async fn reclaim_expired(&self, now: DateTime<Utc>) -> TaskQueueResult<SweepReport> {
        let mut report = SweepReport::default();
        let mut stopped: HashSet<String> = HashSet::new();

        // 1. 心跳超时的Worker标记为停止
        let stale = self
            .worker_registry
            .list_stale(now, self.config.worker_staleness_seconds)
            .await?;
        for worker_id in stale {
            warn!(
                "Worker {} 超过 {}s 没有心跳，标记为停止",
                worker_id, self.config.worker_staleness_seconds
            );
            self.stop_worker(&worker_id, &mut stopped, &mut report).await;
        }

        // 2. 回收租约过期的任务
        let workers: HashMap<String, WorkerInfo> = self
            .worker_registry
            .list()
            .await?
            .into_iter()
            .map(|worker| (worker.worker_id.clone(), worker))
            .collect();

        for task in self.task_store.list_running().await? {
            let owner_heartbeat = task
                .worker_id
                .as_ref()
                .and_then(|id| workers.get(id))
                .map(|worker| worker.last_heartbeat);
            if !task.is_lease_expired(owner_heartbeat, now) {
                continue;
            }

            match self.reclaim_task(&task, now).await {
                Ok(Some(RetryDecision::Retry { .. })) => report.retried += 1,
                Ok(Some(RetryDecision::TerminalFail)) => report.failed += 1,
                Ok(None) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!("回收任务 {} 的租约时出错: {}", task.id, e);
                    report.errors += 1;
                    continue;
                }
            }

            if let Some(owner) = task.worker_id.as_ref().and_then(|id| workers.get(id)) {
                if !owner.is_stopped() && !stopped.contains(&owner.worker_id) {
                    warn!("Worker {} 的租约已过期，标记为停止", owner.worker_id);
                    self.stop_worker(&owner.worker_id, &mut stopped, &mut report)
                        .await;
                }
            }
        }

        // 3. 清理停止已久的Worker
        if self.config.stopped_worker_purge_seconds > 0 {
            let before = now - Duration::seconds(self.config.stopped_worker_purge_seconds);
            match self.worker_registry.remove_stopped_before(before).await {
                Ok(purged) => report.workers_purged = purged,
                Err(e) => {
                    error!("清理已停止Worker时出错: {}", e);
                    report.errors += 1;
                }
            }
        }

        if report.reclaimed() > 0 || report.workers_stopped > 0 || report.workers_purged > 0 {
            info!(
                "租约回收完成: 重试 {}, 失败 {}, 跳过 {}, 停止Worker {}, 清理Worker {}",
                report.retried,
                report.failed,
                report.skipped,
                report.workers_stopped,
                report.workers_purged
            );
        } else {
            debug!("租约回收完成: 没有过期任务");
        }

        Ok(report)
    }

    /// 回收单个任务，CAS失败时返回 `None`
    async fn reclaim_task(
        &self,
        task: &Task,
        now: DateTime<Utc>,
    ) -> TaskQueueResult<Option<RetryDecision>> {
        let error_message = format!(
            "lease expired: worker {} did not renew within {}s",
            task.worker_id.as_deref().unwrap_or("unknown"),
            task.lease_seconds.unwrap_or_default()
        );
        let (decision, transition) = self
            .retry_policy
            .failure_transition(task, &error_message, now);

        match self.task_store.transition_state(&transition).await {
            Ok(_) => {
                metrics::record_lease_reclaimed(&task.queue_name);
                match &decision {
                    RetryDecision::Retry {
                        next_scheduled_at, ..
                    } => {
                        metrics::record_retry(&task.queue_name);
                        warn!(
                            "任务 {} 租约过期，将于 {} 重试",
                            task.id, next_scheduled_at
                        );
                    }
                    RetryDecision::TerminalFail => {
                        metrics::record_failed(&task.queue_name);
                        warn!("任务 {} 租约过期且重试次数已用尽", task.id);
                    }
                }
                Ok(Some(decision))
            }
            Err(e) if e.is_conflict() || e.is_not_found() => {
                debug!("任务 {} 在回收前已发生变化: {}", task.id, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn stop_worker(
        &self,
        worker_id: &str,
        stopped: &mut HashSet<String>,
        report: &mut SweepReport,
    ) {
        match self.worker_registry.mark_stopped(worker_id).await {
            Ok(()) => {
                stopped.insert(worker_id.to_string());
                report.workers_stopped += 1;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                error!("标记Worker {} 停止时出错: {}", worker_id, e);
                report.errors += 1;
            }
        }
    }

    /// 周期性回收，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("Lease sweeper is disabled");
            return;
        }

        info!(
            "Starting lease sweeper (间隔: {}s)",
            self.config.sweep_interval_seconds
        );
        let mut ticker = interval(StdDuration::from_secs(self.config.sweep_interval_seconds));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reclaim_expired(Utc::now()).await {
                        error!("Lease sweep failed: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Lease sweeper shutdown requested");
                    break;
                }
            }
        }

        info!("Lease sweeper stopped");
    }
}
