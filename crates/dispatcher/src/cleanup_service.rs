use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use taskq_core::config::CleanupConfig;
use taskq_core::{TaskQueueResult, TaskStore};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info};

/// 单次清理最多执行的批次数，避免长时间占用写锁
const MAX_BATCHES_PER_RUN: usize = 100;

/// 终止任务清理服务
///
/// 按 `completed_at` 删除过期的 completed/failed/cancelled 任务及其日志，
/// 统计计数在同一事务中扣减。只触及终止状态的行，可与调度并发运行。
pub struct CleanupService {
    task_store: Arc<dyn TaskStore>,
    config: CleanupConfig,
}

/// 清理统计信息
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CleanupStats {
    pub deleted: u64,
    pub batches: usize,
    pub cutoff: Option<DateTime<Utc>>,
}

impl CleanupService {
    pub fn new(task_store: Arc<dyn TaskStore>, config: CleanupConfig) -> Self {
        Self { task_store, config }
    }

    /// 删除 `completed_at` 早于 `cutoff` 的终止任务
    pub async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> TaskQueueResult<CleanupStats> {
        let mut stats = CleanupStats {
            cutoff: Some(cutoff),
            ..CleanupStats::default()
        };

        while stats.batches < MAX_BATCHES_PER_RUN {
            let deleted = self
                .task_store
                .delete_terminal_before(cutoff, self.config.batch_size)
                .await?;
            stats.batches += 1;
            stats.deleted += deleted;

            if (deleted as i64) < self.config.batch_size {
                break;
            }
        }

        if stats.deleted > 0 {
            info!(
                "清理终止任务完成: 删除{}条 (批次: {}, 截止: {})",
                stats.deleted, stats.batches, cutoff
            );
        } else {
            debug!("没有需要清理的终止任务 (截止: {})", cutoff);
        }
        Ok(stats)
    }

    /// 按保留时长执行一次清理
    pub async fn cleanup_once(&self, now: DateTime<Utc>) -> TaskQueueResult<CleanupStats> {
        let cutoff = now - Duration::hours(self.config.retention_hours);
        self.cleanup_before(cutoff).await
    }

    /// 周期性清理，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("Cleanup service is disabled");
            return;
        }

        info!(
            "Starting cleanup service (间隔: {}s, 保留: {}h)",
            self.config.interval_seconds, self.config.retention_hours
        );
        let mut ticker = interval(StdDuration::from_secs(self.config.interval_seconds));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.cleanup_once(Utc::now()).await {
                        error!("Cleanup failed: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Cleanup service shutdown requested");
                    break;
                }
            }
        }

        info!("Cleanup service stopped");
    }
}
