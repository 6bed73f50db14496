use std::sync::Arc;
use std::time::Duration;

use taskq_core::{TaskQueueResult, WorkerRegistration};
use taskq_dispatcher::TaskQueueEngine;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::TaskExecutionManager;

/// 周期性上报心跳，心跳被拒绝时重新注册
pub struct HeartbeatManager {
    engine: Arc<TaskQueueEngine>,
    registration: WorkerRegistration,
    heartbeat_interval_seconds: u64,
    execution: Arc<TaskExecutionManager>,
}

impl HeartbeatManager {
    pub fn new(
        engine: Arc<TaskQueueEngine>,
        registration: WorkerRegistration,
        heartbeat_interval_seconds: u64,
        execution: Arc<TaskExecutionManager>,
    ) -> Self {
        Self {
            engine,
            registration,
            heartbeat_interval_seconds,
            execution,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.registration.worker_id
    }

    pub async fn register(&self) -> TaskQueueResult<()> {
        self.engine.register_worker(&self.registration).await?;
        Ok(())
    }

    /// 发送一次心跳，返回是否重新注册过
    pub async fn beat(&self) -> TaskQueueResult<bool> {
        let current_tasks = self.execution.current_task_count().await;
        match self.engine.heartbeat(self.worker_id(), current_tasks).await {
            Ok(true) => {
                debug!("Worker {} 心跳成功 (运行中: {})", self.worker_id(), current_tasks);
                Ok(false)
            }
            Ok(false) => {
                warn!("Worker {} 已被标记为停止，重新注册", self.worker_id());
                self.register().await?;
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                warn!("Worker {} 注册信息已被清理，重新注册", self.worker_id());
                self.register().await?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.heartbeat_interval_seconds));
        // 第一次 tick 立即返回，注册时已刷新过心跳
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.beat().await {
                        error!("Failed to send heartbeat: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Heartbeat task shutting down");
                    break;
                }
            }
        }
    }
}
