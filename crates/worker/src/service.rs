use std::sync::Arc;
use std::time::Duration;

use taskq_core::config::WorkerConfig;
use taskq_core::{Task, TaskQueueResult, WorkerRegistration};
use taskq_dispatcher::{ReportOutcome, TaskQueueEngine};
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::components::{HeartbeatManager, TaskExecutionManager};
use crate::handler::HandlerRegistry;

/// Worker运行时
///
/// 注册、心跳、轮询领取并在本地执行任务；收到关闭信号后停止领取，
/// 等待执行中的任务结束（有上限）再注销。
pub struct WorkerService {
    worker_id: String,
    queues: Vec<String>,
    lease_seconds: Option<i64>,
    poll_interval: Duration,
    shutdown_timeout: Duration,
    engine: Arc<TaskQueueEngine>,
    execution: Arc<TaskExecutionManager>,
    heartbeat: Arc<HeartbeatManager>,
}

impl WorkerService {
    pub fn new(
        engine: Arc<TaskQueueEngine>,
        config: &WorkerConfig,
        handlers: HandlerRegistry,
    ) -> Self {
        let hostname = config.hostname.clone().unwrap_or_else(local_hostname);
        let worker_id = config
            .worker_id
            .clone()
            .unwrap_or_else(|| generate_worker_id(&hostname));
        let concurrency = config.concurrency.max(1);

        let execution = Arc::new(TaskExecutionManager::new(
            worker_id.clone(),
            Arc::clone(&engine),
            Arc::new(handlers),
            concurrency as usize,
        ));
        let registration = WorkerRegistration::new(
            worker_id.clone(),
            hostname,
            config.queues.clone(),
            concurrency,
        )
        .with_pid(std::process::id() as i64);
        let heartbeat = Arc::new(HeartbeatManager::new(
            Arc::clone(&engine),
            registration,
            config.heartbeat_interval_seconds,
            Arc::clone(&execution),
        ));

        Self {
            worker_id,
            queues: config.queues.clone(),
            lease_seconds: config.lease_seconds,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_seconds),
            engine,
            execution,
            heartbeat,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub async fn register(&self) -> TaskQueueResult<()> {
        self.heartbeat.register().await
    }

    /// 领取一个任务并就地执行，没有任务时返回 `None`
    pub async fn run_once(&self) -> TaskQueueResult<Option<ReportOutcome>> {
        match self.claim().await? {
            Some(task) => Ok(Some(self.execution.execute(task).await?)),
            None => Ok(None),
        }
    }

    async fn claim(&self) -> TaskQueueResult<Option<Task>> {
        match self
            .engine
            .claim(&self.queues, &self.worker_id, self.lease_seconds)
            .await
        {
            Ok(task) => Ok(task),
            Err(e) if e.is_not_found() => {
                warn!("Worker {} 未注册，重新注册", self.worker_id);
                self.register().await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// 运行直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> TaskQueueResult<()> {
        self.register().await?;
        info!(
            "Worker {} started (队列: {:?}, 空闲槽位: {})",
            self.worker_id,
            self.queues,
            self.execution.available_slots()
        );

        let heartbeat = Arc::clone(&self.heartbeat);
        let heartbeat_rx = shutdown_rx.resubscribe();
        let heartbeat_handle = tokio::spawn(async move { heartbeat.run(heartbeat_rx).await });

        loop {
            let permit = tokio::select! {
                permit = self.execution.acquire_slot() => match permit {
                    Some(permit) => permit,
                    None => break,
                },
                _ = shutdown_rx.recv() => break,
            };

            match self.claim().await {
                Ok(Some(task)) => {
                    debug!("Worker {} 领取到任务 {}", self.worker_id, task.id);
                    self.execution.spawn(task, permit);
                    continue;
                }
                Ok(None) => drop(permit),
                Err(e) => {
                    drop(permit);
                    error!("领取任务失败: {}", e);
                }
            }

            tokio::select! {
                _ = sleep(self.poll_interval) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        info!("Worker {} 停止领取，等待执行中的任务结束", self.worker_id);
        if !self.execution.wait_idle(self.shutdown_timeout).await {
            warn!("部分任务未在关闭超时内结束，将由租约回收处理");
        }
        if let Err(e) = heartbeat_handle.await {
            error!("心跳任务异常退出: {}", e);
        }

        if let Err(e) = self.engine.deregister_worker(&self.worker_id).await {
            warn!("注销Worker {} 失败: {}", self.worker_id, e);
        }
        info!("Worker {} stopped", self.worker_id);
        Ok(())
    }
}

fn local_hostname() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn generate_worker_id(hostname: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", hostname, &suffix[..8])
}
