use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use taskq_core::{Task, TaskQueueResult};
use taskq_dispatcher::{ReportOutcome, TaskQueueEngine};
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::handler::{HandlerRegistry, TaskContext};

/// 本地执行已领取的任务，并发由信号量限制
pub struct TaskExecutionManager {
    worker_id: String,
    engine: Arc<TaskQueueEngine>,
    handlers: Arc<HandlerRegistry>,
    max_concurrent_tasks: usize,
    semaphore: Arc<Semaphore>,
    running_tasks: Arc<RwLock<HashMap<i64, String>>>,
}

impl TaskExecutionManager {
    pub fn new(
        worker_id: String,
        engine: Arc<TaskQueueEngine>,
        handlers: Arc<HandlerRegistry>,
        max_concurrent_tasks: usize,
    ) -> Self {
        Self {
            worker_id,
            engine,
            handlers,
            max_concurrent_tasks,
            semaphore: Arc::new(Semaphore::new(max_concurrent_tasks)),
            running_tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn current_task_count(&self) -> i32 {
        self.running_tasks.read().await.len() as i32
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// 等待一个空闲槽位
    pub async fn acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().acquire_owned().await.ok()
    }

    /// 在后台执行任务，完成后释放槽位
    pub fn spawn(self: &Arc<Self>, task: Task, permit: OwnedSemaphorePermit) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let task_id = task.id;
            if let Err(e) = manager.execute(task).await {
                error!("上报任务 {} 的执行结果失败: {}", task_id, e);
            }
            drop(permit);
        })
    }

    /// 执行任务并上报结果
    pub async fn execute(&self, task: Task) -> TaskQueueResult<ReportOutcome> {
        let task_id = task.id;

        let Some(handler) = self.handlers.get(&task.name) else {
            warn!("没有任务 '{}' 的处理器，任务 {} 直接失败", task.name, task_id);
            return self
                .engine
                .fail(
                    task_id,
                    &self.worker_id,
                    &format!("no handler registered for task '{}'", task.name),
                )
                .await;
        };

        info!(
            "开始执行任务 {} ({}), 超时: {:?}s",
            task_id, task.name, task.timeout
        );
        {
            let mut running_tasks = self.running_tasks.write().await;
            running_tasks.insert(task_id, task.name.clone());
        }

        let timeout = task.timeout.filter(|secs| *secs > 0);
        let context = TaskContext {
            task,
            worker_id: self.worker_id.clone(),
        };
        let started = Instant::now();
        let result = match timeout {
            Some(secs) => {
                match tokio::time::timeout(
                    Duration::from_secs(secs as u64),
                    handler.handle(&context),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!("task timed out after {secs}s")),
                }
            }
            None => handler.handle(&context).await,
        };
        let elapsed = started.elapsed();

        {
            let mut running_tasks = self.running_tasks.write().await;
            running_tasks.remove(&task_id);
        }

        let outcome = match result {
            Ok(output) => {
                info!("任务 {} 执行成功, 耗时 {:?}", task_id, elapsed);
                self.engine.complete(task_id, &self.worker_id, output).await?
            }
            Err(e) => {
                warn!("任务 {} 执行失败, 耗时 {:?}: {:#}", task_id, elapsed, e);
                self.engine
                    .fail(task_id, &self.worker_id, &format!("{e:#}"))
                    .await?
            }
        };

        if outcome == ReportOutcome::Dropped {
            warn!("任务 {} 的执行结果已被丢弃，租约可能已被回收", task_id);
        }
        Ok(outcome)
    }

    /// 等待所有执行中的任务结束
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let permits = self.max_concurrent_tasks as u32;
        match tokio::time::timeout(timeout, self.semaphore.acquire_many(permits)).await {
            Ok(Ok(_permits)) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                warn!(
                    "等待执行中任务超时，仍有 {} 个任务未结束",
                    self.current_task_count().await
                );
                false
            }
        }
    }
}
