use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use taskq_core::{
    TaskQueueError, TaskQueueResult, WorkerHeartbeat, WorkerInfo, WorkerRegistration,
    WorkerRegistry, WorkerStatus,
};
use tracing::{debug, info, instrument};

use crate::database::mapping::{MappingHelpers, WORKER_COLUMNS};

pub struct SqliteWorkerRegistry {
    pool: SqlitePool,
}

impl SqliteWorkerRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn exists(&self, worker_id: &str) -> TaskQueueResult<bool> {
        let row = sqlx::query("SELECT 1 AS found FROM workers WHERE worker_id = ?")
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl WorkerRegistry for SqliteWorkerRegistry {
    #[instrument(skip(self, registration), fields(worker_id = %registration.worker_id))]
    async fn register(&self, registration: &WorkerRegistration) -> TaskQueueResult<WorkerInfo> {
        registration.validate()?;

        let now = Utc::now();
        let queues = MappingHelpers::to_json_text(&registration.queues)?;

        sqlx::query(
            r#"
            INSERT INTO workers (worker_id, hostname, pid, queues, concurrency, status, last_heartbeat, started_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(worker_id) DO UPDATE SET
                hostname = excluded.hostname,
                pid = excluded.pid,
                queues = excluded.queues,
                concurrency = excluded.concurrency,
                status = excluded.status,
                last_heartbeat = excluded.last_heartbeat
            "#,
        )
        .bind(&registration.worker_id)
        .bind(&registration.hostname)
        .bind(registration.pid)
        .bind(queues)
        .bind(registration.concurrency)
        .bind(WorkerStatus::Active)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let worker = self
            .get(&registration.worker_id)
            .await?
            .ok_or_else(|| TaskQueueError::WorkerNotFound {
                id: registration.worker_id.clone(),
            })?;

        info!(
            "Worker注册成功: {} ({}), 队列: {:?}, 并发: {}",
            worker.worker_id, worker.hostname, worker.queues, worker.concurrency
        );
        Ok(worker)
    }

    async fn heartbeat(&self, heartbeat: &WorkerHeartbeat) -> TaskQueueResult<bool> {
        let status = WorkerStatus::from_task_count(heartbeat.current_tasks);

        let result = sqlx::query(
            "UPDATE workers SET last_heartbeat = ?, status = ? \
             WHERE worker_id = ? AND status != 'stopped'",
        )
        .bind(heartbeat.timestamp)
        .bind(status)
        .bind(&heartbeat.worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!(
                "更新Worker心跳: {}, 当前任务数: {}",
                heartbeat.worker_id, heartbeat.current_tasks
            );
            return Ok(true);
        }

        if self.exists(&heartbeat.worker_id).await? {
            debug!("拒绝已停止Worker的心跳: {}", heartbeat.worker_id);
            Ok(false)
        } else {
            Err(TaskQueueError::WorkerNotFound {
                id: heartbeat.worker_id.clone(),
            })
        }
    }

    async fn deregister(&self, worker_id: &str) -> TaskQueueResult<()> {
        let result = sqlx::query("UPDATE workers SET status = 'stopped' WHERE worker_id = ?")
            .bind(worker_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(TaskQueueError::WorkerNotFound {
                id: worker_id.to_string(),
            });
        }

        info!("Worker已注销: {}", worker_id);
        Ok(())
    }

    async fn get(&self, worker_id: &str) -> TaskQueueResult<Option<WorkerInfo>> {
        let sql = format!("SELECT {WORKER_COLUMNS} FROM workers w WHERE w.worker_id = ?");
        let row = sqlx::query(&sql)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(MappingHelpers::row_to_worker).transpose()
    }

    async fn list(&self) -> TaskQueueResult<Vec<WorkerInfo>> {
        let sql = format!("SELECT {WORKER_COLUMNS} FROM workers w ORDER BY w.worker_id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(MappingHelpers::row_to_worker).collect()
    }

    async fn list_stale(
        &self,
        now: DateTime<Utc>,
        staleness_seconds: i64,
    ) -> TaskQueueResult<Vec<String>> {
        let cutoff = now - Duration::seconds(staleness_seconds);
        let rows = sqlx::query(
            "SELECT worker_id FROM workers \
             WHERE status != 'stopped' AND last_heartbeat < ? ORDER BY worker_id",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("worker_id").map_err(TaskQueueError::from))
            .collect()
    }

    async fn mark_stopped(&self, worker_id: &str) -> TaskQueueResult<()> {
        let result = sqlx::query(
            "UPDATE workers SET status = 'stopped' WHERE worker_id = ? AND status != 'stopped'",
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && !self.exists(worker_id).await? {
            return Err(TaskQueueError::WorkerNotFound {
                id: worker_id.to_string(),
            });
        }

        debug!("Worker标记为停止: {}", worker_id);
        Ok(())
    }

    async fn remove_stopped_before(&self, before: DateTime<Utc>) -> TaskQueueResult<u64> {
        let result =
            sqlx::query("DELETE FROM workers WHERE status = 'stopped' AND last_heartbeat < ?")
                .bind(before)
                .execute(&self.pool)
                .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            debug!("删除长期停止的Worker: {}个", removed);
        }
        Ok(removed)
    }

    async fn remove(&self, worker_id: &str) -> TaskQueueResult<()> {
        let result = sqlx::query("DELETE FROM workers WHERE worker_id = ?")
            .bind(worker_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(TaskQueueError::WorkerNotFound {
                id: worker_id.to_string(),
            });
        }

        debug!("删除Worker: {}", worker_id);
        Ok(())
    }
}
