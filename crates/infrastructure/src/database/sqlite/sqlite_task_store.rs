use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use taskq_core::{
    ListOrder, QueueStats, StateTransition, Task, TaskFilter, TaskLog, TaskLogLevel,
    TaskQueueError, TaskQueueResult, TaskSpec, TaskStatus, TaskStore,
};
use tracing::{debug, instrument};

use super::sqlite_stats::{record_removal, record_submission, record_transition};
use crate::database::mapping::{MappingHelpers, LOG_COLUMNS, PRIORITY_RANK_SQL, TASK_COLUMNS};

/// 单页最大条数
const MAX_PAGE_SIZE: i64 = 1000;

pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert_log(conn: &mut SqliteConnection, entry: &TaskLog) -> TaskQueueResult<i64> {
        let metadata = MappingHelpers::to_json_text(&entry.metadata)?;
        let row = sqlx::query(
            r#"
            INSERT INTO task_logs (task_id, level, message, timestamp, worker_id, metadata)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(entry.task_id)
        .bind(entry.level)
        .bind(&entry.message)
        .bind(entry.timestamp)
        .bind(&entry.worker_id)
        .bind(metadata)
        .fetch_one(conn)
        .await?;

        Ok(row.try_get("id")?)
    }

    /// CAS未命中时查明原因
    async fn diagnose_miss(
        conn: &mut SqliteConnection,
        transition: &StateTransition,
    ) -> TaskQueueError {
        let row = sqlx::query(
            "SELECT status, worker_id, current_retries, scheduled_at FROM tasks WHERE id = ?",
        )
        .bind(transition.task_id)
        .fetch_optional(conn)
        .await;

        let row = match row {
            Ok(Some(row)) => row,
            Ok(None) => {
                return TaskQueueError::TaskNotFound {
                    id: transition.task_id,
                }
            }
            Err(e) => return TaskQueueError::Database(e),
        };

        let actual: TaskStatus = match row.try_get("status") {
            Ok(status) => status,
            Err(e) => return TaskQueueError::Database(e),
        };
        if actual != transition.expected_status {
            return TaskQueueError::Conflict {
                id: transition.task_id,
                expected: transition.expected_status,
                actual,
            };
        }

        let owner: Option<String> = row.try_get("worker_id").unwrap_or(None);
        if let Some(expected_worker) = &transition.expected_worker {
            if owner.as_deref() != Some(expected_worker.as_str()) {
                return TaskQueueError::OwnershipConflict {
                    id: transition.task_id,
                    expected: expected_worker.clone(),
                    actual: owner,
                };
            }
        }

        let retries: i32 = row.try_get("current_retries").unwrap_or_default();
        if let Some(expected_retries) = transition.expected_retries {
            if retries != expected_retries {
                return TaskQueueError::StaleSnapshot {
                    id: transition.task_id,
                    reason: format!("current_retries {expected_retries} -> {retries}"),
                };
            }
        }

        let scheduled_at: Option<DateTime<Utc>> = row.try_get("scheduled_at").ok();
        TaskQueueError::StaleSnapshot {
            id: transition.task_id,
            reason: match scheduled_at {
                Some(at) => format!(
                    "scheduled_at {} 晚于 {}",
                    at.to_rfc3339(),
                    transition.now.to_rfc3339()
                ),
                None => "scheduled_at 不满足".to_string(),
            },
        }
    }

    fn transition_log(transition: &StateTransition, task: &Task) -> TaskQueueResult<TaskLog> {
        let level = match transition.new_status {
            TaskStatus::Failed => TaskLogLevel::Error,
            TaskStatus::Retrying => TaskLogLevel::Warning,
            _ => TaskLogLevel::Info,
        };
        let message = transition.fields.log_message.clone().unwrap_or_else(|| {
            format!(
                "status {} -> {}",
                transition.expected_status, transition.new_status
            )
        });
        let worker_id = transition
            .fields
            .worker_id
            .clone()
            .or_else(|| transition.expected_worker.clone());

        let mut metadata = serde_json::json!({
            "from": transition.expected_status.as_str(),
            "to": transition.new_status.as_str(),
            "current_retries": task.current_retries,
        });
        if let Some(error) = &transition.fields.error_message {
            metadata["error"] = serde_json::Value::String(error.clone());
        }

        let mut entry = TaskLog::new(task.id, level, message)
            .with_metadata(metadata)
            .at(transition.now);
        entry.worker_id = worker_id;
        Ok(entry)
    }

    fn push_filter<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filter: &'a TaskFilter) {
        builder.push(" WHERE 1 = 1");

        if let Some(queue_name) = &filter.queue_name {
            builder.push(" AND queue_name = ").push_bind(queue_name);
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(priority) = filter.priority {
            builder.push(" AND priority = ").push_bind(priority);
        }
        if let Some(worker_id) = &filter.worker_id {
            builder.push(" AND worker_id = ").push_bind(worker_id);
        }
        if let Some(tag) = &filter.tag {
            builder
                .push(" AND EXISTS (SELECT 1 FROM json_each(tasks.tags) WHERE json_each.value = ")
                .push_bind(tag)
                .push(")");
        }
        if let Some(pattern) = &filter.name_pattern {
            builder
                .push(" AND name LIKE ")
                .push_bind(format!("%{pattern}%"));
        }
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    #[instrument(skip(self, spec), fields(task_name = %spec.name, queue = %spec.queue_name))]
    async fn submit(&self, spec: &TaskSpec) -> TaskQueueResult<i64> {
        spec.validate()?;

        let now = Utc::now();
        let scheduled_at = spec.scheduled_at.unwrap_or(now);
        let payload = MappingHelpers::to_json_text(&spec.payload)?;
        let tags = MappingHelpers::to_json_text(&spec.tags)?;
        let metadata = MappingHelpers::to_json_text(&spec.metadata)?;

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO tasks (
                name, queue_name, priority, status, payload, max_retries, current_retries,
                retry_delay, timeout, created_at, updated_at, scheduled_at, tags, metadata
            )
            VALUES (?, ?, ?, 'pending', ?, ?, 0, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&spec.name)
        .bind(&spec.queue_name)
        .bind(spec.priority)
        .bind(payload)
        .bind(spec.max_retries)
        .bind(spec.retry_delay)
        .bind(spec.timeout)
        .bind(now)
        .bind(now)
        .bind(scheduled_at)
        .bind(tags)
        .bind(metadata)
        .fetch_one(&mut *tx)
        .await?;
        let task_id: i64 = row.try_get("id")?;

        record_submission(&mut tx, &spec.queue_name, now).await?;

        let entry = TaskLog::new(task_id, TaskLogLevel::Info, "submitted")
            .with_metadata(serde_json::json!({ "priority": spec.priority.as_str() }))
            .at(now);
        Self::insert_log(&mut tx, &entry).await?;

        tx.commit().await?;

        debug!(
            "提交任务成功: ID {}, 名称: {}, 队列: {}",
            task_id, spec.name, spec.queue_name
        );
        Ok(task_id)
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn get(&self, task_id: i64) -> TaskQueueResult<Task> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => MappingHelpers::row_to_task(&row),
            None => {
                debug!("查询任务不存在: ID {}", task_id);
                Err(TaskQueueError::TaskNotFound { id: task_id })
            }
        }
    }

    #[instrument(skip(self, filter))]
    async fn list(
        &self,
        filter: &TaskFilter,
        limit: i64,
        offset: i64,
    ) -> TaskQueueResult<Vec<Task>> {
        if limit <= 0 || limit > MAX_PAGE_SIZE {
            return Err(TaskQueueError::Validation(format!(
                "limit必须在1到{MAX_PAGE_SIZE}之间: {limit}"
            )));
        }
        if offset < 0 {
            return Err(TaskQueueError::Validation(format!(
                "offset不能为负数: {offset}"
            )));
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {TASK_COLUMNS} FROM tasks"));
        Self::push_filter(&mut builder, filter);
        builder.push(match filter.order {
            ListOrder::CreatedDesc => " ORDER BY created_at DESC, id DESC",
            ListOrder::CreatedAsc => " ORDER BY created_at ASC, id ASC",
        });
        builder.push(" LIMIT ").push_bind(limit);
        builder.push(" OFFSET ").push_bind(offset);

        let rows = builder.build().fetch_all(&self.pool).await?;
        let tasks = rows
            .iter()
            .map(MappingHelpers::row_to_task)
            .collect::<TaskQueueResult<Vec<_>>>()?;

        debug!("查询任务列表: 返回{}条", tasks.len());
        Ok(tasks)
    }

    #[instrument(skip(self, transition), fields(
        task_id = %transition.task_id,
        from = %transition.expected_status,
        to = %transition.new_status,
    ))]
    async fn transition_state(&self, transition: &StateTransition) -> TaskQueueResult<Task> {
        transition.validate()?;

        let now = transition.now;
        let new_status = transition.new_status;
        let fields = &transition.fields;
        let entering_running = new_status == TaskStatus::Running;

        let (worker_id, worker_hostname, lease_seconds) = if entering_running {
            (
                fields.worker_id.clone(),
                fields.worker_hostname.clone(),
                fields.lease_seconds,
            )
        } else {
            (None, None, None)
        };
        let started_at = entering_running.then_some(now);
        let completed_at = new_status.is_terminal().then_some(now);
        let result = fields
            .result
            .as_ref()
            .map(MappingHelpers::to_json_text)
            .transpose()?;

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE tasks SET status = ");
        builder.push_bind(new_status);
        builder.push(", worker_id = ").push_bind(worker_id);
        builder.push(", worker_hostname = ").push_bind(worker_hostname);
        builder.push(", lease_seconds = ").push_bind(lease_seconds);
        builder
            .push(", started_at = COALESCE(")
            .push_bind(started_at)
            .push(", started_at)");
        builder.push(", completed_at = ").push_bind(completed_at);
        builder
            .push(", scheduled_at = COALESCE(")
            .push_bind(fields.scheduled_at)
            .push(", scheduled_at)");
        builder
            .push(", current_retries = MAX(current_retries, COALESCE(")
            .push_bind(fields.current_retries)
            .push(", current_retries))");
        builder
            .push(", result = COALESCE(")
            .push_bind(result)
            .push(", result)");
        builder
            .push(", error_message = COALESCE(")
            .push_bind(fields.error_message.clone())
            .push(", error_message)");
        builder.push(", updated_at = ").push_bind(now);
        builder.push(" WHERE id = ").push_bind(transition.task_id);
        builder
            .push(" AND status = ")
            .push_bind(transition.expected_status);
        if let Some(expected_worker) = &transition.expected_worker {
            builder.push(" AND worker_id = ").push_bind(expected_worker.clone());
        }
        if let Some(expected_retries) = transition.expected_retries {
            builder
                .push(" AND current_retries = ")
                .push_bind(expected_retries);
        }
        if entering_running {
            builder.push(" AND scheduled_at <= ").push_bind(now);
        }
        builder.push(format!(" RETURNING {TASK_COLUMNS}"));

        let mut tx = self.pool.begin().await?;

        let row = builder.build().fetch_optional(&mut *tx).await?;
        let task = match row {
            Some(row) => MappingHelpers::row_to_task(&row)?,
            None => {
                let err = Self::diagnose_miss(&mut tx, transition).await;
                debug!("状态流转未命中: {}", err);
                return Err(err);
            }
        };

        let processing_ms = match new_status {
            TaskStatus::Completed | TaskStatus::Failed => task.processing_time_ms().unwrap_or(0),
            _ => 0,
        };
        record_transition(
            &mut tx,
            &task.queue_name,
            transition.expected_status,
            new_status,
            processing_ms,
            now,
        )
        .await?;

        let entry = Self::transition_log(transition, &task)?;
        Self::insert_log(&mut tx, &entry).await?;

        tx.commit().await?;

        debug!(
            "任务状态流转成功: ID {}, {} -> {}",
            task.id, transition.expected_status, new_status
        );
        Ok(task)
    }

    #[instrument(skip(self, queues), fields(queue_count = queues.len()))]
    async fn find_candidates(
        &self,
        queues: &[String],
        now: DateTime<Utc>,
        limit: i64,
    ) -> TaskQueueResult<Vec<Task>> {
        if queues.is_empty() || limit <= 0 {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status IN ('pending', 'retrying') \
             AND scheduled_at <= "
        ));
        builder.push_bind(now);
        builder.push(" AND queue_name IN (");
        let mut separated = builder.separated(", ");
        for queue in queues {
            separated.push_bind(queue);
        }
        separated.push_unseparated(")");
        builder.push(format!(
            " ORDER BY {PRIORITY_RANK_SQL} DESC, scheduled_at ASC, created_at ASC, id ASC LIMIT "
        ));
        builder.push_bind(limit);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(MappingHelpers::row_to_task).collect()
    }

    async fn list_running(&self) -> TaskQueueResult<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = 'running' ORDER BY started_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(MappingHelpers::row_to_task).collect()
    }

    #[instrument(skip(self))]
    async fn delete_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        batch: i64,
    ) -> TaskQueueResult<u64> {
        if batch <= 0 {
            return Err(TaskQueueError::Validation(format!(
                "batch必须大于0: {batch}"
            )));
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            DELETE FROM tasks WHERE id IN (
                SELECT id FROM tasks
                WHERE status IN ('completed', 'failed', 'cancelled') AND completed_at < ?
                ORDER BY completed_at ASC
                LIMIT ?
            )
            RETURNING id, queue_name, status, started_at, completed_at
            "#,
        )
        .bind(cutoff)
        .bind(batch)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        let mut removed: BTreeMap<String, QueueStats> = BTreeMap::new();
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            let queue_name: String = row.try_get("queue_name")?;
            let status: TaskStatus = row.try_get("status")?;
            let started_at: Option<DateTime<Utc>> = row.try_get("started_at")?;
            let completed_at: Option<DateTime<Utc>> = row.try_get("completed_at")?;
            let processing_ms = match (started_at, completed_at) {
                (Some(started), Some(completed)) => Some((completed - started).num_milliseconds()),
                _ => None,
            };
            removed
                .entry(queue_name.clone())
                .or_insert_with(|| QueueStats::empty(queue_name))
                .accumulate(status, processing_ms);
            ids.push(id);
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM task_logs WHERE task_id IN (");
        let mut separated = builder.separated(", ");
        for id in &ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        builder.build().execute(&mut *tx).await?;

        record_removal(&mut tx, &removed, now).await?;

        tx.commit().await?;

        debug!("清理终止任务: {}条", ids.len());
        Ok(ids.len() as u64)
    }

    async fn append_log(&self, entry: &TaskLog) -> TaskQueueResult<i64> {
        if entry.message.trim().is_empty() {
            return Err(TaskQueueError::Validation("日志内容不能为空".to_string()));
        }

        let mut conn = self.pool.acquire().await?;
        let id = Self::insert_log(&mut conn, entry).await?;
        debug!("追加任务日志: task {}, log {}", entry.task_id, id);
        Ok(id)
    }

    async fn list_logs(&self, task_id: i64) -> TaskQueueResult<Vec<TaskLog>> {
        let sql = format!("SELECT {LOG_COLUMNS} FROM task_logs WHERE task_id = ? ORDER BY id ASC");
        let rows = sqlx::query(&sql)
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(MappingHelpers::row_to_log).collect()
    }
}
