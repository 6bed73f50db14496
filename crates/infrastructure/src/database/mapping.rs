//! 行到领域模型的映射
//!
//! JSON 字段（payload、result、metadata、tags、queues）以文本形式存储。

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use taskq_core::{
    QueueStats, Task, TaskLog, TaskQueueError, TaskQueueResult, WorkerInfo,
};

/// tasks 表查询列
pub const TASK_COLUMNS: &str = "id, name, queue_name, priority, status, payload, result, \
    error_message, max_retries, current_retries, retry_delay, timeout, lease_seconds, \
    created_at, updated_at, scheduled_at, started_at, completed_at, worker_id, \
    worker_hostname, tags, metadata";

/// Worker查询列，`current_tasks` 由运行中任务实时统计
pub const WORKER_COLUMNS: &str = "w.worker_id, w.hostname, w.pid, w.queues, w.concurrency, \
    w.status, w.last_heartbeat, w.started_at, \
    (SELECT COUNT(*) FROM tasks t WHERE t.status = 'running' AND t.worker_id = w.worker_id) \
    AS current_tasks";

pub const STATS_COLUMNS: &str = "queue_name, pending, running, retrying, completed, failed, \
    cancelled, total_processing_ms, last_updated";

pub const LOG_COLUMNS: &str = "id, task_id, level, message, timestamp, worker_id, metadata";

/// 按优先级降序排列的 SQL 表达式
pub const PRIORITY_RANK_SQL: &str = "CASE priority WHEN 'critical' THEN 3 WHEN 'high' THEN 2 \
    WHEN 'normal' THEN 1 ELSE 0 END";

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn parse_json(row: &SqliteRow, field_name: &str) -> TaskQueueResult<serde_json::Value> {
        let json_str: String = row.try_get(field_name)?;
        serde_json::from_str(&json_str)
            .map_err(|e| TaskQueueError::Serialization(format!("解析{field_name}失败: {e}")))
    }

    pub fn parse_optional_json(
        row: &SqliteRow,
        field_name: &str,
    ) -> TaskQueueResult<Option<serde_json::Value>> {
        match row.try_get::<Option<String>, _>(field_name)? {
            Some(json_str) => serde_json::from_str(&json_str)
                .map(Some)
                .map_err(|e| TaskQueueError::Serialization(format!("解析{field_name}失败: {e}"))),
            None => Ok(None),
        }
    }

    pub fn parse_string_list(row: &SqliteRow, field_name: &str) -> TaskQueueResult<Vec<String>> {
        let json_str: String = row.try_get(field_name)?;
        serde_json::from_str(&json_str)
            .map_err(|e| TaskQueueError::Serialization(format!("解析{field_name}失败: {e}")))
    }

    pub fn to_json_text<T: serde::Serialize + ?Sized>(value: &T) -> TaskQueueResult<String> {
        Ok(serde_json::to_string(value)?)
    }

    pub fn row_to_task(row: &SqliteRow) -> TaskQueueResult<Task> {
        Ok(Task {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            queue_name: row.try_get("queue_name")?,
            priority: row.try_get("priority")?,
            status: row.try_get("status")?,
            payload: Self::parse_json(row, "payload")?,
            result: Self::parse_optional_json(row, "result")?,
            error_message: row.try_get("error_message")?,
            max_retries: row.try_get("max_retries")?,
            current_retries: row.try_get("current_retries")?,
            retry_delay: row.try_get("retry_delay")?,
            timeout: row.try_get("timeout")?,
            lease_seconds: row.try_get("lease_seconds")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            scheduled_at: row.try_get("scheduled_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            worker_id: row.try_get("worker_id")?,
            worker_hostname: row.try_get("worker_hostname")?,
            tags: Self::parse_string_list(row, "tags")?,
            metadata: Self::parse_json(row, "metadata")?,
        })
    }

    pub fn row_to_worker(row: &SqliteRow) -> TaskQueueResult<WorkerInfo> {
        let current_tasks: i64 = row.try_get("current_tasks")?;
        Ok(WorkerInfo {
            worker_id: row.try_get("worker_id")?,
            hostname: row.try_get("hostname")?,
            pid: row.try_get("pid")?,
            queues: Self::parse_string_list(row, "queues")?,
            concurrency: row.try_get("concurrency")?,
            current_tasks: i32::try_from(current_tasks).unwrap_or(i32::MAX),
            status: row.try_get("status")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            started_at: row.try_get("started_at")?,
        })
    }

    pub fn row_to_stats(row: &SqliteRow) -> TaskQueueResult<QueueStats> {
        Ok(QueueStats {
            queue_name: row.try_get("queue_name")?,
            pending: row.try_get("pending")?,
            running: row.try_get("running")?,
            retrying: row.try_get("retrying")?,
            completed: row.try_get("completed")?,
            failed: row.try_get("failed")?,
            cancelled: row.try_get("cancelled")?,
            total_processing_ms: row.try_get("total_processing_ms")?,
            last_updated: row.try_get("last_updated")?,
        })
    }

    pub fn row_to_log(row: &SqliteRow) -> TaskQueueResult<TaskLog> {
        Ok(TaskLog {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            level: row.try_get("level")?,
            message: row.try_get("message")?,
            timestamp: row.try_get("timestamp")?,
            worker_id: row.try_get("worker_id")?,
            metadata: Self::parse_json(row, "metadata")?,
        })
    }
}
