use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use taskq_core::{QueueStats, StatsAggregator, TaskQueueResult, TaskStatus};
use tracing::{debug, instrument};

use crate::database::mapping::{MappingHelpers, STATS_COLUMNS};

/// 状态对应的计数列
fn stats_column(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Retrying => "retrying",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
    }
}

/// 新任务入队：pending 加一
pub(crate) async fn record_submission(
    conn: &mut SqliteConnection,
    queue_name: &str,
    now: DateTime<Utc>,
) -> TaskQueueResult<()> {
    sqlx::query(
        r#"
        INSERT INTO queue_stats (queue_name, pending, last_updated)
        VALUES (?, 1, ?)
        ON CONFLICT(queue_name) DO UPDATE SET
            pending = pending + 1,
            last_updated = excluded.last_updated
        "#,
    )
    .bind(queue_name)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

/// 状态流转：旧桶减一，新桶加一
pub(crate) async fn record_transition(
    conn: &mut SqliteConnection,
    queue_name: &str,
    from: TaskStatus,
    to: TaskStatus,
    processing_ms: i64,
    now: DateTime<Utc>,
) -> TaskQueueResult<()> {
    sqlx::query(
        "INSERT INTO queue_stats (queue_name, last_updated) VALUES (?, ?) \
         ON CONFLICT(queue_name) DO NOTHING",
    )
    .bind(queue_name)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let from_col = stats_column(from);
    let to_col = stats_column(to);
    let sql = format!(
        "UPDATE queue_stats SET {from_col} = {from_col} - 1, {to_col} = {to_col} + 1, \
         total_processing_ms = total_processing_ms + ?, last_updated = ? \
         WHERE queue_name = ?"
    );
    sqlx::query(&sql)
        .bind(processing_ms)
        .bind(now)
        .bind(queue_name)
        .execute(conn)
        .await?;
    Ok(())
}

/// 删除终止任务后扣减对应计数
pub(crate) async fn record_removal(
    conn: &mut SqliteConnection,
    removed: &BTreeMap<String, QueueStats>,
    now: DateTime<Utc>,
) -> TaskQueueResult<()> {
    for (queue_name, delta) in removed {
        sqlx::query(
            r#"
            UPDATE queue_stats SET
                completed = completed - ?,
                failed = failed - ?,
                cancelled = cancelled - ?,
                total_processing_ms = total_processing_ms - ?,
                last_updated = ?
            WHERE queue_name = ?
            "#,
        )
        .bind(delta.completed)
        .bind(delta.failed)
        .bind(delta.cancelled)
        .bind(delta.total_processing_ms)
        .bind(now)
        .bind(queue_name)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub struct SqliteStatsAggregator {
    pool: SqlitePool,
}

impl SqliteStatsAggregator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatsAggregator for SqliteStatsAggregator {
    #[instrument(skip(self))]
    async fn get_stats(&self, queue_name: &str) -> TaskQueueResult<QueueStats> {
        let sql = format!("SELECT {STATS_COLUMNS} FROM queue_stats WHERE queue_name = ?");
        let row = sqlx::query(&sql)
            .bind(queue_name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => MappingHelpers::row_to_stats(&row),
            None => Ok(QueueStats::empty(queue_name)),
        }
    }

    async fn list_stats(&self) -> TaskQueueResult<Vec<QueueStats>> {
        let sql = format!("SELECT {STATS_COLUMNS} FROM queue_stats ORDER BY queue_name");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(MappingHelpers::row_to_stats).collect()
    }

    #[instrument(skip(self))]
    async fn recompute(&self, queue_name: &str) -> TaskQueueResult<QueueStats> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // 先写后读，让SQLite在事务开始即持有写锁
        sqlx::query(
            "INSERT INTO queue_stats (queue_name, last_updated) VALUES (?, ?) \
             ON CONFLICT(queue_name) DO NOTHING",
        )
        .bind(queue_name)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let rows = sqlx::query(
            "SELECT status, started_at, completed_at FROM tasks WHERE queue_name = ?",
        )
        .bind(queue_name)
        .fetch_all(&mut *tx)
        .await?;

        let mut stats = QueueStats::empty(queue_name);
        for row in &rows {
            let status: TaskStatus = row.try_get("status")?;
            let started_at: Option<DateTime<Utc>> = row.try_get("started_at")?;
            let completed_at: Option<DateTime<Utc>> = row.try_get("completed_at")?;
            let processing_ms = match (started_at, completed_at) {
                (Some(started), Some(completed)) => Some((completed - started).num_milliseconds()),
                _ => None,
            };
            stats.accumulate(status, processing_ms);
        }
        stats.last_updated = Some(now);

        sqlx::query(
            r#"
            UPDATE queue_stats SET
                pending = ?, running = ?, retrying = ?, completed = ?, failed = ?,
                cancelled = ?, total_processing_ms = ?, last_updated = ?
            WHERE queue_name = ?
            "#,
        )
        .bind(stats.pending)
        .bind(stats.running)
        .bind(stats.retrying)
        .bind(stats.completed)
        .bind(stats.failed)
        .bind(stats.cancelled)
        .bind(stats.total_processing_ms)
        .bind(now)
        .bind(queue_name)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!("重建队列统计: {} (共{}个任务)", queue_name, stats.total());
        Ok(stats)
    }
}
