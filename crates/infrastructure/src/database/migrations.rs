use sqlx::SqlitePool;
use taskq_core::TaskQueueResult;
use tracing::debug;

/// 建表语句，全部幂等
///
/// 时间列以 RFC3339 文本存储，比较时只与同样由程序绑定的时间值比较。
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        queue_name TEXT NOT NULL,
        priority TEXT NOT NULL DEFAULT 'normal'
            CHECK (priority IN ('low', 'normal', 'high', 'critical')),
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'running', 'completed', 'failed', 'retrying', 'cancelled')),
        payload TEXT NOT NULL DEFAULT 'null',
        result TEXT,
        error_message TEXT,
        max_retries INTEGER NOT NULL DEFAULT 3 CHECK (max_retries >= 0),
        current_retries INTEGER NOT NULL DEFAULT 0
            CHECK (current_retries >= 0 AND current_retries <= max_retries),
        retry_delay INTEGER NOT NULL DEFAULT 60 CHECK (retry_delay >= 0),
        timeout INTEGER,
        lease_seconds INTEGER,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        scheduled_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        worker_id TEXT,
        worker_hostname TEXT,
        tags TEXT NOT NULL DEFAULT '[]',
        metadata TEXT NOT NULL DEFAULT '{}',
        CHECK ((status = 'running') = (worker_id IS NOT NULL)),
        CHECK ((status IN ('completed', 'failed', 'cancelled')) = (completed_at IS NOT NULL))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workers (
        worker_id TEXT PRIMARY KEY,
        hostname TEXT NOT NULL,
        pid INTEGER,
        queues TEXT NOT NULL DEFAULT '[]',
        concurrency INTEGER NOT NULL CHECK (concurrency >= 1),
        status TEXT NOT NULL DEFAULT 'active'
            CHECK (status IN ('active', 'idle', 'stopped')),
        last_heartbeat TEXT NOT NULL,
        started_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS queue_stats (
        queue_name TEXT PRIMARY KEY,
        pending INTEGER NOT NULL DEFAULT 0,
        running INTEGER NOT NULL DEFAULT 0,
        retrying INTEGER NOT NULL DEFAULT 0,
        completed INTEGER NOT NULL DEFAULT 0,
        failed INTEGER NOT NULL DEFAULT 0,
        cancelled INTEGER NOT NULL DEFAULT 0,
        total_processing_ms INTEGER NOT NULL DEFAULT 0,
        last_updated TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id INTEGER NOT NULL,
        level TEXT NOT NULL DEFAULT 'info',
        message TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        worker_id TEXT,
        metadata TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tasks_claim ON tasks(queue_name, status, scheduled_at)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_completed_at ON tasks(completed_at)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_worker_id ON tasks(worker_id)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_workers_status ON workers(status)",
    "CREATE INDEX IF NOT EXISTS idx_task_logs_task_id ON task_logs(task_id)",
];

/// 运行数据库迁移
pub async fn run_migrations(pool: &SqlitePool) -> TaskQueueResult<()> {
    debug!("Running SQLite database migrations");

    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    debug!("Successfully completed SQLite database migrations");
    Ok(())
}
