use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use taskq_core::config::DatabaseConfig;
use taskq_core::{StatsAggregator, TaskQueueResult, TaskStore, WorkerRegistry};
use tracing::{debug, info};

use super::migrations::run_migrations;
use super::sqlite::{SqliteStatsAggregator, SqliteTaskStore, SqliteWorkerRegistry};

/// 数据库管理器
///
/// 持有连接池，负责建表并构造各存储实现。
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// 按配置连接数据库并运行迁移
    pub async fn new(config: &DatabaseConfig) -> TaskQueueResult<Self> {
        debug!("Connecting SQLite database at: {}", config.url);

        let in_memory = config.is_in_memory();
        let mut connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(config.busy_timeout_seconds));
        if !in_memory {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
        }

        // 内存库每个连接各自独立，只能使用单连接
        let (max_connections, min_connections) = if in_memory {
            (1, 1)
        } else {
            (config.max_connections, config.min_connections)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(if in_memory { None } else { Some(Duration::from_secs(600)) })
            .max_lifetime(if in_memory { None } else { Some(Duration::from_secs(1800)) })
            .connect_with(connect_options)
            .await?;

        run_migrations(&pool).await?;

        info!(
            "数据库初始化完成: {} (最大连接数: {})",
            config.url, max_connections
        );
        Ok(Self { pool })
    }

    /// 内存数据库，用于测试
    pub async fn in_memory() -> TaskQueueResult<Self> {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        };
        Self::new(&config).await
    }

    pub fn task_store(&self) -> Arc<dyn TaskStore> {
        Arc::new(SqliteTaskStore::new(self.pool.clone()))
    }

    pub fn worker_registry(&self) -> Arc<dyn WorkerRegistry> {
        Arc::new(SqliteWorkerRegistry::new(self.pool.clone()))
    }

    pub fn stats_aggregator(&self) -> Arc<dyn StatsAggregator> {
        Arc::new(SqliteStatsAggregator::new(self.pool.clone()))
    }

    /// 检查连接是否可用
    pub async fn health_check(&self) -> TaskQueueResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await
    }
}
