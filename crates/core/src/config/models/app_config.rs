use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig,
    dispatcher::{CleanupConfig, DispatcherConfig, RetryConfig},
    observability::ObservabilityConfig,
    worker::WorkerConfig,
};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "TASKQ";

/// 默认配置文件搜索路径
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/taskq.toml",
    "taskq.toml",
    "/etc/taskq/config.toml",
];

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub dispatcher: DispatcherConfig,
    pub retry: RetryConfig,
    pub cleanup: CleanupConfig,
    pub worker: WorkerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (`TASKQ_DATABASE__URL` 形式)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;

        self.dispatcher
            .validate()
            .context("Dispatcher配置验证失败")?;

        self.retry.validate().context("重试配置验证失败")?;

        self.cleanup.validate().context("清理配置验证失败")?;

        self.worker.validate().context("Worker配置验证失败")?;

        if let Some(lease) = self.worker.lease_seconds {
            if lease < self.dispatcher.min_lease_seconds {
                return Err(anyhow::anyhow!(
                    "Worker租约({}s)不能小于最短租约({}s)",
                    lease,
                    self.dispatcher.min_lease_seconds
                ));
            }
        }

        if self.worker.heartbeat_interval_seconds as i64 >= self.effective_lease_seconds() {
            return Err(anyhow::anyhow!(
                "心跳间隔({}s)必须小于租约时长({}s)",
                self.worker.heartbeat_interval_seconds,
                self.effective_lease_seconds()
            ));
        }

        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }

    /// Worker实际申请的租约时长
    pub fn effective_lease_seconds(&self) -> i64 {
        self.worker
            .lease_seconds
            .unwrap_or(self.dispatcher.default_lease_seconds)
    }
}
