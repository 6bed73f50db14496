pub mod app_config;
pub mod database;
pub mod dispatcher;
pub mod observability;
pub mod worker;

pub use app_config::{AppConfig, DEFAULT_CONFIG_PATHS, ENV_PREFIX};
pub use database::DatabaseConfig;
pub use dispatcher::{
    BackoffStrategy, CleanupConfig, DispatcherConfig, RetryConfig, MAX_RETRY_DELAY_SECONDS,
};
pub use observability::ObservabilityConfig;
pub use worker::WorkerConfig;
