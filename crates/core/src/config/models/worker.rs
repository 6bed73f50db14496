use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// 为空时启动时生成
    pub worker_id: Option<String>,
    /// 为空时使用本机主机名
    pub hostname: Option<String>,
    pub queues: Vec<String>,
    pub concurrency: i32,
    pub heartbeat_interval_seconds: u64,
    pub poll_interval_ms: u64,
    /// 为空时使用调度配置的默认租约
    pub lease_seconds: Option<i64>,
    pub shutdown_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            worker_id: None,
            hostname: None,
            queues: vec!["default".to_string()],
            concurrency: 4,
            heartbeat_interval_seconds: 10,
            poll_interval_ms: 1000,
            lease_seconds: None,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(worker_id) = &self.worker_id {
            if worker_id.trim().is_empty() {
                return Err(anyhow::anyhow!("Worker ID不能为空"));
            }
        }

        if self.queues.is_empty() {
            return Err(anyhow::anyhow!("监听队列不能为空"));
        }

        if self.concurrency <= 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("任务轮询间隔必须大于0"));
        }

        if let Some(lease) = self.lease_seconds {
            if lease <= 0 {
                return Err(anyhow::anyhow!("租约时长必须大于0"));
            }
        }

        Ok(())
    }
}
