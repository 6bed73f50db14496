use serde::{Deserialize, Serialize};

/// 调度与租约配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 是否在本进程运行租约回收
    pub enabled: bool,
    pub sweep_interval_seconds: u64,
    /// 未指定租约时的默认时长
    pub default_lease_seconds: i64,
    /// 允许的最短租约，必须长于回收周期
    pub min_lease_seconds: i64,
    /// 单次领取最多尝试的候选任务数
    pub claim_scan_limit: i64,
    /// Worker心跳超过该时长视为失联
    pub worker_staleness_seconds: i64,
    /// 已停止Worker保留时长，超过后删除
    pub stopped_worker_purge_seconds: i64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_seconds: 5,
            default_lease_seconds: 60,
            min_lease_seconds: 10,
            claim_scan_limit: 16,
            worker_staleness_seconds: 90,
            stopped_worker_purge_seconds: 86_400,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sweep_interval_seconds == 0 {
            return Err(anyhow::anyhow!("回收间隔必须大于0"));
        }

        if self.min_lease_seconds <= self.sweep_interval_seconds as i64 {
            return Err(anyhow::anyhow!(
                "最短租约({}s)必须大于回收间隔({}s)",
                self.min_lease_seconds,
                self.sweep_interval_seconds
            ));
        }

        if self.default_lease_seconds < self.min_lease_seconds {
            return Err(anyhow::anyhow!(
                "默认租约({}s)不能小于最短租约({}s)",
                self.default_lease_seconds,
                self.min_lease_seconds
            ));
        }

        if self.claim_scan_limit <= 0 {
            return Err(anyhow::anyhow!("候选扫描上限必须大于0"));
        }

        if self.worker_staleness_seconds <= 0 {
            return Err(anyhow::anyhow!("Worker失联阈值必须大于0"));
        }

        if self.stopped_worker_purge_seconds < 0 {
            return Err(anyhow::anyhow!("Worker清理阈值不能为负数"));
        }

        Ok(())
    }
}

/// 退避策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Fixed,
}

/// 退避时间上限（30天），超过的配置被拒绝，计算结果也会被截断
pub const MAX_RETRY_DELAY_SECONDS: i64 = 30 * 24 * 3600;

/// 重试退避配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub strategy: BackoffStrategy,
    pub multiplier: f64,
    pub max_delay_seconds: i64,
    /// 抖动比例，0 表示不抖动
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            multiplier: 2.0,
            max_delay_seconds: 3600,
            jitter_factor: 0.0,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1: {}", self.multiplier));
        }

        if self.max_delay_seconds <= 0 {
            return Err(anyhow::anyhow!("最大退避时间必须大于0"));
        }

        if self.max_delay_seconds > MAX_RETRY_DELAY_SECONDS {
            return Err(anyhow::anyhow!(
                "最大退避时间不能超过{}秒: {}",
                MAX_RETRY_DELAY_SECONDS,
                self.max_delay_seconds
            ));
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!(
                "抖动比例必须在0到1之间: {}",
                self.jitter_factor
            ));
        }

        Ok(())
    }
}

/// 终止任务清理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    /// 终止任务保留时长
    pub retention_hours: i64,
    pub batch_size: i64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 3600,
            retention_hours: 168,
            batch_size: 500,
        }
    }
}

impl CleanupConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_seconds == 0 {
            return Err(anyhow::anyhow!("清理间隔必须大于0"));
        }

        if self.retention_hours <= 0 {
            return Err(anyhow::anyhow!("保留时长必须大于0"));
        }

        if self.batch_size <= 0 {
            return Err(anyhow::anyhow!("清理批次大小必须大于0"));
        }

        Ok(())
    }
}
