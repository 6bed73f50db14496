use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::impl_sqlite_text_enum;
use crate::errors::{TaskQueueError, TaskQueueResult};
use crate::models::task::validate_queue_name;

/// Worker节点信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerInfo {
    pub worker_id: String,
    pub hostname: String,
    pub pid: Option<i64>,
    pub queues: Vec<String>,
    pub concurrency: i32,
    /// 当前持有的运行中任务数，读取时由任务表统计得出
    pub current_tasks: i32,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

/// Worker状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Active,
    Idle,
    Stopped,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Active => "active",
            WorkerStatus::Idle => "idle",
            WorkerStatus::Stopped => "stopped",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Some(WorkerStatus::Active),
            "idle" => Some(WorkerStatus::Idle),
            "stopped" => Some(WorkerStatus::Stopped),
            _ => None,
        }
    }

    /// 根据当前任务数推导心跳后的状态
    pub fn from_task_count(current_tasks: i32) -> Self {
        if current_tasks > 0 {
            WorkerStatus::Active
        } else {
            WorkerStatus::Idle
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl_sqlite_text_enum!(WorkerStatus, "worker status");

/// Worker注册请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub worker_id: String,
    pub hostname: String,
    pub pid: Option<i64>,
    pub queues: Vec<String>,
    pub concurrency: i32,
}

impl WorkerRegistration {
    pub fn new(
        worker_id: impl Into<String>,
        hostname: impl Into<String>,
        queues: Vec<String>,
        concurrency: i32,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            hostname: hostname.into(),
            pid: None,
            queues,
            concurrency,
        }
    }

    pub fn with_pid(mut self, pid: i64) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn validate(&self) -> TaskQueueResult<()> {
        if self.worker_id.trim().is_empty() {
            return Err(TaskQueueError::Validation("worker_id不能为空".to_string()));
        }
        if self.hostname.trim().is_empty() {
            return Err(TaskQueueError::Validation("hostname不能为空".to_string()));
        }
        if self.concurrency < 1 {
            return Err(TaskQueueError::Validation(format!(
                "concurrency必须至少为1: {}",
                self.concurrency
            )));
        }
        if self.queues.is_empty() {
            return Err(TaskQueueError::Validation(
                "Worker至少需要监听一个队列".to_string(),
            ));
        }
        for queue in &self.queues {
            validate_queue_name(queue)?;
        }
        Ok(())
    }
}

/// Worker心跳信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub current_tasks: i32,
    pub timestamp: DateTime<Utc>,
}

impl WorkerHeartbeat {
    pub fn new(worker_id: impl Into<String>, current_tasks: i32) -> Self {
        Self {
            worker_id: worker_id.into(),
            current_tasks,
            timestamp: Utc::now(),
        }
    }
}

impl WorkerInfo {
    /// 根据注册请求创建Worker信息
    pub fn new(registration: WorkerRegistration, now: DateTime<Utc>) -> Self {
        Self {
            worker_id: registration.worker_id,
            hostname: registration.hostname,
            pid: registration.pid,
            queues: registration.queues,
            concurrency: registration.concurrency,
            current_tasks: 0,
            status: WorkerStatus::Active,
            last_heartbeat: now,
            started_at: now,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.status == WorkerStatus::Stopped
    }

    /// 是否还能接受新任务
    pub fn has_capacity(&self) -> bool {
        !self.is_stopped() && self.current_tasks < self.concurrency
    }

    /// 空闲槽位数
    pub fn available_slots(&self) -> i32 {
        (self.concurrency - self.current_tasks).max(0)
    }

    /// 获取Worker负载率
    pub fn load_percentage(&self) -> f64 {
        if self.concurrency == 0 {
            0.0
        } else {
            (self.current_tasks as f64 / self.concurrency as f64) * 100.0
        }
    }

    /// 检查心跳是否超时
    pub fn is_heartbeat_expired(&self, now: DateTime<Utc>, staleness_seconds: i64) -> bool {
        (now - self.last_heartbeat).num_milliseconds() > staleness_seconds * 1000
    }

    pub fn listens_on(&self, queue_name: &str) -> bool {
        self.queues.iter().any(|q| q == queue_name)
    }
}
