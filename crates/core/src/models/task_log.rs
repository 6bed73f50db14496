use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::impl_sqlite_text_enum;

/// 任务审计日志，只追加
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskLog {
    pub id: i64,
    pub task_id: i64,
    pub level: TaskLogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub worker_id: Option<String>,
    pub metadata: serde_json::Value,
}

impl TaskLog {
    /// 构造一条待写入的日志，`id` 由存储层分配
    pub fn new(task_id: i64, level: TaskLogLevel, message: impl Into<String>) -> Self {
        Self {
            id: 0,
            task_id,
            level,
            message: message.into(),
            timestamp: Utc::now(),
            worker_id: None,
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskLogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl TaskLogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskLogLevel::Debug => "debug",
            TaskLogLevel::Info => "info",
            TaskLogLevel::Warning => "warning",
            TaskLogLevel::Error => "error",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(TaskLogLevel::Debug),
            "info" => Some(TaskLogLevel::Info),
            "warning" | "warn" => Some(TaskLogLevel::Warning),
            "error" => Some(TaskLogLevel::Error),
            _ => None,
        }
    }
}

impl fmt::Display for TaskLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl_sqlite_text_enum!(TaskLogLevel, "task log level");
