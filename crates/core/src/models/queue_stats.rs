use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskStatus;

/// 队列统计
///
/// 每个状态对应一个计数桶，`total_processing_ms` 为当前处于 completed/failed 的任务
/// 的执行耗时之和。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueStats {
    pub queue_name: String,
    pub pending: i64,
    pub running: i64,
    pub retrying: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub total_processing_ms: i64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl QueueStats {
    /// 全零统计，用于不存在的队列
    pub fn empty(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            pending: 0,
            running: 0,
            retrying: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            total_processing_ms: 0,
            last_updated: None,
        }
    }

    /// 指定状态的计数
    pub fn count(&self, status: TaskStatus) -> i64 {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Running => self.running,
            TaskStatus::Retrying => self.retrying,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
            TaskStatus::Cancelled => self.cancelled,
        }
    }

    fn bucket_mut(&mut self, status: TaskStatus) -> &mut i64 {
        match status {
            TaskStatus::Pending => &mut self.pending,
            TaskStatus::Running => &mut self.running,
            TaskStatus::Retrying => &mut self.retrying,
            TaskStatus::Completed => &mut self.completed,
            TaskStatus::Failed => &mut self.failed,
            TaskStatus::Cancelled => &mut self.cancelled,
        }
    }

    /// 计入一个处于 `status` 的任务
    pub fn accumulate(&mut self, status: TaskStatus, processing_ms: Option<i64>) {
        *self.bucket_mut(status) += 1;
        if matches!(status, TaskStatus::Completed | TaskStatus::Failed) {
            self.total_processing_ms += processing_ms.unwrap_or(0);
        }
    }

    /// 应用一次状态流转：旧桶减一，新桶加一
    pub fn apply(&mut self, from: TaskStatus, to: TaskStatus, processing_ms: Option<i64>) {
        *self.bucket_mut(from) -= 1;
        self.accumulate(to, processing_ms);
    }

    /// 总任务数
    pub fn total(&self) -> i64 {
        TaskStatus::ALL.iter().map(|s| self.count(*s)).sum()
    }

    /// 未结束任务数
    pub fn outstanding(&self) -> i64 {
        self.pending + self.running + self.retrying
    }

    /// 平均处理耗时（毫秒）
    pub fn average_processing_ms(&self) -> Option<f64> {
        let finished = self.completed + self.failed;
        if finished == 0 {
            None
        } else {
            Some(self.total_processing_ms as f64 / finished as f64)
        }
    }

    /// 比较计数与耗时，忽略 `last_updated`
    pub fn counts_eq(&self, other: &QueueStats) -> bool {
        self.queue_name == other.queue_name
            && TaskStatus::ALL
                .iter()
                .all(|s| self.count(*s) == other.count(*s))
            && self.total_processing_ms == other.total_processing_ms
    }
}
