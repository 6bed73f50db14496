use thiserror::Error;

use crate::models::TaskStatus;

/// 任务队列错误类型定义
#[derive(Debug, Error)]
pub enum TaskQueueError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("参数校验失败: {0}")]
    Validation(String),

    /// CAS前置条件不满足，由调度器/租约管理器在内部消化
    #[error("任务 {id} 状态冲突: 期望 {expected}, 实际 {actual}")]
    Conflict {
        id: i64,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    #[error("任务 {id} 已被Worker {actual:?} 持有，拒绝来自 {expected} 的操作")]
    OwnershipConflict {
        id: i64,
        expected: String,
        actual: Option<String>,
    },

    /// 状态与持有者都符合，但调用方读取的快照已过期
    #[error("任务 {id} 快照已过期: {reason}")]
    StaleSnapshot { id: i64, reason: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },

    #[error("Worker {worker_id} 已达到并发上限 {concurrency}")]
    CapacityExceeded { worker_id: String, concurrency: i32 },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl TaskQueueError {
    /// 是否为CAS冲突（包括持有者不匹配）
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            TaskQueueError::Conflict { .. }
                | TaskQueueError::OwnershipConflict { .. }
                | TaskQueueError::StaleSnapshot { .. }
        )
    }

    /// 是否为资源不存在
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TaskQueueError::TaskNotFound { .. } | TaskQueueError::WorkerNotFound { .. }
        )
    }

    /// 是否允许暴露给提交任务的客户端
    pub fn is_user_visible(&self) -> bool {
        matches!(self, TaskQueueError::Validation(_)) || self.is_not_found()
    }
}

impl From<serde_json::Error> for TaskQueueError {
    fn from(e: serde_json::Error) -> Self {
        TaskQueueError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type TaskQueueResult<T> = std::result::Result<T, TaskQueueError>;
