use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::impl_sqlite_text_enum;
use crate::errors::{TaskQueueError, TaskQueueResult};

/// 队列名称最大长度
pub const MAX_NAME_LENGTH: usize = 255;

/// 任务定义
///
/// 表示队列中的一个工作单元，`status` 字段描述其生命周期所处阶段。
///
/// # 不变量
///
/// - `worker_id` 非空当且仅当 `status == Running`
/// - `completed_at` 非空当且仅当 `status` 为终止状态
/// - `current_retries` 只增不减，且不超过 `max_retries`
/// - `Retrying` 状态的任务，`scheduled_at` 为下次可执行时间
///
/// 以上不变量由 `TaskStore::transition_state` 统一维护，调用方不应直接修改持久化状态。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub queue_name: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub max_retries: i32,
    pub current_retries: i32,
    /// 基础退避间隔（秒）
    pub retry_delay: i64,
    /// 执行超时（秒），由Worker在本地强制
    pub timeout: Option<i64>,
    /// 当前执行所获租约时长（秒），仅在运行中有值
    pub lease_seconds: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub worker_hostname: Option<String>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
}

impl Task {
    /// 是否处于终止状态
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 在给定时间点是否可被领取
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.scheduled_at <= now
    }

    /// 是否由指定Worker持有
    pub fn is_owned_by(&self, worker_id: &str) -> bool {
        self.status == TaskStatus::Running && self.worker_id.as_deref() == Some(worker_id)
    }

    /// 租约是否已过期
    ///
    /// 租约起点取领取时间与持有者最近心跳中的较晚者。
    pub fn is_lease_expired(
        &self,
        owner_heartbeat: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.status != TaskStatus::Running {
            return false;
        }
        let (Some(started_at), Some(lease_seconds)) = (self.started_at, self.lease_seconds) else {
            return false;
        };
        let basis = match owner_heartbeat {
            Some(heartbeat) if heartbeat > started_at => heartbeat,
            _ => started_at,
        };
        (now - basis).num_milliseconds() > lease_seconds * 1000
    }

    /// 本次执行耗时（毫秒）
    pub fn processing_time_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some((completed - started).num_milliseconds()),
            _ => None,
        }
    }

    /// 剩余可重试次数
    pub fn remaining_retries(&self) -> i32 {
        (self.max_retries - self.current_retries).max(0)
    }
}

/// 任务优先级
///
/// 变体按升序声明，`Ord` 的比较结果即调度先后：`Critical > High > Normal > Low`。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 4] = [
        TaskPriority::Low,
        TaskPriority::Normal,
        TaskPriority::High,
        TaskPriority::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
        }
    }

    /// 数值排名，数值越大越先被领取
    pub fn rank(&self) -> i32 {
        match self {
            TaskPriority::Low => 0,
            TaskPriority::Normal => 1,
            TaskPriority::High => 2,
            TaskPriority::Critical => 3,
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(TaskPriority::Low),
            "normal" => Some(TaskPriority::Normal),
            "high" => Some(TaskPriority::High),
            "critical" => Some(TaskPriority::Critical),
            _ => None,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = TaskQueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
            .ok_or_else(|| TaskQueueError::Validation(format!("无效的任务优先级: {s}")))
    }
}

impl_sqlite_text_enum!(TaskPriority, "task priority");

/// 任务状态
///
/// # 状态流转
///
/// ```text
/// pending  ──claim──▶ running ──complete──▶ completed
///    │                  │  ▲
///    │                  │  └──claim── retrying ◀──fail/lease expiry (有剩余重试)
///    │                  └──fail/lease expiry (重试耗尽)──▶ failed
///    └──cancel──▶ cancelled ◀──cancel── retrying
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retrying,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Retrying,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "retrying" => Some(TaskStatus::Retrying),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// 终止状态：不再允许任何流转
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// 可被Worker领取的状态
    pub fn is_claimable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Retrying)
    }

    /// 生命周期图中是否存在 `self -> next` 这条边
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Retrying, Running)
                | (Retrying, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Retrying)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskQueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s).ok_or_else(|| TaskQueueError::Validation(format!("无效的任务状态: {s}")))
    }
}

impl_sqlite_text_enum!(TaskStatus, "task status");

/// 任务提交请求
///
/// # 使用示例
///
/// ```rust
/// use taskq_core::models::{TaskPriority, TaskSpec};
/// use serde_json::json;
///
/// let spec = TaskSpec::new("send_email", "default")
///     .with_priority(TaskPriority::High)
///     .with_payload(json!({"to": "ops@example.com"}))
///     .with_max_retries(5)
///     .with_retry_delay(10);
/// assert!(spec.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub queue_name: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: i64,
    #[serde(default)]
    pub timeout: Option<i64>,
    /// 最早可执行时间，缺省为提交时刻
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
}

fn default_max_retries() -> i32 {
    3
}

fn default_retry_delay() -> i64 {
    60
}

fn default_metadata() -> serde_json::Value {
    serde_json::json!({})
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, queue_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue_name: queue_name.into(),
            priority: TaskPriority::Normal,
            payload: serde_json::Value::Null,
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            timeout: None,
            scheduled_at: None,
            tags: Vec::new(),
            metadata: default_metadata(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: i64) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: i64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(scheduled_at);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// 校验提交参数，失败的提交不会被持久化
    pub fn validate(&self) -> TaskQueueResult<()> {
        validate_name("name", &self.name)?;
        validate_queue_name(&self.queue_name)?;

        if self.max_retries < 0 {
            return Err(TaskQueueError::Validation(format!(
                "max_retries不能为负数: {}",
                self.max_retries
            )));
        }

        if self.retry_delay < 0 {
            return Err(TaskQueueError::Validation(format!(
                "retry_delay不能为负数: {}",
                self.retry_delay
            )));
        }

        if let Some(timeout) = self.timeout {
            if timeout <= 0 {
                return Err(TaskQueueError::Validation(format!(
                    "timeout必须大于0: {timeout}"
                )));
            }
        }

        if self.tags.iter().any(|tag| tag.trim().is_empty()) {
            return Err(TaskQueueError::Validation("标签不能为空字符串".to_string()));
        }

        Ok(())
    }
}

fn validate_name(field: &str, value: &str) -> TaskQueueResult<()> {
    if value.trim().is_empty() {
        return Err(TaskQueueError::Validation(format!("{field}不能为空")));
    }
    if value.len() > MAX_NAME_LENGTH {
        return Err(TaskQueueError::Validation(format!(
            "{field}长度不能超过{MAX_NAME_LENGTH}"
        )));
    }
    Ok(())
}

/// 校验队列名：非空、长度受限，仅允许 `[A-Za-z0-9_.:-]`
pub fn validate_queue_name(queue_name: &str) -> TaskQueueResult<()> {
    validate_name("queue_name", queue_name)?;
    if !queue_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'))
    {
        return Err(TaskQueueError::Validation(format!(
            "queue_name包含非法字符: {queue_name}"
        )));
    }
    Ok(())
}

/// 列表排序方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListOrder {
    #[default]
    CreatedDesc,
    CreatedAsc,
}

/// 任务过滤器
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub queue_name: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub worker_id: Option<String>,
    pub tag: Option<String>,
    pub name_pattern: Option<String>,
    pub order: ListOrder,
}

impl TaskFilter {
    pub fn for_queue(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: Some(queue_name.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// 流转时随状态一起写入的字段
///
/// 未设置的字段保持原值；`worker_id`/`worker_hostname`/`lease_seconds`/`started_at`/
/// `completed_at` 由存储层依据新状态自动维护。
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub worker_id: Option<String>,
    pub worker_hostname: Option<String>,
    pub lease_seconds: Option<i64>,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// 目标重试计数，存储层取 `max(current_retries, 该值)`
    pub current_retries: Option<i32>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    /// 附带写入审计日志的说明
    pub log_message: Option<String>,
}

/// 一次 compare-and-swap 状态流转请求
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub task_id: i64,
    pub expected_status: TaskStatus,
    /// 额外校验当前持有者，防止僵尸Worker操作已被重新分配的任务
    pub expected_worker: Option<String>,
    /// 额外校验读取快照时的重试计数，防止状态绕一圈回到原值后按旧快照操作
    pub expected_retries: Option<i32>,
    pub new_status: TaskStatus,
    pub fields: TransitionFields,
    pub now: DateTime<Utc>,
}

impl StateTransition {
    pub fn new(
        task_id: i64,
        expected_status: TaskStatus,
        new_status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            expected_status,
            expected_worker: None,
            expected_retries: None,
            new_status,
            fields: TransitionFields::default(),
            now,
        }
    }

    /// 领取：`pending|retrying -> running`
    ///
    /// 存储层另外要求 `scheduled_at <= now`，并校验快照中的重试计数。
    pub fn claim(
        task: &Task,
        worker_id: &str,
        worker_hostname: Option<&str>,
        lease_seconds: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let mut transition = Self::new(task.id, task.status, TaskStatus::Running, now)
            .with_expected_retries(task.current_retries);
        transition.fields.worker_id = Some(worker_id.to_string());
        transition.fields.worker_hostname = worker_hostname.map(str::to_string);
        transition.fields.lease_seconds = Some(lease_seconds);
        transition.fields.log_message = Some(format!("claimed by worker {worker_id}"));
        transition
    }

    /// 完成：`running -> completed`，校验持有者
    pub fn complete(
        task_id: i64,
        worker_id: &str,
        result: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut transition = Self::new(task_id, TaskStatus::Running, TaskStatus::Completed, now);
        transition.expected_worker = Some(worker_id.to_string());
        transition.fields.result = result;
        transition.fields.log_message = Some(format!("completed by worker {worker_id}"));
        transition
    }

    /// 取消：`pending|retrying -> cancelled`
    pub fn cancel(task_id: i64, expected_status: TaskStatus, now: DateTime<Utc>) -> Self {
        let mut transition = Self::new(task_id, expected_status, TaskStatus::Cancelled, now);
        transition.fields.log_message = Some("cancelled".to_string());
        transition
    }

    pub fn with_expected_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.expected_worker = Some(worker_id.into());
        self
    }

    pub fn with_expected_retries(mut self, current_retries: i32) -> Self {
        self.expected_retries = Some(current_retries);
        self
    }

    pub fn with_fields(mut self, fields: TransitionFields) -> Self {
        self.fields = fields;
        self
    }

    /// 校验流转是否在生命周期图内，以及必要字段是否齐全
    pub fn validate(&self) -> TaskQueueResult<()> {
        if !self.expected_status.can_transition_to(self.new_status) {
            return Err(TaskQueueError::Validation(format!(
                "非法的状态流转: {} -> {}",
                self.expected_status, self.new_status
            )));
        }

        if self.new_status == TaskStatus::Running {
            if self.fields.worker_id.as_deref().map_or(true, str::is_empty) {
                return Err(TaskQueueError::Validation(
                    "流转到running必须指定worker_id".to_string(),
                ));
            }
            match self.fields.lease_seconds {
                Some(lease) if lease > 0 => {}
                _ => {
                    return Err(TaskQueueError::Validation(
                        "流转到running必须指定正数租约".to_string(),
                    ))
                }
            }
        }

        if self.new_status == TaskStatus::Retrying && self.fields.scheduled_at.is_none() {
            return Err(TaskQueueError::Validation(
                "流转到retrying必须指定scheduled_at".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn running_task(now: DateTime<Utc>) -> Task {
        Task {
            id: 1,
            name: "resize_image".to_string(),
            queue_name: "default".to_string(),
            priority: TaskPriority::Normal,
            status: TaskStatus::Running,
            payload: json!({"path": "/tmp/a.png"}),
            result: None,
            error_message: None,
            max_retries: 3,
            current_retries: 0,
            retry_delay: 5,
            timeout: None,
            lease_seconds: Some(10),
            created_at: now,
            updated_at: now,
            scheduled_at: now,
            started_at: Some(now),
            completed_at: None,
            worker_id: Some("worker-a".to_string()),
            worker_hostname: Some("host-a".to_string()),
            tags: vec![],
            metadata: json!({}),
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
        let ranks: Vec<i32> = TaskPriority::ALL.iter().map(|p| p.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("CRITICAL".parse::<TaskPriority>().unwrap(), TaskPriority::Critical);
        assert_eq!(" high ".parse::<TaskPriority>().unwrap(), TaskPriority::High);
        let err = "urgent".parse::<TaskPriority>().unwrap_err();
        assert!(matches!(err, TaskQueueError::Validation(_)));
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in TaskStatus::ALL {
            assert_eq!(TaskStatus::parse_str(status.as_str()), Some(status));
        }
        assert!(TaskStatus::parse_str("dispatched").is_none());
    }

    #[test]
    fn test_lifecycle_edges() {
        use TaskStatus::*;

        assert!(Pending.can_transition_to(Running));
        assert!(Retrying.can_transition_to(Running));
        assert!(Running.can_transition_to(Retrying));
        assert!(!Running.can_transition_to(Cancelled));
        assert!(!Running.can_transition_to(Pending));
        for terminal in [Completed, Failed, Cancelled] {
            for next in TaskStatus::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_spec_validation() {
        assert!(TaskSpec::new("job", "default").validate().is_ok());
        assert!(TaskSpec::new("", "default").validate().is_err());
        assert!(TaskSpec::new("job", "").validate().is_err());
        assert!(TaskSpec::new("job", "bad queue").validate().is_err());
        assert!(TaskSpec::new("job", "emails.high-prio:v2").validate().is_ok());
        assert!(TaskSpec::new("job", "default")
            .with_max_retries(-1)
            .validate()
            .is_err());
        assert!(TaskSpec::new("job", "default")
            .with_retry_delay(-5)
            .validate()
            .is_err());
        assert!(TaskSpec::new("job", "default")
            .with_timeout(0)
            .validate()
            .is_err());
        assert!(TaskSpec::new("job", "q".repeat(MAX_NAME_LENGTH + 1))
            .validate()
            .is_err());
    }

    #[test]
    fn test_spec_deserialize_defaults() {
        let spec: TaskSpec =
            serde_json::from_value(json!({"name": "job", "queue_name": "default"})).unwrap();
        assert_eq!(spec.priority, TaskPriority::Normal);
        assert_eq!(spec.max_retries, 3);
        assert_eq!(spec.retry_delay, 60);
        assert_eq!(spec.metadata, json!({}));
        assert!(spec.scheduled_at.is_none());

        let bad = serde_json::from_value::<TaskSpec>(
            json!({"name": "job", "queue_name": "default", "priority": "urgent"}),
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_lease_expiry_uses_latest_heartbeat() {
        let now = Utc::now();
        let task = running_task(now);

        assert!(!task.is_lease_expired(None, now + Duration::seconds(10)));
        assert!(task.is_lease_expired(None, now + Duration::seconds(11)));

        let heartbeat = now + Duration::seconds(8);
        assert!(!task.is_lease_expired(Some(heartbeat), now + Duration::seconds(15)));
        assert!(task.is_lease_expired(Some(heartbeat), now + Duration::seconds(19)));

        // 早于领取时间的心跳不延长租约
        let stale = now - Duration::seconds(30);
        assert!(task.is_lease_expired(Some(stale), now + Duration::seconds(11)));
    }

    #[test]
    fn test_transition_validation() {
        let now = Utc::now();
        let mut task = running_task(now);
        task.status = TaskStatus::Pending;

        let claim = StateTransition::claim(&task, "worker-a", None, 30, now);
        assert!(claim.validate().is_ok());
        assert_eq!(claim.expected_retries, Some(task.current_retries));

        let no_lease = StateTransition::claim(&task, "worker-a", None, 0, now);
        assert!(no_lease.validate().is_err());

        let retry_without_time =
            StateTransition::new(1, TaskStatus::Running, TaskStatus::Retrying, now);
        assert!(retry_without_time.validate().is_err());

        let out_of_terminal =
            StateTransition::new(1, TaskStatus::Completed, TaskStatus::Running, now);
        assert!(out_of_terminal.validate().is_err());

        let complete = StateTransition::complete(1, "worker-a", Some(json!(1)), now);
        assert_eq!(complete.expected_worker.as_deref(), Some("worker-a"));
        assert!(complete.validate().is_ok());
    }
}
