use chrono::{DateTime, Duration, Utc};
use taskq_core::config::{BackoffStrategy, RetryConfig, MAX_RETRY_DELAY_SECONDS};
use taskq_core::{StateTransition, Task, TaskStatus, TransitionFields};

/// 一次失败之后的处理决定
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// 进入 retrying，在 `next_scheduled_at` 之后重新可领取
    Retry {
        next_scheduled_at: DateTime<Utc>,
        delay_seconds: i64,
        next_retries: i32,
    },
    /// 重试次数已用尽，直接进入 failed
    TerminalFail,
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }
}

/// 重试退避策略
///
/// 纯计算，不访问存储。任务失败（执行出错、超时或租约过期）时，
/// 若 `current_retries >= max_retries` 则终止，否则按
/// `retry_delay * multiplier^current_retries` 退避并以 `max_delay_seconds` 封顶。
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 不含抖动的退避秒数
    pub fn backoff_seconds(&self, retry_delay: i64, current_retries: i32) -> i64 {
        if retry_delay <= 0 {
            return 0;
        }
        let base = retry_delay as f64;
        let raw = match self.config.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => {
                base * self.config.multiplier.powi(current_retries.max(0))
            }
        };
        let cap = self.config.max_delay_seconds.min(MAX_RETRY_DELAY_SECONDS);
        let capped = raw.min(cap as f64);
        capped.max(0.0) as i64
    }

    /// 在基础退避上叠加抖动，结果不小于0
    fn jittered_seconds(&self, backoff: i64) -> i64 {
        if self.config.jitter_factor <= 0.0 || backoff == 0 {
            return backoff;
        }
        let backoff = backoff as f64;
        let jitter = backoff * self.config.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        (backoff + jitter).round().max(0.0) as i64
    }

    /// 计算失败后的下一步
    pub fn decide(
        &self,
        current_retries: i32,
        max_retries: i32,
        retry_delay: i64,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        if current_retries >= max_retries {
            return RetryDecision::TerminalFail;
        }

        let delay_seconds = self
            .jittered_seconds(self.backoff_seconds(retry_delay, current_retries))
            .min(MAX_RETRY_DELAY_SECONDS);
        RetryDecision::Retry {
            next_scheduled_at: now + Duration::seconds(delay_seconds),
            delay_seconds,
            next_retries: current_retries + 1,
        }
    }

    pub fn decide_for(&self, task: &Task, now: DateTime<Utc>) -> RetryDecision {
        self.decide(task.current_retries, task.max_retries, task.retry_delay, now)
    }

    /// 为运行中任务的失败构造状态流转，持有者取任务当前的 `worker_id`
    pub fn failure_transition(
        &self,
        task: &Task,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> (RetryDecision, StateTransition) {
        let decision = self.decide_for(task, now);
        let (new_status, fields) = match &decision {
            RetryDecision::Retry {
                next_scheduled_at,
                next_retries,
                ..
            } => (
                TaskStatus::Retrying,
                TransitionFields {
                    scheduled_at: Some(*next_scheduled_at),
                    current_retries: Some(*next_retries),
                    error_message: Some(error_message.to_string()),
                    log_message: Some(format!(
                        "retry {}/{} scheduled at {}",
                        next_retries,
                        task.max_retries,
                        next_scheduled_at.to_rfc3339()
                    )),
                    ..TransitionFields::default()
                },
            ),
            RetryDecision::TerminalFail => (
                TaskStatus::Failed,
                TransitionFields {
                    error_message: Some(error_message.to_string()),
                    log_message: Some(format!("failed after {} retries", task.current_retries)),
                    ..TransitionFields::default()
                },
            ),
        };

        let mut transition = StateTransition::new(task.id, TaskStatus::Running, new_status, now)
            .with_expected_retries(task.current_retries)
            .with_fields(fields);
        if let Some(worker_id) = &task.worker_id {
            transition = transition.with_expected_worker(worker_id.clone());
        }
        (decision, transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy(strategy: BackoffStrategy, jitter_factor: f64) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            strategy,
            multiplier: 2.0,
            max_delay_seconds: 3600,
            jitter_factor,
        })
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = policy(BackoffStrategy::Exponential, 0.0);
        assert_eq!(policy.backoff_seconds(60, 0), 60);
        assert_eq!(policy.backoff_seconds(60, 1), 120);
        assert_eq!(policy.backoff_seconds(60, 2), 240);
        // 封顶
        assert_eq!(policy.backoff_seconds(60, 10), 3600);
        assert_eq!(policy.backoff_seconds(60, i32::MAX), 3600);
    }

    #[test]
    fn test_fixed_backoff() {
        let policy = policy(BackoffStrategy::Fixed, 0.0);
        assert_eq!(policy.backoff_seconds(30, 0), 30);
        assert_eq!(policy.backoff_seconds(30, 5), 30);
        assert_eq!(policy.backoff_seconds(7200, 0), 3600);
    }

    #[test]
    fn test_decide_retry_then_terminal() {
        let policy = RetryPolicy::default();
        let now = Utc::now();

        match policy.decide(0, 3, 60, now) {
            RetryDecision::Retry {
                next_scheduled_at,
                delay_seconds,
                next_retries,
            } => {
                assert_eq!(delay_seconds, 60);
                assert_eq!(next_retries, 1);
                assert_eq!(next_scheduled_at, now + Duration::seconds(60));
            }
            other => panic!("期望重试, 实际 {other:?}"),
        }

        assert!(policy.decide(2, 3, 60, now).is_retry());
        assert_eq!(policy.decide(3, 3, 60, now), RetryDecision::TerminalFail);
        assert_eq!(policy.decide(0, 0, 60, now), RetryDecision::TerminalFail);
    }

    #[test]
    fn test_huge_delay_is_truncated() {
        let policy = RetryPolicy::new(RetryConfig {
            strategy: BackoffStrategy::Exponential,
            multiplier: 10.0,
            max_delay_seconds: i64::MAX,
            jitter_factor: 1.0,
        });
        let now = Utc::now();

        assert_eq!(policy.backoff_seconds(i64::MAX, 30), MAX_RETRY_DELAY_SECONDS);
        match policy.decide(30, 31, i64::MAX, now) {
            RetryDecision::Retry {
                next_scheduled_at,
                delay_seconds,
                ..
            } => {
                assert!(delay_seconds <= MAX_RETRY_DELAY_SECONDS);
                assert!(next_scheduled_at <= now + Duration::seconds(MAX_RETRY_DELAY_SECONDS));
            }
            other => panic!("期望重试, 实际 {other:?}"),
        }
    }

    #[test]
    fn test_zero_delay_retries_immediately() {
        let policy = policy(BackoffStrategy::Exponential, 0.5);
        let now = Utc::now();
        match policy.decide(1, 3, 0, now) {
            RetryDecision::Retry {
                next_scheduled_at, ..
            } => assert_eq!(next_scheduled_at, now),
            other => panic!("期望重试, 实际 {other:?}"),
        }
    }

    #[test]
    fn test_failure_transition_keeps_owner() {
        let now = Utc::now();
        let task = Task {
            id: 7,
            name: "job".to_string(),
            queue_name: "default".to_string(),
            priority: Default::default(),
            status: TaskStatus::Running,
            payload: serde_json::json!({}),
            result: None,
            error_message: None,
            max_retries: 1,
            current_retries: 0,
            retry_delay: 10,
            timeout: None,
            lease_seconds: Some(30),
            created_at: now,
            updated_at: now,
            scheduled_at: now,
            started_at: Some(now),
            completed_at: None,
            worker_id: Some("w1".to_string()),
            worker_hostname: None,
            tags: Vec::new(),
            metadata: serde_json::json!({}),
        };

        let policy = RetryPolicy::default();
        let (decision, transition) = policy.failure_transition(&task, "boom", now);
        assert!(decision.is_retry());
        assert_eq!(transition.new_status, TaskStatus::Retrying);
        assert_eq!(transition.expected_worker.as_deref(), Some("w1"));
        assert_eq!(transition.expected_retries, Some(0));
        assert_eq!(transition.fields.current_retries, Some(1));
        assert_eq!(transition.fields.scheduled_at, Some(now + Duration::seconds(10)));
        assert!(transition.validate().is_ok());

        let exhausted = Task {
            current_retries: 1,
            ..task
        };
        let (decision, transition) = policy.failure_transition(&exhausted, "boom", now);
        assert_eq!(decision, RetryDecision::TerminalFail);
        assert_eq!(transition.expected_retries, Some(1));
        assert_eq!(transition.new_status, TaskStatus::Failed);
        assert_eq!(transition.fields.error_message.as_deref(), Some("boom"));
        assert!(transition.fields.current_retries.is_none());
    }

    proptest! {
        #[test]
        fn prop_terminal_iff_retries_exhausted(
            current in 0i32..20,
            max in 0i32..20,
            delay in 0i64..10_000,
        ) {
            let policy = RetryPolicy::default();
            let decision = policy.decide(current, max, delay, Utc::now());
            prop_assert_eq!(decision == RetryDecision::TerminalFail, current >= max);
        }

        #[test]
        fn prop_backoff_bounded_and_monotonic(
            current in 0i32..64,
            delay in 0i64..10_000,
        ) {
            let policy = policy(BackoffStrategy::Exponential, 0.0);
            let this = policy.backoff_seconds(delay, current);
            let next = policy.backoff_seconds(delay, current + 1);
            prop_assert!(this >= 0);
            prop_assert!(this <= 3600);
            prop_assert!(next >= this);
        }

        #[test]
        fn prop_jitter_never_schedules_in_the_past(
            current in 0i32..10,
            delay in 0i64..10_000,
            jitter in 0.0f64..=1.0,
        ) {
            let policy = policy(BackoffStrategy::Exponential, jitter);
            let now = Utc::now();
            match policy.decide(current, current + 1, delay, now) {
                RetryDecision::Retry { next_scheduled_at, delay_seconds, next_retries } => {
                    prop_assert!(delay_seconds >= 0);
                    prop_assert!(delay_seconds <= 7200);
                    prop_assert!(next_scheduled_at >= now);
                    prop_assert_eq!(next_retries, current + 1);
                }
                RetryDecision::TerminalFail => prop_assert!(false, "不应终止"),
            }
        }
    }
}
