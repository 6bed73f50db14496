//! 调度相关指标
//!
//! 未安装 exporter 时 `metrics` 宏为空操作。

use ::metrics::{counter, describe_counter};

pub const CLAIMS_TOTAL: &str = "taskq_claims_total";
pub const CLAIM_CONFLICTS_TOTAL: &str = "taskq_claim_conflicts_total";
pub const LEASES_RECLAIMED_TOTAL: &str = "taskq_leases_reclaimed_total";
pub const RETRIES_SCHEDULED_TOTAL: &str = "taskq_retries_scheduled_total";
pub const TASKS_FAILED_TOTAL: &str = "taskq_tasks_failed_total";
pub const TASKS_COMPLETED_TOTAL: &str = "taskq_tasks_completed_total";

/// 注册指标描述
pub fn describe_metrics() {
    describe_counter!(CLAIMS_TOTAL, "Number of tasks successfully claimed");
    describe_counter!(
        CLAIM_CONFLICTS_TOTAL,
        "Number of claim attempts that lost the CAS race"
    );
    describe_counter!(
        LEASES_RECLAIMED_TOTAL,
        "Number of running tasks reclaimed after lease expiry"
    );
    describe_counter!(RETRIES_SCHEDULED_TOTAL, "Number of retries scheduled");
    describe_counter!(TASKS_FAILED_TOTAL, "Number of tasks that ended in failed");
    describe_counter!(TASKS_COMPLETED_TOTAL, "Number of tasks that completed");
}

pub(crate) fn record_claim(queue_name: &str) {
    counter!(CLAIMS_TOTAL, "queue" => queue_name.to_string()).increment(1);
}

pub(crate) fn record_claim_conflict() {
    counter!(CLAIM_CONFLICTS_TOTAL).increment(1);
}

pub(crate) fn record_lease_reclaimed(queue_name: &str) {
    counter!(LEASES_RECLAIMED_TOTAL, "queue" => queue_name.to_string()).increment(1);
}

pub(crate) fn record_retry(queue_name: &str) {
    counter!(RETRIES_SCHEDULED_TOTAL, "queue" => queue_name.to_string()).increment(1);
}

pub(crate) fn record_failed(queue_name: &str) {
    counter!(TASKS_FAILED_TOTAL, "queue" => queue_name.to_string()).increment(1);
}

pub(crate) fn record_completed(queue_name: &str) {
    counter!(TASKS_COMPLETED_TOTAL, "queue" => queue_name.to_string()).increment(1);
}
