mod common;

use chrono::{Duration, Utc};
use taskq_core::config::{DispatcherConfig, RetryConfig};
use taskq_core::{TaskPriority, TaskQueueError, TaskSpec, TaskStatus, WorkerStatus};
use taskq_dispatcher::{ReportOutcome, SweepReport};
use taskq_infrastructure::DatabaseManager;

use common::{build_engine, register, setup};

#[tokio::test]
async fn test_expired_lease_is_reclaimed_and_reassigned() {
    let (db, engine) = setup().await;
    register(&engine, "worker-a", &["default"], 2).await;
    register(&engine, "worker-b", &["default"], 2).await;

    let id = engine.submit(&TaskSpec::new("job", "default")).await.unwrap();
    let claimed = engine
        .claim(&[], "worker-a", Some(10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, id);

    // 租约内不回收
    let report = engine
        .reclaim_expired(Utc::now() + Duration::seconds(5))
        .await
        .unwrap();
    assert!(report.is_empty());

    let sweep_at = Utc::now() + Duration::seconds(11);
    let report = engine.reclaim_expired(sweep_at).await.unwrap();
    assert_eq!(report.retried, 1);
    assert_eq!(report.reclaimed(), 1);
    assert_eq!(report.workers_stopped, 1);

    let task = engine.get(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Retrying);
    assert_eq!(task.current_retries, 1);
    assert!(task.worker_id.is_none());
    assert_eq!(task.scheduled_at, sweep_at + Duration::seconds(60));
    assert!(task
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("lease expired"));

    // 僵尸Worker的心跳与上报都被拒绝
    assert!(!engine.heartbeat("worker-a", 1).await.unwrap());
    assert_eq!(
        engine.complete(id, "worker-a", None).await.unwrap(),
        ReportOutcome::Dropped
    );
    assert_eq!(
        engine.fail(id, "worker-a", "late").await.unwrap(),
        ReportOutcome::Dropped
    );
    assert_eq!(
        engine.get_worker("worker-a").await.unwrap().unwrap().status,
        WorkerStatus::Stopped
    );

    // 重试时间未到前不可领取
    assert!(engine.claim(&[], "worker-b", None).await.unwrap().is_none());

    let scheduler = taskq_dispatcher::TaskScheduler::new(
        db.task_store(),
        db.worker_registry(),
        DispatcherConfig::default(),
    );
    let reclaimed = scheduler
        .claim_at(&[], "worker-b", 60, task.scheduled_at + Duration::seconds(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reclaimed.id, id);
    assert_eq!(reclaimed.worker_id.as_deref(), Some("worker-b"));
    assert_eq!(reclaimed.current_retries, 1);

    assert_eq!(
        engine.complete(id, "worker-b", None).await.unwrap(),
        ReportOutcome::Completed
    );
    assert_eq!(engine.get(id).await.unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_sweep_retry_counts_toward_terminal_failure() {
    let (db, engine) = setup().await;
    register(&engine, "worker-a", &["default"], 1).await;
    register(&engine, "worker-b", &["default"], 1).await;

    let id = engine
        .submit(
            &TaskSpec::new("report", "default")
                .with_priority(TaskPriority::Critical)
                .with_max_retries(1)
                .with_retry_delay(5),
        )
        .await
        .unwrap();
    engine
        .claim(&[], "worker-a", Some(10))
        .await
        .unwrap()
        .unwrap();

    // worker-a 不再发送心跳，10秒租约过后被回收
    let sweep_at = Utc::now() + Duration::seconds(11);
    let report = engine.reclaim_expired(sweep_at).await.unwrap();
    assert_eq!(report.retried, 1);
    assert_eq!(report.failed, 0);

    let task = engine.get(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Retrying);
    assert_eq!(task.current_retries, 1);
    assert_eq!(task.scheduled_at, sweep_at + Duration::seconds(5));

    let scheduler = taskq_dispatcher::TaskScheduler::new(
        db.task_store(),
        db.worker_registry(),
        DispatcherConfig::default(),
    );
    assert!(scheduler
        .claim_at(&[], "worker-b", 60, task.scheduled_at - Duration::seconds(1))
        .await
        .unwrap()
        .is_none());
    let claimed = scheduler
        .claim_at(&[], "worker-b", 60, task.scheduled_at)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, id);
    assert_eq!(claimed.priority, TaskPriority::Critical);

    // 回收消耗的重试次数计入上限，worker-b 的失败直接终止
    let outcome = engine.fail(id, "worker-b", "still broken").await.unwrap();
    assert_eq!(outcome, ReportOutcome::Failed);

    let task = engine.get(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.current_retries, 1);
    assert_eq!(task.error_message.as_deref(), Some("still broken"));
    assert!(task.completed_at.is_some());
}

#[tokio::test]
async fn test_heartbeat_extends_lease() {
    let (_db, engine) = setup().await;
    register(&engine, "w1", &["default"], 1).await;
    engine.submit(&TaskSpec::new("job", "default")).await.unwrap();
    engine.claim(&[], "w1", Some(10)).await.unwrap().unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    assert!(engine.heartbeat("w1", 1).await.unwrap());

    // 领取后10.5秒，但距最近心跳不足10秒
    let worker = engine.get_worker("w1").await.unwrap().unwrap();
    let report = engine
        .reclaim_expired(worker.last_heartbeat + Duration::milliseconds(9_500))
        .await
        .unwrap();
    assert_eq!(report.reclaimed(), 0);

    let report = engine
        .reclaim_expired(worker.last_heartbeat + Duration::seconds(11))
        .await
        .unwrap();
    assert_eq!(report.retried, 1);
}

#[tokio::test]
async fn test_exhausted_task_fails_on_lease_expiry() {
    let (_db, engine) = setup().await;
    register(&engine, "w1", &["default"], 1).await;
    let id = engine
        .submit(&TaskSpec::new("fragile", "default").with_max_retries(0))
        .await
        .unwrap();
    engine.claim(&[], "w1", Some(10)).await.unwrap().unwrap();

    let report = engine
        .reclaim_expired(Utc::now() + Duration::seconds(30))
        .await
        .unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.retried, 0);

    let task = engine.get(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.completed_at.is_some());
    assert_eq!(task.current_retries, 0);

    let stats = engine.get_stats("default").await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.running, 0);
}

#[tokio::test]
async fn test_orphaned_task_uses_claim_time() {
    let (db, engine) = setup().await;
    register(&engine, "w1", &["default"], 1).await;
    let id = engine.submit(&TaskSpec::new("job", "default")).await.unwrap();
    let claimed = engine.claim(&[], "w1", Some(10)).await.unwrap().unwrap();

    db.worker_registry().remove("w1").await.unwrap();

    let started_at = claimed.started_at.unwrap();
    let report = engine
        .reclaim_expired(started_at + Duration::seconds(11))
        .await
        .unwrap();
    assert_eq!(report.retried, 1);
    // 持有者不存在，无需停止
    assert_eq!(report.workers_stopped, 0);
    assert_eq!(engine.get(id).await.unwrap().status, TaskStatus::Retrying);
}

#[tokio::test]
async fn test_stale_workers_are_stopped_then_purged() {
    let db = DatabaseManager::in_memory().await.unwrap();
    let engine = build_engine(
        &db,
        DispatcherConfig {
            worker_staleness_seconds: 90,
            stopped_worker_purge_seconds: 50,
            ..DispatcherConfig::default()
        },
        RetryConfig::default(),
    );
    register(&engine, "idle", &["default"], 1).await;

    let report = engine
        .reclaim_expired(Utc::now() + Duration::seconds(60))
        .await
        .unwrap();
    assert_eq!(report, SweepReport::default());

    let report = engine
        .reclaim_expired(Utc::now() + Duration::seconds(100))
        .await
        .unwrap();
    assert_eq!(report.workers_stopped, 1);
    assert_eq!(report.workers_purged, 1);
    assert!(engine.get_worker("idle").await.unwrap().is_none());

    let err = engine.heartbeat("idle", 0).await.unwrap_err();
    assert!(matches!(err, TaskQueueError::WorkerNotFound { .. }));
}

#[tokio::test]
async fn test_sweep_skips_tasks_finished_concurrently() {
    let (_db, engine) = setup().await;
    register(&engine, "w1", &["default"], 1).await;
    let id = engine.submit(&TaskSpec::new("job", "default")).await.unwrap();
    engine.claim(&[], "w1", Some(10)).await.unwrap().unwrap();
    engine.complete(id, "w1", None).await.unwrap();

    let report = engine
        .reclaim_expired(Utc::now() + Duration::seconds(30))
        .await
        .unwrap();
    assert_eq!(report.reclaimed(), 0);
    assert_eq!(engine.get(id).await.unwrap().status, TaskStatus::Completed);
}
