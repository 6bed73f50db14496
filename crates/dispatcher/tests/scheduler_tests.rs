mod common;

use chrono::{Duration, Utc};
use taskq_core::config::DispatcherConfig;
use taskq_core::{TaskPriority, TaskQueueError, TaskSpec, TaskStatus};
use taskq_dispatcher::TaskScheduler;

use common::{queues, register, setup};

#[tokio::test]
async fn test_claim_prefers_priority_then_age() {
    let (_db, engine) = setup().await;
    register(&engine, "w1", &["default"], 10).await;

    let low = engine
        .submit(&TaskSpec::new("low", "default").with_priority(TaskPriority::Low))
        .await
        .unwrap();
    let normal_first = engine.submit(&TaskSpec::new("n1", "default")).await.unwrap();
    let critical = engine
        .submit(&TaskSpec::new("critical", "default").with_priority(TaskPriority::Critical))
        .await
        .unwrap();
    let normal_second = engine.submit(&TaskSpec::new("n2", "default")).await.unwrap();

    let mut order = Vec::new();
    while let Some(task) = engine.claim(&[], "w1", None).await.unwrap() {
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.worker_id.as_deref(), Some("w1"));
        assert_eq!(task.worker_hostname.as_deref(), Some("test-host"));
        assert_eq!(task.lease_seconds, Some(60));
        order.push(task.id);
    }
    assert_eq!(order, vec![critical, normal_first, normal_second, low]);
}

#[tokio::test]
async fn test_claim_admission() {
    let (_db, engine) = setup().await;
    engine.submit(&TaskSpec::new("job", "default")).await.unwrap();

    let err = engine.claim(&[], "ghost", None).await.unwrap_err();
    assert!(matches!(err, TaskQueueError::WorkerNotFound { .. }));

    register(&engine, "w1", &["default"], 1).await;
    let err = engine.claim(&[], "w1", Some(5)).await.unwrap_err();
    assert!(matches!(err, TaskQueueError::Validation(_)));

    engine.deregister_worker("w1").await.unwrap();
    assert!(engine.claim(&[], "w1", None).await.unwrap().is_none());

    // 重新注册后恢复领取，达到并发上限后不再领取
    register(&engine, "w1", &["default"], 1).await;
    engine.submit(&TaskSpec::new("job2", "default")).await.unwrap();
    assert!(engine.claim(&[], "w1", None).await.unwrap().is_some());
    assert!(engine.claim(&[], "w1", None).await.unwrap().is_none());

    let pending = engine
        .list(
            &taskq_core::TaskFilter::for_queue("default").with_status(TaskStatus::Pending),
            10,
            0,
        )
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn test_claim_respects_queue_selection() {
    let (_db, engine) = setup().await;
    register(&engine, "w1", &["emails"], 5).await;

    let report = engine.submit(&TaskSpec::new("report", "reports")).await.unwrap();
    let email = engine.submit(&TaskSpec::new("email", "emails")).await.unwrap();

    // 未指定队列时只看注册的队列
    let claimed = engine.claim(&[], "w1", None).await.unwrap().unwrap();
    assert_eq!(claimed.id, email);
    assert!(engine.claim(&[], "w1", None).await.unwrap().is_none());

    let claimed = engine
        .claim(&queues(&["reports"]), "w1", Some(30))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, report);
    assert_eq!(claimed.lease_seconds, Some(30));
}

#[tokio::test]
async fn test_claim_skips_future_tasks() {
    let (db, engine) = setup().await;
    register(&engine, "w1", &["default"], 5).await;

    let later = Utc::now() + Duration::minutes(10);
    let id = engine
        .submit(&TaskSpec::new("later", "default").with_scheduled_at(later))
        .await
        .unwrap();
    assert!(engine.claim(&[], "w1", None).await.unwrap().is_none());

    let scheduler = TaskScheduler::new(
        db.task_store(),
        db.worker_registry(),
        DispatcherConfig::default(),
    );
    let claimed = scheduler
        .claim_at(&[], "w1", 60, later + Duration::seconds(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, id);
}

#[tokio::test]
async fn test_claim_skips_tasks_taken_elsewhere() {
    let (db, engine) = setup().await;
    register(&engine, "w1", &["default"], 5).await;
    register(&engine, "w2", &["default"], 5).await;

    let first = engine.submit(&TaskSpec::new("a", "default")).await.unwrap();
    let second = engine.submit(&TaskSpec::new("b", "default")).await.unwrap();

    // 扫描上限为1时，只能看到最靠前的候选
    let narrow = TaskScheduler::new(
        db.task_store(),
        db.worker_registry(),
        DispatcherConfig {
            claim_scan_limit: 1,
            ..DispatcherConfig::default()
        },
    );
    let claimed = narrow.claim(&[], "w1", 60).await.unwrap().unwrap();
    assert_eq!(claimed.id, first);

    let claimed = narrow.claim(&[], "w2", 60).await.unwrap().unwrap();
    assert_eq!(claimed.id, second);
    assert!(narrow.claim(&[], "w2", 60).await.unwrap().is_none());
}
