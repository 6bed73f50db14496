use chrono::{Duration, Utc};
use taskq_core::{
    StateTransition, TaskQueueError, TaskSpec, WorkerHeartbeat, WorkerRegistration, WorkerStatus,
};
use taskq_infrastructure::DatabaseManager;

fn registration(worker_id: &str, concurrency: i32) -> WorkerRegistration {
    WorkerRegistration::new(
        worker_id,
        "host-1",
        vec!["default".to_string(), "emails".to_string()],
        concurrency,
    )
    .with_pid(4242)
}

#[tokio::test]
async fn test_register_is_idempotent_upsert() {
    let db = DatabaseManager::in_memory().await.unwrap();
    let registry = db.worker_registry();

    let first = registry.register(&registration("w1", 2)).await.unwrap();
    assert_eq!(first.status, WorkerStatus::Active);
    assert_eq!(first.pid, Some(4242));
    assert_eq!(first.queues, vec!["default", "emails"]);
    assert_eq!(first.current_tasks, 0);

    registry.deregister("w1").await.unwrap();
    assert!(registry.get("w1").await.unwrap().unwrap().is_stopped());

    let again = registry.register(&registration("w1", 5)).await.unwrap();
    assert_eq!(again.status, WorkerStatus::Active);
    assert_eq!(again.concurrency, 5);
    assert_eq!(again.started_at, first.started_at);
    assert!(again.last_heartbeat >= first.last_heartbeat);

    assert_eq!(registry.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_register_validation() {
    let db = DatabaseManager::in_memory().await.unwrap();
    let registry = db.worker_registry();

    let err = registry.register(&registration("w1", 0)).await.unwrap_err();
    assert!(matches!(err, TaskQueueError::Validation(_)));

    let mut reg = registration("w1", 1);
    reg.queues.clear();
    assert!(registry.register(&reg).await.is_err());
    assert!(registry.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_heartbeat_and_stop_rejection() {
    let db = DatabaseManager::in_memory().await.unwrap();
    let registry = db.worker_registry();
    registry.register(&registration("w1", 2)).await.unwrap();

    let accepted = registry
        .heartbeat(&WorkerHeartbeat::new("w1", 0))
        .await
        .unwrap();
    assert!(accepted);
    assert_eq!(
        registry.get("w1").await.unwrap().unwrap().status,
        WorkerStatus::Idle
    );

    registry
        .heartbeat(&WorkerHeartbeat::new("w1", 2))
        .await
        .unwrap();
    assert_eq!(
        registry.get("w1").await.unwrap().unwrap().status,
        WorkerStatus::Active
    );

    registry.mark_stopped("w1").await.unwrap();
    let accepted = registry
        .heartbeat(&WorkerHeartbeat::new("w1", 0))
        .await
        .unwrap();
    assert!(!accepted);

    let err = registry
        .heartbeat(&WorkerHeartbeat::new("ghost", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, TaskQueueError::WorkerNotFound { .. }));
}

#[tokio::test]
async fn test_current_tasks_derived_from_running_tasks() {
    let db = DatabaseManager::in_memory().await.unwrap();
    let registry = db.worker_registry();
    let store = db.task_store();
    registry.register(&registration("w1", 2)).await.unwrap();

    let id = store.submit(&TaskSpec::new("job", "default")).await.unwrap();
    let task = store.get(id).await.unwrap();
    let now = Utc::now();
    store
        .transition_state(&StateTransition::claim(&task, "w1", None, 30, now))
        .await
        .unwrap();

    let worker = registry.get("w1").await.unwrap().unwrap();
    assert_eq!(worker.current_tasks, 1);
    assert!(worker.has_capacity());

    store
        .transition_state(&StateTransition::complete(id, "w1", None, now))
        .await
        .unwrap();
    assert_eq!(registry.get("w1").await.unwrap().unwrap().current_tasks, 0);
}

#[tokio::test]
async fn test_stale_detection_and_purge() {
    let db = DatabaseManager::in_memory().await.unwrap();
    let registry = db.worker_registry();
    registry.register(&registration("fresh", 1)).await.unwrap();
    registry.register(&registration("stale", 1)).await.unwrap();

    let old = Utc::now() - Duration::seconds(120);
    registry
        .heartbeat(&WorkerHeartbeat {
            worker_id: "stale".to_string(),
            current_tasks: 0,
            timestamp: old,
        })
        .await
        .unwrap();

    let stale = registry.list_stale(Utc::now(), 60).await.unwrap();
    assert_eq!(stale, vec!["stale".to_string()]);

    registry.mark_stopped("stale").await.unwrap();
    // 已停止的Worker不再出现在失联列表中
    assert!(registry.list_stale(Utc::now(), 60).await.unwrap().is_empty());

    let removed = registry
        .remove_stopped_before(Utc::now() - Duration::seconds(60))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(registry.get("stale").await.unwrap().is_none());
    assert!(registry.get("fresh").await.unwrap().is_some());

    registry.remove("fresh").await.unwrap();
    assert!(registry.remove("fresh").await.unwrap_err().is_not_found());
    assert!(registry.deregister("fresh").await.unwrap_err().is_not_found());
}
