use chrono::{Duration, Utc};
use taskq_core::config::CleanupConfig;
use taskq_core::{StateTransition, TaskSpec, TaskStatus};
use taskq_dispatcher::CleanupService;
use taskq_infrastructure::DatabaseManager;

#[tokio::test]
async fn test_cleanup_removes_old_terminal_tasks_and_keeps_stats_consistent() {
    let db = DatabaseManager::in_memory().await.unwrap();
    let store = db.task_store();
    let stats = db.stats_aggregator();

    let long_ago = Utc::now() - Duration::days(30);
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(
            store
                .submit(
                    &TaskSpec::new(format!("job-{i}"), "default").with_scheduled_at(long_ago),
                )
                .await
                .unwrap(),
        );
    }

    // 0,1 很早完成；2 很早取消；3 刚刚完成；4 仍在等待
    for id in &ids[0..2] {
        let task = store.get(*id).await.unwrap();
        store
            .transition_state(&StateTransition::claim(&task, "w", None, 30, long_ago))
            .await
            .unwrap();
        store
            .transition_state(&StateTransition::complete(
                *id,
                "w",
                None,
                long_ago + Duration::seconds(2),
            ))
            .await
            .unwrap();
    }
    store
        .transition_state(&StateTransition::cancel(ids[2], TaskStatus::Pending, long_ago))
        .await
        .unwrap();
    let task = store.get(ids[3]).await.unwrap();
    let now = Utc::now();
    store
        .transition_state(&StateTransition::claim(&task, "w", None, 30, now))
        .await
        .unwrap();
    store
        .transition_state(&StateTransition::complete(ids[3], "w", None, now))
        .await
        .unwrap();

    let config = CleanupConfig {
        retention_hours: 24,
        batch_size: 2,
        ..CleanupConfig::default()
    };
    let service = CleanupService::new(store.clone(), config);
    let result = service.cleanup_once(Utc::now()).await.unwrap();
    assert_eq!(result.deleted, 3);
    assert_eq!(result.batches, 2);

    assert!(store.get(ids[0]).await.unwrap_err().is_not_found());
    assert!(store.get(ids[2]).await.unwrap_err().is_not_found());
    assert_eq!(store.get(ids[3]).await.unwrap().status, TaskStatus::Completed);
    assert_eq!(store.get(ids[4]).await.unwrap().status, TaskStatus::Pending);
    assert!(store.list_logs(ids[0]).await.unwrap().is_empty());

    let incremental = stats.get_stats("default").await.unwrap();
    assert_eq!(incremental.completed, 1);
    assert_eq!(incremental.cancelled, 0);
    assert_eq!(incremental.pending, 1);
    let rebuilt = stats.recompute("default").await.unwrap();
    assert!(incremental.counts_eq(&rebuilt));

    let second = service.cleanup_once(Utc::now()).await.unwrap();
    assert_eq!(second.deleted, 0);
}
