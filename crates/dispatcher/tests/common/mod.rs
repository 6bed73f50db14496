#![allow(dead_code)]

use taskq_core::config::{CleanupConfig, DispatcherConfig, RetryConfig};
use taskq_core::{WorkerInfo, WorkerRegistration};
use taskq_dispatcher::TaskQueueEngine;
use taskq_infrastructure::DatabaseManager;

pub fn build_engine(
    db: &DatabaseManager,
    dispatcher: DispatcherConfig,
    retry: RetryConfig,
) -> TaskQueueEngine {
    TaskQueueEngine::new(
        db.task_store(),
        db.worker_registry(),
        db.stats_aggregator(),
        dispatcher,
        retry,
        CleanupConfig::default(),
    )
}

pub async fn setup() -> (DatabaseManager, TaskQueueEngine) {
    let db = DatabaseManager::in_memory().await.unwrap();
    let engine = build_engine(&db, DispatcherConfig::default(), RetryConfig::default());
    (db, engine)
}

pub fn queues(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

pub async fn register(
    engine: &TaskQueueEngine,
    worker_id: &str,
    queue_names: &[&str],
    concurrency: i32,
) -> WorkerInfo {
    engine
        .register_worker(&WorkerRegistration::new(
            worker_id,
            "test-host",
            queues(queue_names),
            concurrency,
        ))
        .await
        .unwrap()
}
