mod common;

use proptest::prelude::*;
use taskq_core::{TaskPriority, TaskSpec, TaskStatus};

use common::{register, setup};

fn priority_strategy() -> impl Strategy<Value = TaskPriority> {
    prop_oneof![
        Just(TaskPriority::Low),
        Just(TaskPriority::Normal),
        Just(TaskPriority::High),
        Just(TaskPriority::Critical),
    ]
}

/// 提交一批任务后逐个领取，返回领取顺序 (优先级, id)
fn claim_order(priorities: Vec<TaskPriority>) -> Vec<(TaskPriority, i64)> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let (_db, engine) = setup().await;
        register(&engine, "w1", &["default"], 1000).await;
        for (i, priority) in priorities.iter().enumerate() {
            engine
                .submit(&TaskSpec::new(format!("job-{i}"), "default").with_priority(*priority))
                .await
                .unwrap();
        }

        let mut order = Vec::new();
        while let Some(task) = engine.claim(&[], "w1", None).await.unwrap() {
            assert_eq!(task.status, TaskStatus::Running);
            order.push((task.priority, task.id));
        }
        order
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_claims_follow_priority_then_submission(
        priorities in prop::collection::vec(priority_strategy(), 1..12)
    ) {
        let order = claim_order(priorities.clone());
        prop_assert_eq!(order.len(), priorities.len());

        for pair in order.windows(2) {
            let (p1, id1) = pair[0];
            let (p2, id2) = pair[1];
            prop_assert!(p1 >= p2, "优先级倒序: {:?} 在 {:?} 之前", p1, p2);
            if p1 == p2 {
                prop_assert!(id1 < id2, "同优先级应按提交顺序: {} 在 {} 之前", id1, id2);
            }
        }
    }
}
