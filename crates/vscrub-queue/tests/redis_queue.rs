//! Redis job queue integration tests.

use std::time::Duration;

use vscrub_models::{JobId, WorkerId};
use vscrub_queue::{JobQueue, QueueConfig, RedisJobQueue};

fn queue(max_deliveries: u32) -> RedisJobQueue {
    dotenvy::dotenv().ok();
    let config = QueueConfig {
        key_prefix: format!("vscrub-test-{}", JobId::new()),
        max_deliveries,
        poll_interval: Duration::from_millis(50),
        ..QueueConfig::from_env()
    };
    RedisJobQueue::new(config).expect("Failed to create queue")
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_queue_priority_and_lease() {
    let queue = queue(5);
    let worker = WorkerId::new();
    let standard = JobId::new();
    let priority = JobId::new();

    assert!(queue.enqueue(&standard, 0).await.unwrap());
    assert!(queue.enqueue(&priority, 100).await.unwrap());
    assert!(!queue.enqueue(&priority, 100).await.unwrap());

    let first = queue
        .lease(&worker, Duration::from_secs(30), Duration::ZERO)
        .await
        .unwrap()
        .expect("expected an entry");
    assert_eq!(first.job_id, priority);
    assert_eq!(first.delivery_count, 0);
    assert_eq!(first.lease_owner.as_ref(), Some(&worker));

    let other = WorkerId::new();
    assert!(queue.heartbeat(&other, &priority, Duration::from_secs(30)).await.unwrap_err().is_lease_lost());

    queue.complete(&worker, &priority).await.unwrap();
    let depth = queue.depth().await.unwrap();
    assert_eq!(depth.pending, 1);
    assert_eq!(depth.leased, 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_queue_expiry_and_dead_letter() {
    let queue = queue(1);
    let worker = WorkerId::new();
    let job = JobId::new();
    queue.enqueue(&job, 0).await.unwrap();

    for expected in 0..2u32 {
        let entry = queue
            .lease(&worker, Duration::from_millis(100), Duration::from_secs(2))
            .await
            .unwrap()
            .expect("expected redelivery");
        assert_eq!(entry.delivery_count, expected);
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let none = queue
        .lease(&worker, Duration::from_millis(100), Duration::from_millis(200))
        .await
        .unwrap();
    assert!(none.is_none());

    let dead = queue.take_dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job_id, job);
    assert_eq!(dead[0].delivery_count, 2);
    assert!(queue.take_dead_letters().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_queue_requeue_delay() {
    let queue = queue(5);
    let worker = WorkerId::new();
    let job = JobId::new();
    queue.enqueue(&job, 0).await.unwrap();

    queue.lease(&worker, Duration::from_secs(30), Duration::ZERO).await.unwrap().unwrap();
    queue.requeue(&worker, &job, Duration::from_millis(300)).await.unwrap();

    assert!(queue.lease(&worker, Duration::from_secs(30), Duration::ZERO).await.unwrap().is_none());
    assert_eq!(queue.depth().await.unwrap().delayed, 1);

    let entry = queue
        .lease(&worker, Duration::from_secs(30), Duration::from_secs(2))
        .await
        .unwrap()
        .expect("expected entry after delay");
    assert_eq!(entry.delivery_count, 0);
}
