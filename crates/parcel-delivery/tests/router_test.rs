//! Routing behavior: pipeline caching, idempotent subscribes, publishing.

use std::{sync::Arc, time::Duration};

use parcel_core::{GroupId, JsonCodec, TopicName};
use parcel_delivery::{DeliveryError, Router, RouterConfig};
use parcel_testing::{ack_token, subscription, InMemoryBroker, TestMessage, TestSubscriber};

fn codec() -> Arc<JsonCodec<TestMessage>> {
    Arc::new(JsonCodec::new())
}

async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(600), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test(start_paused = true)]
async fn resubscribe_for_active_key_is_idempotent() {
    let broker = InMemoryBroker::new();
    let router = Router::spawn(broker.client(), codec(), RouterConfig::default());
    let handle = router.handle();

    let first = TestSubscriber::<TestMessage>::silent();
    let ack = handle
        .subscribe(subscription("g1", &["orders"], first.subscriber()))
        .await
        .expect("first subscribe succeeds");
    assert!(!ack.reused);

    // Same (group, topics) key again: acknowledged without a second log
    // subscription or pipeline.
    let second = TestSubscriber::<TestMessage>::silent();
    let ack = handle
        .subscribe(subscription("g1", &["orders"], second.subscriber()))
        .await
        .expect("second subscribe succeeds");
    assert!(ack.reused);

    assert_eq!(handle.stats().await.consume_pipelines, 1);
    assert_eq!(broker.consume_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_subscribes_share_one_pipeline() {
    let broker = InMemoryBroker::new();
    let router = Router::spawn(broker.client(), codec(), RouterConfig::default());

    // Both requests land during the warm-up window; the stash replay
    // registers one and acknowledges the other idempotently.
    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let handle = router.handle();
            let subscriber = TestSubscriber::<TestMessage>::silent();
            tokio::spawn(async move {
                handle.subscribe(subscription("g1", &["orders"], subscriber.subscriber())).await
            })
        })
        .collect();

    let mut reused = Vec::new();
    for task in tasks {
        let ack = task.await.expect("task").expect("subscribe succeeds");
        reused.push(ack.reused);
    }
    reused.sort_unstable();
    assert_eq!(reused, vec![false, true]);

    assert_eq!(router.stats().await.consume_pipelines, 1);
    assert_eq!(broker.consume_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn warmup_stash_overflow_fails_fast() {
    let broker = InMemoryBroker::new();
    let config = RouterConfig { warmup_stash_capacity: 1, ..Default::default() };
    let router = Router::spawn(broker.client(), codec(), config);

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let handle = router.handle();
            let subscriber = TestSubscriber::<TestMessage>::silent();
            tokio::spawn(async move {
                handle.subscribe(subscription("g1", &["orders"], subscriber.subscriber())).await
            })
        })
        .collect();

    let mut ok = 0;
    let mut overflowed = 0;
    for task in tasks {
        match task.await.expect("task") {
            Ok(_) => ok += 1,
            Err(DeliveryError::WarmupQueueFull { capacity }) => {
                assert_eq!(capacity, 1);
                overflowed += 1;
            },
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(overflowed, 2);
}

#[tokio::test(start_paused = true)]
async fn publish_then_subscribe_commits_exactly_once() {
    let broker = InMemoryBroker::new();
    let router = Router::spawn(broker.client(), codec(), RouterConfig::default());
    let handle = router.handle();

    let ack = handle
        .publish(TopicName::new("orders"), TestMessage::new(1, "payload"))
        .await
        .expect("publish succeeds");
    assert_eq!(ack.offset, 0);

    let subscriber = TestSubscriber::acking(ack_token());
    handle
        .subscribe(subscription("g1", &["orders"], subscriber.subscriber()))
        .await
        .expect("subscribe succeeds");

    wait_for("the offset commit", || broker.commit_count() == 1).await;
    assert_eq!(
        broker.committed_offset(&GroupId::new("g1"), &TopicName::new("orders")),
        Some(1)
    );
}

#[tokio::test(start_paused = true)]
async fn publishing_pipelines_cached_per_topic() {
    let broker = InMemoryBroker::new();
    let router = Router::spawn(broker.client(), codec(), RouterConfig::default());
    let handle = router.handle();

    handle.publish(TopicName::new("orders"), TestMessage::new(1, "a")).await.unwrap();
    handle.publish(TopicName::new("orders"), TestMessage::new(2, "b")).await.unwrap();
    assert_eq!(handle.stats().await.publishers, 1);

    handle.publish(TopicName::new("refunds"), TestMessage::new(3, "c")).await.unwrap();
    assert_eq!(handle.stats().await.publishers, 2);

    assert_eq!(broker.record_count(&TopicName::new("orders")), 2);
    assert_eq!(broker.record_count(&TopicName::new("refunds")), 1);
}

#[tokio::test(start_paused = true)]
async fn publish_failure_surfaces_log_error() {
    let broker = InMemoryBroker::new();
    broker.fail_publish();
    let router = Router::spawn(broker.client(), codec(), RouterConfig::default());

    let err = router
        .handle()
        .publish(TopicName::new("orders"), TestMessage::new(1, "a"))
        .await
        .expect_err("publish fails");
    assert!(matches!(err, DeliveryError::Publish { .. }));
}

#[tokio::test(start_paused = true)]
async fn topic_prefix_applied_uniformly() {
    let broker = InMemoryBroker::new();
    let config = RouterConfig { topic_prefix: "staging.".to_string(), ..Default::default() };
    let router = Router::spawn(broker.client(), codec(), config);
    let handle = router.handle();

    handle.publish(TopicName::new("orders"), TestMessage::new(1, "a")).await.unwrap();
    assert_eq!(broker.record_count(&TopicName::new("staging.orders")), 1);
    assert_eq!(broker.record_count(&TopicName::new("orders")), 0);

    // The consuming side resolves the same physical topic.
    let subscriber = TestSubscriber::acking(ack_token());
    handle
        .subscribe(subscription("g1", &["orders"], subscriber.subscriber()))
        .await
        .expect("subscribe succeeds");

    wait_for("the offset commit", || broker.commit_count() == 1).await;
    assert_eq!(
        broker.committed_offset(&GroupId::new("g1"), &TopicName::new("staging.orders")),
        Some(1)
    );
}

#[tokio::test(start_paused = true)]
async fn subscribe_fails_fast_when_log_unavailable() {
    let broker = InMemoryBroker::new();
    broker.close();
    let router = Router::spawn(broker.client(), codec(), RouterConfig::default());

    let subscriber = TestSubscriber::<TestMessage>::silent();
    let err = router
        .handle()
        .subscribe(subscription("g1", &["orders"], subscriber.subscriber()))
        .await
        .expect_err("log is closed");
    assert!(matches!(err, DeliveryError::Stream { .. }));
}

#[tokio::test(start_paused = true)]
async fn shutdown_drains_pipelines_and_rejects_new_requests() {
    let broker = InMemoryBroker::new();
    let router = Router::spawn(broker.client(), codec(), RouterConfig::default());
    let handle = router.handle();

    let subscriber = TestSubscriber::<TestMessage>::silent();
    handle
        .subscribe(subscription("g1", &["orders"], subscriber.subscriber()))
        .await
        .expect("subscribe succeeds");
    handle.publish(TopicName::new("orders"), TestMessage::new(1, "a")).await.unwrap();

    router.shutdown().await.expect("shutdown completes in time");

    let stats = handle.stats().await;
    assert_eq!(stats.consume_pipelines, 0);
    assert_eq!(stats.publishers, 0);

    let subscriber = TestSubscriber::<TestMessage>::silent();
    let err = handle
        .subscribe(subscription("g1", &["orders"], subscriber.subscriber()))
        .await
        .expect_err("router is gone");
    assert!(matches!(
        err,
        DeliveryError::RouterClosed | DeliveryError::PipelineTerminated
    ));
}
