//! End-to-end smoke test through the facade crate: publish, subscribe,
//! acknowledge, observe the commit.

use std::{sync::Arc, time::Duration};

use parcel::{GroupId, JsonCodec, Router, RouterConfig, TopicName};
use parcel_testing::{ack_token, subscription, InMemoryBroker, TestMessage, TestSubscriber};

#[tokio::test(start_paused = true)]
async fn publish_subscribe_ack_commit() {
    let broker = InMemoryBroker::new();
    let codec = Arc::new(JsonCodec::<TestMessage>::new());
    let router = Router::spawn(broker.client(), codec, RouterConfig::default());
    let handle = router.handle();

    let ack = handle
        .publish(TopicName::new("orders"), TestMessage::new(7, "first order"))
        .await
        .expect("publish succeeds");
    assert_eq!(ack.offset, 0);

    let subscriber = TestSubscriber::acking(ack_token());
    handle
        .subscribe(subscription("billing", &["orders"], subscriber.subscriber()))
        .await
        .expect("subscribe succeeds");

    tokio::time::timeout(Duration::from_secs(600), async {
        while broker.commit_count() != 1 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("commit observed");

    assert_eq!(
        broker.committed_offset(&GroupId::new("billing"), &TopicName::new("orders")),
        Some(1)
    );
    assert_eq!(subscriber.seen().len(), 1);
    assert_eq!(subscriber.seen()[0].id, 7);

    router.shutdown().await.expect("clean shutdown");
}
