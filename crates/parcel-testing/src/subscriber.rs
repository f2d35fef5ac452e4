//! Scripted subscribers for exercising the delivery protocol.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use tokio::sync::mpsc;

use parcel_core::AckToken;
use parcel_delivery::{Delivery, SubscriberRef};

/// Capacity of the test subscriber's delivery channel.
const DELIVERY_BUFFER: usize = 16;

enum Behavior {
    /// Answer every delivery with the same token.
    Always(AckToken),
    /// Receive deliveries but never answer.
    Silent,
    /// Answer delivery `n` with `responses[n]`; `None` entries and anything
    /// past the script stay silent.
    Script(Vec<Option<AckToken>>),
}

/// A subscriber driven by a canned response script.
///
/// Spawns a task that drains its delivery channel, records every delivery,
/// and answers according to the configured behavior. Handy for the protocol
/// paths: immediate acks, explicit retries, timeouts, unexpected tokens.
pub struct TestSubscriber<M> {
    subscriber: SubscriberRef<M>,
    deliveries: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<Arc<M>>>>,
}

impl<M: Send + Sync + 'static> TestSubscriber<M> {
    /// Subscriber that acknowledges everything with `token`.
    pub fn acking(token: AckToken) -> Self {
        Self::with_behavior(Behavior::Always(token))
    }

    /// Subscriber that receives but never answers, forcing timeouts.
    pub fn silent() -> Self {
        Self::with_behavior(Behavior::Silent)
    }

    /// Subscriber answering per the script, then falling silent.
    pub fn scripted(responses: Vec<Option<AckToken>>) -> Self {
        Self::with_behavior(Behavior::Script(responses))
    }

    fn with_behavior(behavior: Behavior) -> Self {
        let (tx, mut rx) = mpsc::channel::<Delivery<M>>(DELIVERY_BUFFER);
        let deliveries = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let task_deliveries = deliveries.clone();
        let task_seen = seen.clone();
        tokio::spawn(async move {
            let mut index = 0usize;
            while let Some(delivery) = rx.recv().await {
                task_deliveries.fetch_add(1, Ordering::SeqCst);
                task_seen.lock().unwrap().push(delivery.message.clone());

                let response = match &behavior {
                    Behavior::Always(token) => Some(token.clone()),
                    Behavior::Silent => None,
                    Behavior::Script(responses) => responses.get(index).cloned().flatten(),
                };
                index += 1;

                if let Some(token) = response {
                    delivery.respond(token).await;
                }
            }
        });

        Self { subscriber: tx, deliveries, seen }
    }

    /// Channel handle to register in a subscription.
    pub fn subscriber(&self) -> SubscriberRef<M> {
        self.subscriber.clone()
    }

    /// Total deliveries received, counting redeliveries.
    pub fn delivery_count(&self) -> usize {
        self.deliveries.load(Ordering::SeqCst)
    }

    /// Messages received so far, in delivery order.
    pub fn seen(&self) -> Vec<Arc<M>> {
        self.seen.lock().unwrap().clone()
    }
}
