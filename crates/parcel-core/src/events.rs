//! Delivery event definitions and observer dispatch.
//!
//! The delivery layer announces outcomes — acknowledgements, retries,
//! exhausted attempts, skipped records, pipeline terminations — as typed
//! events so owners can observe behavior without coupling to the pipeline
//! internals. Observers receive every event; fan-out goes through
//! [`MulticastObserver`].

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    log::BoxedFuture,
    models::{SubscriptionKey, TopicName},
};

/// Events emitted by the delivery layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeliveryEvent {
    /// A message was acknowledged and its offset committed.
    Acked(AckedEvent),

    /// A delivery attempt failed and a retry was scheduled.
    RetryScheduled(RetryScheduledEvent),

    /// All delivery attempts for a message were exhausted.
    Exhausted(ExhaustedEvent),

    /// A delivery failed terminally without exhausting attempts.
    Failed(FailedEvent),

    /// A record was skipped because its payload could not be decoded.
    DecodeSkipped(DecodeSkippedEvent),

    /// A consumption pipeline terminated.
    PipelineTerminated(PipelineTerminatedEvent),
}

/// Log coordinates of the record an event refers to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRef {
    /// Topic the record was read from.
    pub topic: TopicName,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

/// Emitted when a subscriber acknowledges a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckedEvent {
    /// Unique id of the deal that delivered the message.
    pub deal_id: Uuid,
    /// Record the acknowledgement refers to.
    pub record: RecordRef,
    /// Attempt on which the acknowledgement arrived (1-based).
    pub attempt: u32,
    /// When the acknowledgement was observed.
    pub at: DateTime<Utc>,
}

/// Emitted when an attempt times out or the subscriber requests a retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryScheduledEvent {
    /// Unique id of the deal retrying the message.
    pub deal_id: Uuid,
    /// Record being retried.
    pub record: RecordRef,
    /// Attempt that just failed (1-based).
    pub attempt: u32,
    /// Backoff delay before the next attempt.
    pub delay: Duration,
    /// When the retry was scheduled.
    pub at: DateTime<Utc>,
}

/// Emitted when a message's retry attempts are exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExhaustedEvent {
    /// Unique id of the deal that gave up.
    pub deal_id: Uuid,
    /// Record left uncommitted for re-delivery.
    pub record: RecordRef,
    /// Number of attempts made.
    pub attempts: u32,
    /// When attempts ran out.
    pub at: DateTime<Utc>,
}

/// Emitted when a delivery fails terminally without retrying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedEvent {
    /// Unique id of the failed deal.
    pub deal_id: Uuid,
    /// Record left uncommitted for re-delivery.
    pub record: RecordRef,
    /// Attempt on which the failure occurred (1-based).
    pub attempt: u32,
    /// Description of the failure.
    pub reason: String,
    /// When the failure was observed.
    pub at: DateTime<Utc>,
}

/// Emitted when a record is skipped due to a decode failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeSkippedEvent {
    /// Record whose payload could not be decoded.
    pub record: RecordRef,
    /// Description of the decode failure.
    pub reason: String,
    /// When the record was skipped.
    pub at: DateTime<Utc>,
}

/// Emitted when a consumption pipeline terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTerminatedEvent {
    /// Key of the terminated pipeline.
    pub key: SubscriptionKey,
    /// Termination reason, if the pipeline stopped on an error.
    pub reason: Option<String>,
    /// When the pipeline terminated.
    pub at: DateTime<Utc>,
}

/// Receives delivery events.
pub trait EventObserver: Send + Sync + 'static {
    /// Handles one event. Observers must not block the delivery path.
    fn observe(&self, event: DeliveryEvent) -> BoxedFuture<'_, ()>;
}

/// Observer that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl EventObserver for NoOpObserver {
    fn observe(&self, _event: DeliveryEvent) -> BoxedFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Fans each event out to a set of registered observers.
#[derive(Default)]
pub struct MulticastObserver {
    observers: Vec<Arc<dyn EventObserver>>,
}

impl MulticastObserver {
    /// Creates an empty multicast observer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer.
    pub fn add_observer(&mut self, observer: Arc<dyn EventObserver>) {
        self.observers.push(observer);
    }
}

impl EventObserver for MulticastObserver {
    fn observe(&self, event: DeliveryEvent) -> BoxedFuture<'_, ()> {
        Box::pin(async move {
            for observer in &self.observers {
                observer.observe(event.clone()).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::models::GroupId;

    #[derive(Default)]
    struct CountingObserver {
        count: AtomicUsize,
    }

    impl EventObserver for CountingObserver {
        fn observe(&self, _event: DeliveryEvent) -> BoxedFuture<'_, ()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    fn terminated_event() -> DeliveryEvent {
        DeliveryEvent::PipelineTerminated(PipelineTerminatedEvent {
            key: SubscriptionKey::new(GroupId::new("g1"), [TopicName::new("orders")]),
            reason: None,
            at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn multicast_reaches_every_observer() {
        let first = Arc::new(CountingObserver::default());
        let second = Arc::new(CountingObserver::default());

        let mut multicast = MulticastObserver::new();
        multicast.add_observer(first.clone());
        multicast.add_observer(second.clone());

        multicast.observe(terminated_event()).await;
        multicast.observe(terminated_event()).await;

        assert_eq!(first.count.load(Ordering::SeqCst), 2);
        assert_eq!(second.count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn noop_observer_accepts_events() {
        NoOpObserver.observe(terminated_event()).await;
    }
}
