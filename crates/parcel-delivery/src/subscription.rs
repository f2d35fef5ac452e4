//! Subscription handle and the subscriber-facing delivery envelope.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use tokio::sync::mpsc;

use parcel_core::{AckToken, GroupId, Record, SubscriptionKey, TopicName};

/// Default acknowledge timeout for subscriptions.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of delivery attempts per message.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default lower bound on the backoff delay.
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(1);

/// Default upper bound on the backoff delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(512);

/// Sending half of a subscriber's delivery channel.
pub type SubscriberRef<M> = mpsc::Sender<Delivery<M>>;

/// One message delivered to a subscriber, with the responder it answers on.
///
/// Resending the same message on retry produces a fresh `Delivery` with an
/// incremented attempt counter; all attempts answer to the same dealer.
#[derive(Debug)]
pub struct Delivery<M> {
    /// The decoded message.
    pub message: Arc<M>,
    /// The raw log record the message was decoded from.
    pub record: Record,
    /// Delivery attempt this envelope belongs to (1-based).
    pub attempt: u32,
    responder: mpsc::Sender<AckToken>,
}

impl<M> Delivery<M> {
    pub(crate) fn new(
        message: Arc<M>,
        record: Record,
        attempt: u32,
        responder: mpsc::Sender<AckToken>,
    ) -> Self {
        Self { message, record, attempt, responder }
    }

    /// Sends a token back to the dealer handling this message.
    ///
    /// Returns `false` when the dealer has already terminated; late signals
    /// are simply dropped.
    pub async fn respond(&self, token: AckToken) -> bool {
        self.responder.send(token).await.is_ok()
    }
}

/// A subscriber's registration: identity, delivery target, and retry policy.
pub struct Subscription<M> {
    /// Consumer group the subscription reads as.
    pub group: GroupId,
    /// Topics the subscription covers.
    pub topics: BTreeSet<TopicName>,
    /// Channel messages are delivered on.
    pub subscriber: SubscriberRef<M>,
    /// Token that constitutes a positive acknowledgement.
    pub ack_token: AckToken,
    /// Token that constitutes an explicit retry request.
    pub retry_token: AckToken,
    /// Time a dealer waits for an acknowledgement per attempt.
    pub ack_timeout: Duration,
    /// Delivery attempts per message, including the first.
    pub retry_attempts: u32,
    /// Lower bound on the backoff delay between attempts.
    pub min_backoff: Duration,
    /// Upper bound on the backoff delay between attempts.
    pub max_backoff: Duration,
}

impl<M> Subscription<M> {
    /// Creates a subscription with default timeout and retry policy.
    pub fn new(
        group: GroupId,
        topics: impl IntoIterator<Item = TopicName>,
        subscriber: SubscriberRef<M>,
        ack_token: AckToken,
        retry_token: AckToken,
    ) -> Self {
        Self {
            group,
            topics: topics.into_iter().collect(),
            subscriber,
            ack_token,
            retry_token,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    /// Sets the acknowledge timeout.
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Sets the delivery attempt limit (clamped to at least one attempt).
    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Sets the backoff delay bounds.
    #[must_use]
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.min_backoff = min;
        self.max_backoff = max.max(min);
        self
    }

    /// The pipeline key this subscription routes to.
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey { group: self.group.clone(), topics: self.topics.clone() }
    }
}

// Manual impl: `M` itself need not be `Clone` for the handle to be.
impl<M> Clone for Subscription<M> {
    fn clone(&self) -> Self {
        Self {
            group: self.group.clone(),
            topics: self.topics.clone(),
            subscriber: self.subscriber.clone(),
            ack_token: self.ack_token.clone(),
            retry_token: self.retry_token.clone(),
            ack_timeout: self.ack_timeout,
            retry_attempts: self.retry_attempts,
            min_backoff: self.min_backoff,
            max_backoff: self.max_backoff,
        }
    }
}

impl<M> std::fmt::Debug for Subscription<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("group", &self.group)
            .field("topics", &self.topics)
            .field("ack_timeout", &self.ack_timeout)
            .field("retry_attempts", &self.retry_attempts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription() -> (Subscription<String>, mpsc::Receiver<Delivery<String>>) {
        let (tx, rx) = mpsc::channel(4);
        let sub = Subscription::new(
            GroupId::new("g1"),
            [TopicName::new("orders")],
            tx,
            AckToken::new("ack"),
            AckToken::new("retry"),
        );
        (sub, rx)
    }

    #[test]
    fn key_matches_group_and_topics() {
        let (sub, _rx) = subscription();
        let key = sub.key();
        assert_eq!(key.group, GroupId::new("g1"));
        assert!(key.topics.contains(&TopicName::new("orders")));
    }

    #[test]
    fn retry_attempts_clamped_to_one() {
        let (sub, _rx) = subscription();
        assert_eq!(sub.with_retry_attempts(0).retry_attempts, 1);
    }

    #[test]
    fn backoff_bounds_kept_ordered() {
        let (sub, _rx) = subscription();
        let sub = sub.with_backoff(Duration::from_secs(8), Duration::from_secs(2));
        assert_eq!(sub.min_backoff, Duration::from_secs(8));
        assert_eq!(sub.max_backoff, Duration::from_secs(8));
    }
}
