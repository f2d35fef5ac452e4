//! The delivery dealer: acknowledgement negotiation for one message.
//!
//! A dealer owns exactly one in-flight message for its lifetime. It sends the
//! message to the subscriber, waits for an acknowledgement within the
//! subscription's timeout, retries with exponential backoff up to the attempt
//! limit, and reports exactly one terminal outcome before terminating.
//!
//! Inbound signals resolve each wait: the subscription's ack token ends the
//! deal successfully, its retry token or a timer expiry triggers a retry, and
//! any other token is a terminal failure with no further retries.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use parcel_core::{
    events::{
        AckedEvent, DeliveryEvent, EventObserver, ExhaustedEvent, FailedEvent, RecordRef,
        RetryScheduledEvent,
    },
    AckToken, Clock, Record,
};

use crate::{
    error::DeliveryError,
    subscription::{Delivery, Subscription},
};

/// Capacity of the per-deal reply channel.
const REPLY_BUFFER: usize = 4;

/// Terminal outcome of one deal.
#[derive(Debug)]
pub enum DealOutcome {
    /// The subscriber acknowledged the message.
    Acked,
    /// The deal failed terminally without exhausting its attempts.
    Failed(DeliveryError),
    /// Every delivery attempt timed out or was retried away.
    AttemptsExhausted,
}

/// Negotiates acknowledgement or retry for single messages.
///
/// The dealer itself is stateless between deals; all per-message state lives
/// in the [`deal`](Dealer::deal) call.
pub struct Dealer {
    clock: Arc<dyn Clock>,
    observer: Arc<dyn EventObserver>,
}

impl Dealer {
    /// Creates a dealer using the given clock and event observer.
    pub fn new(clock: Arc<dyn Clock>, observer: Arc<dyn EventObserver>) -> Self {
        Self { clock, observer }
    }

    /// Worst-case time one deal may occupy.
    ///
    /// The contract bound is `ack_timeout × attempts` for the waits plus the
    /// full geometric backoff series `2^attempts − 1` seconds. Callers size
    /// upstream timeouts against this; the realized worst case is slightly
    /// smaller because no backoff follows the final attempt.
    pub fn max_occupancy(ack_timeout: Duration, retry_attempts: u32) -> Duration {
        let waits = ack_timeout.checked_mul(retry_attempts).unwrap_or(Duration::MAX);
        let backoff = Duration::from_secs(2u64.saturating_pow(retry_attempts.min(62)) - 1);
        waits.saturating_add(backoff)
    }

    /// Backoff delay after the given failed attempt (1-based): `2^(n−1)`
    /// seconds clamped to the subscription's bounds.
    pub fn backoff_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1).min(62);
        let raw = Duration::from_secs(2u64.saturating_pow(exponent));
        std::cmp::max(std::cmp::min(raw, max), min)
    }

    /// Delivers one message and negotiates its acknowledgement.
    ///
    /// Reports exactly one terminal outcome; the per-message state is gone
    /// when this returns.
    pub async fn deal<M>(
        &self,
        message: Arc<M>,
        record: &Record,
        subscription: &Subscription<M>,
    ) -> DealOutcome
    where
        M: Send + Sync + 'static,
    {
        let deal_id = Uuid::new_v4();
        let attempts = subscription.retry_attempts.max(1);
        let (reply_tx, mut reply_rx) = mpsc::channel::<AckToken>(REPLY_BUFFER);
        let started = self.clock.now();

        let mut attempt: u32 = 1;
        loop {
            let delivery =
                Delivery::new(message.clone(), record.clone(), attempt, reply_tx.clone());
            if subscription.subscriber.send(delivery).await.is_err() {
                warn!(
                    deal_id = %deal_id,
                    topic = %record.topic,
                    offset = record.offset,
                    "subscriber channel closed, abandoning message"
                );
                return self.fail(deal_id, record, attempt, DeliveryError::SubscriberGone).await;
            }

            debug!(
                deal_id = %deal_id,
                attempt,
                topic = %record.topic,
                offset = record.offset,
                "message dispatched, awaiting acknowledgement"
            );

            enum Wait {
                Signal(Option<AckToken>),
                Timeout,
            }

            // Queued replies win over an already-expired timer.
            let wait = tokio::select! {
                biased;
                signal = reply_rx.recv() => Wait::Signal(signal),
                () = self.clock.sleep(subscription.ack_timeout) => Wait::Timeout,
            };

            match wait {
                Wait::Signal(Some(token)) if token == subscription.ack_token => {
                    debug!(
                        deal_id = %deal_id,
                        attempt,
                        elapsed_ms = self.clock.now().duration_since(started).as_millis() as u64,
                        "message acknowledged"
                    );
                    self.publish(DeliveryEvent::Acked(AckedEvent {
                        deal_id,
                        record: record_ref(record),
                        attempt,
                        at: self.timestamp(),
                    }))
                    .await;
                    return DealOutcome::Acked;
                },
                Wait::Signal(Some(token)) if token == subscription.retry_token => {
                    debug!(deal_id = %deal_id, attempt, "subscriber requested redelivery");
                },
                Wait::Signal(Some(token)) => {
                    warn!(
                        deal_id = %deal_id,
                        attempt,
                        token = %token,
                        "unexpected acknowledgement signal, abandoning message"
                    );
                    return self
                        .fail(deal_id, record, attempt, DeliveryError::UnexpectedSignal { token })
                        .await;
                },
                Wait::Signal(None) => {
                    // The dealer holds its own sender clone, so this only
                    // happens while the runtime tears down.
                    return self.fail(deal_id, record, attempt, DeliveryError::SubscriberGone).await;
                },
                Wait::Timeout => {
                    debug!(deal_id = %deal_id, attempt, "acknowledge timeout expired");
                },
            }

            if attempt >= attempts {
                error!(
                    deal_id = %deal_id,
                    attempts,
                    topic = %record.topic,
                    offset = record.offset,
                    "delivery attempts exhausted, leaving record uncommitted"
                );
                self.publish(DeliveryEvent::Exhausted(ExhaustedEvent {
                    deal_id,
                    record: record_ref(record),
                    attempts,
                    at: self.timestamp(),
                }))
                .await;
                return DealOutcome::AttemptsExhausted;
            }

            let delay = Self::backoff_delay(
                attempt,
                subscription.min_backoff,
                subscription.max_backoff,
            );
            debug!(
                deal_id = %deal_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "scheduling redelivery"
            );
            self.publish(DeliveryEvent::RetryScheduled(RetryScheduledEvent {
                deal_id,
                record: record_ref(record),
                attempt,
                delay,
                at: self.timestamp(),
            }))
            .await;

            self.clock.sleep(delay).await;
            attempt += 1;
        }
    }

    async fn fail(
        &self,
        deal_id: Uuid,
        record: &Record,
        attempt: u32,
        error: DeliveryError,
    ) -> DealOutcome {
        self.publish(DeliveryEvent::Failed(FailedEvent {
            deal_id,
            record: record_ref(record),
            attempt,
            reason: error.to_string(),
            at: self.timestamp(),
        }))
        .await;
        DealOutcome::Failed(error)
    }

    async fn publish(&self, event: DeliveryEvent) {
        self.observer.observe(event).await;
    }

    fn timestamp(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.clock.now_system())
    }
}

fn record_ref(record: &Record) -> RecordRef {
    RecordRef {
        topic: record.topic.clone(),
        partition: record.partition,
        offset: record.offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let min = Duration::from_millis(1);
        let max = Duration::from_secs(512);

        let delays: Vec<_> =
            (1..=5).map(|n| Dealer::backoff_delay(n, min, max)).collect();

        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[2], Duration::from_secs(4));
        assert_eq!(delays[3], Duration::from_secs(8));
        assert_eq!(delays[4], Duration::from_secs(16));
    }

    #[test]
    fn backoff_clamped_to_bounds() {
        let min = Duration::from_secs(4);
        let max = Duration::from_secs(8);

        assert_eq!(Dealer::backoff_delay(1, min, max), min);
        assert_eq!(Dealer::backoff_delay(3, min, max), Duration::from_secs(4));
        assert_eq!(Dealer::backoff_delay(10, min, max), max);
    }

    #[test]
    fn max_occupancy_matches_contract_bound() {
        let bound = Dealer::max_occupancy(Duration::from_secs(2), 3);
        // 2s × 3 attempts + (2^3 − 1)s of backoff allowance.
        assert_eq!(bound, Duration::from_secs(13));

        let bound = Dealer::max_occupancy(Duration::from_secs(1), 1);
        assert_eq!(bound, Duration::from_secs(2));
    }

    #[test]
    fn max_occupancy_saturates_on_extreme_inputs() {
        let bound = Dealer::max_occupancy(Duration::MAX, u32::MAX);
        assert_eq!(bound, Duration::MAX);
    }
}
