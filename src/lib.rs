//! Acknowledged, at-least-once message delivery over a partitioned log.
//!
//! `parcel` layers an explicit acknowledgement protocol on top of a
//! Kafka-like committable consume API: subscribers receive one message at a
//! time, answer with an ack or retry token, and the read offset advances
//! only after a successful acknowledgement. Failed and exhausted messages
//! stay uncommitted for re-delivery.
//!
//! This crate is the facade over the workspace:
//!
//! - [`parcel_core`] — domain models, the log-client and codec boundaries,
//!   clock abstraction, delivery events
//! - [`parcel_delivery`] — the dealer, consumption and publishing
//!   pipelines, and the router
//!
//! Most applications only need the re-exports below: implement
//! [`LogClient`] for your broker (or use the in-memory broker from
//! `parcel-testing`), pick a [`Codec`], spawn a [`Router`], and subscribe.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use parcel_core::{
    AckToken, BoxedFuture, Clock, Codec, CodecError, Committer, CommittableRecord, Encoded,
    GroupId, JsonCodec, LogClient, LogError, OutboundRecord, PublishAck, Record, RecordStream,
    SubscriptionKey, SystemClock, TopicName,
};
pub use parcel_delivery::{
    DealOutcome, Dealer, Delivery, DeliveryError, DeliveryStats, ErrorClass, Router, RouterConfig,
    RouterHandle, SubscribeAck, SubscriberRef, Subscription,
};

/// Delivery event definitions and observer traits.
pub mod events {
    pub use parcel_core::events::*;
}
