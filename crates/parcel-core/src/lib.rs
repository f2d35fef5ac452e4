//! Core domain models and collaborator boundaries.
//!
//! Provides strongly-typed domain primitives, the log-client and codec
//! boundaries, the clock abstraction, and delivery event definitions for the
//! acknowledged-delivery layer. All other crates depend on these foundational
//! types for type safety and consistency.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod events;
pub mod log;
pub mod models;
pub mod time;

pub use codec::{Codec, Encoded, JsonCodec};
pub use error::{CodecError, LogError};
pub use events::{
    AckedEvent, DecodeSkippedEvent, DeliveryEvent, EventObserver, ExhaustedEvent, FailedEvent,
    MulticastObserver, NoOpObserver, PipelineTerminatedEvent, RetryScheduledEvent,
};
pub use log::{BoxedFuture, Committer, CommittableRecord, LogClient, OutboundRecord, RecordStream};
pub use models::{AckToken, GroupId, PublishAck, Record, SubscriptionKey, TopicName};
pub use time::{Clock, SystemClock};
