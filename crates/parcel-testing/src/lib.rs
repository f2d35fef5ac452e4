//! Test infrastructure for the delivery layer.
//!
//! Provides an in-memory log broker with consumer-group semantics and fault
//! injection, scripted test subscribers, and fixture builders. Everything
//! here is deterministic under tokio's paused test time, so timing-sensitive
//! protocol behavior (acknowledge timeouts, backoff schedules, warm-up
//! delays) can be asserted exactly.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod fixtures;
pub mod subscriber;

pub use broker::{CommitEntry, InMemoryBroker};
pub use fixtures::{ack_token, init_tracing, retry_token, subscription, TestMessage};
pub use subscriber::TestSubscriber;
