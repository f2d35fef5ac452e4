//! Fixture builders shared across the workspace's tests.

use serde::{Deserialize, Serialize};

use parcel_core::{AckToken, GroupId, TopicName};
use parcel_delivery::{SubscriberRef, Subscription};

/// Minimal message type used throughout the integration tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMessage {
    /// Test-assigned identifier.
    pub id: u64,
    /// Free-form body.
    pub body: String,
}

impl TestMessage {
    /// Creates a test message.
    pub fn new(id: u64, body: impl Into<String>) -> Self {
        Self { id, body: body.into() }
    }
}

/// The ack token used by the test fixtures.
pub fn ack_token() -> AckToken {
    AckToken::new("ack")
}

/// The retry token used by the test fixtures.
pub fn retry_token() -> AckToken {
    AckToken::new("retry")
}

/// A subscription over the given topics with the fixture tokens and default
/// timeout policy.
pub fn subscription(
    group: &str,
    topics: &[&str],
    subscriber: SubscriberRef<TestMessage>,
) -> Subscription<TestMessage> {
    Subscription::new(
        GroupId::new(group),
        topics.iter().map(|t| TopicName::new(*t)),
        subscriber,
        ack_token(),
        retry_token(),
    )
}

/// Initializes test logging once per process; safe to call repeatedly.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}
