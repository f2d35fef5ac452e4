//! Error types for the delivery layer.
//!
//! Follows the taxonomy of the delivery protocol: transient failures are
//! retried locally by the dealer, permanent failures skip the commit and let
//! the record be re-delivered after a restart, decode failures are
//! recoverable skips, and fatal failures terminate the whole pipeline.

use std::{fmt, time::Duration};

use thiserror::Error;

use parcel_core::{AckToken, CodecError, LogError, TopicName};

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors surfaced by the delivery layer.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// A record's payload could not be decoded.
    #[error("decode failed for {topic}[{partition}]@{offset}: {source}")]
    Decode {
        /// Topic of the offending record.
        topic: TopicName,
        /// Partition of the offending record.
        partition: i32,
        /// Offset of the offending record.
        offset: i64,
        /// Underlying codec error.
        source: CodecError,
    },

    /// An outbound message could not be encoded.
    #[error("encode failed: {source}")]
    Encode {
        /// Underlying codec error.
        source: CodecError,
    },

    /// The subscriber answered with a token that is neither the ack nor the
    /// retry token.
    #[error("unexpected acknowledgement signal: {token}")]
    UnexpectedSignal {
        /// The token the subscriber sent.
        token: AckToken,
    },

    /// The subscriber's channel closed while a message was in flight.
    #[error("subscriber gone")]
    SubscriberGone,

    /// All delivery attempts for a message were exhausted.
    #[error("delivery attempts exhausted after {attempts} attempts")]
    AttemptsExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The committable record stream failed.
    #[error("record stream failed: {source}")]
    Stream {
        /// Underlying log error.
        source: LogError,
    },

    /// Committing an acknowledged record's offset failed.
    #[error("offset commit failed: {source}")]
    Commit {
        /// Underlying log error.
        source: LogError,
    },

    /// The log client rejected a produce call.
    #[error("publish failed: {source}")]
    Publish {
        /// Underlying log error.
        source: LogError,
    },

    /// The warm-up stash rejected a subscribe request because it was full.
    #[error("warm-up queue full (capacity {capacity})")]
    WarmupQueueFull {
        /// Configured stash capacity.
        capacity: usize,
    },

    /// The pipeline terminated before the request completed.
    #[error("pipeline terminated")]
    PipelineTerminated,

    /// The router has shut down and no longer accepts requests.
    #[error("router closed")]
    RouterClosed,

    /// Graceful shutdown did not complete within the configured timeout.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Timeout that was exceeded.
        timeout: Duration,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message.
        message: String,
    },
}

impl DeliveryError {
    /// Creates a decode error for a record.
    pub fn decode(topic: TopicName, partition: i32, offset: i64, source: CodecError) -> Self {
        Self::Decode { topic, partition, offset, source }
    }

    /// Creates an encode error.
    pub fn encode(source: CodecError) -> Self {
        Self::Encode { source }
    }

    /// Creates a stream error.
    pub fn stream(source: LogError) -> Self {
        Self::Stream { source }
    }

    /// Creates a commit error.
    pub fn commit(source: LogError) -> Self {
        Self::Commit { source }
    }

    /// Creates a publish error.
    pub fn publish(source: LogError) -> Self {
        Self::Publish { source }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Classifies this error per the delivery taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Decode { .. } => ErrorClass::Decode,

            Self::UnexpectedSignal { .. }
            | Self::SubscriberGone
            | Self::AttemptsExhausted { .. } => ErrorClass::Permanent,

            Self::Encode { .. }
            | Self::Stream { .. }
            | Self::Commit { .. }
            | Self::Publish { .. }
            | Self::WarmupQueueFull { .. }
            | Self::PipelineTerminated
            | Self::RouterClosed
            | Self::ShutdownTimeout { .. }
            | Self::Configuration { .. } => ErrorClass::Fatal,
        }
    }

    /// Whether the pipeline survives this error.
    ///
    /// Permanent delivery failures skip the commit but do not stop the
    /// pipeline; decode failures are skippable when the resume policy is
    /// enabled. Fatal errors terminate the pipeline.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.class(), ErrorClass::Decode | ErrorClass::Permanent)
    }
}

/// Error class per the delivery taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Recovered locally by the dealer via backoff retry.
    Transient,
    /// Commit skipped, record re-delivered after restart; pipeline continues.
    Permanent,
    /// Offending record skipped; stream resumes.
    Decode,
    /// Terminates the pipeline.
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::Decode => write!(f, "decode"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_failures_are_recoverable_for_the_pipeline() {
        assert!(DeliveryError::SubscriberGone.is_recoverable());
        assert!(DeliveryError::AttemptsExhausted { attempts: 3 }.is_recoverable());
        assert!(DeliveryError::UnexpectedSignal { token: AckToken::new("nak") }.is_recoverable());
    }

    #[test]
    fn fatal_errors_terminate_the_pipeline() {
        assert!(!DeliveryError::stream(LogError::connection("lost")).is_recoverable());
        assert!(!DeliveryError::commit(LogError::commit("broker down")).is_recoverable());
        assert!(!DeliveryError::WarmupQueueFull { capacity: 16 }.is_recoverable());
    }

    #[test]
    fn classes_mapped_correctly() {
        let decode = DeliveryError::decode(
            TopicName::new("orders"),
            0,
            42,
            CodecError::decode("bad payload"),
        );
        assert_eq!(decode.class(), ErrorClass::Decode);
        assert_eq!(DeliveryError::SubscriberGone.class(), ErrorClass::Permanent);
        assert_eq!(DeliveryError::RouterClosed.class(), ErrorClass::Fatal);
    }

    #[test]
    fn error_display_format() {
        let err = DeliveryError::AttemptsExhausted { attempts: 3 };
        assert_eq!(err.to_string(), "delivery attempts exhausted after 3 attempts");

        let err = DeliveryError::WarmupQueueFull { capacity: 16 };
        assert_eq!(err.to_string(), "warm-up queue full (capacity 16)");
    }
}
