//! Error types for the collaborator boundaries.
//!
//! Covers the two failure surfaces the core exposes: the pluggable codec and
//! the log client. Both error types carry message strings rather than source
//! errors so they stay clonable across task boundaries.

use thiserror::Error;

/// Errors produced by the pluggable codec.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// Payload bytes could not be decoded into the domain type.
    #[error("decode failed: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },

    /// Domain object could not be encoded into payload bytes.
    #[error("encode failed: {message}")]
    Encode {
        /// Description of the encode failure.
        message: String,
    },

    /// The record's manifest does not match the codec's expected type
    /// discriminator.
    #[error("manifest mismatch: expected {expected:?}, found {found:?}")]
    ManifestMismatch {
        /// Manifest the codec expected.
        expected: String,
        /// Manifest carried by the record, if any.
        found: Option<String>,
    },
}

impl CodecError {
    /// Creates a decode error from a message.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode { message: message.into() }
    }

    /// Creates an encode error from a message.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode { message: message.into() }
    }
}

/// Errors produced by the log client.
#[derive(Debug, Clone, Error)]
pub enum LogError {
    /// Connectivity to the log was lost or could not be established.
    #[error("log connection failed: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// Committing a consumed offset failed.
    #[error("offset commit failed: {message}")]
    Commit {
        /// Description of the commit failure.
        message: String,
    },

    /// Producing a record failed.
    #[error("publish failed: {message}")]
    Publish {
        /// Description of the publish failure.
        message: String,
    },

    /// The log client has been closed.
    #[error("log client closed")]
    Closed,
}

impl LogError {
    /// Creates a connection error from a message.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Creates a commit error from a message.
    pub fn commit(message: impl Into<String>) -> Self {
        Self::Commit { message: message.into() }
    }

    /// Creates a publish error from a message.
    pub fn publish(message: impl Into<String>) -> Self {
        Self::Publish { message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_format() {
        let err = CodecError::decode("unexpected end of input");
        assert_eq!(err.to_string(), "decode failed: unexpected end of input");

        let err = LogError::commit("broker unreachable");
        assert_eq!(err.to_string(), "offset commit failed: broker unreachable");
    }

    #[test]
    fn errors_are_clonable() {
        let err = LogError::connection("refused");
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }
}
