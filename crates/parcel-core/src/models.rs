//! Domain primitives for topics, consumer groups, records, and tokens.

use std::{collections::BTreeSet, fmt};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Consumer group identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(String);

impl GroupId {
    /// Creates a new group identifier.
    pub fn new(group: impl Into<String>) -> Self {
        Self(group.into())
    }

    /// Returns the group name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(group: &str) -> Self {
        Self::new(group)
    }
}

/// Topic name within the log.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TopicName(String);

impl TopicName {
    /// Creates a new topic name.
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    /// Returns the topic name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a copy of this topic with the given prefix prepended.
    ///
    /// An empty prefix returns the topic unchanged. Used to apply a
    /// deployment-wide topic namespace uniformly across consume and publish
    /// paths.
    pub fn prefixed(&self, prefix: &str) -> Self {
        if prefix.is_empty() {
            self.clone()
        } else {
            Self(format!("{prefix}{}", self.0))
        }
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TopicName {
    fn from(topic: &str) -> Self {
        Self::new(topic)
    }
}

/// Identity of a consumption pipeline: one consumer group reading one set of
/// topics.
///
/// Topics are held in an ordered set so two subscriptions naming the same
/// topics in different order resolve to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    /// Consumer group of the subscription.
    pub group: GroupId,
    /// Topic set of the subscription.
    pub topics: BTreeSet<TopicName>,
}

impl SubscriptionKey {
    /// Creates a subscription key from a group and any iterable of topics.
    pub fn new(group: GroupId, topics: impl IntoIterator<Item = TopicName>) -> Self {
        Self { group, topics: topics.into_iter().collect() }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.group)?;
        let mut first = true;
        for topic in &self.topics {
            if !first {
                f.write_str("+")?;
            }
            write!(f, "{topic}")?;
            first = false;
        }
        Ok(())
    }
}

/// One consumed log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Topic the record was read from.
    pub topic: TopicName,

    /// Partition within the topic.
    pub partition: i32,

    /// Offset of the record within its partition.
    pub offset: i64,

    /// Optional partitioning key.
    pub key: Option<Bytes>,

    /// Raw payload bytes as stored in the log.
    pub payload: Bytes,

    /// Optional codec type discriminator carried alongside the payload.
    pub manifest: Option<String>,
}

/// Completion of a produce call: where the record landed in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    /// Topic the record was written to.
    pub topic: TopicName,
    /// Partition the record was written to.
    pub partition: i32,
    /// Offset assigned to the record.
    pub offset: i64,
}

/// Opaque acknowledgement token.
///
/// A subscription designates one token value as its positive acknowledgement
/// and one as its explicit retry request; anything else a subscriber sends
/// back is an unexpected signal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AckToken(String);

impl AckToken {
    /// Creates a token from any string value.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token value as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AckToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AckToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_key_ignores_topic_order() {
        let a = SubscriptionKey::new(
            GroupId::new("g1"),
            [TopicName::new("orders"), TopicName::new("refunds")],
        );
        let b = SubscriptionKey::new(
            GroupId::new("g1"),
            [TopicName::new("refunds"), TopicName::new("orders")],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn subscription_key_display_is_stable() {
        let key = SubscriptionKey::new(
            GroupId::new("billing"),
            [TopicName::new("refunds"), TopicName::new("orders")],
        );
        assert_eq!(key.to_string(), "billing:orders+refunds");
    }

    #[test]
    fn topic_prefix_applied() {
        let topic = TopicName::new("orders");
        assert_eq!(topic.prefixed("staging."), TopicName::new("staging.orders"));
        assert_eq!(topic.prefixed(""), topic);
    }

    #[test]
    fn tokens_compare_by_value() {
        assert_eq!(AckToken::new("ack"), AckToken::from("ack"));
        assert_ne!(AckToken::new("ack"), AckToken::new("retry"));
    }
}
