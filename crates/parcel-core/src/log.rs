//! The log-client boundary.
//!
//! The delivery layer never talks to a broker directly; it consumes and
//! produces through these traits. A production implementation wraps a real
//! partitioned log client, while tests use the in-memory broker from
//! `parcel-testing`. All traits are object-safe and return boxed futures so
//! implementations can be swapped behind `Arc<dyn LogClient>`.

use std::{future::Future, pin::Pin};

use bytes::Bytes;

use crate::{
    error::LogError,
    models::{GroupId, PublishAck, Record, TopicName},
};

/// Boxed future alias used by the object-safe boundary traits.
pub type BoxedFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Commit handle bound to one consumed record.
///
/// Invoking `commit` durably advances the committed offset for the record's
/// partition. The handle is consumed by the call, so a token can fire at most
/// once by construction. Commit order for a partition should track
/// consumption order; committing out of order risks offset regression if a
/// restart occurs between commits.
pub trait Committer: Send + 'static {
    /// Durably advances the committed offset past this record.
    fn commit(self: Box<Self>) -> BoxedFuture<'static, Result<(), LogError>>;
}

/// One consumed record together with its commit handle.
pub struct CommittableRecord {
    /// The consumed record.
    pub record: Record,
    /// Commit handle for the record's offset.
    pub committer: Box<dyn Committer>,
}

impl std::fmt::Debug for CommittableRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommittableRecord").field("record", &self.record).finish_non_exhaustive()
    }
}

/// Ordered stream of committable records for one subscription.
///
/// Records arrive in per-partition offset order. The stream ends with `None`
/// when the log client shuts the subscription down gracefully, or yields an
/// error for fatal failures (connectivity loss); either way the consuming
/// pipeline terminates.
pub trait RecordStream: Send {
    /// Waits for and returns the next committable record.
    fn next_record(&mut self) -> BoxedFuture<'_, Option<Result<CommittableRecord, LogError>>>;
}

/// Outbound record handed to the log client's produce primitive.
#[derive(Debug, Clone)]
pub struct OutboundRecord {
    /// Destination topic.
    pub topic: TopicName,
    /// Optional partitioning key.
    pub key: Option<Bytes>,
    /// Encoded payload bytes.
    pub payload: Bytes,
    /// Optional codec type discriminator carried alongside the payload.
    pub manifest: Option<String>,
}

/// The log client collaborator.
///
/// Implementations must provide consumer-group semantics with
/// earliest-offset reset on first subscribe.
pub trait LogClient: Send + Sync + 'static {
    /// Opens a committable consume stream for one group over a topic set.
    fn consume(
        &self,
        group: &GroupId,
        topics: &[TopicName],
    ) -> BoxedFuture<'_, Result<Box<dyn RecordStream>, LogError>>;

    /// Produces one record and completes with its log position.
    fn publish(&self, record: OutboundRecord) -> BoxedFuture<'_, Result<PublishAck, LogError>>;
}
