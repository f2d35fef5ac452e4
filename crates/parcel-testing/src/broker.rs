//! In-memory log broker for deterministic testing.
//!
//! Implements the `LogClient` boundary over plain vectors: one partition per
//! topic, consumer-group committed offsets with earliest reset, and a commit
//! journal tests can assert against. Fault injection covers the failure
//! classes the pipeline distinguishes: stream failure, commit failure, and
//! publish failure.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use tokio::sync::Notify;

use parcel_core::{
    BoxedFuture, Committer, CommittableRecord, GroupId, LogClient, LogError, OutboundRecord,
    PublishAck, Record, RecordStream, TopicName,
};

/// One committed offset, as observed by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    /// Group that committed.
    pub group: GroupId,
    /// Topic the commit refers to.
    pub topic: TopicName,
    /// Offset that was committed.
    pub offset: i64,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Bytes>,
    payload: Bytes,
    manifest: Option<String>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<TopicName, Vec<StoredRecord>>,
    committed: HashMap<(GroupId, TopicName), i64>,
    commits: Vec<CommitEntry>,
    consumes: usize,
    closed: bool,
    fail_streams: bool,
    fail_commits: bool,
    fail_publish: bool,
}

struct BrokerInner {
    state: Mutex<BrokerState>,
    notify: Notify,
}

/// In-memory partitioned log with consumer-group semantics.
///
/// Cloning is cheap and shares the underlying log, so a cloned broker can be
/// handed to the router as `Arc<dyn LogClient>` while the test keeps its own
/// copy for assertions and fault injection.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Returns this broker as a log client trait object.
    pub fn client(&self) -> Arc<dyn LogClient> {
        Arc::new(self.clone())
    }

    /// Appends a raw record, bypassing any codec. Used to seed topics and to
    /// plant undecodable payloads.
    pub fn publish_raw(
        &self,
        topic: TopicName,
        key: Option<Bytes>,
        payload: Bytes,
        manifest: Option<String>,
    ) -> PublishAck {
        let ack = {
            let mut state = self.inner.state.lock().unwrap();
            let records = state.topics.entry(topic.clone()).or_default();
            let offset = records.len() as i64;
            records.push(StoredRecord { key, payload, manifest });
            PublishAck { topic, partition: 0, offset }
        };
        self.inner.notify.notify_waiters();
        ack
    }

    /// Ends every open record stream gracefully once drained and rejects new
    /// subscriptions and publishes.
    pub fn close(&self) {
        self.inner.state.lock().unwrap().closed = true;
        self.inner.notify.notify_waiters();
    }

    /// Makes every open record stream fail on its next poll.
    pub fn fail_streams(&self) {
        self.inner.state.lock().unwrap().fail_streams = true;
        self.inner.notify.notify_waiters();
    }

    /// Makes every subsequent commit fail.
    pub fn fail_commits(&self) {
        self.inner.state.lock().unwrap().fail_commits = true;
    }

    /// Makes every subsequent publish fail.
    pub fn fail_publish(&self) {
        self.inner.state.lock().unwrap().fail_publish = true;
    }

    /// The next offset the group would resume from on the topic, if the
    /// group has committed anything.
    pub fn committed_offset(&self, group: &GroupId, topic: &TopicName) -> Option<i64> {
        self.inner
            .state
            .lock()
            .unwrap()
            .committed
            .get(&(group.clone(), topic.clone()))
            .copied()
    }

    /// Every commit the broker has observed, in order.
    pub fn commit_journal(&self) -> Vec<CommitEntry> {
        self.inner.state.lock().unwrap().commits.clone()
    }

    /// Number of commits the broker has observed.
    pub fn commit_count(&self) -> usize {
        self.inner.state.lock().unwrap().commits.len()
    }

    /// Number of records stored on the topic.
    pub fn record_count(&self, topic: &TopicName) -> usize {
        self.inner.state.lock().unwrap().topics.get(topic).map_or(0, Vec::len)
    }

    /// Number of consume streams that have been opened.
    pub fn consume_count(&self) -> usize {
        self.inner.state.lock().unwrap().consumes
    }
}

impl LogClient for InMemoryBroker {
    fn consume(
        &self,
        group: &GroupId,
        topics: &[TopicName],
    ) -> BoxedFuture<'_, Result<Box<dyn RecordStream>, LogError>> {
        let group = group.clone();
        let topics = topics.to_vec();
        Box::pin(async move {
            let mut state = self.inner.state.lock().unwrap();
            if state.closed {
                return Err(LogError::Closed);
            }
            state.consumes += 1;
            // Earliest reset: a group without commits starts at offset 0.
            let positions = topics
                .into_iter()
                .map(|topic| {
                    let start = state
                        .committed
                        .get(&(group.clone(), topic.clone()))
                        .copied()
                        .unwrap_or(0);
                    (topic, start)
                })
                .collect();
            drop(state);
            Ok(Box::new(BrokerStream { inner: self.inner.clone(), group, positions })
                as Box<dyn RecordStream>)
        })
    }

    fn publish(&self, record: OutboundRecord) -> BoxedFuture<'_, Result<PublishAck, LogError>> {
        Box::pin(async move {
            let ack = {
                let mut state = self.inner.state.lock().unwrap();
                if state.fail_publish {
                    return Err(LogError::publish("publish failure injected"));
                }
                if state.closed {
                    return Err(LogError::Closed);
                }
                let records = state.topics.entry(record.topic.clone()).or_default();
                let offset = records.len() as i64;
                records.push(StoredRecord {
                    key: record.key,
                    payload: record.payload,
                    manifest: record.manifest,
                });
                PublishAck { topic: record.topic, partition: 0, offset }
            };
            self.inner.notify.notify_waiters();
            Ok(ack)
        })
    }
}

struct BrokerStream {
    inner: Arc<BrokerInner>,
    group: GroupId,
    positions: Vec<(TopicName, i64)>,
}

impl RecordStream for BrokerStream {
    fn next_record(&mut self) -> BoxedFuture<'_, Option<Result<CommittableRecord, LogError>>> {
        Box::pin(async move {
            loop {
                // Register for wakeups before checking state so a publish
                // between the check and the await cannot be missed.
                let notified = self.inner.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                {
                    let state = self.inner.state.lock().unwrap();
                    if state.fail_streams {
                        return Some(Err(LogError::connection("stream failure injected")));
                    }
                    for (topic, position) in &mut self.positions {
                        let stored = state
                            .topics
                            .get(topic)
                            .and_then(|records| records.get(*position as usize));
                        if let Some(stored) = stored {
                            let record = Record {
                                topic: topic.clone(),
                                partition: 0,
                                offset: *position,
                                key: stored.key.clone(),
                                payload: stored.payload.clone(),
                                manifest: stored.manifest.clone(),
                            };
                            let committer = BrokerCommitter {
                                inner: self.inner.clone(),
                                group: self.group.clone(),
                                topic: topic.clone(),
                                offset: *position,
                            };
                            *position += 1;
                            return Some(Ok(CommittableRecord {
                                record,
                                committer: Box::new(committer),
                            }));
                        }
                    }
                    if state.closed {
                        return None;
                    }
                }

                notified.as_mut().await;
            }
        })
    }
}

struct BrokerCommitter {
    inner: Arc<BrokerInner>,
    group: GroupId,
    topic: TopicName,
    offset: i64,
}

impl Committer for BrokerCommitter {
    fn commit(self: Box<Self>) -> BoxedFuture<'static, Result<(), LogError>> {
        Box::pin(async move {
            let mut state = self.inner.state.lock().unwrap();
            if state.fail_commits {
                return Err(LogError::commit("commit failure injected"));
            }
            let next = state.committed.entry((self.group.clone(), self.topic.clone())).or_insert(0);
            *next = (*next).max(self.offset + 1);
            state.commits.push(CommitEntry {
                group: self.group,
                topic: self.topic,
                offset: self.offset,
            });
            Ok(())
        })
    }
}
