//! The consumption pipeline: one consumer group over one topic set.
//!
//! A pipeline moves through three states. In `Idle` it stashes subscribe
//! requests until a warm-up grace period elapses. The first stashed request
//! then registers the subscription and opens the read cursor (`Active`);
//! every further request for the same key is acknowledged idempotently. The
//! pipeline drives the committable record stream, decoding each record in
//! order and running a dealer per decoded message with bounded concurrency,
//! and commits an offset only after its dealer reports an acknowledgement.
//! When the stream ends or a fatal error occurs the pipeline tears itself
//! down (`Terminated`) and is never resurrected; a later subscribe for the
//! key creates a brand-new pipeline.
//!
//! Because up to `max_dealers_in_flight` dealers run concurrently, a
//! later-offset record may be acknowledged and committed before an earlier
//! one. A crash between that early commit and the earlier record's
//! completion can lose the earlier record. This is a deliberate property of
//! the protocol, accepted in exchange for delivery concurrency.

use std::{collections::VecDeque, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::{
    sync::{mpsc, oneshot, RwLock},
    task::{JoinError, JoinHandle, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use parcel_core::{
    events::{DecodeSkippedEvent, DeliveryEvent, EventObserver, PipelineTerminatedEvent, RecordRef},
    Clock, Codec, CommittableRecord, LogClient, LogError, Record, RecordStream, SubscriptionKey,
    TopicName,
};

use crate::{
    config::RouterConfig,
    dealer::{DealOutcome, Dealer},
    error::{DeliveryError, Result},
    router::DeliveryStats,
    subscription::Subscription,
};

/// Acknowledgement of a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeAck {
    /// Key of the pipeline serving the subscription.
    pub key: SubscriptionKey,
    /// Whether an already-active pipeline absorbed the request.
    pub reused: bool,
}

/// A subscribe request in flight to a pipeline.
pub(crate) struct SubscribeRequest<M> {
    pub subscription: Subscription<M>,
    pub reply: oneshot::Sender<Result<SubscribeAck>>,
}

pub(crate) enum PipelineCommand<M> {
    Subscribe(SubscribeRequest<M>),
}

/// Router-side handle to a running pipeline.
pub(crate) struct PipelineHandle<M> {
    commands: mpsc::Sender<PipelineCommand<M>>,
    pub(crate) join: JoinHandle<()>,
}

impl<M> PipelineHandle<M> {
    /// Forwards a subscribe request, returning it when the pipeline is gone.
    pub(crate) async fn forward(
        &self,
        request: SubscribeRequest<M>,
    ) -> std::result::Result<(), SubscribeRequest<M>> {
        self.commands.send(PipelineCommand::Subscribe(request)).await.map_err(|e| {
            let PipelineCommand::Subscribe(request) = e.0;
            request
        })
    }
}

/// Pipeline lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    /// Warming up; subscribe requests are stashed.
    Idle,
    /// Subscription registered, record stream open.
    Active,
    /// Resources released; the pipeline will not be resurrected.
    Terminated,
}

/// Result of one dealt record, reported back to the pipeline loop.
enum DealReport {
    Committed { record: Record },
    CommitFailed { record: Record, error: LogError },
    Failed { record: Record, error: DeliveryError },
    Exhausted { record: Record },
}

pub(crate) struct ConsumePipeline<C: Codec> {
    key: SubscriptionKey,
    log: Arc<dyn LogClient>,
    codec: Arc<C>,
    config: RouterConfig,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn EventObserver>,
    stats: Arc<RwLock<DeliveryStats>>,
    commands: mpsc::Receiver<PipelineCommand<C::Item>>,
    cancel: CancellationToken,
    exits: mpsc::UnboundedSender<SubscriptionKey>,
}

/// Spawns a pipeline task for the given key and returns its handle.
#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn<C: Codec>(
    key: SubscriptionKey,
    log: Arc<dyn LogClient>,
    codec: Arc<C>,
    config: RouterConfig,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn EventObserver>,
    stats: Arc<RwLock<DeliveryStats>>,
    cancel: CancellationToken,
    exits: mpsc::UnboundedSender<SubscriptionKey>,
) -> PipelineHandle<C::Item> {
    let (tx, rx) = mpsc::channel(config.mailbox_capacity);
    let pipeline = ConsumePipeline {
        key,
        log,
        codec,
        config,
        clock,
        observer,
        stats,
        commands: rx,
        cancel,
        exits,
    };
    let join = tokio::spawn(pipeline.run());
    PipelineHandle { commands: tx, join }
}

impl<C: Codec> ConsumePipeline<C> {
    async fn run(mut self) {
        let mut state = PipelineState::Idle;
        debug!(key = %self.key, warmup = ?self.config.warmup, "consumption pipeline created");

        // Idle: stash subscribe requests until the warm-up elapses.
        let mut stash: VecDeque<SubscribeRequest<C::Item>> = VecDeque::new();
        let warmed_up = {
            let clock = self.clock.clone();
            let warmup = clock.sleep(self.config.warmup);
            tokio::pin!(warmup);
            loop {
                tokio::select! {
                    () = &mut warmup => break true,
                    cmd = self.commands.recv() => match cmd {
                        Some(PipelineCommand::Subscribe(request)) => {
                            if stash.len() >= self.config.warmup_stash_capacity {
                                let capacity = self.config.warmup_stash_capacity;
                                warn!(key = %self.key, capacity, "warm-up stash full, rejecting subscribe request");
                                let _ = request.reply.send(Err(DeliveryError::WarmupQueueFull { capacity }));
                            } else {
                                stash.push_back(request);
                            }
                        },
                        None => break false,
                    },
                    () = self.cancel.cancelled() => break false,
                }
            }
        };

        if !warmed_up {
            for request in stash {
                let _ = request.reply.send(Err(DeliveryError::PipelineTerminated));
            }
            state = self.transition(state, PipelineState::Terminated);
            self.finish(state, None).await;
            return;
        }

        // Replay the stash: the first request registers the subscription.
        let first = match stash.pop_front() {
            Some(first) => first,
            None => loop {
                tokio::select! {
                    cmd = self.commands.recv() => match cmd {
                        Some(PipelineCommand::Subscribe(request)) => break request,
                        None => {
                            let state = self.transition(state, PipelineState::Terminated);
                            self.finish(state, None).await;
                            return;
                        },
                    },
                    () = self.cancel.cancelled() => {
                        let state = self.transition(state, PipelineState::Terminated);
                        self.finish(state, None).await;
                        return;
                    },
                }
            },
        };

        let topics: Vec<TopicName> =
            self.key.topics.iter().map(|t| t.prefixed(&self.config.topic_prefix)).collect();
        let opened = self.log.consume(&self.key.group, &topics).await;
        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                error!(key = %self.key, error = %e, "failed to open record stream");
                let failure = DeliveryError::stream(e);
                let _ = first.reply.send(Err(failure.clone()));
                for request in stash {
                    let _ = request.reply.send(Err(failure.clone()));
                }
                let state = self.transition(state, PipelineState::Terminated);
                self.finish(state, Some(failure)).await;
                return;
            },
        };

        state = self.transition(state, PipelineState::Active);
        info!(key = %self.key, "subscription registered, pipeline active");

        let subscription = first.subscription;
        let _ = first.reply.send(Ok(SubscribeAck { key: self.key.clone(), reused: false }));
        for request in stash {
            warn!(key = %self.key, "subscription already active, acknowledging duplicate request");
            let _ = request.reply.send(Ok(SubscribeAck { key: self.key.clone(), reused: true }));
        }

        let failure = self.drive(stream, subscription).await;

        let state = self.transition(state, PipelineState::Terminated);
        self.finish(state, failure).await;
    }

    /// Drives the record stream until it ends, a fatal error occurs, or the
    /// pipeline is cancelled. Returns the fatal error, if any.
    async fn drive(
        &mut self,
        mut stream: Box<dyn RecordStream>,
        subscription: Subscription<C::Item>,
    ) -> Option<DeliveryError> {
        let mut dealers: JoinSet<DealReport> = JoinSet::new();
        let mut stream_open = true;
        let mut commands_open = true;
        let mut failure: Option<DeliveryError> = None;

        loop {
            if (!stream_open || failure.is_some()) && dealers.is_empty() {
                break;
            }

            tokio::select! {
                next = stream.next_record(), if stream_open
                    && failure.is_none()
                    && dealers.len() < self.config.max_dealers_in_flight =>
                {
                    match next {
                        Some(Ok(committable)) => {
                            if let Err(fatal) = self.dispatch(committable, &subscription, &mut dealers).await {
                                failure = Some(fatal);
                            }
                        },
                        Some(Err(e)) => {
                            error!(key = %self.key, error = %e, "record stream failed");
                            failure = Some(DeliveryError::stream(e));
                        },
                        None => {
                            info!(key = %self.key, "record stream completed");
                            stream_open = false;
                        },
                    }
                },
                Some(joined) = dealers.join_next(), if !dealers.is_empty() => {
                    if let Some(fatal) = self.reap(joined).await {
                        failure = Some(fatal);
                        dealers.abort_all();
                    }
                },
                cmd = self.commands.recv(), if commands_open => match cmd {
                    Some(PipelineCommand::Subscribe(request)) => {
                        warn!(key = %self.key, "subscription already active, acknowledging duplicate request");
                        let _ = request.reply.send(Ok(SubscribeAck {
                            key: self.key.clone(),
                            reused: true,
                        }));
                    },
                    None => commands_open = false,
                },
                () = self.cancel.cancelled() => {
                    info!(key = %self.key, "pipeline cancelled, aborting in-flight dealers");
                    dealers.abort_all();
                    while dealers.join_next().await.is_some() {}
                    return failure;
                },
            }
        }

        failure
    }

    /// Decodes one record and hands it to a dealer.
    ///
    /// Decode failure is its own error class: with the resume policy enabled
    /// the record is skipped without a commit and the stream continues;
    /// otherwise it is fatal to the pipeline.
    async fn dispatch(
        &self,
        committable: CommittableRecord,
        subscription: &Subscription<C::Item>,
        dealers: &mut JoinSet<DealReport>,
    ) -> Result<()> {
        let CommittableRecord { record, committer } = committable;

        let item = match self.codec.decode(&record.payload, record.manifest.as_deref()) {
            Ok(item) => item,
            Err(codec_err) => {
                let failure = DeliveryError::decode(
                    record.topic.clone(),
                    record.partition,
                    record.offset,
                    codec_err.clone(),
                );
                if !self.config.resume_on_decode_error {
                    error!(
                        key = %self.key,
                        topic = %record.topic,
                        offset = record.offset,
                        error = %codec_err,
                        "decode failed and resume policy is disabled"
                    );
                    return Err(failure);
                }
                warn!(
                    key = %self.key,
                    topic = %record.topic,
                    offset = record.offset,
                    error = %codec_err,
                    "skipping undecodable record"
                );
                self.observer
                    .observe(DeliveryEvent::DecodeSkipped(DecodeSkippedEvent {
                        record: record_ref(&record),
                        reason: codec_err.to_string(),
                        at: self.timestamp(),
                    }))
                    .await;
                self.stats.write().await.decode_skipped += 1;
                return Ok(());
            },
        };

        let dealer = Dealer::new(self.clock.clone(), self.observer.clone());
        let subscription = subscription.clone();
        dealers.spawn(async move {
            match dealer.deal(Arc::new(item), &record, &subscription).await {
                DealOutcome::Acked => match committer.commit().await {
                    Ok(()) => DealReport::Committed { record },
                    Err(error) => DealReport::CommitFailed { record, error },
                },
                DealOutcome::Failed(error) => DealReport::Failed { record, error },
                DealOutcome::AttemptsExhausted => DealReport::Exhausted { record },
            }
        });

        Ok(())
    }

    /// Handles one finished dealer. Returns a fatal error if the pipeline
    /// must terminate.
    async fn reap(
        &self,
        joined: std::result::Result<DealReport, JoinError>,
    ) -> Option<DeliveryError> {
        match joined {
            Ok(DealReport::Committed { record }) => {
                debug!(
                    key = %self.key,
                    topic = %record.topic,
                    offset = record.offset,
                    "offset committed"
                );
                self.stats.write().await.acked += 1;
                None
            },
            Ok(DealReport::CommitFailed { record, error }) => {
                error!(
                    key = %self.key,
                    topic = %record.topic,
                    offset = record.offset,
                    error = %error,
                    "offset commit failed"
                );
                Some(DeliveryError::commit(error))
            },
            Ok(DealReport::Failed { record, error }) => {
                warn!(
                    key = %self.key,
                    topic = %record.topic,
                    offset = record.offset,
                    error = %error,
                    "delivery failed, leaving record uncommitted"
                );
                self.stats.write().await.failed += 1;
                None
            },
            Ok(DealReport::Exhausted { record }) => {
                warn!(
                    key = %self.key,
                    topic = %record.topic,
                    offset = record.offset,
                    "delivery attempts exhausted, leaving record uncommitted"
                );
                self.stats.write().await.exhausted += 1;
                None
            },
            Err(join_err) if join_err.is_cancelled() => None,
            Err(join_err) => {
                error!(key = %self.key, error = %join_err, "dealer task panicked");
                self.stats.write().await.failed += 1;
                None
            },
        }
    }

    fn transition(&self, from: PipelineState, to: PipelineState) -> PipelineState {
        debug!(key = %self.key, ?from, ?to, "pipeline state transition");
        to
    }

    async fn finish(mut self, state: PipelineState, failure: Option<DeliveryError>) {
        debug_assert_eq!(state, PipelineState::Terminated);
        match &failure {
            Some(error) => {
                error!(key = %self.key, error = %error, "consumption pipeline terminated")
            },
            None => info!(key = %self.key, "consumption pipeline terminated"),
        }

        self.observer
            .observe(DeliveryEvent::PipelineTerminated(PipelineTerminatedEvent {
                key: self.key.clone(),
                reason: failure.map(|e| e.to_string()),
                at: self.timestamp(),
            }))
            .await;

        // Fail-fast any requests still queued in the mailbox, then tell the
        // router to evict this pipeline.
        self.commands.close();
        while let Ok(PipelineCommand::Subscribe(request)) = self.commands.try_recv() {
            let _ = request.reply.send(Err(DeliveryError::PipelineTerminated));
        }
        let _ = self.exits.send(self.key.clone());
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
