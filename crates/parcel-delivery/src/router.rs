//! The mediator: routes subscribe and publish requests to pipelines.
//!
//! The router is the single entry point of the delivery layer. It owns the
//! pipeline caches — one consumption pipeline per (group, topic-set) key, one
//! publishing pipeline per topic — creating entries lazily and evicting them
//! when a pipeline terminates. No retry or queuing logic lives here; cache
//! mutation is serialized through the router task's own mailbox, so no locks
//! guard the maps.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::{
    sync::{mpsc, oneshot, RwLock},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parcel_core::{
    events::{EventObserver, NoOpObserver},
    Clock, Codec, LogClient, PublishAck, SubscriptionKey, SystemClock, TopicName,
};

use crate::{
    config::RouterConfig,
    error::{DeliveryError, Result},
    pipeline::{self, PipelineHandle, SubscribeAck, SubscribeRequest},
    publisher::{self, PublishRequest, PublisherHandle},
    subscription::Subscription,
};

/// Counters exposed for monitoring the delivery layer.
#[derive(Debug, Clone, Default)]
pub struct DeliveryStats {
    /// Live consumption pipelines.
    pub consume_pipelines: usize,
    /// Live publishing pipelines.
    pub publishers: usize,
    /// Messages acknowledged and committed.
    pub acked: u64,
    /// Deliveries that failed terminally without exhausting attempts.
    pub failed: u64,
    /// Deliveries whose attempts were exhausted.
    pub exhausted: u64,
    /// Records skipped because their payload could not be decoded.
    pub decode_skipped: u64,
}

enum RouterCommand<M> {
    Subscribe(SubscribeRequest<M>),
    Publish { topic: TopicName, request: PublishRequest<M> },
}

/// Cloneable client handle to a running router.
pub struct RouterHandle<M> {
    commands: mpsc::Sender<RouterCommand<M>>,
    stats: Arc<RwLock<DeliveryStats>>,
}

impl<M> Clone for RouterHandle<M> {
    fn clone(&self) -> Self {
        Self { commands: self.commands.clone(), stats: self.stats.clone() }
    }
}

impl<M: Send + Sync + 'static> RouterHandle<M> {
    /// Registers a subscription, creating or reusing the consumption
    /// pipeline for its (group, topics) key.
    ///
    /// Completes once the pipeline is running — for a fresh pipeline that
    /// includes its warm-up delay — or immediately with `reused = true` when
    /// the key's pipeline is already active.
    ///
    /// # Errors
    ///
    /// Fails fast when the pipeline cannot be started (stream open failure,
    /// warm-up stash overflow) or when the router has shut down.
    pub async fn subscribe(&self, subscription: Subscription<M>) -> Result<SubscribeAck> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RouterCommand::Subscribe(SubscribeRequest { subscription, reply }))
            .await
            .map_err(|_| DeliveryError::RouterClosed)?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::PipelineTerminated),
        }
    }

    /// Publishes a message to a topic through its publishing pipeline.
    ///
    /// The completion is the log client's own produce result.
    pub async fn publish(&self, topic: TopicName, item: M) -> Result<PublishAck> {
        self.publish_inner(topic, None, item).await
    }

    /// Publishes a message with an explicit partitioning key.
    pub async fn publish_keyed(
        &self,
        topic: TopicName,
        key: Bytes,
        item: M,
    ) -> Result<PublishAck> {
        self.publish_inner(topic, Some(key), item).await
    }

    async fn publish_inner(
        &self,
        topic: TopicName,
        key: Option<Bytes>,
        item: M,
    ) -> Result<PublishAck> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RouterCommand::Publish { topic, request: PublishRequest { item, key, reply } })
            .await
            .map_err(|_| DeliveryError::RouterClosed)?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::RouterClosed),
        }
    }

    /// Returns a snapshot of the delivery counters.
    pub async fn stats(&self) -> DeliveryStats {
        self.stats.read().await.clone()
    }
}

/// Owner of the routing task and its pipelines.
pub struct Router<C: Codec> {
    handle: RouterHandle<C::Item>,
    join: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    shutdown_timeout: Duration,
}

impl<C: Codec> Router<C> {
    /// Spawns a router with the system clock and no event observer.
    pub fn spawn(log: Arc<dyn LogClient>, codec: Arc<C>, config: RouterConfig) -> Self {
        Self::spawn_with(log, codec, config, Arc::new(SystemClock::new()), Arc::new(NoOpObserver))
    }

    /// Spawns a router with an injected clock and event observer.
    pub fn spawn_with(
        log: Arc<dyn LogClient>,
        codec: Arc<C>,
        config: RouterConfig,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn EventObserver>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(config.mailbox_capacity);
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(RwLock::new(DeliveryStats::default()));
        let cancel = CancellationToken::new();
        let shutdown_timeout = config.shutdown_timeout;

        let task = RouterTask {
            log,
            codec,
            config,
            clock,
            observer,
            stats: stats.clone(),
            commands: commands_rx,
            exits_tx,
            exits: exits_rx,
            cancel: cancel.clone(),
            pipelines: HashMap::new(),
            publishers: HashMap::new(),
        };
        let join = tokio::spawn(task.run());

        Self {
            handle: RouterHandle { commands: commands_tx, stats },
            join: Some(join),
            cancel,
            shutdown_timeout,
        }
    }

    /// Returns a cloneable client handle.
    pub fn handle(&self) -> RouterHandle<C::Item> {
        self.handle.clone()
    }

    /// Returns a snapshot of the delivery counters.
    pub async fn stats(&self) -> DeliveryStats {
        self.handle.stats().await
    }

    /// Gracefully shuts the router down.
    ///
    /// Cancels every pipeline and waits for in-flight dealers to wind down
    /// within the configured shutdown timeout.
    ///
    /// # Errors
    ///
    /// Returns a timeout error when pipelines fail to drain in time.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down router");
        self.cancel.cancel();

        let Some(join) = self.join.take() else {
            return Ok(());
        };
        match tokio::time::timeout(self.shutdown_timeout, join).await {
            Ok(_) => {
                info!("router shutdown complete");
                Ok(())
            },
            Err(_) => {
                warn!(
                    timeout_seconds = self.shutdown_timeout.as_secs(),
                    "router shutdown timed out, pipelines may still be draining"
                );
                Err(DeliveryError::ShutdownTimeout { timeout: self.shutdown_timeout })
            },
        }
    }
}

impl<C: Codec> Drop for Router<C> {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            warn!("router dropped without shutdown, cancelling pipelines");
            self.cancel.cancel();
        }
    }
}

struct RouterTask<C: Codec> {
    log: Arc<dyn LogClient>,
    codec: Arc<C>,
    config: RouterConfig,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn EventObserver>,
    stats: Arc<RwLock<DeliveryStats>>,
    commands: mpsc::Receiver<RouterCommand<C::Item>>,
    exits_tx: mpsc::UnboundedSender<SubscriptionKey>,
    exits: mpsc::UnboundedReceiver<SubscriptionKey>,
    cancel: CancellationToken,
    pipelines: HashMap<SubscriptionKey, PipelineHandle<C::Item>>,
    publishers: HashMap<TopicName, PublisherHandle<C::Item>>,
}

impl<C: Codec> RouterTask<C> {
    async fn run(mut self) {
        info!("router started");

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                Some(key) = self.exits.recv() => self.evict(key).await,
                () = self.cancel.cancelled() => break,
            }
        }

        self.drain().await;
    }

    async fn handle_command(&mut self, command: RouterCommand<C::Item>) {
        match command {
            RouterCommand::Subscribe(request) => self.route_subscribe(request).await,
            RouterCommand::Publish { topic, request } => self.route_publish(topic, request).await,
        }
    }

    async fn route_subscribe(&mut self, request: SubscribeRequest<C::Item>) {
        let key = request.subscription.key();

        if let Some(existing) = self.pipelines.get(&key) {
            let outcome = existing.forward(request).await;
            match outcome {
                Ok(()) => {},
                Err(request) => {
                    // The pipeline terminated before its exit notice was
                    // processed; heal the cache and start over.
                    debug!(key = %key, "dropping stale pipeline handle");
                    self.evict(key.clone()).await;
                    self.create_pipeline(key, request).await;
                },
            }
        } else {
            self.create_pipeline(key, request).await;
        }
    }

    async fn create_pipeline(&mut self, key: SubscriptionKey, request: SubscribeRequest<C::Item>) {
        info!(key = %key, "creating consumption pipeline");
        let handle = pipeline::spawn(
            key.clone(),
            self.log.clone(),
            self.codec.clone(),
            self.config.clone(),
            self.clock.clone(),
            self.observer.clone(),
            self.stats.clone(),
            self.cancel.child_token(),
            self.exits_tx.clone(),
        );

        // The mailbox is freshly created; a failed send means the task could
        // not start at all, which the caller observes as a dropped reply.
        let _ = handle.forward(request).await;

        self.pipelines.insert(key, handle);
        self.stats.write().await.consume_pipelines = self.pipelines.len();
    }

    async fn route_publish(&mut self, topic: TopicName, request: PublishRequest<C::Item>) {
        let prefixed = topic.prefixed(&self.config.topic_prefix);

        if let Some(existing) = self.publishers.get(&prefixed) {
            let outcome = existing.forward(request).await;
            match outcome {
                Ok(()) => {},
                Err(request) => {
                    debug!(topic = %prefixed, "dropping stale publisher handle");
                    self.publishers.remove(&prefixed);
                    self.create_publisher(prefixed, request).await;
                },
            }
        } else {
            self.create_publisher(prefixed, request).await;
        }
    }

    async fn create_publisher(&mut self, topic: TopicName, request: PublishRequest<C::Item>) {
        info!(topic = %topic, "creating publishing pipeline");
        let handle = publisher::spawn(
            topic.clone(),
            self.log.clone(),
            self.codec.clone(),
            self.cancel.child_token(),
            self.config.mailbox_capacity,
        );

        let _ = handle.forward(request).await;

        self.publishers.insert(topic, handle);
        self.stats.write().await.publishers = self.publishers.len();
    }

    async fn evict(&mut self, key: SubscriptionKey) {
        if let Some(handle) = self.pipelines.remove(&key) {
            debug!(key = %key, "evicting terminated pipeline");
            if let Err(join_err) = handle.join.await {
                warn!(key = %key, error = %join_err, "pipeline task panicked");
            }
            self.stats.write().await.consume_pipelines = self.pipelines.len();
        }
    }

    async fn drain(&mut self) {
        info!(
            pipelines = self.pipelines.len(),
            publishers = self.publishers.len(),
            "router draining"
        );
        // Covers the mailbox-closed exit path; a second cancel is a no-op.
        self.cancel.cancel();

        for (key, handle) in self.pipelines.drain() {
            if let Err(join_err) = handle.join.await {
                warn!(key = %key, error = %join_err, "pipeline task panicked during drain");
            }
        }
        for (topic, handle) in self.publishers.drain() {
            if let Err(join_err) = handle.join.await {
                warn!(topic = %topic, error = %join_err, "publisher task panicked during drain");
            }
        }

        let mut stats = self.stats.write().await;
        stats.consume_pipelines = 0;
        stats.publishers = 0;
        drop(stats);

        info!("router stopped");
    }
}
