//! The publishing pipeline: one lazily-created task per topic.
//!
//! Encodes outbound messages through the codec and forwards them to the log
//! client's produce primitive. The caller's completion is the produce call's
//! own result; no retry is layered here.

use std::sync::Arc;

use bytes::Bytes;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use parcel_core::{Codec, LogClient, OutboundRecord, PublishAck, TopicName};

use crate::error::{DeliveryError, Result};

/// A publish request in flight to a publishing pipeline.
pub(crate) struct PublishRequest<M> {
    pub item: M,
    pub key: Option<Bytes>,
    pub reply: oneshot::Sender<Result<PublishAck>>,
}

/// Router-side handle to a running publishing pipeline.
pub(crate) struct PublisherHandle<M> {
    jobs: mpsc::Sender<PublishRequest<M>>,
    pub(crate) join: JoinHandle<()>,
}

impl<M> PublisherHandle<M> {
    /// Forwards a publish request, returning it when the pipeline is gone.
    pub(crate) async fn forward(
        &self,
        request: PublishRequest<M>,
    ) -> std::result::Result<(), PublishRequest<M>> {
        self.jobs.send(request).await.map_err(|e| e.0)
    }
}

/// Spawns a publishing pipeline for one (already prefixed) topic.
pub(crate) fn spawn<C: Codec>(
    topic: TopicName,
    log: Arc<dyn LogClient>,
    codec: Arc<C>,
    cancel: CancellationToken,
    mailbox_capacity: usize,
) -> PublisherHandle<C::Item> {
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let pipeline = PublishPipeline { topic, log, codec, jobs: rx, cancel };
    let join = tokio::spawn(pipeline.run());
    PublisherHandle { jobs: tx, join }
}

struct PublishPipeline<C: Codec> {
    topic: TopicName,
    log: Arc<dyn LogClient>,
    codec: Arc<C>,
    jobs: mpsc::Receiver<PublishRequest<C::Item>>,
    cancel: CancellationToken,
}

impl<C: Codec> PublishPipeline<C> {
    async fn run(mut self) {
        debug!(topic = %self.topic, "publishing pipeline created");

        loop {
            tokio::select! {
                job = self.jobs.recv() => match job {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
                () = self.cancel.cancelled() => break,
            }
        }

        // Fail-fast anything still queued.
        self.jobs.close();
        while let Ok(request) = self.jobs.try_recv() {
            let _ = request.reply.send(Err(DeliveryError::RouterClosed));
        }
        debug!(topic = %self.topic, "publishing pipeline stopped");
    }

    async fn handle(&self, request: PublishRequest<C::Item>) {
        let encoded = match self.codec.encode(&request.item) {
            Ok(encoded) => encoded,
            Err(e) => {
                let _ = request.reply.send(Err(DeliveryError::encode(e)));
                return;
            },
        };

        let outcome = self
            .log
            .publish(OutboundRecord {
                topic: self.topic.clone(),
                key: request.key,
                payload: encoded.payload,
                manifest: encoded.manifest,
            })
            .await;

        let _ = request.reply.send(outcome.map_err(DeliveryError::publish));
    }
}
