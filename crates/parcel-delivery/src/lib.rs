//! Acknowledged delivery over a partitioned log.
//!
//! This crate turns a bare log-consumption API into an at-least-once,
//! back-pressured delivery protocol: a subscriber receives one message at a
//! time, explicitly acknowledges or retries it, and the underlying read
//! offset advances only after a successful acknowledgement. Retries are
//! bounded and spaced with exponential backoff.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   subscribe    ┌─────────────────────┐
//! │ RouterHandle │───────────────▶│ Consumption Pipeline │ (one per group+topics)
//! └──────┬───────┘                │  decode → dealer →   │
//!        │ publish                │  commit on ack       │
//!        ▼                        └──────────┬──────────┘
//! ┌──────────────┐                           │ deal
//! │  Publishing  │                           ▼
//! │   Pipeline   │                ┌─────────────────────┐
//! │ (per topic)  │                │   Delivery Dealer    │ (one per message)
//! └──────┬───────┘                │  send → await ack →  │
//!        │                        │  backoff retry       │
//!        ▼                        └──────────┬──────────┘
//! ┌─────────────────────────────────────────┴──────────┐
//! │              LogClient (collaborator)              │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Properties
//!
//! - **Commit follows acknowledgement** — an offset is committed only after
//!   its message's dealer reports success; failed or exhausted messages stay
//!   uncommitted for re-delivery after a restart
//! - **Bounded concurrency** — at most a small fixed number of dealers run
//!   per pipeline, providing back-pressure against the log
//! - **Bounded retries** — per-attempt acknowledge timeout and exponential
//!   backoff up to a configured attempt limit, with the worst-case occupancy
//!   exposed via [`Dealer::max_occupancy`]
//! - **Idempotent routing** — repeated subscriptions for one (group, topics)
//!   key reuse the active pipeline
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use parcel_core::{AckToken, GroupId, JsonCodec, LogClient, TopicName};
//! use parcel_delivery::{Router, RouterConfig, Subscription};
//! use tokio::sync::mpsc;
//!
//! # #[derive(serde::Serialize, serde::Deserialize)]
//! # struct Order { id: u64 }
//! # async fn example(log: Arc<dyn LogClient>) -> anyhow::Result<()> {
//! let codec = Arc::new(JsonCodec::<Order>::new());
//! let router = Router::spawn(log, codec, RouterConfig::default());
//!
//! let (tx, mut deliveries) = mpsc::channel(8);
//! let _ack = router
//!     .handle()
//!     .subscribe(Subscription::new(
//!         GroupId::new("billing"),
//!         [TopicName::new("orders")],
//!         tx,
//!         AckToken::new("ack"),
//!         AckToken::new("retry"),
//!     ))
//!     .await?;
//!
//! while let Some(delivery) = deliveries.recv().await {
//!     // ... process delivery.message ...
//!     delivery.respond(AckToken::new("ack")).await;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod dealer;
pub mod error;
pub mod router;
pub mod subscription;

mod pipeline;
mod publisher;

// Re-export main public API
pub use config::{RouterConfig, DEFAULT_DEALERS_IN_FLIGHT, DEFAULT_WARMUP};
pub use dealer::{DealOutcome, Dealer};
pub use error::{DeliveryError, ErrorClass, Result};
pub use pipeline::SubscribeAck;
pub use router::{DeliveryStats, Router, RouterHandle};
pub use subscription::{Delivery, SubscriberRef, Subscription};
