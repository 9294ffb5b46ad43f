//! # flowmq
//!
//! Pluggable message-queue adapters with one publish/subscribe contract.
//!
//! ## Overview
//!
//! `flowmq` exposes a single [`QueueAdapter`] trait with two transports
//! behind it: an ephemeral adapter (fire-and-forget, at-most-once) and a
//! stream adapter (durable storage, acknowledgment, bounded redelivery).
//! Application code holds a `dyn QueueAdapter` and discovers what the
//! transport actually guarantees through [`QueueAdapter::supports`] instead
//! of downcasting.
//!
//! ## Quick Start
//!
//! ```rust
//! use flowmq::{handler_fn, ConnectionConfig, EphemeralAdapter, QueueAdapter};
//!
//! # async fn example() -> flowmq::Result<()> {
//! let adapter = EphemeralAdapter::new(ConnectionConfig::default());
//! adapter.connect().await?;
//!
//! // Handlers receive every message matching the pattern
//! let sub = adapter
//!     .subscribe(
//!         "orders.*",
//!         handler_fn(|msg| async move {
//!             println!("{}: {}", msg.subject, msg.data);
//!             Ok(())
//!         }),
//!         None,
//!     )
//!     .await?;
//!
//! let id = adapter
//!     .publish("orders.created", serde_json::json!({"orderId": 42}), None)
//!     .await?;
//! println!("Published: {}", id);
//!
//! sub.unsubscribe().await?;
//! adapter.disconnect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Adapters
//!
//! - **ephemeral** — core pub/sub, no persistence; a publish succeeds once
//!   the write leaves the process, whether or not anyone is listening
//! - **stream** — durable stream with explicit acks; failed handlers are
//!   redelivered up to the consumer's max-deliver limit
//!
//! ## Architecture
//!
//! - **QueueAdapter** trait — the contract both transports implement
//! - **Subscription** — pause/resume/unsubscribe handle with an explicit
//!   state machine
//! - **QueueEvent** — typed lifecycle and diagnostic events via `on`/`off`
//! - **QueueInterceptor** — ordered before/after hooks around publish and
//!   subscribe
//! - **Schedule** — cron or fixed-interval recurring publishes

pub mod adapter;
pub mod error;
pub mod events;
pub mod features;
pub mod interceptor;
pub mod pattern;
pub mod publisher;
pub mod registry;
pub mod schedule;
pub mod types;

// Re-export core types
pub use adapter::{
    handler_fn, AdapterKind, ConnectionConfig, ConsumerDefaults, EphemeralAdapter, HandlerFuture,
    MessageHandler, QueueAdapter, RetentionKind, StorageKind, StreamAdapter, StreamConfig,
};
pub use error::{QueueError, Result};
pub use events::{EventHandler, ListenerId, QueueEvent, QueueEventKind};
pub use features::QueueFeature;
pub use interceptor::{QueueInterceptor, TracingInterceptor};
pub use pattern::SubjectPattern;
pub use registry::{Subscription, SubscriptionState};
pub use schedule::CronExpression;
pub use types::{
    Envelope, Message, PublishEntry, PublishOptions, Schedule, ScheduledJobInfo,
    ScheduledJobOptions, SubscribeOptions,
};
