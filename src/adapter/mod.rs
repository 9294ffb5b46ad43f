//! Queue adapter trait — one contract, two transports
//!
//! Both adapters expose the same surface; callers discover the actual
//! delivery guarantees through `supports()` rather than downcasting.

use crate::error::Result;
use crate::events::{EventBus, EventHandler, ListenerId, QueueEvent, QueueEventKind};
use crate::features::QueueFeature;
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::types::{
    AckHandle, Envelope, Message, PublishEntry, PublishOptions, ScheduledJobInfo,
    ScheduledJobOptions, SubscribeOptions,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

mod config;
pub mod ephemeral;
pub mod stream;

pub use config::{ConnectionConfig, ConsumerDefaults, RetentionKind, StorageKind, StreamConfig};
pub use ephemeral::EphemeralAdapter;
pub use stream::{StreamAdapter, StreamAdapterBuilder};

/// Adapter type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    /// Fire-and-forget pub/sub, no persistence (at-most-once)
    Ephemeral,
    /// Durable stream with acknowledgment and bounded redelivery
    Stream,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ephemeral => "ephemeral",
            Self::Stream => "stream",
        }
    }
}

/// Connection lifecycle state
///
/// The explicit Connecting state keeps concurrent `connect()` calls from
/// racing a second connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    Disconnected,
    Connecting,
    Connected,
}

/// Boxed future returned by message handlers
pub type HandlerFuture = BoxFuture<'static, Result<()>>;

/// Message handler callback
pub type MessageHandler = Arc<dyn Fn(Message) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`]
pub fn handler_fn<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// Uniform adapter contract over both transports
///
/// All transport-facing operations are suspending calls. Operations that
/// require a live connection fail with a not-connected error before any
/// transport I/O is attempted.
#[async_trait]
pub trait QueueAdapter: Send + Sync {
    /// Adapter identifier ("ephemeral" or "stream")
    fn name(&self) -> &str;

    /// Adapter type tag
    fn kind(&self) -> AdapterKind;

    /// Connect to the transport; idempotent, a second call while connected
    /// is a no-op
    async fn connect(&self) -> Result<()>;

    /// Disconnect; idempotent, safe when never connected
    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Capability lookup against the adapter's static feature table
    fn supports(&self, feature: QueueFeature) -> bool;

    /// Publish a message, returning the assigned (or caller-supplied) id
    ///
    /// The return only confirms the write left the local process; delivery
    /// guarantees depend on the adapter.
    async fn publish(
        &self,
        subject: &str,
        data: serde_json::Value,
        options: Option<PublishOptions>,
    ) -> Result<String>;

    /// Publish several messages, returning ids in input order
    async fn publish_batch(&self, entries: Vec<PublishEntry>) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            ids.push(
                self.publish(&entry.subject, entry.data, entry.options)
                    .await?,
            );
        }
        Ok(ids)
    }

    /// Subscribe a handler to a subject pattern
    async fn subscribe(
        &self,
        pattern: &str,
        handler: MessageHandler,
        options: Option<SubscribeOptions>,
    ) -> Result<Subscription>;

    /// Register a recurring publish job; same-named jobs are replaced
    async fn add_scheduled_job(&self, name: &str, options: ScheduledJobOptions) -> Result<()>;

    /// Cancel a job; returns whether it existed
    async fn remove_scheduled_job(&self, name: &str) -> Result<bool>;

    /// The in-memory job set; empty before `connect()`
    async fn get_scheduled_jobs(&self) -> Vec<ScheduledJobInfo>;

    /// Attach a lifecycle/diagnostic event handler
    fn on(&self, kind: QueueEventKind, handler: EventHandler) -> ListenerId;

    /// Detach an event handler by listener id
    fn off(&self, kind: QueueEventKind, id: ListenerId) -> bool;
}

/// Decode a wire envelope from transport payload bytes
pub(crate) fn decode_envelope(payload: &[u8]) -> Result<Envelope> {
    Ok(serde_json::from_slice(payload)?)
}

/// Run one message through a handler with full isolation
///
/// Emits `message-received` before the handler, then `message-processed` on
/// success or `message-failed` on failure. Handler errors never propagate
/// past this function. Acknowledgement is the caller's responsibility; the
/// return value says whether the handler succeeded.
pub(crate) async fn run_handler(
    adapter: &str,
    events: &EventBus,
    handler: &MessageHandler,
    message: Message,
) -> bool {
    let subject = message.subject.clone();
    let message_id = message.id.clone();

    events.emit(
        QueueEventKind::MessageReceived,
        &QueueEvent::for_adapter(adapter)
            .with_subject(subject.clone())
            .with_message_id(message_id.clone()),
    );

    match handler(message).await {
        Ok(()) => {
            events.emit(
                QueueEventKind::MessageProcessed,
                &QueueEvent::for_adapter(adapter)
                    .with_subject(subject)
                    .with_message_id(message_id),
            );
            true
        }
        Err(e) => {
            tracing::warn!(
                adapter,
                subject = %subject,
                message_id = %message_id,
                error = %e,
                "Handler failed"
            );
            events.emit(
                QueueEventKind::MessageFailed,
                &QueueEvent::for_adapter(adapter)
                    .with_subject(subject)
                    .with_message_id(message_id)
                    .with_detail(e.to_string()),
            );
            false
        }
    }
}

/// Dispatch one message to one handler, acking on success and NAKing on
/// failure. Used by the per-group pumps, where each delivery targets exactly
/// one subscription.
pub(crate) async fn dispatch_message(
    adapter: &str,
    events: &EventBus,
    handler: &MessageHandler,
    message: Message,
) {
    let subject = message.subject.clone();
    let acker = message.acker.clone();

    if run_handler(adapter, events, handler, message).await {
        if let Err(e) = acker.ack().await {
            tracing::warn!(adapter, subject = %subject, error = %e, "Ack failed");
        }
    } else if let Err(e) = acker.nack(true).await {
        tracing::warn!(adapter, subject = %subject, error = %e, "NAK failed");
    }
}

/// Fan one delivered message out to every matching ungrouped subscription
///
/// Handlers run sequentially in subscription registration order, and that
/// order is stable across dispatches because `matching()` preserves
/// insertion order. Returns whether every handler succeeded, so stream
/// callers can decide between ack and NAK for the underlying delivery.
pub(crate) async fn fanout_to_matching(
    adapter: &str,
    events: &EventBus,
    registry: &SubscriptionRegistry,
    envelope: Envelope,
    subject: &str,
    num_delivered: u64,
) -> bool {
    let mut all_ok = true;
    for target in registry.matching(subject) {
        let message = Message::from_envelope(
            envelope.clone(),
            subject.to_string(),
            num_delivered,
            AckHandle::Noop,
        );
        all_ok &= run_handler(adapter, events, &target.handler(), message).await;
    }
    all_ok
}
