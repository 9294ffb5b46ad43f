//! Ephemeral queue adapter over core NATS
//!
//! Fire-and-forget pub/sub: a successful publish only confirms the write
//! left the local process (at-most-once, no persistence, no delivery
//! tracking). Consumer groups map to the transport's native queue groups
//! and are scoped to the connection session.
//!
//! Ungrouped subscriptions share one transport subscription and a single
//! fan-out pump, so a message matching several of them invokes their
//! handlers sequentially in registration order. Grouped subscriptions get
//! their own queue-group subscription each, since partitioning lives in
//! the broker.

use super::config::{connect_options, ConnectionConfig};
use super::{
    decode_envelope, dispatch_message, fanout_to_matching, AdapterKind, ConnState, MessageHandler,
    QueueAdapter,
};
use crate::error::{QueueError, Result};
use crate::events::{EventBus, EventHandler, ListenerId, QueueEvent, QueueEventKind};
use crate::features::{QueueFeature, EPHEMERAL_FEATURES};
use crate::interceptor::{InterceptorChain, QueueInterceptor};
use crate::pattern::SubjectPattern;
use crate::publisher::build_envelope;
use crate::registry::{Subscription, SubscriptionRegistry, SubscriptionShared, SubscriptionState};
use crate::schedule::{JobScheduler, PublishFn};
use crate::types::{
    AckHandle, Message, PublishOptions, ScheduledJobInfo, ScheduledJobOptions, SubscribeOptions,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::AbortHandle;

const NAME: &str = "ephemeral";

struct EphemeralInner {
    config: ConnectionConfig,
    state: RwLock<ConnState>,
    client: RwLock<Option<async_nats::Client>>,
    registry: Arc<SubscriptionRegistry>,
    events: Arc<EventBus>,
    scheduler: Mutex<Option<Arc<JobScheduler>>>,
    interceptors: InterceptorChain,
    /// Shared fan-out pump for ungrouped subscriptions, started lazily
    fanout: tokio::sync::Mutex<Option<AbortHandle>>,
    /// Serializes connect/disconnect so overlapping calls cannot race
    /// a second connection attempt
    lifecycle: tokio::sync::Mutex<()>,
}

impl EphemeralInner {
    fn conn_state(&self) -> ConnState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ConnState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Clone the live client, or fail before any transport I/O
    fn connected_client(&self) -> Result<async_nats::Client> {
        if self.conn_state() != ConnState::Connected {
            return Err(QueueError::not_connected(NAME));
        }
        self.client
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| QueueError::not_connected(NAME))
    }

    fn scheduler(&self) -> Option<Arc<JobScheduler>> {
        self.scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Queue adapter over a non-persistent broker transport
pub struct EphemeralAdapter {
    inner: Arc<EphemeralInner>,
}

impl EphemeralAdapter {
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_interceptors(config, Vec::new())
    }

    /// Create an adapter with an ordered interceptor chain wrapping its
    /// publish and subscribe calls
    pub fn with_interceptors(
        config: ConnectionConfig,
        interceptors: Vec<Arc<dyn QueueInterceptor>>,
    ) -> Self {
        Self {
            inner: Arc::new(EphemeralInner {
                config,
                state: RwLock::new(ConnState::Disconnected),
                client: RwLock::new(None),
                registry: Arc::new(SubscriptionRegistry::new()),
                events: Arc::new(EventBus::new()),
                scheduler: Mutex::new(None),
                interceptors: InterceptorChain::new(interceptors),
                fanout: tokio::sync::Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Number of currently active subscriptions
    pub fn active_subscriptions(&self) -> usize {
        self.inner.registry.active_count()
    }
}

async fn publish_inner(
    inner: &Arc<EphemeralInner>,
    subject: &str,
    data: serde_json::Value,
    options: Option<PublishOptions>,
) -> Result<String> {
    let client = inner.connected_client()?;
    inner.interceptors.before_publish(NAME, subject);

    let result = async {
        let (id, payload) = build_envelope(subject, data, options.as_ref())?;
        client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| QueueError::Publish {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;
        // Flush so the returned id means the write left the process
        client.flush().await.map_err(|e| QueueError::Publish {
            subject: subject.to_string(),
            reason: format!("flush failed: {}", e),
        })?;
        Ok(id)
    }
    .await;

    match &result {
        Ok(id) => inner.interceptors.after_publish(NAME, subject, Ok(id)),
        Err(e) => inner.interceptors.after_publish(NAME, subject, Err(e)),
    }
    result
}

/// Start the shared fan-out subscription if it is not already running
async fn ensure_fanout(inner: &Arc<EphemeralInner>, client: &async_nats::Client) -> Result<()> {
    let mut fanout = inner.fanout.lock().await;
    if fanout.is_some() {
        return Ok(());
    }

    let subscriber = client
        .subscribe(">".to_string())
        .await
        .map_err(|e| QueueError::Subscribe {
            pattern: ">".to_string(),
            reason: e.to_string(),
        })?;

    let task = tokio::spawn(fanout_pump(
        inner.events.clone(),
        inner.registry.clone(),
        subscriber,
    ));
    *fanout = Some(task.abort_handle());
    Ok(())
}

/// Shared pump for all ungrouped subscriptions
///
/// One delivery per published message; the registry decides which handlers
/// run and in what order. Messages with no matching subscription are
/// dropped without decoding.
async fn fanout_pump(
    events: Arc<EventBus>,
    registry: Arc<SubscriptionRegistry>,
    mut subscriber: async_nats::Subscriber,
) {
    while let Some(nats_msg) = subscriber.next().await {
        let subject = nats_msg.subject.to_string();
        if registry.matching(&subject).is_empty() {
            continue;
        }

        let envelope = match decode_envelope(&nats_msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(subject = %subject, error = %e, "Dropping undecodable message");
                events.emit(
                    QueueEventKind::Error,
                    &QueueEvent::for_adapter(NAME)
                        .with_subject(subject)
                        .with_detail(e.to_string()),
                );
                continue;
            }
        };

        fanout_to_matching(NAME, &events, &registry, envelope, &subject, 1).await;
    }
}

/// Pump for one queue-group subscription
async fn group_pump(
    events: Arc<EventBus>,
    shared: Arc<SubscriptionShared>,
    mut subscriber: async_nats::Subscriber,
) {
    let handler = shared.handler();
    while let Some(nats_msg) = subscriber.next().await {
        match shared.state() {
            SubscriptionState::Unsubscribed => break,
            // Consumed from the transport but dropped: messages published
            // while paused are lost to this subscription
            SubscriptionState::Paused => continue,
            SubscriptionState::Active => {}
        }

        let subject = nats_msg.subject.to_string();
        if !shared.pattern().matches(&subject) {
            continue;
        }

        let envelope = match decode_envelope(&nats_msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(subject = %subject, error = %e, "Dropping undecodable message");
                events.emit(
                    QueueEventKind::Error,
                    &QueueEvent::for_adapter(NAME)
                        .with_subject(subject)
                        .with_detail(e.to_string()),
                );
                continue;
            }
        };

        let message = Message::from_envelope(envelope, subject, 1, AckHandle::Noop);
        dispatch_message(NAME, &events, &handler, message).await;
    }
}

#[async_trait]
impl QueueAdapter for EphemeralAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Ephemeral
    }

    async fn connect(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        if self.inner.conn_state() == ConnState::Connected {
            return Ok(());
        }
        self.inner.set_state(ConnState::Connecting);

        match connect_options(&self.inner.config)
            .connect(&self.inner.config.url)
            .await
        {
            Ok(client) => {
                *self.inner.client.write().unwrap_or_else(|e| e.into_inner()) = Some(client);
                *self
                    .inner
                    .scheduler
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(JobScheduler::new(NAME)));
                self.inner.set_state(ConnState::Connected);
                tracing::info!(url = %self.inner.config.url, "Ephemeral adapter connected");
                self.inner
                    .events
                    .emit(QueueEventKind::Ready, &QueueEvent::for_adapter(NAME));
                Ok(())
            }
            Err(e) => {
                self.inner.set_state(ConnState::Disconnected);
                let err = QueueError::Connection(format!("{}: {}", self.inner.config.url, e));
                self.inner.events.emit(
                    QueueEventKind::Error,
                    &QueueEvent::for_adapter(NAME).with_detail(err.to_string()),
                );
                Err(err)
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        if self.inner.conn_state() == ConnState::Disconnected {
            return Ok(());
        }

        self.inner.registry.shutdown_all();
        if let Some(handle) = self.inner.fanout.lock().await.take() {
            handle.abort();
        }
        if let Some(scheduler) = self
            .inner
            .scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            scheduler.shutdown();
        }

        let client = self
            .inner
            .client
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.inner.set_state(ConnState::Disconnected);

        if let Some(client) = client {
            if let Err(e) = client.drain().await {
                tracing::warn!(error = %e, "Drain on disconnect failed");
            }
        }

        tracing::info!("Ephemeral adapter disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.conn_state() == ConnState::Connected
    }

    fn supports(&self, feature: QueueFeature) -> bool {
        EPHEMERAL_FEATURES.supports(feature)
    }

    async fn publish(
        &self,
        subject: &str,
        data: serde_json::Value,
        options: Option<PublishOptions>,
    ) -> Result<String> {
        publish_inner(&self.inner, subject, data, options).await
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: MessageHandler,
        options: Option<SubscribeOptions>,
    ) -> Result<Subscription> {
        let client = self.inner.connected_client()?;
        let compiled = SubjectPattern::parse(pattern)?;
        let group = options.and_then(|o| o.group);

        self.inner.interceptors.before_subscribe(NAME, pattern);

        let shared = match &group {
            Some(group_name) => {
                let subscriber = match client
                    .queue_subscribe(pattern.to_string(), group_name.clone())
                    .await
                {
                    Ok(subscriber) => subscriber,
                    Err(e) => {
                        self.inner.interceptors.after_subscribe(NAME, pattern, false);
                        return Err(QueueError::Subscribe {
                            pattern: pattern.to_string(),
                            reason: e.to_string(),
                        });
                    }
                };

                let shared = SubscriptionShared::new(compiled, group.clone(), handler);
                self.inner.registry.insert(shared.clone());
                let task = tokio::spawn(group_pump(
                    self.inner.events.clone(),
                    shared.clone(),
                    subscriber,
                ));
                shared.set_task(task.abort_handle());
                shared
            }
            None => {
                if let Err(e) = ensure_fanout(&self.inner, &client).await {
                    self.inner.interceptors.after_subscribe(NAME, pattern, false);
                    return Err(e);
                }
                let shared = SubscriptionShared::new(compiled, None, handler);
                self.inner.registry.insert(shared.clone());
                shared
            }
        };

        self.inner.interceptors.after_subscribe(NAME, pattern, true);
        tracing::info!(pattern, group = ?group, "Subscription created");

        Ok(Subscription::new(shared, self.inner.registry.clone()))
    }

    async fn add_scheduled_job(&self, name: &str, options: ScheduledJobOptions) -> Result<()> {
        if self.inner.conn_state() != ConnState::Connected {
            return Err(QueueError::not_connected(NAME));
        }
        let scheduler = self
            .inner
            .scheduler()
            .ok_or_else(|| QueueError::not_connected(NAME))?;

        let inner = self.inner.clone();
        let publish: PublishFn = Arc::new(move |subject, data| {
            let inner = inner.clone();
            Box::pin(async move { publish_inner(&inner, &subject, data, None).await })
        });

        scheduler.add(name, options, publish)
    }

    async fn remove_scheduled_job(&self, name: &str) -> Result<bool> {
        Ok(self
            .inner
            .scheduler()
            .map(|s| s.remove(name))
            .unwrap_or(false))
    }

    async fn get_scheduled_jobs(&self) -> Vec<ScheduledJobInfo> {
        self.inner
            .scheduler()
            .map(|s| s.list())
            .unwrap_or_default()
    }

    fn on(&self, kind: QueueEventKind, handler: EventHandler) -> ListenerId {
        self.inner.events.on(kind, handler)
    }

    fn off(&self, kind: QueueEventKind, id: ListenerId) -> bool {
        self.inner.events.off(kind, id)
    }
}
