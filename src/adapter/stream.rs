//! Persistent queue adapter over NATS JetStream
//!
//! Messages land in a named durable stream provisioned at connect time.
//! Subscriptions with a group share one durable consumer, so competing
//! members split the workload and resume where they left off across
//! reconnects. Delivery is at-least-once, bounded by the consumer's
//! max-deliver limit; a message past that limit is terminally failed and
//! not redelivered (the dead-letter outcome).
//!
//! Ungrouped subscriptions share one session-scoped fan-out consumer: a
//! delivered message runs every matching handler sequentially in
//! registration order, is acked when all of them succeed, and is NAK'd
//! for redelivery when any fails.

use super::config::{
    connect_options, ConnectionConfig, ConsumerDefaults, RetentionKind, StorageKind, StreamConfig,
};
use super::{
    decode_envelope, dispatch_message, fanout_to_matching, AdapterKind, ConnState, MessageHandler,
    QueueAdapter,
};
use crate::error::{QueueError, Result};
use crate::events::{EventBus, EventHandler, ListenerId, QueueEvent, QueueEventKind};
use crate::features::{QueueFeature, STREAM_FEATURES};
use crate::interceptor::{InterceptorChain, QueueInterceptor};
use crate::pattern::SubjectPattern;
use crate::publisher::build_envelope;
use crate::registry::{Subscription, SubscriptionRegistry, SubscriptionShared, SubscriptionState};
use crate::schedule::{JobScheduler, PublishFn};
use crate::types::{
    AckHandle, Message, PublishOptions, ScheduledJobInfo, ScheduledJobOptions, SubscribeOptions,
};
use async_nats::jetstream;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::AbortHandle;

const NAME: &str = "stream";

struct StreamInner {
    connection: ConnectionConfig,
    stream_config: StreamConfig,
    consumer_defaults: ConsumerDefaults,
    state: RwLock<ConnState>,
    client: RwLock<Option<async_nats::Client>>,
    jetstream: RwLock<Option<jetstream::Context>>,
    stream: tokio::sync::Mutex<Option<jetstream::stream::Stream>>,
    registry: Arc<SubscriptionRegistry>,
    events: Arc<EventBus>,
    scheduler: Mutex<Option<Arc<JobScheduler>>>,
    interceptors: InterceptorChain,
    /// Shared fan-out pump for ungrouped subscriptions, started lazily
    fanout: tokio::sync::Mutex<Option<AbortHandle>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl StreamInner {
    fn conn_state(&self) -> ConnState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ConnState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn context(&self) -> Result<jetstream::Context> {
        if self.conn_state() != ConnState::Connected {
            return Err(QueueError::not_connected(NAME));
        }
        self.jetstream
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

/// Queue adapter over a stream-backed, persistent transport
pub struct StreamAdapter {
    inner: Arc<StreamInner>,
}

impl StreamAdapter {
    pub fn new(connection: ConnectionConfig, stream_config: StreamConfig) -> Self {
        Self::builder(connection, stream_config).build()
    }

    pub fn builder(connection: ConnectionConfig, stream_config: StreamConfig) -> StreamAdapterBuilder {
        StreamAdapterBuilder {
            connection,
            stream_config,
            consumer_defaults: ConsumerDefaults::default(),
            interceptors: Vec::new(),
        }
    }

    /// Number of currently active subscriptions
    pub fn active_subscriptions(&self) -> usize {
        self.inner.registry.active_count()
    }
}

/// Builder for [`StreamAdapter`] construction options
pub struct StreamAdapterBuilder {
    connection: ConnectionConfig,
    stream_config: StreamConfig,
    consumer_defaults: ConsumerDefaults,
    interceptors: Vec<Arc<dyn QueueInterceptor>>,
}

impl StreamAdapterBuilder {
    pub fn consumer_defaults(mut self, defaults: ConsumerDefaults) -> Self {
        self.consumer_defaults = defaults;
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn QueueInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn build(self) -> StreamAdapter {
        StreamAdapter {
            inner: Arc::new(StreamInner {
                connection: self.connection,
                stream_config: self.stream_config,
                consumer_defaults: self.consumer_defaults,
                state: RwLock::new(ConnState::Disconnected),
                client: RwLock::new(None),
                jetstream: RwLock::new(None),
                stream: tokio::sync::Mutex::new(None),
                registry: Arc::new(SubscriptionRegistry::new()),
                events: Arc::new(EventBus::new()),
                scheduler: Mutex::new(None),
                interceptors: InterceptorChain::new(self.interceptors),
                fanout: tokio::sync::Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }
}

/// Provision the durable stream per config
async fn ensure_stream(
    js: &jetstream::Context,
    config: &StreamConfig,
) -> Result<jetstream::stream::Stream> {
    let storage = match config.storage {
        StorageKind::File => jetstream::stream::StorageType::File,
        StorageKind::Memory => jetstream::stream::StorageType::Memory,
    };
    let retention = match config.retention {
        RetentionKind::Limits => jetstream::stream::RetentionPolicy::Limits,
        RetentionKind::Interest => jetstream::stream::RetentionPolicy::Interest,
        RetentionKind::WorkQueue => jetstream::stream::RetentionPolicy::WorkQueue,
    };
    let max_age = if config.max_age_secs > 0 {
        Duration::from_secs(config.max_age_secs)
    } else {
        Duration::ZERO
    };

    let stream_config = jetstream::stream::Config {
        name: config.name.clone(),
        subjects: config.subjects.clone(),
        storage,
        retention,
        max_messages: config.max_messages,
        max_bytes: config.max_bytes,
        max_age,
        num_replicas: config.replicas,
        ..Default::default()
    };

    let stream = if config.create {
        js.get_or_create_stream(stream_config).await.map_err(|e| {
            QueueError::Configuration(format!(
                "Failed to provision stream '{}': {}",
                config.name, e
            ))
        })?
    } else {
        js.get_stream(&config.name).await.map_err(|e| {
            QueueError::Configuration(format!(
                "Failed to provision stream '{}': {}",
                config.name, e
            ))
        })?
    };

    tracing::info!(
        stream = %config.name,
        subjects = ?config.subjects,
        "Durable stream ready"
    );

    Ok(stream)
}

/// Durable consumer names cannot contain subject separators
fn group_consumer_name(group: &str) -> String {
    group.replace(['.', ' ', '*', '>'], "-")
}

fn consumer_config(name: &str, durable: bool, filter_subject: String, defaults: &ConsumerDefaults) -> jetstream::consumer::pull::Config {
    jetstream::consumer::pull::Config {
        name: Some(name.to_string()),
        durable_name: durable.then(|| name.to_string()),
        filter_subject,
        ack_policy: jetstream::consumer::AckPolicy::Explicit,
        deliver_policy: jetstream::consumer::DeliverPolicy::New,
        max_deliver: defaults.max_deliver,
        ack_wait: defaults.ack_wait(),
        max_ack_pending: defaults.max_ack_pending,
        ..Default::default()
    }
}

async fn publish_inner(
    inner: &Arc<StreamInner>,
    subject: &str,
    data: serde_json::Value,
    options: Option<PublishOptions>,
) -> Result<String> {
    let js = inner.context()?;
    inner.interceptors.before_publish(NAME, subject);

    let result = async {
        let (id, payload) = build_envelope(subject, data, options.as_ref())?;
        js.publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| QueueError::Publish {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?
            .await
            .map_err(|e| QueueError::Publish {
                subject: subject.to_string(),
                reason: format!("ack failed: {}", e),
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

/// Start the shared fan-out consumer if it is not already running
///
/// The consumer is session-scoped (not durable) and covers every subject
/// in the stream; the registry decides which handlers a delivery reaches.
async fn ensure_fanout(inner: &Arc<StreamInner>) -> Result<()> {
    let mut fanout = inner.fanout.lock().await;
    if fanout.is_some() {
        return Ok(());
    }

    let name = format!("fanout-{}", uuid::Uuid::new_v4().simple());
    let config = consumer_config(&name, false, String::new(), &inner.consumer_defaults);

    let consumer = {
        let mut stream = inner.stream.lock().await;
        let stream = stream
            .as_mut()
            .ok_or_else(|| QueueError::not_connected(NAME))?;
        stream
            .get_or_create_consumer(&name, config)
            .await
            .map_err(|e| {
                QueueError::Consumer(format!("Failed to create fan-out consumer: {}", e))
            })?
    };

    let messages = consumer.messages().await.map_err(|e| QueueError::Consumer(
        format!("Failed to open fan-out consumer stream: {}", e),
    ))?;

    let task = tokio::spawn(fanout_pump(
        inner.events.clone(),
        inner.registry.clone(),
        messages,
    ));
    *fanout = Some(task.abort_handle());
    Ok(())
}

/// Shared pump for all ungrouped subscriptions
async fn fanout_pump(
    events: Arc<EventBus>,
    registry: Arc<SubscriptionRegistry>,
    mut messages: jetstream::consumer::pull::Stream,
) {
    while let Some(item) = messages.next().await {
        let js_msg = match item {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "Consumer stream error");
                events.emit(
                    QueueEventKind::Error,
                    &QueueEvent::for_adapter(NAME).with_detail(e.to_string()),
                );
                continue;
            }
        };

        let subject = js_msg.subject.to_string();
        if registry.matching(&subject).is_empty() {
            // Nothing to deliver to; ack so the broker does not redeliver
            if let Err(e) = js_msg.ack().await {
                tracing::warn!(error = %e, "Ack of unmatched message failed");
            }
            continue;
        }

        let num_delivered = js_msg
            .info()
            .map(|info| info.delivered.max(1) as u64)
            .unwrap_or(1);

        let envelope = match decode_envelope(&js_msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(subject = %subject, error = %e, "Dropping undecodable message");
                events.emit(
                    QueueEventKind::Error,
                    &QueueEvent::for_adapter(NAME)
                        .with_subject(subject)
                        .with_detail(e.to_string()),
                );
                let _ = js_msg.ack().await;
                continue;
            }
        };

        let all_ok =
            fanout_to_matching(NAME, &events, &registry, envelope, &subject, num_delivered).await;

        // One delivery feeds every matching handler, so the ack decision
        // covers them all: redeliver unless everyone succeeded
        if all_ok {
            if let Err(e) = js_msg.ack().await {
                tracing::warn!(subject = %subject, error = %e, "Ack failed");
            }
        } else if let Err(e) = js_msg
            .ack_with(jetstream::AckKind::Nak(None))
            .await
        {
            tracing::warn!(subject = %subject, error = %e, "NAK failed");
        }
    }
}

/// Pump for one durable group consumer
async fn group_pump(
    events: Arc<EventBus>,
    shared: Arc<SubscriptionShared>,
    mut messages: jetstream::consumer::pull::Stream,
    nak_delay: Duration,
) {
    let handler = shared.handler();
    while let Some(item) = messages.next().await {
        let js_msg = match item {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "Consumer stream error");
                events.emit(
                    QueueEventKind::Error,
                    &QueueEvent::for_adapter(NAME).with_detail(e.to_string()),
                );
                continue;
            }
        };

        match shared.state() {
            SubscriptionState::Unsubscribed => break,
            SubscriptionState::Paused => {
                // Consumed and skipped: ack so the broker does not
                // redeliver into the paused window
                if let Err(e) = js_msg.ack().await {
                    tracing::warn!(error = %e, "Ack of paused-state message failed");
                }
                continue;
            }
            SubscriptionState::Active => {}
        }

        let subject = js_msg.subject.to_string();
        if !shared.pattern().matches(&subject) {
            let _ = js_msg.ack().await;
            continue;
        }

        let num_delivered = js_msg
            .info()
            .map(|info| info.delivered.max(1) as u64)
            .unwrap_or(1);

        let envelope = match decode_envelope(&js_msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(subject = %subject, error = %e, "Dropping undecodable message");
                events.emit(
                    QueueEventKind::Error,
                    &QueueEvent::for_adapter(NAME)
                        .with_subject(subject)
                        .with_detail(e.to_string()),
                );
                let _ = js_msg.ack().await;
                continue;
            }
        };

        let message = Message::from_envelope(
            envelope,
            subject,
            num_delivered,
            AckHandle::stream(js_msg, nak_delay),
        );
        dispatch_message(NAME, &events, &handler, message).await;
    }
}

#[async_trait]
impl QueueAdapter for StreamAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Stream
    }

    async fn connect(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        if self.inner.conn_state() == ConnState::Connected {
            return Ok(());
        }
        self.inner.set_state(ConnState::Connecting);

        let client = match connect_options(&self.inner.connection)
            .connect(&self.inner.connection.url)
            .await
        {
            Ok(client) => client,
            Err(e) => {
                self.inner.set_state(ConnState::Disconnected);
                let err =
                    QueueError::Connection(format!("{}: {}", self.inner.connection.url, e));
                self.inner.events.emit(
                    QueueEventKind::Error,
                    &QueueEvent::for_adapter(NAME).with_detail(err.to_string()),
                );
                return Err(err);
            }
        };

        let js = jetstream::new(client.clone());
        let stream = match ensure_stream(&js, &self.inner.stream_config).await {
            Ok(stream) => stream,
            Err(e) => {
                self.inner.set_state(ConnState::Disconnected);
                self.inner.events.emit(
                    QueueEventKind::Error,
                    &QueueEvent::for_adapter(NAME).with_detail(e.to_string()),
                );
                return Err(e);
            }
        };

        *self.inner.client.write().unwrap_or_else(|e| e.into_inner()) = Some(client);
        *self
            .inner
            .jetstream
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(js);
        *self.inner.stream.lock().await = Some(stream);
        *self
            .inner
            .scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(JobScheduler::new(NAME)));
        self.inner.set_state(ConnState::Connected);

        tracing::info!(
            url = %self.inner.connection.url,
            stream = %self.inner.stream_config.name,
            "Stream adapter connected"
        );
        self.inner
            .events
            .emit(QueueEventKind::Ready, &QueueEvent::for_adapter(NAME));
        Ok(())
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

        *self.inner.stream.lock().await = None;
        *self
            .inner
            .jetstream
            .write()
            .unwrap_or_else(|e| e.into_inner()) = None;
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

        tracing::info!("Stream adapter disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.conn_state() == ConnState::Connected
    }

    fn supports(&self, feature: QueueFeature) -> bool {
        STREAM_FEATURES.supports(feature)
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
        if self.inner.conn_state() != ConnState::Connected {
            return Err(QueueError::not_connected(NAME));
        }
        let compiled = SubjectPattern::parse(pattern)?;
        let group = options.and_then(|o| o.group);

        self.inner.interceptors.before_subscribe(NAME, pattern);

        let shared = match &group {
            Some(group_name) => {
                let name = group_consumer_name(group_name);
                let config = consumer_config(
                    &name,
                    true,
                    pattern.to_string(),
                    &self.inner.consumer_defaults,
                );

                let consumer = {
                    let mut stream = self.inner.stream.lock().await;
                    let stream = stream
                        .as_mut()
                        .ok_or_else(|| QueueError::not_connected(NAME))?;
                    match stream.get_or_create_consumer(&name, config).await {
                        Ok(consumer) => consumer,
                        Err(e) => {
                            self.inner.interceptors.after_subscribe(NAME, pattern, false);
                            return Err(QueueError::Consumer(format!(
                                "Failed to create consumer '{}': {}",
                                name, e
                            )));
                        }
                    }
                };

                let messages = match consumer.messages().await {
                    Ok(messages) => messages,
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
                    messages,
                    self.inner.consumer_defaults.ack_wait(),
                ));
                shared.set_task(task.abort_handle());
                shared
            }
            None => {
                if let Err(e) = ensure_fanout(&self.inner).await {
                    self.inner.interceptors.after_subscribe(NAME, pattern, false);
                    return Err(e);
                }
                let shared = SubscriptionShared::new(compiled, None, handler);
                self.inner.registry.insert(shared.clone());
                shared
            }
        };

        self.inner.interceptors.after_subscribe(NAME, pattern, true);
        tracing::info!(pattern, durable = group.is_some(), "Subscription created");

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::handler_fn;
    use crate::types::Schedule;

    fn adapter() -> StreamAdapter {
        StreamAdapter::new(
            ConnectionConfig::default(),
            StreamConfig {
                name: "JOBS".to_string(),
                subjects: vec!["jobs.>".to_string()],
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let adapter = adapter();
        let err = adapter
            .publish("jobs.run", serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not connected"));
        assert!(err.to_string().contains("stream"));
    }

    #[tokio::test]
    async fn test_subscribe_requires_connection() {
        let adapter = adapter();
        let err = adapter
            .subscribe("jobs.run", handler_fn(|_| async { Ok(()) }), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not connected"));
    }

    #[tokio::test]
    async fn test_add_scheduled_job_requires_connection() {
        let adapter = adapter();
        let err = adapter
            .add_scheduled_job(
                "tick",
                ScheduledJobOptions {
                    subject: "jobs.tick".to_string(),
                    data: serde_json::json!({}),
                    schedule: Schedule::Every { every_ms: 1000 },
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not connected"));
    }

    #[tokio::test]
    async fn test_scheduled_jobs_empty_before_connect() {
        let adapter = adapter();
        assert!(adapter.get_scheduled_jobs().await.is_empty());
        assert!(!adapter.remove_scheduled_job("tick").await.unwrap());
    }

    #[tokio::test]
    async fn test_disconnect_when_never_connected() {
        let adapter = adapter();
        adapter.disconnect().await.unwrap();
        assert!(!adapter.is_connected());
    }

    #[test]
    fn test_identity_and_features() {
        let adapter = adapter();
        assert_eq!(adapter.name(), "stream");
        assert_eq!(adapter.kind(), AdapterKind::Stream);
        assert!(adapter.supports(QueueFeature::PatternSubscriptions));
        assert!(adapter.supports(QueueFeature::ConsumerGroups));
        assert!(adapter.supports(QueueFeature::ScheduledJobs));
        assert!(adapter.supports(QueueFeature::DeadLetterQueue));
        assert!(adapter.supports(QueueFeature::Retry));
        assert!(!adapter.supports(QueueFeature::DelayedMessages));
        assert!(!adapter.supports(QueueFeature::Priority));
    }

    #[test]
    fn test_group_consumer_names() {
        assert_eq!(group_consumer_name("workers"), "workers");
        assert_eq!(group_consumer_name("order workers.eu"), "order-workers-eu");
    }
}
