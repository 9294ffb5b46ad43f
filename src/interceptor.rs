//! Interceptor composition for publish/subscribe calls
//!
//! Observability glue (logging, metrics, tracing spans) hooks into the
//! adapters through an ordered interceptor chain supplied at construction
//! time, not through global lookup or method patching. `before_*` hooks run
//! in chain order, `after_*` hooks in reverse.

use crate::error::QueueError;
use std::sync::Arc;

/// Before/after hooks around adapter publish and subscribe calls
///
/// Hooks are infallible and must not block; they observe, never alter,
/// delivery semantics.
pub trait QueueInterceptor: Send + Sync {
    fn before_publish(&self, _adapter: &str, _subject: &str) {}
    fn after_publish(
        &self,
        _adapter: &str,
        _subject: &str,
        _result: std::result::Result<&str, &QueueError>,
    ) {
    }
    fn before_subscribe(&self, _adapter: &str, _pattern: &str) {}
    fn after_subscribe(&self, _adapter: &str, _pattern: &str, _ok: bool) {}
}

/// Ordered chain of interceptors
pub(crate) struct InterceptorChain {
    chain: Vec<Arc<dyn QueueInterceptor>>,
}

impl InterceptorChain {
    pub(crate) fn new(chain: Vec<Arc<dyn QueueInterceptor>>) -> Self {
        Self { chain }
    }

    pub(crate) fn before_publish(&self, adapter: &str, subject: &str) {
        for i in &self.chain {
            i.before_publish(adapter, subject);
        }
    }

    pub(crate) fn after_publish(
        &self,
        adapter: &str,
        subject: &str,
        result: std::result::Result<&str, &QueueError>,
    ) {
        for i in self.chain.iter().rev() {
            i.after_publish(adapter, subject, result);
        }
    }

    pub(crate) fn before_subscribe(&self, adapter: &str, pattern: &str) {
        for i in &self.chain {
            i.before_subscribe(adapter, pattern);
        }
    }

    pub(crate) fn after_subscribe(&self, adapter: &str, pattern: &str, ok: bool) {
        for i in self.chain.iter().rev() {
            i.after_subscribe(adapter, pattern, ok);
        }
    }
}

/// Interceptor that logs calls through `tracing`
#[derive(Debug, Default)]
pub struct TracingInterceptor;

impl QueueInterceptor for TracingInterceptor {
    fn after_publish(
        &self,
        adapter: &str,
        subject: &str,
        result: std::result::Result<&str, &QueueError>,
    ) {
        match result {
            Ok(id) => tracing::debug!(adapter, subject, message_id = id, "Published"),
            Err(e) => tracing::warn!(adapter, subject, error = %e, "Publish failed"),
        }
    }

    fn after_subscribe(&self, adapter: &str, pattern: &str, ok: bool) {
        if ok {
            tracing::info!(adapter, pattern, "Subscribed");
        } else {
            tracing::warn!(adapter, pattern, "Subscribe failed");
        }
    }
}
