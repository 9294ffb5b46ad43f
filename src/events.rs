//! Typed event bus for adapter lifecycle and diagnostic events
//!
//! Adapters emit events synchronously from their dispatch paths. Handler
//! panics are swallowed and logged so a misbehaving listener can never
//! interrupt dispatch or acknowledgement flow.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Lifecycle and diagnostic event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueEventKind {
    /// Adapter connected and ready
    Ready,
    /// Transport or internal error outside a publish/subscribe call
    Error,
    /// Message pulled from the transport, before handler invocation
    MessageReceived,
    /// Handler returned Ok
    MessageProcessed,
    /// Handler returned Err
    MessageFailed,
}

impl QueueEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Error => "error",
            Self::MessageReceived => "message-received",
            Self::MessageProcessed => "message-processed",
            Self::MessageFailed => "message-failed",
        }
    }
}

/// Payload delivered to event handlers
#[derive(Debug, Clone, Default)]
pub struct QueueEvent {
    /// Adapter that emitted the event
    pub adapter: String,

    /// Subject involved, when applicable
    pub subject: Option<String>,

    /// Message id involved, when applicable
    pub message_id: Option<String>,

    /// Error text or other detail
    pub detail: Option<String>,
}

impl QueueEvent {
    pub(crate) fn for_adapter(adapter: &str) -> Self {
        Self {
            adapter: adapter.to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub(crate) fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub(crate) fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Event handler callback
pub type EventHandler = Arc<dyn Fn(&QueueEvent) + Send + Sync>;

/// Identifier returned by [`EventBus::on`], used to detach the handler
pub type ListenerId = u64;

/// Synchronous multi-listener event bus
///
/// Supports multiple handlers per event kind. Firing happens inline on the
/// dispatch path that triggers it.
pub struct EventBus {
    listeners: Mutex<HashMap<QueueEventKind, Vec<(ListenerId, EventHandler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach a handler for an event kind, returning its listener id
    pub fn on(&self, kind: QueueEventKind, handler: EventHandler) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.entry(kind).or_default().push((id, handler));
        id
    }

    /// Detach a handler; returns whether it was attached
    pub fn off(&self, kind: QueueEventKind, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entries) = listeners.get_mut(&kind) {
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            return entries.len() != before;
        }
        false
    }

    /// Fire an event synchronously to all handlers of its kind
    ///
    /// Panicking handlers are caught and logged; remaining handlers still run.
    pub fn emit(&self, kind: QueueEventKind, event: &QueueEvent) {
        let handlers: Vec<EventHandler> = {
            let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            match listeners.get(&kind) {
                Some(entries) => entries.iter().map(|(_, h)| h.clone()).collect(),
                None => return,
            }
        };

        for handler in handlers {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
            if result.is_err() {
                tracing::warn!(
                    kind = kind.as_str(),
                    adapter = %event.adapter,
                    "Event handler panicked; ignoring"
                );
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
