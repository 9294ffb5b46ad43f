//! Subscription registry and lifecycle state machine
//!
//! Every live subscription is tracked here in registration order. State is
//! an explicit three-state machine: Active → Paused ⇄ Active → Unsubscribed,
//! with Unsubscribed terminal. Transitions out of invalid states are ignored.
//! Unsubscribing removes the entry, so the registry only ever holds live
//! subscriptions.
//!
//! The registry also drives dispatch for ungrouped subscriptions: the
//! adapters' shared fan-out pumps ask `matching()` which handlers to invoke
//! for a delivered subject, and the answer preserves registration order.

use crate::adapter::MessageHandler;
use crate::error::Result;
use crate::pattern::SubjectPattern;
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::AbortHandle;

/// Lifecycle state of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Handler invoked for matching messages
    Active,
    /// Messages still consumed from the transport, handler skipped
    Paused,
    /// Terminal; transport subscription released
    Unsubscribed,
}

/// Shared core of a subscription, referenced by the public handle,
/// the registry, and the pump task.
pub(crate) struct SubscriptionShared {
    id: String,
    pattern: SubjectPattern,
    group: Option<String>,
    handler: MessageHandler,
    state: RwLock<SubscriptionState>,
    task: Mutex<Option<AbortHandle>>,
}

impl SubscriptionShared {
    pub(crate) fn new(
        pattern: SubjectPattern,
        group: Option<String>,
        handler: MessageHandler,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: format!("sub-{}", uuid::Uuid::new_v4()),
            pattern,
            group,
            handler,
            state: RwLock::new(SubscriptionState::Active),
            task: Mutex::new(None),
        })
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn pattern(&self) -> &SubjectPattern {
        &self.pattern
    }

    pub(crate) fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub(crate) fn handler(&self) -> MessageHandler {
        self.handler.clone()
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Active → Paused; ignored from any other state
    pub(crate) fn pause(&self) -> bool {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if *state == SubscriptionState::Active {
            *state = SubscriptionState::Paused;
            true
        } else {
            false
        }
    }

    /// Paused → Active; ignored from any other state
    pub(crate) fn resume(&self) -> bool {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if *state == SubscriptionState::Paused {
            *state = SubscriptionState::Active;
            true
        } else {
            false
        }
    }

    /// Any state → Unsubscribed; returns false if already terminal
    pub(crate) fn mark_unsubscribed(&self) -> bool {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if *state == SubscriptionState::Unsubscribed {
            false
        } else {
            *state = SubscriptionState::Unsubscribed;
            true
        }
    }

    /// Attach the pump task so unsubscribe can abort it
    pub(crate) fn set_task(&self, handle: AbortHandle) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        *task = Some(handle);
    }

    pub(crate) fn abort_task(&self) {
        let handle = {
            let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
            task.take()
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Public subscription handle returned by `subscribe()`
pub struct Subscription {
    shared: Arc<SubscriptionShared>,
    registry: Arc<SubscriptionRegistry>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.shared.id())
            .field("pattern", &self.shared.pattern().raw())
            .field("group", &self.shared.group())
            .field("state", &self.shared.state())
            .finish()
    }
}

impl Subscription {
    pub(crate) fn new(shared: Arc<SubscriptionShared>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self { shared, registry }
    }

    /// The raw pattern this subscription was created with
    pub fn pattern(&self) -> &str {
        self.shared.pattern().raw()
    }

    /// Consumer-group name, if any
    pub fn group(&self) -> Option<&str> {
        self.shared.group()
    }

    pub fn state(&self) -> SubscriptionState {
        self.shared.state()
    }

    pub fn is_active(&self) -> bool {
        self.shared.state() == SubscriptionState::Active
    }

    /// Stop invoking the handler; matching messages are still consumed
    /// from the transport and dropped
    pub fn pause(&self) {
        if self.shared.pause() {
            tracing::debug!(subscription = self.shared.id(), "Subscription paused");
        }
    }

    /// Resume handler invocation; messages published while paused are lost
    pub fn resume(&self) {
        if self.shared.resume() {
            tracing::debug!(subscription = self.shared.id(), "Subscription resumed");
        }
    }

    /// Release the subscription; terminal. The registry entry is removed
    /// so churning subscriptions do not accumulate.
    pub async fn unsubscribe(&self) -> Result<()> {
        if self.shared.mark_unsubscribed() {
            self.shared.abort_task();
            self.registry.remove(self.shared.id());
            tracing::info!(
                subscription = self.shared.id(),
                pattern = self.shared.pattern().raw(),
                "Unsubscribed"
            );
        }
        Ok(())
    }
}

/// Insertion-ordered set of live subscriptions for one adapter instance
pub(crate) struct SubscriptionRegistry {
    subs: Mutex<Vec<Arc<SubscriptionShared>>>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            subs: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn insert(&self, sub: Arc<SubscriptionShared>) {
        let mut subs = self.subs.lock().unwrap_or_else(|e| e.into_inner());
        subs.push(sub);
    }

    /// Drop a subscription by id
    pub(crate) fn remove(&self, id: &str) {
        let mut subs = self.subs.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|s| s.id() != id);
    }

    /// All Active ungrouped subscriptions whose compiled pattern matches the
    /// subject, in registration order. This is the fan-out set the shared
    /// dispatch pumps invoke sequentially; grouped subscriptions are excluded
    /// because each group is pumped by its own transport consumer.
    pub(crate) fn matching(&self, subject: &str) -> Vec<Arc<SubscriptionShared>> {
        let subs = self.subs.lock().unwrap_or_else(|e| e.into_inner());
        subs.iter()
            .filter(|s| {
                s.group().is_none()
                    && s.state() == SubscriptionState::Active
                    && s.pattern().matches(subject)
            })
            .cloned()
            .collect()
    }

    pub(crate) fn active_count(&self) -> usize {
        let subs = self.subs.lock().unwrap_or_else(|e| e.into_inner());
        subs.iter()
            .filter(|s| s.state() == SubscriptionState::Active)
            .count()
    }

    /// Mark everything unsubscribed and abort the pump tasks.
    /// Used on adapter disconnect.
    pub(crate) fn shutdown_all(&self) {
        let subs = {
            let mut guard = self.subs.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for sub in subs {
            sub.mark_unsubscribed();
            sub.abort_task();
        }
    }
}
