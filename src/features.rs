//! Per-adapter capability tables
//!
//! Each adapter type carries one static table; `supports()` is a lookup
//! against it. Capability logic lives here and nowhere else.

use serde::{Deserialize, Serialize};

/// Enumerated capability tag for queue adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueFeature {
    /// Wildcard subject patterns in subscriptions
    PatternSubscriptions,
    /// Competing-consumer groups
    ConsumerGroups,
    /// Cron/interval scheduled publishing
    ScheduledJobs,
    /// Publish with a delivery delay
    DelayedMessages,
    /// Per-message priority
    Priority,
    /// Terminal routing for messages past the delivery limit
    DeadLetterQueue,
    /// Broker-driven bounded redelivery
    Retry,
}

/// Static capability table for one adapter type
#[derive(Debug, Clone, Copy)]
pub struct FeatureTable(&'static [QueueFeature]);

impl FeatureTable {
    pub fn supports(&self, feature: QueueFeature) -> bool {
        self.0.contains(&feature)
    }

    pub fn features(&self) -> &'static [QueueFeature] {
        self.0
    }
}

/// Capabilities of the ephemeral (core NATS) adapter
pub const EPHEMERAL_FEATURES: FeatureTable = FeatureTable(&[
    QueueFeature::PatternSubscriptions,
    QueueFeature::ConsumerGroups,
    QueueFeature::ScheduledJobs,
]);

/// Capabilities of the persistent (JetStream) adapter
pub const STREAM_FEATURES: FeatureTable = FeatureTable(&[
    QueueFeature::PatternSubscriptions,
    QueueFeature::ConsumerGroups,
    QueueFeature::ScheduledJobs,
    QueueFeature::DeadLetterQueue,
    QueueFeature::Retry,
]);
