//! Core message and option types
//!
//! Wire envelopes use camelCase JSON serialization for compatibility with
//! non-Rust producers and consumers.

use crate::error::{QueueError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Wire form of a published message
///
/// This is what actually travels over the transport. The delivered
/// [`Message`] is reconstructed from it on the subscriber side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique message identifier (msg-<uuid> unless caller-supplied)
    pub id: String,

    /// Subject the message was published to
    pub subject: String,

    /// Message payload — arbitrary JSON data
    pub data: serde_json::Value,

    /// Unix timestamp in milliseconds
    pub timestamp: u64,

    /// Optional key-value metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Acknowledgement backing for a delivered message
///
/// The ephemeral adapter has no delivery tracking, so ack/nack are no-ops.
/// The stream adapter acks or NAKs the underlying JetStream message; the
/// message handle is taken on first use so a second ack/nack is a no-op.
#[derive(Clone)]
pub(crate) enum AckHandle {
    Noop,
    Stream {
        msg: Arc<tokio::sync::Mutex<Option<async_nats::jetstream::Message>>>,
        nak_delay: Duration,
    },
}

impl AckHandle {
    pub(crate) fn stream(msg: async_nats::jetstream::Message, nak_delay: Duration) -> Self {
        Self::Stream {
            msg: Arc::new(tokio::sync::Mutex::new(Some(msg))),
            nak_delay,
        }
    }

    pub(crate) async fn ack(&self) -> Result<()> {
        match self {
            Self::Noop => Ok(()),
            Self::Stream { msg, .. } => {
                if let Some(m) = msg.lock().await.take() {
                    m.ack().await.map_err(|e| QueueError::Ack(e.to_string()))?;
                }
                Ok(())
            }
        }
    }

    pub(crate) async fn nack(&self, requeue: bool) -> Result<()> {
        match self {
            Self::Noop => Ok(()),
            Self::Stream { msg, nak_delay } => {
                if let Some(m) = msg.lock().await.take() {
                    // Immediate NAK on requeue, delayed NAK otherwise. Both
                    // count toward the consumer's max-deliver bound.
                    let kind = if requeue {
                        async_nats::jetstream::AckKind::Nak(None)
                    } else {
                        async_nats::jetstream::AckKind::Nak(Some(*nak_delay))
                    };
                    m.ack_with(kind)
                        .await
                        .map_err(|e| QueueError::Ack(e.to_string()))?;
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Noop => f.write_str("AckHandle::Noop"),
            Self::Stream { .. } => f.write_str("AckHandle::Stream"),
        }
    }
}

/// A delivered message with acknowledgement control
///
/// `subject` is the concrete subject the message was delivered on, which
/// may be narrower than the subscription's wildcard pattern.
#[derive(Debug)]
pub struct Message {
    /// Unique message identifier
    pub id: String,

    /// Concrete subject this message was delivered on
    pub subject: String,

    /// Message payload
    pub data: serde_json::Value,

    /// Unix timestamp in milliseconds at publish time
    pub timestamp: u64,

    /// Key-value metadata supplied at publish time
    pub metadata: HashMap<String, String>,

    /// Number of delivery attempts (always 1 on the ephemeral adapter)
    pub num_delivered: u64,

    pub(crate) acker: AckHandle,
}

impl Message {
    pub(crate) fn from_envelope(
        envelope: Envelope,
        subject: String,
        num_delivered: u64,
        acker: AckHandle,
    ) -> Self {
        Self {
            id: envelope.id,
            subject,
            data: envelope.data,
            timestamp: envelope.timestamp,
            metadata: envelope.metadata,
            num_delivered,
            acker,
        }
    }

    /// Decode the payload into a typed value
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Acknowledge successful processing
    ///
    /// No-op on the ephemeral adapter, and after a prior ack/nack.
    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    /// Negative-acknowledge
    ///
    /// `requeue = true` requests immediate redelivery; `requeue = false`
    /// defers redelivery to the ack-wait window. No-op on the ephemeral
    /// adapter.
    pub async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }
}

/// Options for publishing a message
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Caller-supplied message id; a fresh id is generated when absent
    pub message_id: Option<String>,

    /// Key-value metadata attached to the envelope
    pub metadata: HashMap<String, String>,
}

/// A single entry in a batch publish
#[derive(Debug, Clone)]
pub struct PublishEntry {
    pub subject: String,
    pub data: serde_json::Value,
    pub options: Option<PublishOptions>,
}

impl PublishEntry {
    pub fn new(subject: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            subject: subject.into(),
            data,
            options: None,
        }
    }
}

/// Options for creating a subscription
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Consumer-group name: members of the same group on the same pattern
    /// receive a disjoint partition of matching messages
    pub group: Option<String>,
}

/// A recurring schedule — cron expression or fixed interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum Schedule {
    Cron { cron: String },
    Every { every_ms: u64 },
}

/// Options for registering a scheduled publish job
#[derive(Debug, Clone)]
pub struct ScheduledJobOptions {
    /// Subject each firing publishes to
    pub subject: String,

    /// Payload each firing publishes
    pub data: serde_json::Value,

    pub schedule: Schedule,
}

/// Description of a registered scheduled job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJobInfo {
    pub name: String,
    pub subject: String,
    pub schedule: Schedule,
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> Envelope {
        Envelope {
            id: "msg-1".to_string(),
            subject: "orders.created".to_string(),
            data: serde_json::json!({"id": 1}),
            timestamp: 1_700_000_000_000,
            metadata: HashMap::from([("region".to_string(), "eu".to_string())]),
        }
    }

    #[test]
    fn test_envelope_serialization_roundtrip() {
        let envelope = sample_envelope();
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"subject\":\"orders.created\""));
        assert!(json.contains("\"timestamp\":1700000000000"));

        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, envelope.id);
        assert_eq!(parsed.metadata["region"], "eu");
    }

    #[test]
    fn test_envelope_missing_metadata_defaults() {
        let json = r#"{
            "id": "msg-2",
            "subject": "orders.created",
            "data": {},
            "timestamp": 1700000000000
        }"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert!(envelope.metadata.is_empty());
    }

    #[test]
    fn test_message_typed_payload() {
        #[derive(Deserialize)]
        struct Order {
            id: u64,
        }

        let msg = Message::from_envelope(
            sample_envelope(),
            "orders.created".to_string(),
            1,
            AckHandle::Noop,
        );
        let order: Order = msg.payload().unwrap();
        assert_eq!(order.id, 1);
    }

    #[tokio::test]
    async fn test_noop_ack_and_nack() {
        let msg = Message::from_envelope(
            sample_envelope(),
            "orders.created".to_string(),
            1,
            AckHandle::Noop,
        );
        msg.ack().await.unwrap();
        msg.nack(true).await.unwrap();
        msg.nack(false).await.unwrap();
    }

    #[test]
    fn test_schedule_serialization() {
        let cron = Schedule::Cron {
            cron: "*/5 * * * *".to_string(),
        };
        let json = serde_json::to_string(&cron).unwrap();
        assert_eq!(json, r#"{"cron":"*/5 * * * *"}"#);

        let every = Schedule::Every { every_ms: 1000 };
        let json = serde_json::to_string(&every).unwrap();
        assert_eq!(json, r#"{"everyMs":1000}"#);

        let parsed: Schedule = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, every);
    }

    #[test]
    fn test_scheduled_job_info_serialization() {
        let info = ScheduledJobInfo {
            name: "tick".to_string(),
            subject: "sys.tick".to_string(),
            schedule: Schedule::Every { every_ms: 1000 },
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"name\":\"tick\""));
        assert!(json.contains("\"subject\":\"sys.tick\""));
    }
}
