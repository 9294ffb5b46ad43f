//! Envelope construction for outbound publishes
//!
//! Assigns the message id (caller-supplied wins), stamps the publish time,
//! and serializes payload plus metadata into the wire envelope. Transport
//! forwarding stays in the adapters.

use crate::error::Result;
use crate::types::{now_millis, Envelope, PublishOptions};

/// Generate a fresh message id
pub(crate) fn generate_message_id() -> String {
    format!("msg-{}", uuid::Uuid::new_v4())
}

/// Build the wire envelope for a publish, returning the assigned id and
/// the serialized bytes
pub(crate) fn build_envelope(
    subject: &str,
    data: serde_json::Value,
    options: Option<&PublishOptions>,
) -> Result<(String, Vec<u8>)> {
    let id = options
        .and_then(|o| o.message_id.clone())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(generate_message_id);

    let envelope = Envelope {
        id: id.clone(),
        subject: subject.to_string(),
        data,
        timestamp: now_millis(),
        metadata: options.map(|o| o.metadata.clone()).unwrap_or_default(),
    };

    let bytes = serde_json::to_vec(&envelope)?;
    Ok((id, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_generated_id_is_fresh_and_nonempty() {
        let (id1, _) = build_envelope("orders.created", serde_json::json!({}), None).unwrap();
        let (id2, _) = build_envelope("orders.created", serde_json::json!({}), None).unwrap();
        assert!(id1.starts_with("msg-"));
        assert!(!id1.is_empty());
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_supplied_id_wins() {
        let opts = PublishOptions {
            message_id: Some("X".to_string()),
            metadata: HashMap::new(),
        };
        let (id, bytes) =
            build_envelope("orders.created", serde_json::json!({"id": 1}), Some(&opts)).unwrap();
        assert_eq!(id, "X");

        let envelope: Envelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(envelope.id, "X");
        assert_eq!(envelope.subject, "orders.created");
    }

    #[test]
    fn test_empty_supplied_id_replaced() {
        let opts = PublishOptions {
            message_id: Some(String::new()),
            metadata: HashMap::new(),
        };
        let (id, _) = build_envelope("orders.created", serde_json::json!({}), Some(&opts)).unwrap();
        assert!(!id.is_empty());
    }

    #[test]
    fn test_metadata_and_timestamp_in_envelope() {
        let opts = PublishOptions {
            message_id: None,
            metadata: HashMap::from([("region".to_string(), "eu".to_string())]),
        };
        let (_, bytes) =
            build_envelope("orders.created", serde_json::json!({}), Some(&opts)).unwrap();
        let envelope: Envelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(envelope.metadata["region"], "eu");
        assert!(envelope.timestamp > 0);
    }
}
