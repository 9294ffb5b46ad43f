//! Error types for flowmq

use thiserror::Error;

/// Errors that can occur in the queue adapter layer
#[derive(Debug, Error)]
pub enum QueueError {
    /// Operation requiring a live connection was invoked while disconnected.
    /// Raised synchronously, before any transport I/O.
    #[error("{adapter} adapter is not connected")]
    NotConnected { adapter: String },

    /// Transport connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transport rejected a publish
    #[error("Failed to publish to subject '{subject}': {reason}")]
    Publish { subject: String, reason: String },

    /// Subscribe failure
    #[error("Failed to subscribe to pattern '{pattern}': {reason}")]
    Subscribe { pattern: String, reason: String },

    /// Invalid stream/consumer configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// User handler failed — caught per message, never escapes the dispatch loop
    #[error("Handler error: {0}")]
    Handler(String),

    /// Invalid cron expression or interval definition
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// Invalid subject pattern
    #[error("Invalid subject pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Acknowledgement failure
    #[error("Failed to acknowledge message: {0}")]
    Ack(String),

    /// Stream creation or management error
    #[error("Stream error: {0}")]
    Stream(String),

    /// Consumer creation or management error
    #[error("Consumer error: {0}")]
    Consumer(String),
}

impl QueueError {
    /// Construct the standard not-connected error for an adapter
    pub fn not_connected(adapter: impl Into<String>) -> Self {
        Self::NotConnected {
            adapter: adapter.into(),
        }
    }
}

/// Result type alias for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;
