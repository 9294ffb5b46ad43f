//! Adapter configuration
//!
//! Connection options are shared by both adapters; stream and consumer
//! settings apply to the stream adapter only. Values normally come from an
//! external config loader and are passed in here, never read from process
//! globals.

use std::time::Duration;

/// Transport connection options
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server URL
    pub url: String,

    /// Auth token, if the server requires one
    pub token: Option<String>,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            token: None,
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

/// Storage mode for the durable stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    File,
    Memory,
}

/// Stream retention policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionKind {
    /// Retain up to the configured size/age/count limits
    Limits,
    /// Remove messages once acknowledged by all interested consumers
    Interest,
    /// Remove messages once acknowledged by any consumer
    WorkQueue,
}

/// Durable stream provisioning options for the stream adapter
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Stream name
    pub name: String,

    /// Subjects the stream captures
    pub subjects: Vec<String>,

    /// Create the stream if missing; when false, `connect()` fails unless
    /// the stream already exists
    pub create: bool,

    pub retention: RetentionKind,

    /// Maximum messages retained (0 = unlimited)
    pub max_messages: i64,

    /// Maximum bytes retained (0 = unlimited)
    pub max_bytes: i64,

    /// Maximum message age in seconds (0 = unlimited)
    pub max_age_secs: u64,

    pub storage: StorageKind,

    /// Replica count (broker-side guarantee)
    pub replicas: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: "MESSAGES".to_string(),
            subjects: vec![">".to_string()],
            create: true,
            retention: RetentionKind::Limits,
            max_messages: 100_000,
            max_bytes: 0,
            max_age_secs: 0,
            storage: StorageKind::File,
            replicas: 1,
        }
    }
}

/// Consumer settings applied to every subscription of the stream adapter
#[derive(Debug, Clone)]
pub struct ConsumerDefaults {
    /// How long the broker waits for an ack before redelivering, in seconds
    pub ack_wait_secs: u64,

    /// Delivery attempts before a message is terminally failed
    pub max_deliver: i64,

    /// Maximum unacknowledged messages in flight per consumer
    pub max_ack_pending: i64,
}

impl Default for ConsumerDefaults {
    fn default() -> Self {
        Self {
            ack_wait_secs: 30,
            max_deliver: 5,
            max_ack_pending: 1000,
        }
    }
}

impl ConsumerDefaults {
    pub(crate) fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_secs)
    }
}

/// Build transport connect options from config
pub(crate) fn connect_options(config: &ConnectionConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    opts
}
