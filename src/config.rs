//! Configuration for the audit pipeline and archive sink
//!
//! Parsing the config file itself is the embedding server's concern;
//! these structs are the deserialized shape the modules accept. All
//! invalid values are fatal at module init.

use crate::error::{AuditError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the filter matching pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Deployment environment tag propagated into emitted events
    #[serde(default)]
    pub environment: String,

    /// Registry capacity; new `(account, session)` keys beyond this are rejected
    pub max_filters: usize,

    /// Clamp ceiling for filter expiry, in seconds
    pub max_filter_ttl_secs: u64,

    /// Period of the background expiry sweep, in seconds
    pub cleanup_interval_secs: u64,

    pub kafka: KafkaConfig,
}

impl AuditConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_filters == 0 {
            return Err(AuditError::Config(
                "max_filters must be greater than zero".to_string(),
            ));
        }
        if self.max_filter_ttl_secs == 0 {
            return Err(AuditError::Config(
                "max_filter_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(AuditError::Config(
                "cleanup_interval_secs must be greater than zero".to_string(),
            ));
        }
        self.kafka.validate()
    }

    pub fn max_filter_ttl(&self) -> Duration {
        Duration::from_secs(self.max_filter_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Kafka connection settings shared by the filter consumer and the
/// matched-event producer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,

    /// Topic carrying filter subscription create/remove messages
    pub filter_topic: String,

    /// Topic receiving matched auction events
    pub matched_topic: String,

    /// Producer batch linger in milliseconds; zero keeps the client default
    #[serde(default)]
    pub flush_interval_ms: u64,

    /// Producer compression codec: none, snappy, gzip, lz4 or zstd
    #[serde(default)]
    pub compression: String,

    #[serde(default)]
    pub sasl: SaslConfig,
}

impl KafkaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.brokers.is_empty() {
            return Err(AuditError::Config("kafka.brokers is required".to_string()));
        }
        if self.filter_topic.is_empty() {
            return Err(AuditError::Config(
                "kafka.filter_topic is required".to_string(),
            ));
        }
        if self.matched_topic.is_empty() {
            return Err(AuditError::Config(
                "kafka.matched_topic is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// SASL settings; SCRAM-SHA-512 when enabled
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaslConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,
}

impl SaslConfig {
    pub(crate) fn apply(&self, client: &mut rdkafka::ClientConfig) {
        if !self.enabled {
            return;
        }
        client
            .set("security.protocol", "sasl_plaintext")
            .set("sasl.mechanisms", "SCRAM-SHA-512")
            .set("sasl.username", &self.username)
            .set("sasl.password", &self.password);
    }
}

/// Configuration for the batching archive sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub bucket: String,

    /// Leading path segment of every object key
    pub prefix: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Per-upload deadline in seconds
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,

    /// Path-style bucket addressing, for S3-compatible stores
    #[serde(default)]
    pub use_path_style: bool,

    /// Directory receiving batches whose upload failed; disabled when unset
    #[serde(default)]
    pub fallback_dir: Option<String>,

    #[serde(default)]
    pub buffers: BufferConfig,
}

impl ArchiveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(AuditError::Config("bucket is required".to_string()));
        }
        if self.prefix.is_empty() {
            return Err(AuditError::Config("prefix is required".to_string()));
        }
        if self.buffers.buffer_size_bytes == 0 {
            return Err(AuditError::Config(
                "buffers.buffer_size_bytes must be greater than zero".to_string(),
            ));
        }
        if self.buffers.timeout_secs == 0 {
            return Err(AuditError::Config(
                "buffers.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

/// Size/time flush triggers for each per-kind buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Uncompressed bytes buffered before a size-triggered flush
    #[serde(default = "default_buffer_size_bytes")]
    pub buffer_size_bytes: u64,

    /// Seconds between time-triggered flushes
    #[serde(default = "default_buffer_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            buffer_size_bytes: default_buffer_size_bytes(),
            timeout_secs: default_buffer_timeout_secs(),
        }
    }
}

impl BufferConfig {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_upload_timeout_secs() -> u64 {
    30
}

fn default_buffer_size_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_buffer_timeout_secs() -> u64 {
    60
}
