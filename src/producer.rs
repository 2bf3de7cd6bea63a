//! Matched-event producer with manual partitioning
//!
//! Each matched filter routes one copy of the auction event to that
//! filter's own partition, keyed by session id. Delivery is
//! fire-and-forget: sends succeed once enqueued, and broker-side errors
//! surface asynchronously on the delivery callback.

use crate::config::KafkaConfig;
use crate::error::{AuditError, Result};
use crate::types::{AuctionEvent, FilterSubscription};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::ClientContext;
use std::time::Duration;

const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Map a configured compression name onto the client codec name
///
/// Unknown values are fatal at module init.
pub(crate) fn parse_compression(value: &str) -> Result<&'static str> {
    match value {
        "" | "none" => Ok("none"),
        "snappy" => Ok("snappy"),
        "gzip" => Ok("gzip"),
        "lz4" => Ok("lz4"),
        "zstd" => Ok("zstd"),
        other => Err(AuditError::Config(format!(
            "invalid compression: {other} (valid: none, snappy, gzip, lz4, zstd)"
        ))),
    }
}

/// Counts and logs asynchronous delivery failures
struct DeliveryContext;

impl ClientContext for DeliveryContext {}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = ();

    fn delivery(&self, result: &DeliveryResult<'_>, _: Self::DeliveryOpaque) {
        if let Err((err, _)) = result {
            tracing::error!(error = %err, "matched-event delivery failed");
            metrics::counter!("audit_errors_total", "kind" => "produce").increment(1);
        }
    }
}

/// One physical message bound for the matched-event topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MatchedMessage {
    pub partition: i32,
    pub key: [u8; 4],
    pub payload: Vec<u8>,
    pub timestamp_ms: i64,
}

/// Serialize the event once and fan it out over the matching filters
pub(crate) fn build_messages(
    event: &AuctionEvent,
    filters: &[FilterSubscription],
) -> Result<Vec<MatchedMessage>> {
    let payload = serde_json::to_vec(event)?;

    Ok(filters
        .iter()
        .map(|filter| MatchedMessage {
            partition: filter.partition_id,
            key: filter.session_id.to_be_bytes(),
            payload: payload.clone(),
            timestamp_ms: event.timestamp_ms,
        })
        .collect())
}

/// Producer for the matched-event topic
pub struct MatchedEventProducer {
    producer: ThreadedProducer<DeliveryContext>,
    topic: String,
}

impl MatchedEventProducer {
    pub fn new(cfg: &KafkaConfig) -> Result<Self> {
        let compression = parse_compression(&cfg.compression)?;

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", cfg.brokers.join(","))
            .set("compression.codec", compression)
            .set("acks", "0");
        if cfg.flush_interval_ms > 0 {
            client_config.set("linger.ms", cfg.flush_interval_ms.to_string());
        }
        cfg.sasl.apply(&mut client_config);

        let producer: ThreadedProducer<DeliveryContext> = client_config
            .create_with_context(DeliveryContext)
            .map_err(|err| AuditError::Connection(format!("failed to create producer: {err}")))?;

        tracing::info!(
            topic = %cfg.matched_topic,
            compression = compression,
            "matched-event producer ready"
        );

        Ok(Self {
            producer,
            topic: cfg.matched_topic.clone(),
        })
    }

    /// Enqueue one message per matching filter
    ///
    /// Returns as soon as every message is queued locally. A full local
    /// queue surfaces as an error; messages enqueued before the failure
    /// stay enqueued.
    pub fn send_matched_event(
        &self,
        event: &AuctionEvent,
        filters: &[FilterSubscription],
    ) -> Result<()> {
        if filters.is_empty() {
            return Ok(());
        }

        for message in build_messages(event, filters)? {
            let record = BaseRecord::to(&self.topic)
                .partition(message.partition)
                .key(message.key.as_slice())
                .payload(&message.payload)
                .timestamp(message.timestamp_ms);

            if let Err((err, _)) = self.producer.send(record) {
                return Err(AuditError::Produce {
                    topic: self.topic.clone(),
                    reason: err.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Flush enqueued messages and stop the background poller
    pub fn close(&self) {
        if let Err(err) = self.producer.flush(CLOSE_FLUSH_TIMEOUT) {
            tracing::warn!(error = %err, "failed to flush matched-event producer");
        }
    }
}
