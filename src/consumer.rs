//! Filter-topic consumer with broadcast fan-out
//!
//! Every process subscribes under a freshly generated consumer-group id,
//! so each server instance receives every filter message. Offsets start
//! at newest: history is ignored on boot and publishers re-announce.

use crate::config::KafkaConfig;
use crate::error::{AuditError, Result};
use crate::registry::FilterRegistry;
use crate::types::FilterSubscription;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

const MAX_CONSUME_RETRIES: u32 = 5;
const CONSUME_RETRY_DELAY: Duration = Duration::from_secs(5);

/// First byte of the message key selects the action
pub const FILTER_KEY_REMOVE: u8 = 0x01;

/// Action encoded in a filter message's key byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Create,
    Remove,
}

impl FilterAction {
    /// Absent or empty keys default to create; any byte other than the
    /// remove marker also means create.
    pub fn from_key(key: Option<&[u8]>) -> Self {
        match key {
            Some([FILTER_KEY_REMOVE, ..]) => FilterAction::Remove,
            _ => FilterAction::Create,
        }
    }
}

/// Applies decoded filter messages to the registry
///
/// Split from the consume loop so message handling is testable without
/// a broker.
pub struct FilterHandler {
    registry: Arc<FilterRegistry>,
}

impl FilterHandler {
    pub fn new(registry: Arc<FilterRegistry>) -> Self {
        Self { registry }
    }

    /// Decode and apply one filter message
    ///
    /// Decode failures and registry rejections are counted and dropped;
    /// neither blocks topic progression.
    pub fn handle(&self, key: Option<&[u8]>, payload: &[u8]) {
        let filter: FilterSubscription = match serde_json::from_slice(payload) {
            Ok(filter) => filter,
            Err(err) => {
                tracing::error!(error = %err, "failed to decode filter message");
                metrics::counter!("audit_errors_total", "kind" => "consume").increment(1);
                return;
            }
        };

        match FilterAction::from_key(key) {
            FilterAction::Remove => {
                self.registry
                    .unregister(filter.session_id, &filter.account_id);
                tracing::info!(
                    session = filter.session_id,
                    account = %filter.account_id,
                    "unregistered filter"
                );
            }
            FilterAction::Create => {
                let session_id = filter.session_id;
                let account_id = filter.account_id.clone();
                match self.registry.register(filter) {
                    Ok(()) => tracing::info!(
                        session = session_id,
                        account = %account_id,
                        "registered filter"
                    ),
                    Err(err) => tracing::warn!(
                        session = session_id,
                        account = %account_id,
                        error = %err,
                        "failed to register filter"
                    ),
                }
            }
        }
    }
}

/// Consumes the filter topic and feeds the registry
pub struct FilterConsumer {
    consumer: StreamConsumer,
    topic: String,
    handler: FilterHandler,
}

impl FilterConsumer {
    /// Connect and subscribe to the filter topic
    ///
    /// The consumer group id is unique per process, which turns the
    /// partitioned topic into a broadcast: no other instance shares the
    /// group, so this process sees every message.
    pub fn new(cfg: &KafkaConfig, registry: Arc<FilterRegistry>) -> Result<Self> {
        let group_id = format!("auction-audit-filters-{}", Uuid::new_v4());

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", cfg.brokers.join(","))
            .set("group.id", &group_id)
            .set("auto.offset.reset", "latest")
            .set("enable.auto.commit", "true");
        cfg.sasl.apply(&mut client_config);

        let consumer: StreamConsumer = client_config
            .create()
            .map_err(|err| AuditError::Connection(format!("failed to create consumer: {err}")))?;

        consumer
            .subscribe(&[cfg.filter_topic.as_str()])
            .map_err(|err| {
                AuditError::Connection(format!(
                    "failed to subscribe to '{}': {err}",
                    cfg.filter_topic
                ))
            })?;

        tracing::info!(
            topic = %cfg.filter_topic,
            group = %group_id,
            "filter consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic: cfg.filter_topic.clone(),
            handler: FilterHandler::new(registry),
        })
    }

    /// Spawn the consume loop on a dedicated task
    ///
    /// Transient receive errors retry with a fixed delay; after five
    /// consecutive failures the loop terminates and leaves recovery to
    /// the operator. The shutdown signal exits cleanly.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut consecutive_failures = 0u32;

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        tracing::info!(topic = %self.topic, "filter consumer stopped");
                        return;
                    }
                    received = self.consumer.recv() => match received {
                        Ok(message) => {
                            self.handler
                                .handle(message.key(), message.payload().unwrap_or_default());
                            consecutive_failures = 0;
                        }
                        Err(err) => {
                            consecutive_failures += 1;
                            tracing::error!(
                                topic = %self.topic,
                                error = %err,
                                attempt = consecutive_failures,
                                max = MAX_CONSUME_RETRIES,
                                "filter consumer error"
                            );
                            metrics::counter!("audit_errors_total", "kind" => "connection")
                                .increment(1);

                            if consecutive_failures >= MAX_CONSUME_RETRIES {
                                tracing::error!(
                                    topic = %self.topic,
                                    "filter consumer giving up after consecutive failures"
                                );
                                return;
                            }
                            tokio::time::sleep(CONSUME_RETRY_DELAY).await;
                        }
                    }
                }
            }
        })
    }
}
