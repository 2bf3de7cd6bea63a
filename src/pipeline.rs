//! Audit pipeline facade
//!
//! Wires the filter registry, filter consumer and matched-event producer
//! together, and handles each completed auction on the caller's task.
//! Analytics is best-effort: nothing here ever propagates an error back
//! to the auction request path.

use crate::config::AuditConfig;
use crate::consumer::FilterConsumer;
use crate::error::Result;
use crate::media::MediaType;
use crate::producer::MatchedEventProducer;
use crate::registry::FilterRegistry;
use crate::types::{media_mask_from_impressions, AuctionEvent, AuctionRecord};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Filter matching pipeline for completed auctions
///
/// Constructed once at server startup inside a tokio runtime. The
/// filter consumer and registry sweep run on their own tasks until
/// `shutdown` is called.
pub struct AuditPipeline {
    registry: Arc<FilterRegistry>,
    producer: MatchedEventProducer,
    environment: String,
    shutdown_tx: watch::Sender<bool>,
    consumer_task: JoinHandle<()>,
    sweeper_task: JoinHandle<()>,
}

impl AuditPipeline {
    pub fn new(cfg: AuditConfig) -> Result<Self> {
        cfg.validate()?;

        let registry = Arc::new(FilterRegistry::new(cfg.max_filters, cfg.max_filter_ttl()));
        let producer = MatchedEventProducer::new(&cfg.kafka)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let consumer_task =
            FilterConsumer::new(&cfg.kafka, Arc::clone(&registry))?.spawn(shutdown_rx.clone());
        let sweeper_task =
            Arc::clone(&registry).spawn_sweeper(cfg.cleanup_interval(), shutdown_rx);

        tracing::info!(
            filter_topic = %cfg.kafka.filter_topic,
            matched_topic = %cfg.kafka.matched_topic,
            max_filters = cfg.max_filters,
            "audit pipeline initialized"
        );

        Ok(Self {
            registry,
            producer,
            environment: cfg.environment,
            shutdown_tx,
            consumer_task,
            sweeper_task,
        })
    }

    /// The shared filter registry
    pub fn registry(&self) -> &Arc<FilterRegistry> {
        &self.registry
    }

    /// Match one completed auction against the registry and emit an
    /// event per matching filter
    ///
    /// Called synchronously on the auction completion path; returns
    /// immediately when the record has no account or request, or when
    /// nothing matches.
    pub fn handle_auction(&self, record: &AuctionRecord) {
        let Some(account_id) = record.account_id.as_deref() else {
            return;
        };
        let Some(request) = record.request.as_ref() else {
            return;
        };

        let account_id = account_id.to_lowercase();
        let domain = request
            .site
            .as_ref()
            .and_then(|site| site.domain.as_deref())
            .unwrap_or("");
        let app_bundle = request
            .app
            .as_ref()
            .and_then(|app| app.bundle.as_deref())
            .unwrap_or("");
        let media_mask = media_mask_from_impressions(&request.imp);

        let filters = self
            .registry
            .get_matches(&account_id, domain, app_bundle, media_mask);
        if filters.is_empty() {
            return;
        }

        let event = build_auction_event(
            record,
            &self.environment,
            &account_id,
            domain,
            app_bundle,
            media_mask.to_vec(),
        );

        if let Err(err) = self.producer.send_matched_event(&event, &filters) {
            tracing::error!(error = %err, "failed to send matched auction event");
            metrics::counter!("audit_errors_total", "kind" => "send").increment(1);
            return;
        }

        for _ in &filters {
            metrics::counter!("audit_events_matched_total", "account" => account_id.clone())
                .increment(1);
        }
    }

    /// Stop background tasks and drain the producer
    ///
    /// Order matters: the cancellation signal stops the consumer and
    /// the registry sweep first, then the producer flushes whatever is
    /// still enqueued.
    pub async fn shutdown(self) {
        tracing::info!("audit pipeline shutdown initiated");

        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.consumer_task.await {
            tracing::warn!(error = %err, "filter consumer task ended abnormally");
        }
        if let Err(err) = self.sweeper_task.await {
            tracing::warn!(error = %err, "registry sweeper task ended abnormally");
        }
        self.producer.close();

        tracing::info!("audit pipeline shutdown complete");
    }
}

/// Assemble the wire event for a matched auction
fn build_auction_event(
    record: &AuctionRecord,
    environment: &str,
    account_id: &str,
    domain: &str,
    app_bundle: &str,
    media_types: Vec<MediaType>,
) -> AuctionEvent {
    let bid_request = record
        .request
        .as_ref()
        .and_then(|request| serde_json::to_string(request).ok())
        .unwrap_or_default();
    let bid_response = record
        .response
        .as_ref()
        .and_then(|response| serde_json::to_string(response).ok())
        .unwrap_or_default();

    AuctionEvent {
        timestamp_ms: record.start_time_ms,
        status: record.status,
        environment: environment.to_string(),
        account_id: account_id.to_string(),
        domain: domain.to_string(),
        app_bundle: app_bundle.to_string(),
        media_types,
        bid_request,
        bid_response,
        errors: record.errors.clone(),
    }
}
