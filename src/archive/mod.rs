//! Batching analytics archive
//!
//! Buffers serialized auction, AMP and video records in per-kind gzip
//! streams and periodically ships each batch to an object store, with a
//! local-disk fallback when the store is unreachable.

mod sink;
mod uploader;

pub use uploader::{MemoryObjectStore, ObjectStore, S3Store, UploadClient};

use crate::config::ArchiveConfig;
use crate::error::Result;
use crate::types::{AmpRecord, AuctionRecord, VideoRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sink::ArchiveSink;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const SINK_CHANNEL_CAPACITY: usize = 1024;

/// Source of wall-clock time for object key generation
///
/// Injected so tests control the date/hour partitions in generated keys.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// System wall clock
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Archived event kinds, one sink each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Auction,
    Amp,
    Video,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Auction => "auction",
            EventKind::Amp => "amp",
            EventKind::Video => "video",
        }
    }
}

/// Batching archive with one gzip sink per event kind
///
/// `log_*` calls enqueue a serialized record onto the kind's sink; the
/// sink worker buffers, compresses and uploads. `shutdown` drains every
/// buffer deterministically, though uploads already in flight may
/// finish after it returns.
pub struct ArchiveModule {
    auction_tx: mpsc::Sender<Vec<u8>>,
    amp_tx: mpsc::Sender<Vec<u8>>,
    video_tx: mpsc::Sender<Vec<u8>>,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl ArchiveModule {
    /// Build the archive against an injected store and clock
    pub fn new(
        cfg: &ArchiveConfig,
        environment: &str,
        store: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        cfg.validate()?;

        let uploader = Arc::new(UploadClient::new(store, cfg));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut spawn_sink = |kind: EventKind| {
            let (tx, rx) = mpsc::channel(SINK_CHANNEL_CAPACITY);
            let sink = ArchiveSink::new(kind, cfg, environment, Arc::clone(&uploader), clock.clone());
            let worker = tokio::spawn(sink.run(rx, shutdown_rx.clone()));
            (tx, worker)
        };

        let (auction_tx, auction_worker) = spawn_sink(EventKind::Auction);
        let (amp_tx, amp_worker) = spawn_sink(EventKind::Amp);
        let (video_tx, video_worker) = spawn_sink(EventKind::Video);

        tracing::info!(
            bucket = %cfg.bucket,
            prefix = %cfg.prefix,
            env = environment,
            "archive module initialized"
        );

        Ok(Self {
            auction_tx,
            amp_tx,
            video_tx,
            shutdown_tx,
            workers: vec![auction_worker, amp_worker, video_worker],
        })
    }

    /// Build the archive against a live S3 client and the system clock
    pub async fn connect(cfg: &ArchiveConfig, environment: &str) -> Result<Self> {
        cfg.validate()?;
        let store = Arc::new(S3Store::connect(cfg).await);
        Self::new(cfg, environment, store, Arc::new(SystemClock))
    }

    pub async fn log_auction(&self, record: &AuctionRecord) {
        Self::enqueue(&self.auction_tx, EventKind::Auction, record).await;
    }

    pub async fn log_amp(&self, record: &AmpRecord) {
        Self::enqueue(&self.amp_tx, EventKind::Amp, record).await;
    }

    pub async fn log_video(&self, record: &VideoRecord) {
        Self::enqueue(&self.video_tx, EventKind::Video, record).await;
    }

    async fn enqueue<T: Serialize>(tx: &mpsc::Sender<Vec<u8>>, kind: EventKind, record: &T) {
        let payload = match serde_json::to_vec(record) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(
                    kind = kind.as_str(),
                    error = %err,
                    "failed to serialize archive record"
                );
                return;
            }
        };

        if tx.send(payload).await.is_err() {
            tracing::warn!(kind = kind.as_str(), "archive sink closed, record dropped");
        }
    }

    /// Flush every sink and stop the workers
    pub async fn shutdown(self) {
        tracing::info!("archive shutdown initiated, flushing all buffers");

        let _ = self.shutdown_tx.send(true);
        for worker in self.workers {
            if let Err(err) = worker.await {
                tracing::warn!(error = %err, "archive sink worker ended abnormally");
            }
        }

        tracing::info!("archive shutdown complete");
    }
}
