//! Per-event-kind gzip buffer with size/time flush
//!
//! Each sink owns its buffer on a single worker task fed over a
//! channel, so no lock guards the gzip stream. Flushing finalizes the
//! stream, swaps in a fresh encoder and hands the compressed batch to
//! an independent upload task; the worker never blocks on network I/O.

use super::uploader::UploadClient;
use super::{Clock, EventKind};
use crate::config::ArchiveConfig;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

pub(crate) struct ArchiveSink {
    kind: EventKind,
    prefix: String,
    environment: String,
    max_buffer_bytes: u64,
    flush_interval: Duration,
    encoder: GzEncoder<Vec<u8>>,
    buffered_bytes: u64,
    uploader: Arc<UploadClient>,
    clock: Arc<dyn Clock>,
}

impl ArchiveSink {
    pub(crate) fn new(
        kind: EventKind,
        cfg: &ArchiveConfig,
        environment: &str,
        uploader: Arc<UploadClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kind,
            prefix: cfg.prefix.clone(),
            environment: environment.to_string(),
            max_buffer_bytes: cfg.buffers.buffer_size_bytes,
            flush_interval: cfg.buffers.flush_timeout(),
            encoder: GzEncoder::new(Vec::new(), Compression::default()),
            buffered_bytes: 0,
            uploader,
            clock,
        }
    }

    /// Worker loop: buffer incoming payloads, flush on size, time or
    /// shutdown
    pub(crate) async fn run(
        mut self,
        mut payloads: mpsc::Receiver<Vec<u8>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let start = tokio::time::Instant::now() + self.flush_interval;
        let mut ticker = tokio::time::interval_at(start, self.flush_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!(kind = self.kind.as_str(), "archive sink draining on shutdown");
                    self.flush();
                    break;
                }
                received = payloads.recv() => match received {
                    Some(payload) => {
                        self.buffer(&payload);
                        if self.buffered_bytes >= self.max_buffer_bytes {
                            self.flush();
                        }
                    }
                    None => {
                        self.flush();
                        break;
                    }
                },
                _ = ticker.tick() => self.flush(),
            }
        }
    }

    /// Append one serialized record plus a newline to the gzip stream
    fn buffer(&mut self, payload: &[u8]) {
        if let Err(err) = self
            .encoder
            .write_all(payload)
            .and_then(|()| self.encoder.write_all(b"\n"))
        {
            tracing::error!(
                kind = self.kind.as_str(),
                error = %err,
                "failed to buffer archive record"
            );
            return;
        }
        self.buffered_bytes += payload.len() as u64;
    }

    /// Finalize the gzip stream and ship the batch
    ///
    /// The compressed bytes are handed to a spawned task owning its own
    /// copy, so uploads in flight survive sink shutdown.
    fn flush(&mut self) {
        if self.buffered_bytes == 0 {
            return;
        }

        let encoder = std::mem::replace(
            &mut self.encoder,
            GzEncoder::new(Vec::new(), Compression::default()),
        );
        self.buffered_bytes = 0;

        let payload = match encoder.finish() {
            Ok(compressed) => Bytes::from(compressed),
            Err(err) => {
                tracing::error!(
                    kind = self.kind.as_str(),
                    error = %err,
                    "failed to finalize archive batch"
                );
                return;
            }
        };

        let key = self.object_key();
        let size = payload.len();
        let kind = self.kind;
        let uploader = Arc::clone(&self.uploader);
        tokio::spawn(async move {
            match uploader.upload(payload, &key).await {
                Ok(()) => tracing::info!(
                    kind = kind.as_str(),
                    key = %key,
                    bytes = size,
                    "archive batch uploaded"
                ),
                Err(err) => tracing::error!(
                    kind = kind.as_str(),
                    key = %key,
                    error = %err,
                    "archive batch upload failed"
                ),
            }
        });
    }

    /// `{prefix}/env={env}/type={kind}/date=YYYY-MM-DD/hour=HH/{unix}_{uuid}.jsonl.gz`
    fn object_key(&self) -> String {
        let now = self.clock.now_utc();
        format!(
            "{}/env={}/type={}/date={}/hour={}/{}_{}.jsonl.gz",
            self.prefix,
            self.environment,
            self.kind.as_str(),
            now.format("%Y-%m-%d"),
            now.format("%H"),
            now.timestamp(),
            Uuid::new_v4(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::uploader::{MemoryObjectStore, ObjectStore};
    use crate::archive::SystemClock;
    use chrono::{DateTime, Utc};
    use std::io::Read;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now_utc(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn archive_config(buffer_size_bytes: u64, timeout_secs: u64) -> ArchiveConfig {
        serde_json::from_value(serde_json::json!({
            "bucket": "audit-archive",
            "prefix": "audit",
            "buffers": {
                "buffer_size_bytes": buffer_size_bytes,
                "timeout_secs": timeout_secs,
            },
        }))
        .unwrap()
    }

    fn sink_with_store(
        cfg: &ArchiveConfig,
        clock: Arc<dyn Clock>,
    ) -> (ArchiveSink, Arc<MemoryObjectStore>) {
        let store = Arc::new(MemoryObjectStore::default());
        let uploader = Arc::new(UploadClient::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            cfg,
        ));
        (
            ArchiveSink::new(EventKind::Auction, cfg, "test", uploader, clock),
            store,
        )
    }

    fn gunzip(payload: &[u8]) -> String {
        let mut decoder = flate2::read::GzDecoder::new(payload);
        let mut out = String::new();
        decoder.read_to_string(&mut out).unwrap();
        out
    }

    async fn wait_for_objects(store: &MemoryObjectStore, count: usize) -> Vec<(String, Bytes)> {
        for _ in 0..100 {
            let objects = store.objects();
            if objects.len() >= count {
                return objects;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} uploaded objects, got {:?}", store.objects().len());
    }

    #[test]
    fn test_object_key_format() {
        let timestamp = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let cfg = archive_config(1024, 60);
        let (sink, _) = sink_with_store(&cfg, Arc::new(FixedClock(timestamp)));

        let key = sink.object_key();
        // 2023-11-14T22:13:20Z
        assert!(key.starts_with("audit/env=test/type=auction/date=2023-11-14/hour=22/1700000000_"));
        assert!(key.ends_with(".jsonl.gz"));
    }

    #[test]
    fn test_object_keys_are_unique() {
        let cfg = archive_config(1024, 60);
        let (sink, _) = sink_with_store(&cfg, Arc::new(SystemClock));
        assert_ne!(sink.object_key(), sink.object_key());
    }

    #[tokio::test]
    async fn test_size_triggered_flush() {
        let cfg = archive_config(8, 3600);
        let (sink, store) = sink_with_store(&cfg, Arc::new(SystemClock));

        let (tx, rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(sink.run(rx, shutdown_rx));

        tx.send(br#"{"status":200}"#.to_vec()).await.unwrap();

        let objects = wait_for_objects(&store, 1).await;
        assert_eq!(gunzip(&objects[0].1), "{\"status\":200}\n");

        drop(tx);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_flush_drains_buffer() {
        let cfg = archive_config(1024 * 1024, 3600);
        let (sink, store) = sink_with_store(&cfg, Arc::new(SystemClock));

        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(sink.run(rx, shutdown_rx));

        tx.send(br#"{"a":1}"#.to_vec()).await.unwrap();
        tx.send(br#"{"b":2}"#.to_vec()).await.unwrap();

        shutdown_tx.send(true).unwrap();
        worker.await.unwrap();

        let objects = wait_for_objects(&store, 1).await;
        assert_eq!(objects.len(), 1);
        assert_eq!(gunzip(&objects[0].1), "{\"a\":1}\n{\"b\":2}\n");
    }

    #[tokio::test]
    async fn test_timer_triggered_flush() {
        let mut cfg = archive_config(1024 * 1024, 1);
        cfg.buffers.timeout_secs = 1;
        let (mut sink, store) = sink_with_store(&cfg, Arc::new(SystemClock));
        sink.flush_interval = Duration::from_millis(50);

        let (tx, rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(sink.run(rx, shutdown_rx));

        tx.send(br#"{"tick":true}"#.to_vec()).await.unwrap();

        let objects = wait_for_objects(&store, 1).await;
        assert_eq!(gunzip(&objects[0].1), "{\"tick\":true}\n");

        drop(tx);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_gzip_stream_well_formed_across_flushes() {
        let cfg = archive_config(4, 3600);
        let (sink, store) = sink_with_store(&cfg, Arc::new(SystemClock));

        let (tx, rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(sink.run(rx, shutdown_rx));

        // each payload exceeds the size trigger, forcing one flush per record
        tx.send(br#"{"n":1}"#.to_vec()).await.unwrap();
        tx.send(br#"{"n":2}"#.to_vec()).await.unwrap();
        tx.send(br#"{"n":3}"#.to_vec()).await.unwrap();

        let objects = wait_for_objects(&store, 3).await;
        let lines: Vec<String> = objects
            .iter()
            .map(|(_, payload)| gunzip(payload))
            .collect();
        let combined: Vec<&str> = lines
            .iter()
            .flat_map(|batch| batch.lines())
            .collect();
        assert_eq!(combined, vec![r#"{"n":1}"#, r#"{"n":2}"#, r#"{"n":3}"#]);

        drop(tx);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_buffer_flush_is_noop() {
        let cfg = archive_config(1024, 3600);
        let (sink, store) = sink_with_store(&cfg, Arc::new(SystemClock));

        let (tx, rx) = mpsc::channel::<Vec<u8>>(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(sink.run(rx, shutdown_rx));

        shutdown_tx.send(true).unwrap();
        worker.await.unwrap();
        drop(tx);

        assert!(store.objects().is_empty());
    }
}
