//! Archive module integration tests
//!
//! End-to-end tests exercising the full archive lifecycle with the
//! in-memory object store: per-kind routing, shutdown drain, gzip
//! framing and object key partitioning.

use auction_audit::archive::MemoryObjectStore;
use auction_audit::{
    AmpRecord, ArchiveConfig, ArchiveModule, AuctionRecord, Clock, SystemClock, VideoRecord,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

fn archive_config() -> ArchiveConfig {
    serde_json::from_value(serde_json::json!({
        "bucket": "audit-archive",
        "prefix": "audit",
        "buffers": {
            "buffer_size_bytes": 10 * 1024 * 1024,
            "timeout_secs": 60,
        },
    }))
    .unwrap()
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
    panic!(
        "expected {count} uploaded objects, got {}",
        store.objects().len()
    );
}

// ─── Shutdown drain ──────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_flushes_one_batch_per_kind() {
    let store = Arc::new(MemoryObjectStore::default());
    let module = ArchiveModule::new(
        &archive_config(),
        "test",
        Arc::clone(&store) as Arc<dyn auction_audit::ObjectStore>,
        Arc::new(SystemClock),
    )
    .unwrap();

    module
        .log_auction(&AuctionRecord {
            status: 200,
            start_time_ms: 1_700_000_000_000,
            account_id: Some("acct".to_string()),
            ..Default::default()
        })
        .await;
    module
        .log_amp(&AmpRecord {
            status: 200,
            start_time_ms: 1_700_000_000_000,
            origin: "https://amp.example.com".to_string(),
            ..Default::default()
        })
        .await;
    module
        .log_video(&VideoRecord {
            status: 200,
            start_time_ms: 1_700_000_000_000,
            ..Default::default()
        })
        .await;

    module.shutdown().await;

    let mut objects = wait_for_objects(&store, 3).await;
    assert_eq!(objects.len(), 3);

    objects.sort_by(|a, b| a.0.cmp(&b.0));
    let kinds: Vec<bool> = ["amp", "auction", "video"]
        .iter()
        .zip(&objects)
        .map(|(kind, (key, _))| key.contains(&format!("type={kind}")))
        .collect();
    assert!(kinds.into_iter().all(|present| present));

    // each batch decompresses to exactly one JSON line
    for (key, payload) in &objects {
        let text = gunzip(payload);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1, "key {key} had {} lines", lines.len());
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["status"], 200);
    }
}

#[tokio::test]
async fn test_shutdown_with_empty_buffers_uploads_nothing() {
    let store = Arc::new(MemoryObjectStore::default());
    let module = ArchiveModule::new(
        &archive_config(),
        "test",
        Arc::clone(&store) as Arc<dyn auction_audit::ObjectStore>,
        Arc::new(SystemClock),
    )
    .unwrap();

    module.shutdown().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(store.objects().is_empty());
}

// ─── Batching & framing ──────────────────────────────────────────

#[tokio::test]
async fn test_multiple_records_share_one_batch() {
    let store = Arc::new(MemoryObjectStore::default());
    let module = ArchiveModule::new(
        &archive_config(),
        "test",
        Arc::clone(&store) as Arc<dyn auction_audit::ObjectStore>,
        Arc::new(SystemClock),
    )
    .unwrap();

    for status in [200, 204, 500] {
        module
            .log_auction(&AuctionRecord {
                status,
                start_time_ms: 1_700_000_000_000,
                ..Default::default()
            })
            .await;
    }

    module.shutdown().await;

    let objects = wait_for_objects(&store, 1).await;
    assert_eq!(objects.len(), 1);

    let text = gunzip(&objects[0].1);
    let statuses: Vec<i64> = text
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["status"]
            .as_i64()
            .unwrap())
        .collect();
    assert_eq!(statuses, vec![200, 204, 500]);
}

#[tokio::test]
async fn test_archive_records_use_wire_field_names() {
    let store = Arc::new(MemoryObjectStore::default());
    let module = ArchiveModule::new(
        &archive_config(),
        "test",
        Arc::clone(&store) as Arc<dyn auction_audit::ObjectStore>,
        Arc::new(SystemClock),
    )
    .unwrap();

    let mut targeting = std::collections::HashMap::new();
    targeting.insert("hb_pb".to_string(), "1.20".to_string());
    module
        .log_amp(&AmpRecord {
            status: 200,
            start_time_ms: 1_700_000_000_000,
            amp_targeting_values: targeting,
            origin: "https://amp.example.com".to_string(),
            ..Default::default()
        })
        .await;

    module.shutdown().await;

    let objects = wait_for_objects(&store, 1).await;
    let parsed: serde_json::Value =
        serde_json::from_str(gunzip(&objects[0].1).trim_end()).unwrap();
    assert_eq!(parsed["startTimeMs"], 1_700_000_000_000i64);
    assert_eq!(parsed["ampTargetingValues"]["hb_pb"], "1.20");
    assert_eq!(parsed["origin"], "https://amp.example.com");
}

// ─── Object keys ─────────────────────────────────────────────────

#[tokio::test]
async fn test_object_keys_partitioned_by_env_kind_date_hour() {
    let store = Arc::new(MemoryObjectStore::default());
    // 2023-11-14T22:13:20Z
    let clock = FixedClock(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
    let module = ArchiveModule::new(
        &archive_config(),
        "prod",
        Arc::clone(&store) as Arc<dyn auction_audit::ObjectStore>,
        Arc::new(clock),
    )
    .unwrap();

    module
        .log_auction(&AuctionRecord {
            status: 200,
            start_time_ms: 1_700_000_000_000,
            ..Default::default()
        })
        .await;
    module.shutdown().await;

    let objects = wait_for_objects(&store, 1).await;
    let key = &objects[0].0;
    assert!(
        key.starts_with("audit/env=prod/type=auction/date=2023-11-14/hour=22/1700000000_"),
        "unexpected key {key}"
    );
    assert!(key.ends_with(".jsonl.gz"));
}
