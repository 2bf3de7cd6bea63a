//! # auction-audit
//!
//! Filter matching and streaming core for an ad-exchange analytics
//! subsystem.
//!
//! ## Overview
//!
//! Downstream consumers publish *filter subscriptions* to a Kafka
//! topic. Every server process consumes that topic under its own
//! consumer group (broadcast fan-out) and holds the active filters in a
//! bounded in-memory registry with TTL expiry. Each completed auction
//! is matched against the registry on the hot path; matching events are
//! serialized and produced back to Kafka, routed to each subscription's
//! own partition. An adjacent archive module buffers serialized auction
//! records per event kind, gzip-compresses them and periodically ships
//! batches to an object store, falling back to local disk when the
//! store is unreachable.
//!
//! ## Architecture
//!
//! ```text
//! filter topic ──► FilterConsumer ──► FilterRegistry ◄── query ── AuditPipeline ◄── auction record
//!                                                                      │
//!                                                                      ├──► MatchedEventProducer ──► matched topic
//!                                                                      │
//! auction record ──► ArchiveModule ──► ArchiveSink ──► UploadClient ──► object store
//!                                                            │
//!                                                            └──► local disk (on failure)
//! ```
//!
//! - **FilterRegistry** — thread-safe bounded map keyed by
//!   `(account, session)`, read-dominant, background expiry sweep
//! - **FilterConsumer** — per-process consumer group over the filter
//!   topic; key byte selects create/remove
//! - **MatchedEventProducer** — manual partitioning, fire-and-forget
//! - **AuditPipeline** — ties the three together on the auction path
//! - **ArchiveModule** — per-kind gzip buffers with size/time flush and
//!   deterministic shutdown drain

pub mod archive;
pub mod config;
pub mod consumer;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod producer;
pub mod registry;
pub mod types;

// Re-export core types
pub use archive::{ArchiveModule, Clock, EventKind, ObjectStore, S3Store, SystemClock};
pub use config::{ArchiveConfig, AuditConfig, BufferConfig, KafkaConfig, SaslConfig};
pub use consumer::{FilterAction, FilterConsumer, FilterHandler};
pub use error::{AuditError, Result};
pub use media::{MediaType, MediaTypeSet};
pub use pipeline::AuditPipeline;
pub use producer::MatchedEventProducer;
pub use registry::FilterRegistry;
pub use types::{
    AmpRecord, App, AuctionErrorEntry, AuctionEvent, AuctionRecord, BidRequest, FilterSubscription,
    Imp, Site, VideoRecord,
};
