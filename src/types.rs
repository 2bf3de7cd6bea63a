//! Core wire and record types for the auction-audit system
//!
//! All wire types use camelCase JSON serialization for compatibility
//! with the filter publishers and matched-event consumers.

use crate::media::{MediaType, MediaTypeSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An active filter subscription consumed from the filter topic
///
/// Uniqueness scope is `(account_id, session_id)`. `partition_id` is the
/// routing key into the matched-event topic and never changes for the
/// lifetime of the subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSubscription {
    /// Session identifier, unique within the account
    pub session_id: i32,

    /// Matched-event topic partition this subscription reads from
    #[serde(default)]
    pub partition_id: i32,

    /// Owning account. Required, matched case-sensitively after
    /// normalization at the registry boundary.
    pub account_id: String,

    /// Site domain to match; empty means any
    #[serde(default)]
    pub domain: String,

    /// App bundle to match; empty means any
    #[serde(default)]
    pub app_bundle: String,

    /// Media types to match; empty means any
    #[serde(default)]
    pub media_types: Vec<MediaType>,

    /// Absolute expiry deadline in epoch milliseconds
    ///
    /// Zero or anything past the registry's max TTL is clamped at
    /// registration time.
    #[serde(default)]
    pub expires_at_ms: i64,
}

/// An auction event emitted to the matched-event topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionEvent {
    /// Auction start time in epoch milliseconds
    pub timestamp_ms: i64,

    /// HTTP-style auction status
    pub status: i32,

    /// Deployment environment tag
    pub environment: String,

    /// Lower-cased account identifier
    pub account_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_bundle: String,

    /// Media types observed across the auction's impressions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_types: Vec<MediaType>,

    /// Serialized bid request payload
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bid_request: String,

    /// Serialized bid response payload
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bid_response: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<AuctionErrorEntry>,
}

/// An error observed during auction processing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionErrorEntry {
    pub message: String,
    #[serde(default)]
    pub code: i32,
}

/// The view of an OpenRTB bid request the audit core inspects
///
/// Only the site/app/impression sections are modeled; everything else
/// passes through opaquely so serialized payloads stay faithful.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BidRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<Site>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<App>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imp: Vec<Imp>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Site section of a bid request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Site {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// App section of a bid request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct App {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A single impression; only the media-type markers matter here
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Imp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<serde_json::Value>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Union of media types present across an auction's impressions
pub fn media_mask_from_impressions(imps: &[Imp]) -> MediaTypeSet {
    let mut set = MediaTypeSet::EMPTY;
    for imp in imps {
        if imp.banner.is_some() {
            set.insert(MediaType::Banner);
        }
        if imp.video.is_some() {
            set.insert(MediaType::Video);
        }
        if imp.audio.is_some() {
            set.insert(MediaType::Audio);
        }
        if imp.native.is_some() {
            set.insert(MediaType::Native);
        }
    }
    set
}

/// A completed auction as handed over by the bidding server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionRecord {
    pub status: i32,

    /// Auction start time in epoch milliseconds
    pub start_time_ms: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<BidRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<AuctionErrorEntry>,
}

/// A completed AMP request as handed over by the bidding server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmpRecord {
    pub status: i32,

    pub start_time_ms: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<BidRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auction_response: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub amp_targeting_values: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub origin: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<AuctionErrorEntry>,
}

/// A completed long-form video request as handed over by the bidding server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub status: i32,

    pub start_time_ms: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<BidRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_request: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_response: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<AuctionErrorEntry>,
}

/// Current time in epoch milliseconds
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
