//! Media types and the precomputed match bitmask
//!
//! Filters and auction events describe media as a set drawn from
//! {banner, video, audio, native}. The set is collapsed into a 4-bit
//! mask once, so the per-auction match check is a single AND with no
//! allocations.

use serde::{Deserialize, Serialize};

/// A single media type observed on an impression or requested by a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Banner,
    Video,
    Audio,
    Native,
}

/// Bitmask over the four media types
///
/// An empty mask means "any media type" on the filter side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaTypeSet(u8);

impl MediaTypeSet {
    pub const EMPTY: MediaTypeSet = MediaTypeSet(0);
    pub const BANNER: MediaTypeSet = MediaTypeSet(1);
    pub const VIDEO: MediaTypeSet = MediaTypeSet(1 << 1);
    pub const AUDIO: MediaTypeSet = MediaTypeSet(1 << 2);
    pub const NATIVE: MediaTypeSet = MediaTypeSet(1 << 3);

    /// Collapse a media-type slice into a mask
    pub fn from_types(types: &[MediaType]) -> Self {
        let mut set = Self::EMPTY;
        for t in types {
            set.insert(*t);
        }
        set
    }

    pub fn insert(&mut self, media_type: MediaType) {
        self.0 |= Self::from(media_type).0;
    }

    /// True if any media type is present in both sets
    pub fn intersects(self, other: MediaTypeSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Expand the mask back into a media-type list
    pub fn to_vec(self) -> Vec<MediaType> {
        let mut result = Vec::new();
        if self.intersects(Self::BANNER) {
            result.push(MediaType::Banner);
        }
        if self.intersects(Self::VIDEO) {
            result.push(MediaType::Video);
        }
        if self.intersects(Self::AUDIO) {
            result.push(MediaType::Audio);
        }
        if self.intersects(Self::NATIVE) {
            result.push(MediaType::Native);
        }
        result
    }
}

impl From<MediaType> for MediaTypeSet {
    fn from(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Banner => Self::BANNER,
            MediaType::Video => Self::VIDEO,
            MediaType::Audio => Self::AUDIO,
            MediaType::Native => Self::NATIVE,
        }
    }
}

impl std::ops::BitOr for MediaTypeSet {
    type Output = MediaTypeSet;

    fn bitor(self, rhs: MediaTypeSet) -> MediaTypeSet {
        MediaTypeSet(self.0 | rhs.0)
    }
}
