use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gloss::GlossToken;
use crate::timeline::{FrameRate, Resolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClipOrigin {
    /// Shipped with the pre-rendered clip library.
    Local,
    /// Downloaded by the online fallback.
    Fetched,
}

impl ClipOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipOrigin::Local => "LOCAL",
            ClipOrigin::Fetched => "FETCHED",
        }
    }

    pub fn parse(value: &str) -> Option<ClipOrigin> {
        match value {
            "LOCAL" => Some(ClipOrigin::Local),
            "FETCHED" => Some(ClipOrigin::Fetched),
            _ => None,
        }
    }
}

/// Canonical stored clip for one gloss token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipRecord {
    pub token: GlossToken,
    pub source_path: String,
    pub source_uri: Option<String>,
    pub duration_ms: u64,
    pub resolution: Resolution,
    pub frame_rate: FrameRate,
    pub origin: ClipOrigin,
    pub checksum: String,
    pub fetched_at: Option<DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
}

impl ClipRecord {
    /// Equality that ignores the access-recency marker.
    pub fn same_asset(&self, other: &ClipRecord) -> bool {
        self.token == other.token
            && self.source_path == other.source_path
            && self.checksum == other.checksum
            && self.duration_ms == other.duration_ms
            && self.origin == other.origin
    }
}

/// Everything needed to register a clip; the repository fills in storage details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipData {
    pub asset_path: String,
    pub source_uri: Option<String>,
    pub duration_ms: u64,
    pub resolution: Resolution,
    pub frame_rate: FrameRate,
    pub origin: ClipOrigin,
}
