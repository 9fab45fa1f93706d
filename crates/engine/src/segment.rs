use serde::{Deserialize, Serialize};

use crate::clip::ClipRecord;
use crate::gloss::GlossToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionSource {
    CacheHit,
    Fetched,
    Missing,
}

/// A gloss token bound to its clip (or to nothing) at a fixed output position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSegment {
    pub position: usize,
    pub token: GlossToken,
    pub clip: Option<ClipRecord>,
    pub source: ResolutionSource,
    /// Set when the repository answered with a fuzzy match.
    #[serde(default)]
    pub approximate: bool,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ResolvedSegment {
    pub fn cache_hit(position: usize, token: GlossToken, clip: ClipRecord, approximate: bool) -> Self {
        ResolvedSegment {
            position,
            token,
            clip: Some(clip),
            source: ResolutionSource::CacheHit,
            approximate,
            detail: None,
        }
    }

    pub fn fetched(position: usize, token: GlossToken, clip: ClipRecord) -> Self {
        ResolvedSegment {
            position,
            token,
            clip: Some(clip),
            source: ResolutionSource::Fetched,
            approximate: false,
            detail: None,
        }
    }

    pub fn missing(position: usize, token: GlossToken, detail: impl Into<String>) -> Self {
        ResolvedSegment {
            position,
            token,
            clip: None,
            source: ResolutionSource::Missing,
            approximate: false,
            detail: Some(detail.into()),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.clip.is_some()
    }
}

/// True when `segments` lines up one-to-one, in order, with `glosses`.
pub fn aligned_with(segments: &[ResolvedSegment], glosses: &[GlossToken]) -> bool {
    segments.len() == glosses.len()
        && segments
            .iter()
            .zip(glosses)
            .enumerate()
            .all(|(i, (seg, gloss))| seg.position == i && &seg.token == gloss)
}
