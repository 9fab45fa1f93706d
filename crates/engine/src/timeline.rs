use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::gloss::GlossToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Resolution { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Rational frame rate as reported by ffprobe ("30000/1001").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn new(num: u32, den: u32) -> Self {
        FrameRate { num, den: den.max(1) }
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den.max(1) as f64
    }

    /// Length of one frame in milliseconds, rounded up.
    pub fn frame_duration_ms(&self) -> u64 {
        if self.num == 0 {
            return 0;
        }
        (1000 * self.den as u64).div_ceil(self.num as u64)
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    pub fn parse(value: &str) -> Option<FrameRate> {
        let (num, den) = value.split_once('/')?;
        let rate = FrameRate::new(num.trim().parse().ok()?, den.trim().parse().ok()?);
        rate.is_valid().then_some(rate)
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Common resolution and frame rate every clip is re-encoded to before concatenation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationTarget {
    pub resolution: Resolution,
    pub frame_rate: FrameRate,
}

impl Default for NormalizationTarget {
    fn default() -> Self {
        NormalizationTarget {
            resolution: Resolution::new(640, 480),
            frame_rate: FrameRate::new(25, 1),
        }
    }
}

/// What to do with a segment that has no clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SubstitutionPolicy {
    /// Omit the sign; neighbours are joined contiguously.
    #[default]
    Skip,
    /// Insert a black hold clip so downstream timing is preserved.
    Placeholder { duration_ms: u64 },
}

impl FromStr for SubstitutionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "skip" {
            return Ok(SubstitutionPolicy::Skip);
        }
        if let Some(ms) = s.strip_prefix("placeholder") {
            let ms = ms.trim_start_matches(':');
            let duration_ms = if ms.is_empty() {
                1000
            } else {
                ms.parse::<u64>()
                    .map_err(|_| format!("invalid placeholder duration '{}'", ms))?
            };
            if duration_ms == 0 {
                return Err("placeholder duration must be positive".to_string());
            }
            return Ok(SubstitutionPolicy::Placeholder { duration_ms });
        }
        Err(format!("unknown substitution policy '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    Clip { source_path: String },
    Placeholder,
}

/// One slot of the output video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Position of the originating segment in the gloss sequence.
    pub position: usize,
    pub token: GlossToken,
    pub start_ms: u64,
    pub duration_ms: u64,
    pub kind: EntryKind,
}

impl PlanEntry {
    pub fn end_ms(&self) -> u64 {
        self.start_ms + self.duration_ms
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.kind, EntryKind::Placeholder)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSegment {
    pub position: usize,
    pub token: GlossToken,
    pub reason: String,
}

/// Ordered, timed composition of the output video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyPlan {
    pub target: NormalizationTarget,
    pub policy: SubstitutionPolicy,
    pub entries: Vec<PlanEntry>,
    /// Unresolved segments, whether dropped or replaced by a placeholder.
    pub unresolved: Vec<SkippedSegment>,
    pub total_duration_ms: u64,
}

impl AssemblyPlan {
    pub fn clip_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_placeholder()).count()
    }

    pub fn placeholder_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_placeholder()).count()
    }

    /// Largest drift between planned and encoded duration that is still acceptable.
    pub fn timing_tolerance_ms(&self) -> u64 {
        let per_entry = self.target.frame_rate.frame_duration_ms().max(1);
        per_entry * self.entries.len().max(1) as u64
    }

    pub fn warnings(&self) -> Vec<String> {
        self.unresolved
            .iter()
            .map(|s| match self.policy {
                SubstitutionPolicy::Skip => format!(
                    "sign {} at position {} skipped: {}",
                    s.token, s.position, s.reason
                ),
                SubstitutionPolicy::Placeholder { .. } => format!(
                    "sign {} at position {} replaced by placeholder: {}",
                    s.token, s.position, s.reason
                ),
            })
            .collect()
    }
}
