use std::fmt;

use crate::segment::ResolvedSegment;
use crate::timeline::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// Nothing would be left to render.
    NoSegments,
    /// A segment sits at the wrong index; the sequence was reordered upstream.
    OutOfOrder { index: usize, position: usize },
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::NoSegments => write!(f, "no segments to assemble"),
            PlanError::OutOfOrder { index, position } => write!(
                f,
                "segment at index {} carries position {}",
                index, position
            ),
        }
    }
}

impl std::error::Error for PlanError {}

/// Compile resolved segments into a timed plan.
///
/// Entries keep gloss order; hard cuts only. The normalization target is
/// `canonical` when given, otherwise the first resolved clip's parameters.
pub fn compile_assembly_plan(
    segments: &[ResolvedSegment],
    policy: SubstitutionPolicy,
    canonical: Option<NormalizationTarget>,
) -> Result<AssemblyPlan, PlanError> {
    for (index, segment) in segments.iter().enumerate() {
        if segment.position != index {
            return Err(PlanError::OutOfOrder {
                index,
                position: segment.position,
            });
        }
    }

    let target = canonical
        .or_else(|| {
            segments.iter().find_map(|s| {
                s.clip.as_ref().and_then(|clip| {
                    (clip.resolution.is_valid() && clip.frame_rate.is_valid()).then(|| {
                        NormalizationTarget {
                            resolution: clip.resolution,
                            frame_rate: clip.frame_rate,
                        }
                    })
                })
            })
        })
        .unwrap_or_default();

    let mut entries = Vec::with_capacity(segments.len());
    let mut unresolved = Vec::new();
    let mut cursor_ms = 0u64;

    for segment in segments {
        match (&segment.clip, policy) {
            (Some(clip), _) if clip.duration_ms > 0 => {
                entries.push(PlanEntry {
                    position: segment.position,
                    token: segment.token.clone(),
                    start_ms: cursor_ms,
                    duration_ms: clip.duration_ms,
                    kind: EntryKind::Clip {
                        source_path: clip.source_path.clone(),
                    },
                });
                cursor_ms += clip.duration_ms;
            }
            (clip, policy) => {
                let reason = match clip {
                    Some(_) => "clip has zero duration".to_string(),
                    None => segment
                        .detail
                        .clone()
                        .unwrap_or_else(|| "unresolved".to_string()),
                };
                unresolved.push(SkippedSegment {
                    position: segment.position,
                    token: segment.token.clone(),
                    reason,
                });
                if let SubstitutionPolicy::Placeholder { duration_ms } = policy {
                    entries.push(PlanEntry {
                        position: segment.position,
                        token: segment.token.clone(),
                        start_ms: cursor_ms,
                        duration_ms,
                        kind: EntryKind::Placeholder,
                    });
                    cursor_ms += duration_ms;
                }
            }
        }
    }

    // A video made only of placeholders carries no signs.
    if entries.iter().all(|e| e.is_placeholder()) {
        return Err(PlanError::NoSegments);
    }

    Ok(AssemblyPlan {
        target,
        policy,
        entries,
        unresolved,
        total_duration_ms: cursor_ms,
    })
}
