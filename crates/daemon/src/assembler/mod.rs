//! Video Assembler: renders resolved segments into one continuous video.

use engine::compiler::{compile_assembly_plan, PlanError};
use engine::render::generate_render_commands;
use engine::{AssemblyPlan, JobId, ResolvedSegment, SkippedSegment};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AssemblyConfig;
use crate::error::AssemblyError;
use crate::media::MediaBackend;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssemblyOutput {
    pub artifact: PathBuf,
    pub duration_ms: u64,
    pub clip_count: usize,
    pub placeholder_count: usize,
    pub skipped: Vec<SkippedSegment>,
    pub warnings: Vec<String>,
}

pub struct VideoAssembler {
    media: Arc<dyn MediaBackend>,
    config: AssemblyConfig,
    work_dir: PathBuf,
    output_dir: PathBuf,
}

impl VideoAssembler {
    pub fn new(
        media: Arc<dyn MediaBackend>,
        config: AssemblyConfig,
        work_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        VideoAssembler {
            media,
            config,
            work_dir: work_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn artifact_path(&self, job_id: &JobId) -> PathBuf {
        self.output_dir.join(format!("{}.mp4", job_id))
    }

    fn partial_path(&self, job_id: &JobId) -> PathBuf {
        self.output_dir.join(format!("{}.partial.mp4", job_id))
    }

    pub fn plan(&self, segments: &[ResolvedSegment]) -> Result<AssemblyPlan, AssemblyError> {
        compile_assembly_plan(segments, self.config.policy, self.config.canonical_target).map_err(|e| match e {
            PlanError::NoSegments => AssemblyError::NoSegments,
            other @ PlanError::OutOfOrder { .. } => AssemblyError::OutOfOrder(other.to_string()),
        })
    }

    /// Render `segments` to `<output_dir>/<job_id>.mp4`.
    ///
    /// The artifact only appears at its final path once it has been verified.
    pub async fn assemble(&self, job_id: &JobId, segments: &[ResolvedSegment]) -> Result<AssemblyOutput, AssemblyError> {
        let plan = self.plan(segments)?;
        let job_dir = self.work_dir.join(job_id.as_str());
        tokio::fs::create_dir_all(&job_dir).await?;
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let result = self.render(job_id, &plan, &job_dir).await;

        if result.is_err() {
            let partial = self.partial_path(job_id);
            if partial.exists() {
                match tokio::fs::remove_file(&partial).await {
                    Ok(()) => debug!(job_id = %job_id, "removed partial output"),
                    Err(e) => warn!(job_id = %job_id, error = %e, "failed to remove partial output"),
                }
            }
        }
        if !self.config.keep_work_dir {
            if let Err(e) = tokio::fs::remove_dir_all(&job_dir).await {
                debug!(job_id = %job_id, error = %e, "failed to remove assembly work dir");
            }
        }
        result
    }

    async fn render(&self, job_id: &JobId, plan: &AssemblyPlan, job_dir: &Path) -> Result<AssemblyOutput, AssemblyError> {
        let artifact = self.artifact_path(job_id);
        let partial = self.partial_path(job_id);
        let commands = generate_render_commands(plan, job_dir, partial.clone());
        let timeout = self.config.ffmpeg_timeout;

        for segment in &commands.segment_commands {
            debug!(job_id = %job_id, position = segment.position, "normalizing segment");
            self.media.run_ffmpeg(&segment.ffmpeg_args, timeout).await?;
        }

        tokio::fs::write(&commands.concat_list_path, &commands.concat_list).await?;
        self.media.run_ffmpeg(&commands.ffmpeg_args, timeout).await?;

        let info = self.media.probe(&commands.output_path).await?;
        let tolerance = plan.timing_tolerance_ms();
        if info.duration_ms.abs_diff(plan.total_duration_ms) > tolerance {
            warn!(
                job_id = %job_id,
                expected_ms = plan.total_duration_ms,
                actual_ms = info.duration_ms,
                tolerance_ms = tolerance,
                "rendered duration does not match plan"
            );
            return Err(AssemblyError::TimingMismatch {
                expected_ms: plan.total_duration_ms,
                actual_ms: info.duration_ms,
            });
        }

        tokio::fs::rename(&commands.output_path, &artifact).await?;

        let warnings = plan.warnings();
        info!(
            job_id = %job_id,
            clips = plan.clip_count(),
            placeholders = plan.placeholder_count(),
            skipped = plan.unresolved.len(),
            duration_ms = info.duration_ms,
            "assembled output video"
        );

        Ok(AssemblyOutput {
            artifact,
            duration_ms: info.duration_ms,
            clip_count: plan.clip_count(),
            placeholder_count: plan.placeholder_count(),
            skipped: plan.unresolved.clone(),
            warnings,
        })
    }
}
