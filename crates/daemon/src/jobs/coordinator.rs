//! Job Coordinator: drives one job from submission to a terminal state.
//!
//! Every transition is persisted before the next stage starts, so a restarted
//! daemon can pick jobs up where they stopped. Transcript and gloss sequence
//! are reused on resume; resolution and assembly run again.

use chrono::Utc;
use engine::{GlossToken, InputRef, Job, JobError, JobErrorKind, JobId, JobState, ResolvedSegment};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::history::{HistoryStore, VideoHistoryRecord};
use super::transcribe::{clean_transcript, SpeechToText};
use super::translate::TextToGloss;
use super::JobStore;
use crate::assembler::VideoAssembler;
use crate::error::{CoordinatorError, RepoResult};
use crate::resolver::GlossResolver;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub input: InputRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    AlreadyActive,
    AlreadyExists,
    Invalid(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::AlreadyActive => f.write_str("job is already running"),
            RejectReason::AlreadyExists => f.write_str("job already finished; submit under a new id"),
            RejectReason::Invalid(reason) => write!(f, "invalid submission: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted(JobId),
    Rejected(RejectReason),
}

/// Pipeline position; used to skip stages a resumed job already passed.
fn stage_index(state: JobState) -> u8 {
    match state {
        JobState::Submitted => 0,
        JobState::Transcribing => 1,
        JobState::Translating => 2,
        JobState::Resolving => 3,
        JobState::Assembling => 4,
        JobState::Completed | JobState::Failed => 5,
    }
}

fn internal(message: impl Into<String>) -> JobError {
    JobError::new(JobErrorKind::Internal, message)
}

fn unresolved_warnings(segments: &[ResolvedSegment]) -> Vec<String> {
    segments
        .iter()
        .filter(|s| !s.is_resolved())
        .map(|s| {
            format!(
                "sign {} at position {} unresolved: {}",
                s.token,
                s.position,
                s.detail.as_deref().unwrap_or("no clip")
            )
        })
        .collect()
}

async fn or_cancelled<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T, JobError>>,
) -> Result<T, JobError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(JobError::cancelled()),
        result = work => result,
    }
}

pub struct JobCoordinator {
    store: JobStore,
    speech: Arc<dyn SpeechToText>,
    glosser: Arc<dyn TextToGloss>,
    resolver: Arc<GlossResolver>,
    assembler: Arc<VideoAssembler>,
    history: Arc<dyn HistoryStore>,
    /// Jobs with a live pipeline task in this process.
    active: Mutex<HashMap<JobId, CancellationToken>>,
}

impl JobCoordinator {
    pub fn new(
        store: JobStore,
        speech: Arc<dyn SpeechToText>,
        glosser: Arc<dyn TextToGloss>,
        resolver: Arc<GlossResolver>,
        assembler: Arc<VideoAssembler>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        JobCoordinator {
            store,
            speech,
            glosser,
            resolver,
            assembler,
            history,
            active: Mutex::new(HashMap::new()),
        }
    }

    fn active(&self) -> MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn submit_job(self: &Arc<Self>, submission: JobSubmission) -> Result<SubmitOutcome, CoordinatorError> {
        let job_id = match submission.job_id {
            Some(raw) => match JobId::new(raw) {
                Ok(id) => id,
                Err(reason) => return Ok(SubmitOutcome::Rejected(RejectReason::Invalid(reason))),
            },
            None => JobId::generate(),
        };
        if let Some(path) = submission.input.media_path() {
            if path.trim().is_empty() {
                return Ok(SubmitOutcome::Rejected(RejectReason::Invalid(
                    "media path is empty".to_string(),
                )));
            }
        }

        let cancel = CancellationToken::new();
        let job = {
            let mut active = self.active();
            if active.contains_key(&job_id) {
                return Ok(SubmitOutcome::Rejected(RejectReason::AlreadyActive));
            }
            if let Some(existing) = self.store.get(&job_id)? {
                let reason = if existing.is_terminal() {
                    RejectReason::AlreadyExists
                } else {
                    RejectReason::AlreadyActive
                };
                return Ok(SubmitOutcome::Rejected(reason));
            }

            let job = Job::new(job_id.clone(), submission.user_id, submission.input);
            if !self.store.create(&job)? {
                return Ok(SubmitOutcome::Rejected(RejectReason::AlreadyActive));
            }
            active.insert(job_id.clone(), cancel.clone());
            job
        };

        info!(job_id = %job_id, state = %job.state, "job submitted");
        self.spawn(job, cancel);
        Ok(SubmitOutcome::Accepted(job_id))
    }

    pub fn get_job_status(&self, job_id: &str) -> Result<Option<Job>, CoordinatorError> {
        match JobId::new(job_id) {
            Ok(id) => Ok(self.store.get(&id)?),
            Err(_) => Ok(None),
        }
    }

    /// Request cancellation. Returns false for unknown or finished jobs.
    pub fn cancel_job(&self, job_id: &str) -> Result<bool, CoordinatorError> {
        let id = JobId::new(job_id).map_err(CoordinatorError::InvalidJobId)?;

        let running = self.active().get(&id).cloned();
        if let Some(token) = running {
            info!(job_id = %id, "cancellation requested");
            token.cancel();
            // Persist the request so a restart before the task winds down
            // does not resume the job.
            if let Some(mut job) = self.store.get(&id)? {
                if !job.is_terminal() && !job.cancel_requested {
                    job.cancel_requested = true;
                    self.store.save(&job)?;
                }
            }
            return Ok(true);
        }

        // Persisted but not running here, e.g. before resume picks it up.
        let Some(mut job) = self.store.get(&id)? else {
            return Ok(false);
        };
        if job.is_terminal() {
            return Ok(false);
        }
        job.cancel_requested = true;
        job.fail(JobError::cancelled())
            .map_err(CoordinatorError::IllegalTransition)?;
        let saved = self.store.save(&job)?;
        info!(job_id = %id, saved, "idle job cancelled");
        Ok(saved)
    }

    /// Re-drive every persisted non-terminal job. Returns how many were started.
    pub fn resume_incomplete(self: &Arc<Self>) -> Result<usize, CoordinatorError> {
        let mut resumed = 0;
        for job in self.store.incomplete()? {
            let cancel = CancellationToken::new();
            {
                let mut active = self.active();
                if active.contains_key(&job.job_id) {
                    continue;
                }
                active.insert(job.job_id.clone(), cancel.clone());
            }
            info!(job_id = %job.job_id, state = %job.state, "resuming job");
            self.spawn(job, cancel);
            resumed += 1;
        }
        Ok(resumed)
    }

    pub async fn history_for_user(&self, user_id: &str, limit: usize) -> RepoResult<Vec<VideoHistoryRecord>> {
        self.history.for_user(user_id, limit).await
    }

    fn spawn(self: &Arc<Self>, job: Job, cancel: CancellationToken) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.drive(job, cancel).await;
        });
    }

    async fn drive(&self, mut job: Job, cancel: CancellationToken) {
        let job_id = job.job_id.clone();
        if let Err(err) = self.run_pipeline(&mut job, &cancel).await {
            self.fail_job(&mut job, err);
        }
        self.active().remove(&job_id);
    }

    async fn run_pipeline(&self, job: &mut Job, cancel: &CancellationToken) -> Result<(), JobError> {
        if job.cancel_requested {
            return Err(JobError::cancelled());
        }

        let transcript = match job.transcript.clone() {
            Some(transcript) => transcript,
            None => {
                self.enter(job, JobState::Transcribing, cancel)?;
                let raw = match &job.input {
                    InputRef::Text(text) => text.clone(),
                    input => {
                        or_cancelled(cancel, async {
                            self.speech
                                .transcribe(input)
                                .await
                                .map_err(|e| JobError::new(JobErrorKind::Transcription, e.message))
                        })
                        .await?
                    }
                };
                let transcript = clean_transcript(&raw)
                    .map_err(|e| JobError::new(JobErrorKind::Transcription, e.message))?;
                job.transcript = Some(transcript.clone());
                transcript
            }
        };

        let glosses: Vec<GlossToken> = match job.gloss_sequence.clone() {
            Some(glosses) => glosses,
            None => {
                self.enter(job, JobState::Translating, cancel)?;
                let glosses = or_cancelled(cancel, async {
                    self.glosser
                        .translate(&transcript)
                        .await
                        .map_err(|e| JobError::new(JobErrorKind::Translation, e.message))
                })
                .await?;
                job.gloss_sequence = Some(glosses.clone());
                glosses
            }
        };

        self.enter(job, JobState::Resolving, cancel)?;
        let segments = self
            .resolver
            .resolve(&glosses, cancel)
            .await
            .map_err(|_| JobError::cancelled())?;
        job.warnings = unresolved_warnings(&segments);
        job.resolved_segments = segments;
        for warning in &job.warnings {
            warn!(job_id = %job.job_id, "{}", warning);
        }

        self.enter(job, JobState::Assembling, cancel)?;
        let output = self
            .assembler
            .assemble(&job.job_id, &job.resolved_segments)
            .await
            .map_err(|e| JobError::new(JobErrorKind::Assembly, e.to_string()))?;

        if cancel.is_cancelled() {
            if let Err(e) = tokio::fs::remove_file(&output.artifact).await {
                warn!(job_id = %job.job_id, error = %e, "failed to remove artifact of cancelled job");
            }
            return Err(JobError::cancelled());
        }

        let artifact = output.artifact.display().to_string();
        job.warnings = output.warnings;
        job.complete(artifact.clone()).map_err(internal)?;
        self.persist(job)?;
        info!(
            job_id = %job.job_id,
            state = %job.state,
            resolved = job.resolved_count(),
            total = job.total_count(),
            duration_ms = output.duration_ms,
            artifact = %artifact,
            "job completed"
        );

        self.record_history(job, artifact, transcript).await;
        Ok(())
    }

    /// Move to `stage` unless a resumed job is already there or past it.
    fn enter(&self, job: &mut Job, stage: JobState, cancel: &CancellationToken) -> Result<(), JobError> {
        if cancel.is_cancelled() {
            return Err(JobError::cancelled());
        }
        if stage_index(job.state) >= stage_index(stage) {
            return Ok(());
        }
        job.transition(stage).map_err(internal)?;
        self.persist(job)?;
        info!(job_id = %job.job_id, state = %stage, "job advanced");
        Ok(())
    }

    fn persist(&self, job: &Job) -> Result<(), JobError> {
        match self.store.save(job) {
            Ok(true) => Ok(()),
            Ok(false) => Err(internal(format!("job {} is no longer writable", job.job_id))),
            Err(e) => Err(internal(format!("failed to persist job: {}", e))),
        }
    }

    fn fail_job(&self, job: &mut Job, err: JobError) {
        if err.kind == JobErrorKind::Cancelled {
            job.cancel_requested = true;
            info!(job_id = %job.job_id, state = %job.state, "job cancelled");
        } else {
            error!(
                job_id = %job.job_id,
                state = %job.state,
                kind = ?err.kind,
                error = %err.message,
                "job failed"
            );
        }

        if let Err(e) = job.fail(err) {
            warn!(job_id = %job.job_id, error = %e, "job already terminal");
            return;
        }
        if let Err(e) = self.store.save(job) {
            error!(job_id = %job.job_id, error = %e, "failed to persist failed job");
        }
    }

    async fn record_history(&self, job: &Job, artifact: String, transcript: String) {
        let Some(user_id) = job.user_id.clone() else {
            return;
        };
        let record = VideoHistoryRecord {
            job_id: job.job_id.to_string(),
            user_id: Some(user_id),
            transcript,
            output_artifact: artifact,
            created_at: Utc::now(),
        };
        if let Err(e) = self.history.record(&record).await {
            warn!(job_id = %job.job_id, error = %e, "failed to save video history");
        }
    }
}
