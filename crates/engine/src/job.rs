use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::gloss::GlossToken;
use crate::segment::ResolvedSegment;

const MAX_JOB_ID_LEN: usize = 128;

/// Caller- or system-generated job identifier. Also keys the artifact path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    pub fn new(value: impl Into<String>) -> Result<Self, String> {
        let value = value.into();
        if value.is_empty() || value.len() > MAX_JOB_ID_LEN {
            return Err(format!("job id must be 1-{} characters", MAX_JOB_ID_LEN));
        }
        if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(format!("job id '{}' may only contain [A-Za-z0-9_-]", value));
        }
        Ok(JobId(value))
    }

    pub fn generate() -> Self {
        JobId(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for JobId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        JobId::new(value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Submitted,
    Transcribing,
    Translating,
    Resolving,
    Assembling,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Submitted => "SUBMITTED",
            JobState::Transcribing => "TRANSCRIBING",
            JobState::Translating => "TRANSLATING",
            JobState::Resolving => "RESOLVING",
            JobState::Assembling => "ASSEMBLING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<JobState> {
        match value {
            "SUBMITTED" => Some(JobState::Submitted),
            "TRANSCRIBING" => Some(JobState::Transcribing),
            "TRANSLATING" => Some(JobState::Translating),
            "RESOLVING" => Some(JobState::Resolving),
            "ASSEMBLING" => Some(JobState::Assembling),
            "COMPLETED" => Some(JobState::Completed),
            "FAILED" => Some(JobState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// The forward pipeline successor; terminal states have none.
    pub fn next(&self) -> Option<JobState> {
        match self {
            JobState::Submitted => Some(JobState::Transcribing),
            JobState::Transcribing => Some(JobState::Translating),
            JobState::Translating => Some(JobState::Resolving),
            JobState::Resolving => Some(JobState::Assembling),
            JobState::Assembling => Some(JobState::Completed),
            JobState::Completed | JobState::Failed => None,
        }
    }

    pub fn can_transition_to(&self, to: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == JobState::Failed || self.next() == Some(to)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the job was asked to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum InputRef {
    Audio(String),
    Video(String),
    Text(String),
}

impl InputRef {
    pub fn media_path(&self) -> Option<&str> {
        match self {
            InputRef::Audio(p) | InputRef::Video(p) => Some(p),
            InputRef::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    Transcription,
    Translation,
    Assembly,
    Cancelled,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        JobError {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        JobError::new(JobErrorKind::Cancelled, "Cancelled")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: JobState,
    pub at: DateTime<Utc>,
}

/// Snapshot of one end-to-end request. Frozen once terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub user_id: Option<String>,
    pub state: JobState,
    pub input: InputRef,
    pub transcript: Option<String>,
    pub gloss_sequence: Option<Vec<GlossToken>>,
    pub resolved_segments: Vec<ResolvedSegment>,
    pub output_artifact: Option<String>,
    pub error: Option<JobError>,
    pub warnings: Vec<String>,
    pub cancel_requested: bool,
    pub transitions: Vec<StateTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_id: JobId, user_id: Option<String>, input: InputRef) -> Self {
        let now = Utc::now();
        Job {
            job_id,
            user_id,
            state: JobState::Submitted,
            input,
            transcript: None,
            gloss_sequence: None,
            resolved_segments: Vec::new(),
            output_artifact: None,
            error: None,
            warnings: Vec::new(),
            cancel_requested: false,
            transitions: vec![StateTransition {
                state: JobState::Submitted,
                at: now,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn transition(&mut self, to: JobState) -> Result<(), String> {
        if !self.state.can_transition_to(to) {
            return Err(format!(
                "job {}: illegal transition {} -> {}",
                self.job_id, self.state, to
            ));
        }
        let now = Utc::now();
        self.state = to;
        self.updated_at = now;
        self.transitions.push(StateTransition { state: to, at: now });
        Ok(())
    }

    pub fn fail(&mut self, error: JobError) -> Result<(), String> {
        self.transition(JobState::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    pub fn complete(&mut self, artifact: impl Into<String>) -> Result<(), String> {
        self.transition(JobState::Completed)?;
        self.output_artifact = Some(artifact.into());
        Ok(())
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved_segments.iter().filter(|s| s.is_resolved()).count()
    }

    pub fn total_count(&self) -> usize {
        self.gloss_sequence.as_ref().map(Vec::len).unwrap_or(0)
    }

    pub fn entered_at(&self, state: JobState) -> Option<DateTime<Utc>> {
        self.transitions.iter().find(|t| t.state == state).map(|t| t.at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(JobId::new("job-1").unwrap(), None, InputRef::Text("hello".into()))
    }

    #[test]
    fn job_id_validation() {
        assert!(JobId::new("abc_DEF-123").is_ok());
        assert!(JobId::new("").is_err());
        assert!(JobId::new("../etc/passwd").is_err());
        assert!(JobId::new("a".repeat(129)).is_err());
        assert_eq!(JobId::generate().as_str().len(), 32);
    }

    #[test]
    fn forward_pipeline_transitions() {
        let mut job = job();
        for state in [
            JobState::Transcribing,
            JobState::Translating,
            JobState::Resolving,
            JobState::Assembling,
        ] {
            job.transition(state).unwrap();
        }
        job.complete("/out/job-1.mp4").unwrap();

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.transitions.len(), 6);
        assert!(job.entered_at(JobState::Resolving).is_some());
    }

    #[test]
    fn skipping_stages_is_illegal() {
        let mut job = job();
        assert!(job.transition(JobState::Resolving).is_err());
        assert_eq!(job.state, JobState::Submitted);
    }

    #[test]
    fn failed_reachable_from_any_non_terminal_state() {
        let mut job = job();
        job.transition(JobState::Transcribing).unwrap();
        job.fail(JobError::new(JobErrorKind::Transcription, "no speech detected")).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_ref().unwrap().kind, JobErrorKind::Transcription);
    }

    #[test]
    fn terminal_states_are_immutable() {
        let mut job = job();
        job.fail(JobError::cancelled()).unwrap();
        assert!(job.transition(JobState::Transcribing).is_err());
        assert!(job.fail(JobError::cancelled()).is_err());
        assert!(job.complete("/x.mp4").is_err());
        assert_eq!(job.output_artifact, None);
    }

    #[test]
    fn state_roundtrips_through_str() {
        for state in [JobState::Submitted, JobState::Assembling, JobState::Failed] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
    }
}
