pub mod coordinator;
pub mod history;
pub mod transcribe;
pub mod translate;

use engine::{Job, JobId};
use std::sync::Arc;
use tracing::debug;

use crate::db::Database;
use crate::error::RepoResult;

pub use coordinator::{JobCoordinator, JobSubmission, RejectReason, SubmitOutcome};
pub use history::{HistoryStore, SqliteHistoryStore, VideoHistoryRecord};
pub use transcribe::{clean_transcript, HttpSpeechToText, SpeechToText};
pub use translate::{HttpTextToGloss, TextToGloss};

/// Persisted job snapshots. Terminal snapshots are never overwritten.
pub struct JobStore {
    db: Arc<Database>,
}

impl JobStore {
    pub fn new(db: Arc<Database>) -> Self {
        JobStore { db }
    }

    /// Returns false when a job with this id already exists.
    pub fn create(&self, job: &Job) -> RepoResult<bool> {
        self.db.insert_job(job)
    }

    /// Returns false when the stored job is missing or already terminal.
    pub fn save(&self, job: &Job) -> RepoResult<bool> {
        let saved = self.db.save_job(job)?;
        if !saved {
            debug!(job_id = %job.job_id, state = %job.state, "snapshot not saved; stored job is terminal or missing");
        }
        Ok(saved)
    }

    pub fn get(&self, job_id: &JobId) -> RepoResult<Option<Job>> {
        self.db.get_job(job_id.as_str())
    }

    pub fn incomplete(&self) -> RepoResult<Vec<Job>> {
        self.db.non_terminal_jobs()
    }
}
