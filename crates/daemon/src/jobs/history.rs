use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::Database;
use crate::error::RepoResult;

/// One finished video, as listed in a user's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoHistoryRecord {
    pub job_id: String,
    pub user_id: Option<String>,
    pub transcript: String,
    pub output_artifact: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn record(&self, record: &VideoHistoryRecord) -> RepoResult<()>;

    /// Most recent first.
    async fn for_user(&self, user_id: &str, limit: usize) -> RepoResult<Vec<VideoHistoryRecord>>;
}

pub struct SqliteHistoryStore {
    db: Arc<Database>,
}

impl SqliteHistoryStore {
    pub fn new(db: Arc<Database>) -> Self {
        SqliteHistoryStore { db }
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn record(&self, record: &VideoHistoryRecord) -> RepoResult<()> {
        self.db.insert_history(record)
    }

    async fn for_user(&self, user_id: &str, limit: usize) -> RepoResult<Vec<VideoHistoryRecord>> {
        self.db.history_for_user(user_id, limit)
    }
}
