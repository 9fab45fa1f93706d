//! Clip Repository: the authoritative map from gloss token to stored clip.
//!
//! Metadata lives in the `clips` table; assets are copied into `clips_dir`
//! under content-addressed names so two registrations of the same bytes share
//! one file.

pub mod import;

use chrono::{Duration as ChronoDuration, Utc};
use engine::gloss::similarity;
use engine::{ClipData, ClipOrigin, ClipRecord, GlossToken};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::RepoResult;
use crate::media::{compute_file_checksum, MediaBackend};

pub use import::ImportSummary;

/// A repository hit. `approximate` is set when the token itself had no record.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipMatch {
    pub record: ClipRecord,
    pub approximate: bool,
}

pub struct ClipRepository {
    db: Arc<Database>,
    media: Arc<dyn MediaBackend>,
    clips_dir: PathBuf,
    fuzzy_threshold: f64,
}

impl ClipRepository {
    pub fn new(
        db: Arc<Database>,
        media: Arc<dyn MediaBackend>,
        clips_dir: impl Into<PathBuf>,
        fuzzy_threshold: f64,
    ) -> Self {
        ClipRepository {
            db,
            media,
            clips_dir: clips_dir.into(),
            fuzzy_threshold,
        }
    }

    pub fn clips_dir(&self) -> &Path {
        &self.clips_dir
    }

    /// Exact record for `token`, without touching access recency.
    pub fn get_exact(&self, token: &GlossToken) -> RepoResult<Option<ClipRecord>> {
        self.db.get_clip(token.as_str())
    }

    /// Exact match, then match-key match, then closest token by edit similarity.
    pub fn lookup(&self, token: &GlossToken) -> RepoResult<Option<ClipMatch>> {
        let found = match self.db.get_clip(token.as_str())? {
            Some(record) => Some(ClipMatch {
                record,
                approximate: false,
            }),
            None => self.fuzzy_lookup(token)?.map(|record| ClipMatch {
                record,
                approximate: true,
            }),
        };

        let Some(mut found) = found else {
            return Ok(None);
        };

        let now = Utc::now();
        self.db.touch_clip(found.record.token.as_str(), now)?;
        found.record.last_accessed_at = Some(now);

        if found.approximate {
            debug!(
                token = %token,
                matched = %found.record.token,
                "approximate repository hit"
            );
        }
        Ok(Some(found))
    }

    fn fuzzy_lookup(&self, token: &GlossToken) -> RepoResult<Option<ClipRecord>> {
        let by_key = self.db.clips_by_match_key(&token.match_key())?;
        let best_key = best_by_similarity(token.as_str(), by_key.iter().map(|c| c.token.as_str()))
            .map(|(t, _)| t.to_string());
        if let Some(best) = best_key {
            return Ok(by_key.into_iter().find(|c| c.token.as_str() == best));
        }

        let tokens = self.db.clip_tokens()?;
        let candidates = tokens.iter().map(String::as_str);
        match best_by_similarity(token.as_str(), candidates) {
            Some((best, score)) if score >= self.fuzzy_threshold => self.db.get_clip(best),
            _ => Ok(None),
        }
    }

    /// Store `data` as the canonical clip for `token`, unless one already exists.
    ///
    /// Returns the canonical record either way. Losing a registration race
    /// leaves the winner untouched and discards this writer's copied asset.
    pub async fn register(&self, token: &GlossToken, data: ClipData) -> RepoResult<ClipRecord> {
        self.register_checked(token, data).await.map(|(record, _)| record)
    }

    /// Like `register`, also reporting whether this call created the record.
    pub(crate) async fn register_checked(
        &self,
        token: &GlossToken,
        data: ClipData,
    ) -> RepoResult<(ClipRecord, bool)> {
        if let Some(existing) = self.db.get_clip(token.as_str())? {
            debug!(token = %token, "clip already registered");
            return Ok((existing, false));
        }

        let asset = Path::new(&data.asset_path);
        let checksum = compute_file_checksum(asset).await?;
        let extension = asset
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_else(|| "mp4".to_string());
        let stored_path = self.clips_dir.join(format!(
            "{}-{}.{}",
            token.file_stem(),
            &checksum[..12],
            extension
        ));

        tokio::fs::create_dir_all(&self.clips_dir).await?;
        let copied = if stored_path.exists() {
            false
        } else {
            tokio::fs::copy(asset, &stored_path).await?;
            true
        };

        let now = Utc::now();
        let record = ClipRecord {
            token: token.clone(),
            source_path: stored_path.to_string_lossy().to_string(),
            source_uri: data.source_uri,
            duration_ms: data.duration_ms,
            resolution: data.resolution,
            frame_rate: data.frame_rate,
            origin: data.origin,
            checksum,
            fetched_at: (data.origin == ClipOrigin::Fetched).then_some(now),
            last_accessed_at: None,
            registered_at: now,
        };

        let inserted = self.db.insert_clip_if_absent(&record)?;
        let canonical = self.db.get_clip(token.as_str())?.ok_or_else(|| {
            crate::error::RepositoryError::Corrupt(format!("clip {} vanished after insert", token))
        })?;
        if inserted {
            info!(
                token = %token,
                origin = canonical.origin.as_str(),
                duration_ms = canonical.duration_ms,
                "registered clip"
            );
            return Ok((canonical, true));
        }

        let winner = canonical;
        if copied && winner.source_path != record.source_path {
            if let Err(e) = tokio::fs::remove_file(&stored_path).await {
                warn!(token = %token, error = %e, "failed to remove losing clip copy");
            }
        }
        debug!(token = %token, "lost registration race; keeping existing clip");
        Ok((winner, false))
    }

    pub fn touch(&self, token: &GlossToken) -> RepoResult<bool> {
        self.db.touch_clip(token.as_str(), Utc::now())
    }

    /// FETCHED clips not used within `older_than`.
    pub fn stale_fetched(&self, older_than: ChronoDuration) -> RepoResult<Vec<ClipRecord>> {
        self.db.stale_fetched_clips(Utc::now() - older_than)
    }
}

/// Highest similarity wins; ties go to the lexicographically smaller token.
fn best_by_similarity<'a>(query: &str, candidates: impl Iterator<Item = &'a str>) -> Option<(&'a str, f64)> {
    candidates
        .map(|c| (c, similarity(query, c)))
        .fold(None, |best: Option<(&str, f64)>, (c, score)| match best {
            Some((b, s)) if s > score || (s == score && b <= c) => Some((b, s)),
            _ => Some((c, score)),
        })
}
