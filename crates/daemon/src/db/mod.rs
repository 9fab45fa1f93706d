use chrono::{DateTime, SecondsFormat, Utc};
use engine::{ClipOrigin, ClipRecord, FrameRate, GlossToken, Job, Resolution};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{RepoResult, RepositoryError};
use crate::jobs::history::VideoHistoryRecord;

pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub fn format_ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| rusqlite::Error::InvalidColumnType(idx, "TEXT".to_string(), rusqlite::types::Type::Text))
}

fn parse_opt_ts(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(idx, &v)).transpose()
}

const CLIP_COLUMNS: &str = "token, source_path, source_uri, duration_ms, width, height, fps_num, fps_den, \
                            origin, checksum, fetched_at, last_accessed_at, registered_at";

fn clip_from_row(row: &Row) -> rusqlite::Result<ClipRecord> {
    let token_str: String = row.get(0)?;
    let token = GlossToken::new(&token_str)
        .map_err(|_| rusqlite::Error::InvalidColumnType(0, "TEXT".to_string(), rusqlite::types::Type::Text))?;
    let origin_str: String = row.get(8)?;
    let origin = ClipOrigin::parse(&origin_str)
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(8, "TEXT".to_string(), rusqlite::types::Type::Text))?;
    let registered_at_str: String = row.get(12)?;
    let duration_ms: i64 = row.get(3)?;

    Ok(ClipRecord {
        token,
        source_path: row.get(1)?,
        source_uri: row.get(2)?,
        duration_ms: duration_ms.max(0) as u64,
        resolution: Resolution::new(row.get(4)?, row.get(5)?),
        frame_rate: FrameRate::new(row.get(6)?, row.get(7)?),
        origin,
        checksum: row.get(9)?,
        fetched_at: parse_opt_ts(10, row.get(10)?)?,
        last_accessed_at: parse_opt_ts(11, row.get(11)?)?,
        registered_at: parse_ts(12, &registered_at_str)?,
    })
}

fn job_from_row(row: &Row) -> rusqlite::Result<Job> {
    let snapshot: String = row.get(0)?;
    serde_json::from_str(&snapshot)
        .map_err(|_| rusqlite::Error::InvalidColumnType(0, "TEXT".to_string(), rusqlite::types::Type::Text))
}

impl Database {
    pub fn new(db_path: &Path) -> RepoResult<Self> {
        let conn = Connection::open(db_path)?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> RepoResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RepositoryError::LockPoisoned)
    }

    fn init_schema(&self) -> RepoResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS clips (
                token TEXT PRIMARY KEY,
                match_key TEXT NOT NULL,
                source_path TEXT NOT NULL,
                source_uri TEXT,
                duration_ms INTEGER NOT NULL,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                fps_num INTEGER NOT NULL,
                fps_den INTEGER NOT NULL,
                origin TEXT NOT NULL,
                checksum TEXT NOT NULL,
                fetched_at TEXT,
                last_accessed_at TEXT,
                registered_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_clips_match_key ON clips(match_key)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                user_id TEXT,
                state TEXT NOT NULL,
                snapshot_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state)", [])?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS video_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL UNIQUE,
                user_id TEXT,
                transcript TEXT NOT NULL,
                output_artifact TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }
}

// Clips

impl Database {
    /// Returns false when a record for the token already exists; the existing row is left untouched.
    pub fn insert_clip_if_absent(&self, clip: &ClipRecord) -> RepoResult<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO clips (token, match_key, source_path, source_uri, duration_ms, width, height,
                 fps_num, fps_den, origin, checksum, fetched_at, last_accessed_at, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                clip.token.as_str(),
                clip.token.match_key(),
                clip.source_path,
                clip.source_uri,
                clip.duration_ms as i64,
                clip.resolution.width,
                clip.resolution.height,
                clip.frame_rate.num,
                clip.frame_rate.den,
                clip.origin.as_str(),
                clip.checksum,
                clip.fetched_at.as_ref().map(format_ts),
                clip.last_accessed_at.as_ref().map(format_ts),
                format_ts(&clip.registered_at),
            ],
        )?;
        Ok(inserted == 1)
    }

    pub fn get_clip(&self, token: &str) -> RepoResult<Option<ClipRecord>> {
        let conn = self.conn()?;
        let clip = conn
            .query_row(
                &format!("SELECT {} FROM clips WHERE token = ?1", CLIP_COLUMNS),
                params![token],
                clip_from_row,
            )
            .optional()?;
        Ok(clip)
    }

    pub fn clips_by_match_key(&self, match_key: &str) -> RepoResult<Vec<ClipRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM clips WHERE match_key = ?1 ORDER BY token",
            CLIP_COLUMNS
        ))?;
        let rows = stmt.query_map(params![match_key], clip_from_row)?;

        let mut clips = Vec::new();
        for row in rows {
            clips.push(row?);
        }
        Ok(clips)
    }

    pub fn clip_tokens(&self) -> RepoResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT token FROM clips ORDER BY token")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut tokens = Vec::new();
        for row in rows {
            tokens.push(row?);
        }
        Ok(tokens)
    }

    pub fn touch_clip(&self, token: &str, at: DateTime<Utc>) -> RepoResult<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE clips SET last_accessed_at = ?1 WHERE token = ?2",
            params![format_ts(&at), token],
        )?;
        Ok(updated == 1)
    }

    /// FETCHED clips whose last access (or registration, if never accessed) is before `cutoff`.
    pub fn stale_fetched_clips(&self, cutoff: DateTime<Utc>) -> RepoResult<Vec<ClipRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM clips
             WHERE origin = 'FETCHED' AND COALESCE(last_accessed_at, registered_at) < ?1
             ORDER BY COALESCE(last_accessed_at, registered_at), token",
            CLIP_COLUMNS
        ))?;
        let rows = stmt.query_map(params![format_ts(&cutoff)], clip_from_row)?;

        let mut clips = Vec::new();
        for row in rows {
            clips.push(row?);
        }
        Ok(clips)
    }
}

// Jobs

impl Database {
    /// Returns false when the id is already taken.
    pub fn insert_job(&self, job: &Job) -> RepoResult<bool> {
        let snapshot = serde_json::to_string(job)?;
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO jobs (job_id, user_id, state, snapshot_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job.job_id.as_str(),
                job.user_id,
                job.state.as_str(),
                snapshot,
                format_ts(&job.created_at),
                format_ts(&job.updated_at),
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Overwrites the stored snapshot unless the stored job is already terminal.
    pub fn save_job(&self, job: &Job) -> RepoResult<bool> {
        let snapshot = serde_json::to_string(job)?;
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE jobs SET state = ?1, snapshot_json = ?2, updated_at = ?3
             WHERE job_id = ?4 AND state NOT IN ('COMPLETED', 'FAILED')",
            params![
                job.state.as_str(),
                snapshot,
                format_ts(&job.updated_at),
                job.job_id.as_str(),
            ],
        )?;
        Ok(updated == 1)
    }

    pub fn get_job(&self, job_id: &str) -> RepoResult<Option<Job>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                "SELECT snapshot_json FROM jobs WHERE job_id = ?1",
                params![job_id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    pub fn non_terminal_jobs(&self) -> RepoResult<Vec<Job>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT snapshot_json FROM jobs WHERE state NOT IN ('COMPLETED', 'FAILED') ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], job_from_row)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }
}

// History

impl Database {
    pub fn insert_history(&self, record: &VideoHistoryRecord) -> RepoResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO video_history (job_id, user_id, transcript, output_artifact, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.job_id,
                record.user_id,
                record.transcript,
                record.output_artifact,
                format_ts(&record.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn history_for_user(&self, user_id: &str, limit: usize) -> RepoResult<Vec<VideoHistoryRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT job_id, user_id, transcript, output_artifact, created_at
             FROM video_history WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            let created_at_str: String = row.get(4)?;
            Ok(VideoHistoryRecord {
                job_id: row.get(0)?,
                user_id: row.get(1)?,
                transcript: row.get(2)?,
                output_artifact: row.get(3)?,
                created_at: parse_ts(4, &created_at_str)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}
