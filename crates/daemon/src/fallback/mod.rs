//! Online Fallback Resolver.
//!
//! A repository miss is turned into a search against an external video
//! source, a deterministic pick among the candidates, a download, a
//! transcode into the canonical clip format and a registration as FETCHED.

pub mod breaker;
pub mod ytdlp;

use async_trait::async_trait;
use engine::ranking::{rank_candidates, RankingRules, SearchCandidate};
use engine::render::normalize_clip_args;
use engine::{ClipData, ClipOrigin, ClipRecord, GlossToken};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clips::ClipRepository;
use crate::config::FallbackConfig;
use crate::error::FetchError;
use crate::media::MediaBackend;
use breaker::CircuitBreaker;

#[async_trait]
pub trait VideoSearch: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchCandidate>, FetchError>;
}

#[async_trait]
pub trait ClipDownloader: Send + Sync {
    /// Download `candidate` into `dest_dir`, returning the file written.
    async fn download(&self, candidate: &SearchCandidate, dest_dir: &Path) -> Result<PathBuf, FetchError>;
}

/// Search phrase for attempt `attempt` (0-based).
pub fn query_for_attempt(attempt: usize, query: &str) -> String {
    match attempt {
        0 => format!("ASL sign language {}", query),
        _ => format!("American Sign Language {}", query),
    }
}

const MAX_ATTEMPTS: usize = 2;

pub struct FallbackResolver {
    repository: Arc<ClipRepository>,
    search: Arc<dyn VideoSearch>,
    downloader: Arc<dyn ClipDownloader>,
    media: Arc<dyn MediaBackend>,
    config: FallbackConfig,
    scratch_dir: PathBuf,
    in_flight: Mutex<HashMap<GlossToken, Arc<tokio::sync::Mutex<()>>>>,
    breaker: CircuitBreaker,
}

impl FallbackResolver {
    pub fn new(
        repository: Arc<ClipRepository>,
        search: Arc<dyn VideoSearch>,
        downloader: Arc<dyn ClipDownloader>,
        media: Arc<dyn MediaBackend>,
        config: FallbackConfig,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        let breaker = CircuitBreaker::new(config.max_consecutive_failures, config.breaker_cooldown);
        FallbackResolver {
            repository,
            search,
            downloader,
            media,
            config,
            scratch_dir: scratch_dir.into(),
            in_flight: Mutex::new(HashMap::new()),
            breaker,
        }
    }

    fn gate(&self, token: &GlossToken) -> Result<Arc<tokio::sync::Mutex<()>>, FetchError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| FetchError::DownloadFailed("fetch registry lock poisoned".to_string()))?;
        Ok(in_flight.entry(token.clone()).or_default().clone())
    }

    fn release(&self, token: &GlossToken, gate: Arc<tokio::sync::Mutex<()>>) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            // One reference held by the map, one by us: nobody else is waiting.
            if Arc::strong_count(&gate) == 2 {
                in_flight.remove(token);
            }
        }
    }

    /// Fetch a clip for `token` online and register it.
    ///
    /// Concurrent calls for one token are serialized; a caller that waited
    /// gets the clip the first caller registered instead of fetching again.
    pub async fn fetch(&self, token: &GlossToken) -> Result<ClipRecord, FetchError> {
        if !self.config.enabled {
            return Err(FetchError::NotFound(format!(
                "{}: online fetching is disabled",
                token
            )));
        }

        let gate = self.gate(token)?;
        let result = {
            let _guard = gate.lock().await;
            self.fetch_serialized(token).await
        };
        self.release(token, gate);
        result
    }

    async fn fetch_serialized(&self, token: &GlossToken) -> Result<ClipRecord, FetchError> {
        match self.repository.get_exact(token) {
            Ok(Some(existing)) => {
                debug!(token = %token, "clip registered by a concurrent fetch");
                return Ok(existing);
            }
            Ok(None) => {}
            Err(e) => return Err(FetchError::DownloadFailed(format!("repository error: {}", e))),
        }

        if !self.breaker.allow() {
            return Err(FetchError::DownloadFailed(format!(
                "online fetching disabled after {} consecutive failures",
                self.breaker.consecutive_failures()
            )));
        }

        let query = token.search_query();
        if query.is_empty() {
            return Err(FetchError::NotFound(format!("{}: nothing to search for", token)));
        }

        let mut last_err = FetchError::NotFound(token.to_string());
        for attempt in 0..MAX_ATTEMPTS {
            match self.fetch_once(token, &query, attempt).await {
                Ok(record) => {
                    self.breaker.record_success();
                    return Ok(record);
                }
                Err(e) => {
                    if matches!(e, FetchError::DownloadFailed(_)) && self.breaker.record_failure() {
                        warn!(
                            failures = self.breaker.consecutive_failures(),
                            "online fetching disabled after repeated failures"
                        );
                    }
                    let retry = e.is_retryable() && attempt + 1 < MAX_ATTEMPTS && self.breaker.allow();
                    warn!(token = %token, attempt = attempt + 1, error = %e, retry, "fetch attempt failed");
                    last_err = e;
                    if !retry {
                        break;
                    }
                }
            }
        }
        Err(last_err)
    }

    async fn fetch_once(&self, token: &GlossToken, query: &str, attempt: usize) -> Result<ClipRecord, FetchError> {
        let phrase = query_for_attempt(attempt, query);
        let mut candidates = self.search_phrase(&phrase).await?;
        if attempt == 0 {
            for channel in &self.config.trusted_channels {
                let channel_phrase = format!("{} {}", query, channel);
                match self.search_phrase(&channel_phrase).await {
                    Ok(found) => candidates.extend(found),
                    Err(e) => debug!(token = %token, channel = %channel, error = %e, "channel search failed"),
                }
            }
        }

        let rules = RankingRules {
            min_similarity: self.config.min_similarity,
            max_duration_secs: self.config.max_candidate_duration_secs,
        };
        let total = candidates.len();
        let ranked = rank_candidates(query, candidates, &rules);
        let Some(best) = ranked.into_iter().next() else {
            return Err(FetchError::NotFound(format!(
                "no usable candidate for '{}' ({} searched)",
                phrase, total
            )));
        };
        debug!(
            token = %token,
            candidate = %best.candidate.id,
            similarity = best.similarity,
            trusted = best.trusted,
            "picked online candidate"
        );

        let work_dir = self.scratch_dir.join(format!("fetch-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| FetchError::DownloadFailed(format!("scratch dir: {}", e)))?;

        let result = self.download_and_register(token, &best.candidate, &work_dir).await;
        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            debug!(dir = %work_dir.display(), error = %e, "failed to clean fetch scratch dir");
        }
        result
    }

    async fn search_phrase(&self, phrase: &str) -> Result<Vec<SearchCandidate>, FetchError> {
        tokio::time::timeout(
            self.config.search_timeout,
            self.search.search(phrase, self.config.search_limit),
        )
        .await
        .map_err(|_| {
            FetchError::DownloadFailed(format!(
                "search timed out after {}s",
                self.config.search_timeout.as_secs()
            ))
        })?
    }

    async fn download_and_register(
        &self,
        token: &GlossToken,
        candidate: &SearchCandidate,
        work_dir: &Path,
    ) -> Result<ClipRecord, FetchError> {
        let downloaded = tokio::time::timeout(
            self.config.download_timeout,
            self.downloader.download(candidate, work_dir),
        )
        .await
        .map_err(|_| {
            FetchError::DownloadFailed(format!(
                "download timed out after {}s",
                self.config.download_timeout.as_secs()
            ))
        })??;

        let normalized = work_dir.join(format!("{}-normalized.mp4", token.file_stem()));
        let args = normalize_clip_args(
            &downloaded,
            &normalized,
            &self.config.clip_target,
            self.config.max_clip_duration_ms,
        );
        self.media
            .run_ffmpeg(&args, self.config.transcode_timeout)
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::DownloadFailed(e.to_string())
                } else {
                    FetchError::ValidationFailed(format!("transcode failed: {}", e))
                }
            })?;

        let info = self
            .media
            .probe(&normalized)
            .await
            .map_err(|e| FetchError::ValidationFailed(e.to_string()))?;
        info.validate().map_err(FetchError::ValidationFailed)?;

        let data = ClipData {
            asset_path: normalized.to_string_lossy().to_string(),
            source_uri: Some(candidate.url.clone()),
            duration_ms: info.duration_ms,
            resolution: info.resolution,
            frame_rate: info.frame_rate,
            origin: ClipOrigin::Fetched,
        };
        let record = self
            .repository
            .register(token, data)
            .await
            .map_err(|e| FetchError::DownloadFailed(format!("storing clip: {}", e)))?;

        info!(
            token = %token,
            source = %candidate.url,
            duration_ms = record.duration_ms,
            "fetched clip online"
        );
        Ok(record)
    }
}
