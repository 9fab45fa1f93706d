//! Daemon configuration, read from `STITCH_*` environment variables.

use engine::{FrameRate, NormalizationTarget, Resolution, SubstitutionPolicy};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    /// Canonical clip assets, one per gloss token.
    pub clips_dir: PathBuf,
    /// Scratch space: downloads and per-job normalized segments.
    pub work_dir: PathBuf,
    /// Final artifacts, `<output_dir>/<job_id>.mp4`.
    pub output_dir: PathBuf,
    /// Pre-rendered library imported at startup.
    pub library_dir: Option<PathBuf>,
    /// Minimum Levenshtein similarity for a fuzzy repository hit.
    pub fuzzy_threshold: f64,
}

impl StorageConfig {
    pub fn under(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            db_path: data_dir.join("stitch.db"),
            clips_dir: data_dir.join("clips"),
            work_dir: data_dir.join("work"),
            output_dir: data_dir.join("output"),
            library_dir: None,
            fuzzy_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub enabled: bool,
    /// Candidates requested per search.
    pub search_limit: usize,
    pub min_similarity: f64,
    pub max_candidate_duration_secs: f64,
    /// Fetched clips are trimmed to this length.
    pub max_clip_duration_ms: u64,
    pub search_timeout: Duration,
    pub download_timeout: Duration,
    pub transcode_timeout: Duration,
    /// Consecutive failures before online fetching is switched off.
    pub max_consecutive_failures: usize,
    /// How long online fetching stays off before one probe attempt is let through.
    pub breaker_cooldown: Duration,
    pub clip_target: NormalizationTarget,
    /// Sign dictionary channels searched alongside the first query.
    pub trusted_channels: Vec<String>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_limit: 5,
            min_similarity: 0.6,
            max_candidate_duration_secs: 600.0,
            max_clip_duration_ms: 10_000,
            search_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(120),
            transcode_timeout: Duration::from_secs(120),
            max_consecutive_failures: 5,
            breaker_cooldown: Duration::from_secs(300),
            clip_target: NormalizationTarget::default(),
            trusted_channels: vec!["lifeprint".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub max_parallel: usize,
    /// Use fuzzy repository hits as-is instead of fetching an exact clip.
    pub accept_approximate: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            accept_approximate: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssemblyConfig {
    pub policy: SubstitutionPolicy,
    /// When unset, the first included clip defines the target.
    pub canonical_target: Option<NormalizationTarget>,
    pub ffmpeg_timeout: Duration,
    pub keep_work_dir: bool,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            policy: SubstitutionPolicy::Skip,
            canonical_target: None,
            ffmpeg_timeout: Duration::from_secs(300),
            keep_work_dir: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Speech-to-text and text-to-gloss service.
    pub ml_service_url: String,
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            ml_service_url: "http://127.0.0.1:8001".to_string(),
            request_timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub bind_addr: SocketAddr,
    pub storage: StorageConfig,
    pub fallback: FallbackConfig,
    pub resolver: ResolverConfig,
    pub assembly: AssemblyConfig,
    pub services: ServiceConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7777)),
            storage: StorageConfig::under(".cache/stitch"),
            fallback: FallbackConfig::default(),
            resolver: ResolverConfig::default(),
            assembly: AssemblyConfig::default(),
            services: ServiceConfig::default(),
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value.trim().parse().map_err(|e: T::Err| ConfigError {
            key: key.to_string(),
            value: value.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    env_parse(key, default.as_secs()).map(Duration::from_secs)
}

/// Comma-separated, blanks dropped; an empty value means none.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// `640x480@25/1`
pub fn parse_target(value: &str) -> Result<NormalizationTarget, String> {
    let (size, rate) = value
        .split_once('@')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT@NUM/DEN, got '{}'", value))?;
    let (w, h) = size
        .split_once('x')
        .ok_or_else(|| format!("bad resolution '{}'", size))?;
    let resolution = Resolution::new(
        w.parse().map_err(|_| format!("bad width '{}'", w))?,
        h.parse().map_err(|_| format!("bad height '{}'", h))?,
    );
    if !resolution.is_valid() {
        return Err(format!("resolution must be non-zero, got '{}'", size));
    }
    let frame_rate = FrameRate::parse(rate).ok_or_else(|| format!("bad frame rate '{}'", rate))?;
    Ok(NormalizationTarget {
        resolution,
        frame_rate,
    })
}

fn env_target(key: &str) -> Result<Option<NormalizationTarget>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => parse_target(&value).map(Some).map_err(|reason| ConfigError {
            key: key.to_string(),
            value,
            reason,
        }),
        Err(_) => Ok(None),
    }
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = DaemonConfig::default();

        let data_dir: PathBuf = env_parse("STITCH_DATA_DIR", PathBuf::from(".cache/stitch"))?;
        let mut storage = StorageConfig::under(data_dir);
        storage.library_dir = std::env::var("STITCH_LIBRARY_DIR").ok().map(PathBuf::from);
        storage.fuzzy_threshold = env_parse("STITCH_FUZZY_THRESHOLD", storage.fuzzy_threshold)?;

        let fb = defaults.fallback;
        let fallback = FallbackConfig {
            enabled: env_parse("STITCH_FALLBACK_ENABLED", fb.enabled)?,
            search_limit: env_parse("STITCH_SEARCH_LIMIT", fb.search_limit)?,
            min_similarity: env_parse("STITCH_MIN_SIMILARITY", fb.min_similarity)?,
            max_candidate_duration_secs: env_parse(
                "STITCH_MAX_CANDIDATE_SECS",
                fb.max_candidate_duration_secs,
            )?,
            max_clip_duration_ms: env_parse("STITCH_MAX_CLIP_MS", fb.max_clip_duration_ms)?,
            search_timeout: env_secs("STITCH_SEARCH_TIMEOUT_SECS", fb.search_timeout)?,
            download_timeout: env_secs("STITCH_DOWNLOAD_TIMEOUT_SECS", fb.download_timeout)?,
            transcode_timeout: env_secs("STITCH_TRANSCODE_TIMEOUT_SECS", fb.transcode_timeout)?,
            max_consecutive_failures: env_parse(
                "STITCH_MAX_FETCH_FAILURES",
                fb.max_consecutive_failures,
            )?,
            breaker_cooldown: env_secs("STITCH_FETCH_COOLDOWN_SECS", fb.breaker_cooldown)?,
            clip_target: env_target("STITCH_CLIP_TARGET")?.unwrap_or(fb.clip_target),
            trusted_channels: match std::env::var("STITCH_TRUSTED_CHANNELS") {
                Ok(value) => parse_list(&value),
                Err(_) => fb.trusted_channels,
            },
        };

        let resolver = ResolverConfig {
            max_parallel: env_parse("STITCH_RESOLVE_PARALLEL", defaults.resolver.max_parallel)?.max(1),
            accept_approximate: env_parse(
                "STITCH_ACCEPT_APPROXIMATE",
                defaults.resolver.accept_approximate,
            )?,
        };

        let assembly = AssemblyConfig {
            policy: env_parse("STITCH_SUBSTITUTION", defaults.assembly.policy)?,
            canonical_target: env_target("STITCH_CANONICAL_TARGET")?,
            ffmpeg_timeout: env_secs("STITCH_FFMPEG_TIMEOUT_SECS", defaults.assembly.ffmpeg_timeout)?,
            keep_work_dir: env_parse("STITCH_KEEP_WORK_DIR", defaults.assembly.keep_work_dir)?,
        };

        let services = ServiceConfig {
            ml_service_url: std::env::var("STITCH_ML_SERVICE_URL")
                .unwrap_or(defaults.services.ml_service_url),
            request_timeout: env_secs("STITCH_SERVICE_TIMEOUT_SECS", defaults.services.request_timeout)?,
        };

        Ok(Self {
            bind_addr: env_parse("STITCH_BIND_ADDR", defaults.bind_addr)?,
            storage,
            fallback,
            resolver,
            assembly,
            services,
        })
    }
}
