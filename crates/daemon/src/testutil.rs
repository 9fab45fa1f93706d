//! In-process fakes and a scratch environment for the daemon's tests.
//!
//! `FakeMedia` stands in for ffmpeg/ffprobe. A "video" is a small text file
//! `FAKEVIDEO <duration_ms> <w>x<h> <num>/<den> <nonce>`, so media facts
//! survive copies and every transcode can be checked by probing its output.

use async_trait::async_trait;
use axum::Router;
use engine::ranking::SearchCandidate;
use engine::{parse_gloss_line, ClipData, ClipOrigin, ClipRecord, FrameRate, GlossToken, InputRef, Job, Resolution};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use crate::assembler::VideoAssembler;
use crate::clips::ClipRepository;
use crate::config::{AssemblyConfig, DaemonConfig, FallbackConfig, ResolverConfig, StorageConfig};
use crate::db::Database;
use crate::error::{FetchError, MediaError, MediaResult, RepoResult, RepositoryError, TranscriptionError, TranslationError};
use crate::fallback::{ClipDownloader, FallbackResolver, VideoSearch};
use crate::jobs::{HistoryStore, JobCoordinator, JobStore, SpeechToText, TextToGloss, VideoHistoryRecord};
use crate::media::{MediaBackend, MediaInfo};
use crate::resolver::GlossResolver;

pub fn fake_video(duration_ms: u64, resolution: Resolution, frame_rate: FrameRate) -> String {
    format!(
        "FAKEVIDEO {} {} {} {}",
        duration_ms,
        resolution,
        frame_rate,
        Uuid::new_v4().simple()
    )
}

fn parse_resolution(value: &str) -> Option<Resolution> {
    let (w, h) = value.split_once('x')?;
    Some(Resolution::new(w.parse().ok()?, h.parse().ok()?))
}

fn parse_fake_video(content: &[u8]) -> Option<MediaInfo> {
    let text = std::str::from_utf8(content).ok()?;
    let mut parts = text.split_whitespace();
    if parts.next()? != "FAKEVIDEO" {
        return None;
    }
    Some(MediaInfo {
        duration_ms: parts.next()?.parse().ok()?,
        resolution: parse_resolution(parts.next()?)?,
        frame_rate: FrameRate::parse(parts.next()?)?,
        has_video: true,
        has_audio: false,
    })
}

fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn secs_to_ms(value: &str) -> Option<u64> {
    let secs: f64 = value.parse().ok()?;
    Some((secs * 1000.0).round() as u64)
}

#[derive(Default)]
struct FakeMediaState {
    fail_when: Option<String>,
    concat_drift_ms: i64,
    concat_inputs: Vec<String>,
}

#[derive(Default)]
pub struct FakeMedia {
    state: Mutex<FakeMediaState>,
}

impl FakeMedia {
    /// Fail every ffmpeg run with an argument containing `needle`.
    pub fn fail_when(&self, needle: &str) {
        self.state.lock().unwrap().fail_when = Some(needle.to_string());
    }

    /// Added to the duration of every concat output.
    pub fn set_concat_drift_ms(&self, drift_ms: i64) {
        self.state.lock().unwrap().concat_drift_ms = drift_ms;
    }

    /// Files listed by the most recent concat run, in order.
    pub fn concat_inputs(&self) -> Vec<String> {
        self.state.lock().unwrap().concat_inputs.clone()
    }

    fn read_input(path: &str) -> MediaResult<MediaInfo> {
        let content = std::fs::read(path).map_err(|e| MediaError::ffmpeg_failed(format!("{}: {}", path, e), None))?;
        parse_fake_video(&content)
            .ok_or_else(|| MediaError::ffmpeg_failed(format!("{}: Invalid data found when processing input", path), None))
    }

    fn concat(&self, list_path: &str) -> MediaResult<MediaInfo> {
        let list = std::fs::read_to_string(list_path)?;
        let inputs: Vec<String> = list
            .lines()
            .filter_map(|line| line.strip_prefix("file '")?.strip_suffix('\''))
            .map(|path| path.replace("'\\''", "'"))
            .collect();

        let mut total = 0u64;
        let mut first: Option<MediaInfo> = None;
        for input in &inputs {
            let info = Self::read_input(input)?;
            total += info.duration_ms;
            first.get_or_insert(info);
        }
        let mut info = first.ok_or_else(|| MediaError::ffmpeg_failed("empty concat list", None))?;

        let mut state = self.state.lock().unwrap();
        state.concat_inputs = inputs;
        info.duration_ms = (total as i64 + state.concat_drift_ms).max(0) as u64;
        Ok(info)
    }

    fn lavfi(source: &str) -> MediaResult<MediaInfo> {
        let mut info = MediaInfo {
            duration_ms: 0,
            resolution: Resolution::new(0, 0),
            frame_rate: FrameRate::new(25, 1),
            has_video: true,
            has_audio: false,
        };
        for option in source.split(':') {
            if let Some(d) = option.strip_prefix("d=") {
                info.duration_ms = secs_to_ms(d).unwrap_or(0);
            } else if let Some(s) = option.strip_prefix("s=") {
                info.resolution = parse_resolution(s).unwrap_or(info.resolution);
            } else if let Some(r) = option.strip_prefix("r=") {
                info.frame_rate = FrameRate::parse(r).unwrap_or(info.frame_rate);
            }
        }
        Ok(info)
    }

    fn transcode(args: &[String], input: &str) -> MediaResult<MediaInfo> {
        let mut info = Self::read_input(input)?;
        if let Some(limit) = arg_after(args, "-t").and_then(secs_to_ms) {
            info.duration_ms = info.duration_ms.min(limit);
        }
        if let Some(filters) = arg_after(args, "-vf") {
            for filter in filters.split(',') {
                if let Some(scale) = filter.strip_prefix("scale=") {
                    let mut dims = scale.split(':');
                    if let (Some(Ok(w)), Some(Ok(h))) = (dims.next().map(str::parse::<u32>), dims.next().map(str::parse::<u32>)) {
                        info.resolution = Resolution::new(w, h);
                    }
                } else if let Some(rate) = filter.strip_prefix("fps=").and_then(FrameRate::parse) {
                    info.frame_rate = rate;
                }
            }
        }
        Ok(info)
    }
}

#[async_trait]
impl MediaBackend for FakeMedia {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        let content = tokio::fs::read(path).await?;
        parse_fake_video(&content).ok_or_else(|| MediaError::InvalidVideo(path.display().to_string()))
    }

    async fn run_ffmpeg(&self, args: &[String], _timeout: Duration) -> MediaResult<()> {
        {
            let state = self.state.lock().unwrap();
            if let Some(needle) = &state.fail_when {
                if args.iter().any(|a| a.contains(needle.as_str())) {
                    return Err(MediaError::ffmpeg_failed("injected failure", Some("boom".to_string())));
                }
            }
        }

        let input = arg_after(args, "-i").ok_or_else(|| MediaError::ffmpeg_failed("no input", None))?;
        let info = match arg_after(args, "-f") {
            Some("concat") => self.concat(input)?,
            Some("lavfi") => Self::lavfi(input)?,
            _ => Self::transcode(args, input)?,
        };

        let output = args.last().ok_or_else(|| MediaError::ffmpeg_failed("no output", None))?;
        std::fs::write(output, fake_video(info.duration_ms, info.resolution, info.frame_rate))?;
        Ok(())
    }
}

pub fn candidate(id: &str, title: &str, duration_secs: f64) -> SearchCandidate {
    SearchCandidate {
        id: id.to_string(),
        title: title.to_string(),
        url: format!("https://www.youtube.com/watch?v={}", id),
        duration_secs: Some(duration_secs),
        uploader: None,
    }
}

#[derive(Default)]
pub struct FakeSearch {
    results: Mutex<HashMap<String, Vec<SearchCandidate>>>,
    queries: Mutex<Vec<String>>,
    fail_all: AtomicBool,
}

impl FakeSearch {
    pub fn set(&self, query: &str, candidates: Vec<SearchCandidate>) {
        self.results.lock().unwrap().insert(query.to_string(), candidates);
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl VideoSearch for FakeSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchCandidate>, FetchError> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(FetchError::DownloadFailed("search backend unavailable".to_string()));
        }
        let results = self.results.lock().unwrap().get(query).cloned().unwrap_or_default();
        Ok(results.into_iter().take(limit).collect())
    }
}

/// Writes a fake video as long as the candidate says it is.
#[derive(Default)]
pub struct FakeDownloader {
    corrupt: Mutex<HashSet<String>>,
    delay: Mutex<Duration>,
    downloads: AtomicUsize,
}

impl FakeDownloader {
    /// Candidates with this id download as unreadable bytes.
    pub fn corrupt(&self, id: &str) {
        self.corrupt.lock().unwrap().insert(id.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClipDownloader for FakeDownloader {
    async fn download(&self, candidate: &SearchCandidate, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let dest = dest_dir.join("source.mp4");
        let content = if self.corrupt.lock().unwrap().contains(&candidate.id) {
            "garbage".to_string()
        } else {
            let duration_ms = (candidate.duration_secs.unwrap_or(1.0) * 1000.0).round() as u64;
            fake_video(duration_ms, Resolution::new(1280, 720), FrameRate::new(30, 1))
        };
        tokio::fs::write(&dest, content)
            .await
            .map_err(|e| FetchError::DownloadFailed(e.to_string()))?;
        Ok(dest)
    }
}

pub struct FakeSpeech {
    text: Mutex<String>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl Default for FakeSpeech {
    fn default() -> Self {
        FakeSpeech {
            text: Mutex::new("hello".to_string()),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FakeSpeech {
    pub fn set_text(&self, text: &str) {
        *self.text.lock().unwrap() = text.to_string();
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechToText for FakeSpeech {
    async fn transcribe(&self, _input: &InputRef) -> Result<String, TranscriptionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.text.lock().unwrap().clone())
    }
}

/// Glosses each word of the text.
#[derive(Default)]
pub struct FakeGlosser {
    calls: AtomicUsize,
}

impl FakeGlosser {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextToGloss for FakeGlosser {
    async fn translate(&self, text: &str) -> Result<Vec<GlossToken>, TranslationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let glosses = parse_gloss_line(text);
        if glosses.is_empty() {
            return Err(TranslationError::new("no glosses produced"));
        }
        Ok(glosses)
    }
}

#[derive(Default)]
pub struct FakeHistory {
    records: Mutex<Vec<VideoHistoryRecord>>,
    failing: AtomicBool,
}

impl FakeHistory {
    pub fn records(&self) -> Vec<VideoHistoryRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl HistoryStore for FakeHistory {
    async fn record(&self, record: &VideoHistoryRecord) -> RepoResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepositoryError::Io(std::io::Error::other("history store unavailable")));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn for_user(&self, user_id: &str, limit: usize) -> RepoResult<Vec<VideoHistoryRecord>> {
        let mut records: Vec<VideoHistoryRecord> = self
            .records()
            .into_iter()
            .filter(|r| r.user_id.as_deref() == Some(user_id))
            .collect();
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }
}

/// Spawn `router` on an ephemeral port and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Poll until the job reaches a terminal state.
pub async fn wait_terminal(coordinator: &JobCoordinator, job_id: &str) -> Job {
    for _ in 0..500 {
        if let Some(job) = coordinator.get_job_status(job_id).unwrap() {
            if job.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish", job_id);
}

pub struct TestEnv {
    pub dir: TempDir,
    pub config: DaemonConfig,
    pub db: Arc<Database>,
    pub media: Arc<FakeMedia>,
    pub repository: Arc<ClipRepository>,
    pub search: Arc<FakeSearch>,
    pub downloader: Arc<FakeDownloader>,
    pub speech: Arc<FakeSpeech>,
    pub glosser: Arc<FakeGlosser>,
    pub history: Arc<FakeHistory>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DaemonConfig {
            storage: StorageConfig::under(dir.path()),
            ..DaemonConfig::default()
        };
        config.fallback.trusted_channels.clear();
        let db = Arc::new(Database::new(&config.storage.db_path).unwrap());
        let media = Arc::new(FakeMedia::default());
        let repository = Arc::new(ClipRepository::new(
            db.clone(),
            media.clone(),
            &config.storage.clips_dir,
            config.storage.fuzzy_threshold,
        ));

        TestEnv {
            dir,
            config,
            db,
            media,
            repository,
            search: Arc::new(FakeSearch::default()),
            downloader: Arc::new(FakeDownloader::default()),
            speech: Arc::new(FakeSpeech::default()),
            glosser: Arc::new(FakeGlosser::default()),
            history: Arc::new(FakeHistory::default()),
        }
    }

    fn write_into(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// A 640x480@25 fake clip outside the repository.
    pub fn write_clip(&self, name: &str, duration_ms: u64) -> PathBuf {
        let content = fake_video(duration_ms, Resolution::new(640, 480), FrameRate::new(25, 1));
        Self::write_into(&self.dir.path().join("assets"), name, content.as_bytes())
    }

    pub fn library_dir(&self) -> PathBuf {
        self.dir.path().join("library")
    }

    pub fn write_library_clip(&self, name: &str, duration_ms: u64) -> PathBuf {
        let content = fake_video(duration_ms, Resolution::new(640, 480), FrameRate::new(25, 1));
        Self::write_into(&self.library_dir(), name, content.as_bytes())
    }

    pub fn write_library_file(&self, name: &str, content: &[u8]) -> PathBuf {
        Self::write_into(&self.library_dir(), name, content)
    }

    /// Register a LOCAL clip for `token`.
    pub async fn seed_clip(&self, token: &str, duration_ms: u64) -> ClipRecord {
        let gloss = GlossToken::new(token).unwrap();
        let asset = self.write_clip(&format!("seed-{}.mp4", gloss.file_stem()), duration_ms);
        let data = ClipData {
            asset_path: asset.to_string_lossy().to_string(),
            source_uri: None,
            duration_ms,
            resolution: Resolution::new(640, 480),
            frame_rate: FrameRate::new(25, 1),
            origin: ClipOrigin::Local,
        };
        self.repository.register(&gloss, data).await.unwrap()
    }

    pub fn fallback(&self) -> Arc<FallbackResolver> {
        self.fallback_with(self.config.fallback.clone())
    }

    pub fn fallback_with(&self, config: FallbackConfig) -> Arc<FallbackResolver> {
        Arc::new(FallbackResolver::new(
            self.repository.clone(),
            self.search.clone(),
            self.downloader.clone(),
            self.media.clone(),
            config,
            &self.config.storage.work_dir,
        ))
    }

    pub fn resolver(&self) -> GlossResolver {
        self.resolver_with(self.config.resolver.clone())
    }

    pub fn resolver_with(&self, config: ResolverConfig) -> GlossResolver {
        GlossResolver::new(self.repository.clone(), self.fallback(), config)
    }

    pub fn assembler(&self) -> VideoAssembler {
        self.assembler_with(self.config.assembly.clone())
    }

    pub fn assembler_with(&self, config: AssemblyConfig) -> VideoAssembler {
        VideoAssembler::new(
            self.media.clone(),
            config,
            &self.config.storage.work_dir,
            &self.config.storage.output_dir,
        )
    }

    pub fn jobs(&self) -> JobStore {
        JobStore::new(self.db.clone())
    }

    pub fn coordinator(&self) -> Arc<JobCoordinator> {
        Arc::new(JobCoordinator::new(
            self.jobs(),
            self.speech.clone(),
            self.glosser.clone(),
            Arc::new(self.resolver()),
            Arc::new(self.assembler()),
            self.history.clone(),
        ))
    }
}
