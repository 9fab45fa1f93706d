//! yt-dlp backed search and download, plus a plain HTTP downloader for direct links.

use async_trait::async_trait;
use engine::ranking::SearchCandidate;
use futures::StreamExt;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{ClipDownloader, VideoSearch};
use crate::error::FetchError;

/// Hosts that need yt-dlp rather than a plain GET.
const YTDLP_HOSTS: &[&str] = &["youtube.com", "youtu.be", "vimeo.com", "dailymotion.com"];

const DOWNLOAD_FORMAT: &str = "best[height<=720][ext=mp4]/best[ext=mp4]/best";

#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
}

/// Parse `--dump-json --flat-playlist` output: one JSON object per line.
pub fn parse_search_output(stdout: &str) -> Vec<SearchCandidate> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<FlatEntry>(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "skipping unparsable yt-dlp line");
                None
            }
        })
        .filter_map(|entry| {
            let id = entry.id?;
            let url = entry
                .webpage_url
                .or(entry.url)
                .filter(|u| u.starts_with("http"))
                .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", id));
            Some(SearchCandidate {
                title: entry.title.unwrap_or_default(),
                url,
                duration_secs: entry.duration,
                uploader: entry.uploader.or(entry.channel),
                id,
            })
        })
        .collect()
}

fn last_stderr_line(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("unknown error")
        .to_string()
}

pub struct YtDlpSearch;

#[async_trait]
impl VideoSearch for YtDlpSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchCandidate>, FetchError> {
        let output = Command::new("yt-dlp")
            .args(["--dump-json", "--flat-playlist", "--no-warnings", "--skip-download"])
            .arg(format!("ytsearch{}:{}", limit.max(1), query))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FetchError::DownloadFailed(format!("failed to run yt-dlp: {}", e)))?;

        if !output.status.success() {
            return Err(FetchError::DownloadFailed(format!(
                "yt-dlp search failed: {}",
                last_stderr_line(&output.stderr)
            )));
        }

        let candidates = parse_search_output(&String::from_utf8_lossy(&output.stdout));
        debug!(query, found = candidates.len(), "yt-dlp search finished");
        Ok(candidates)
    }
}

pub fn needs_ytdlp(url: &str) -> bool {
    YTDLP_HOSTS.iter().any(|host| url.contains(host))
}

/// Downloads via yt-dlp for video sites and a streaming GET for direct links.
pub struct MediaDownloader {
    client: reqwest::Client,
}

impl MediaDownloader {
    pub fn new(client: reqwest::Client) -> Self {
        MediaDownloader { client }
    }

    async fn download_ytdlp(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        let template = dest_dir.join("source.%(ext)s");
        let output = Command::new("yt-dlp")
            .args(["--no-playlist", "--no-warnings", "--quiet", "-f", DOWNLOAD_FORMAT, "-o"])
            .arg(&template)
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FetchError::DownloadFailed(format!("failed to run yt-dlp: {}", e)))?;

        if !output.status.success() {
            return Err(FetchError::DownloadFailed(format!(
                "yt-dlp failed: {}",
                last_stderr_line(&output.stderr)
            )));
        }

        let mut entries = tokio::fs::read_dir(dest_dir)
            .await
            .map_err(|e| FetchError::DownloadFailed(e.to_string()))?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_source = path
                .file_stem()
                .is_some_and(|s| s == "source");
            let partial = path.extension().is_some_and(|e| e == "part");
            if is_source && !partial {
                return Ok(path);
            }
        }
        Err(FetchError::DownloadFailed("yt-dlp produced no output file".to_string()))
    }

    async fn download_http(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::DownloadFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::DownloadFailed(format!("GET {} returned {}", url, status)));
        }

        let extension = url
            .rsplit('/')
            .next()
            .and_then(|name| name.split(['?', '#']).next())
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_lowercase())
            .filter(|ext| ["mp4", "mov", "webm", "mkv", "m4v"].contains(&ext.as_str()))
            .unwrap_or_else(|| "mp4".to_string());
        let dest = dest_dir.join(format!("source.{}", extension));

        let mut file = tokio::fs::File::create(&dest)
            .await
            .map_err(|e| FetchError::DownloadFailed(e.to_string()))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::DownloadFailed(e.to_string()))?;
            written += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::DownloadFailed(e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| FetchError::DownloadFailed(e.to_string()))?;

        if written == 0 {
            return Err(FetchError::ValidationFailed(format!("{} returned an empty body", url)));
        }
        Ok(dest)
    }
}

#[async_trait]
impl ClipDownloader for MediaDownloader {
    async fn download(&self, candidate: &SearchCandidate, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        let url = candidate.url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(FetchError::NotFound(format!("unsupported source {}", url)));
        }
        if needs_ytdlp(url) {
            self.download_ytdlp(url, dest_dir).await
        } else {
            self.download_http(url, dest_dir).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::serve;
    use axum::{http::StatusCode, routing::get, Router};

    fn candidate(url: &str) -> SearchCandidate {
        SearchCandidate {
            id: "c1".to_string(),
            title: "HELLO".to_string(),
            url: url.to_string(),
            duration_secs: Some(2.0),
            uploader: None,
        }
    }

    #[test]
    fn parses_flat_search_lines() {
        let stdout = concat!(
            r#"{"id": "abc", "title": "HELLO in ASL", "url": "https://www.youtube.com/watch?v=abc", "duration": 3.0, "channel": "ASL Hub"}"#,
            "\n",
            "not json\n",
            r#"{"id": "def", "title": "Hello sign", "url": "def", "duration": null}"#,
            "\n",
            r#"{"title": "no id"}"#,
            "\n"
        );
        let candidates = parse_search_output(stdout);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].uploader.as_deref(), Some("ASL Hub"));
        assert_eq!(candidates[1].url, "https://www.youtube.com/watch?v=def");
        assert_eq!(candidates[1].duration_secs, None);
    }

    #[test]
    fn routes_video_sites_to_ytdlp() {
        assert!(needs_ytdlp("https://www.youtube.com/watch?v=abc"));
        assert!(needs_ytdlp("https://youtu.be/abc"));
        assert!(!needs_ytdlp("https://cdn.example.org/signs/hello.mp4"));
    }

    #[tokio::test]
    async fn synthetic_urls_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = MediaDownloader::new(reqwest::Client::new());
        let err = downloader
            .download(&candidate("synthetic://HELLO"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
    }

    #[tokio::test]
    async fn streams_direct_links_to_disk() {
        let base = serve(
            Router::new()
                .route("/signs/hello.webm", get(|| async { vec![7u8; 4096] }))
                .route("/signs/empty.mp4", get(|| async { Vec::<u8>::new() }))
                .route("/signs/gone.mp4", get(|| async { StatusCode::NOT_FOUND })),
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let downloader = MediaDownloader::new(reqwest::Client::new());

        let path = downloader
            .download(&candidate(&format!("{}/signs/hello.webm", base)), dir.path())
            .await
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "source.webm");
        assert_eq!(std::fs::read(&path).unwrap().len(), 4096);

        let err = downloader
            .download(&candidate(&format!("{}/signs/gone.mp4", base)), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::DownloadFailed(_)));

        let err = downloader
            .download(&candidate(&format!("{}/signs/empty.mp4", base)), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ValidationFailed(_)));
    }
}
