use async_trait::async_trait;
use engine::{FrameRate, Resolution};
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::{MediaBackend, MediaInfo};
use crate::error::{MediaError, MediaResult};

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
struct ProbeOutput {
    format: Option<FormatInfo>,
    #[serde(default)]
    streams: Vec<StreamInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct FormatInfo {
    duration: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamInfo {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

fn parse_secs_ms(value: Option<&str>) -> Option<u64> {
    value
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(|d| (d * 1000.0).round() as u64)
}

fn media_info_from_probe(probe: ProbeOutput) -> MediaInfo {
    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    // Container duration first; some muxers only report it per stream.
    let duration_ms = parse_secs_ms(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .or_else(|| parse_secs_ms(video_stream.and_then(|s| s.duration.as_deref())))
        .unwrap_or(0);

    let (resolution, frame_rate) = match video_stream {
        Some(vs) => {
            let fps = vs
                .r_frame_rate
                .as_deref()
                .and_then(FrameRate::parse)
                .or_else(|| vs.avg_frame_rate.as_deref().and_then(FrameRate::parse))
                .unwrap_or(FrameRate::new(30, 1));
            (
                Resolution::new(vs.width.unwrap_or(0), vs.height.unwrap_or(0)),
                fps,
            )
        }
        None => (Resolution::new(0, 0), FrameRate::new(30, 1)),
    };

    MediaInfo {
        duration_ms,
        resolution,
        frame_rate,
        has_video: video_stream.is_some(),
        has_audio: probe
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio")),
    }
}

fn stderr_tail(stderr: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return None;
    }
    let start = lines.len().saturating_sub(5);
    Some(lines[start..].join("\n"))
}

pub struct FFmpegWrapper;

impl FFmpegWrapper {
    pub async fn probe(media_path: &Path) -> MediaResult<MediaInfo> {
        if !media_path.exists() {
            return Err(MediaError::FileNotFound(media_path.to_path_buf()));
        }

        let mut command = Command::new("ffprobe");
        command
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration:stream=codec_type,width,height,r_frame_rate,avg_frame_rate,duration",
                "-of",
                "json",
            ])
            .arg(media_path)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(PROBE_TIMEOUT, command.output())
            .await
            .map_err(|_| MediaError::Timeout {
                tool: "ffprobe",
                secs: PROBE_TIMEOUT.as_secs(),
            })??;

        if !output.status.success() {
            return Err(MediaError::FfprobeFailed {
                message: format!("ffprobe exited with {} for {}", output.status, media_path.display()),
                stderr: stderr_tail(&output.stderr),
            });
        }

        let probe_output: ProbeOutput = serde_json::from_slice(&output.stdout)?;
        Ok(media_info_from_probe(probe_output))
    }

    pub async fn run(args: &[String], timeout: Duration) -> MediaResult<()> {
        let mut command = Command::new("ffmpeg");
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| MediaError::Timeout {
                tool: "ffmpeg",
                secs: timeout.as_secs(),
            })??;

        if !output.status.success() {
            let target = args.last().map(String::as_str).unwrap_or("<none>");
            return Err(MediaError::ffmpeg_failed(
                format!("ffmpeg exited with {} writing {}", output.status, target),
                stderr_tail(&output.stderr),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl MediaBackend for FFmpegWrapper {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        FFmpegWrapper::probe(path).await
    }

    async fn run_ffmpeg(&self, args: &[String], timeout: Duration) -> MediaResult<()> {
        FFmpegWrapper::run(args, timeout).await
    }
}
