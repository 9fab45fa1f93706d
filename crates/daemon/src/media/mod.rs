pub mod ffmpeg;

use async_trait::async_trait;
use engine::{FrameRate, Resolution};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};

use crate::error::MediaResult;

pub use ffmpeg::FFmpegWrapper;

#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub duration_ms: u64,
    pub resolution: Resolution,
    pub frame_rate: FrameRate,
    pub has_video: bool,
    pub has_audio: bool,
}

impl MediaInfo {
    /// A playable clip: a video stream with real dimensions and a positive duration.
    pub fn validate(&self) -> Result<(), String> {
        if !self.has_video {
            return Err("no video stream".to_string());
        }
        if !self.resolution.is_valid() {
            return Err(format!("invalid dimensions {}", self.resolution));
        }
        if self.duration_ms == 0 {
            return Err("zero-length video".to_string());
        }
        Ok(())
    }
}

/// Probing and transcoding. Production runs ffprobe/ffmpeg; tests swap in a fake.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo>;

    /// Run ffmpeg with `args`, killing it after `timeout`.
    async fn run_ffmpeg(&self, args: &[String], timeout: Duration) -> MediaResult<()>;
}

pub async fn compute_file_checksum(file_path: &Path) -> MediaResult<String> {
    let file = File::open(file_path).await?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checksum_is_sha256_hex() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        tokio::fs::write(&path, b"abc").await.unwrap();
        assert_eq!(
            compute_file_checksum(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn validation_rejects_unplayable_media() {
        let good = MediaInfo {
            duration_ms: 800,
            resolution: Resolution::new(640, 480),
            frame_rate: FrameRate::new(25, 1),
            has_video: true,
            has_audio: false,
        };
        assert!(good.validate().is_ok());
        assert!(MediaInfo { duration_ms: 0, ..good.clone() }.validate().is_err());
        assert!(MediaInfo { has_video: false, ..good.clone() }.validate().is_err());
        assert!(MediaInfo { resolution: Resolution::new(0, 0), ..good }.validate().is_err());
    }
}
