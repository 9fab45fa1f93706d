use engine::{ClipData, ClipOrigin, GlossToken};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::ClipRepository;
use crate::error::RepoResult;

const CLIP_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    /// Tokens that already had a clip.
    pub skipped: usize,
    /// `(file name, reason)` for files that could not be registered.
    pub failed: Vec<(String, String)>,
}

fn is_clip_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| CLIP_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

impl ClipRepository {
    /// Register every `<gloss>.<ext>` file in `dir` as a LOCAL clip.
    ///
    /// Files are visited in name order so duplicate glosses resolve the same
    /// way on every run.
    pub async fn import_library(&self, dir: &Path) -> RepoResult<ImportSummary> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut files: Vec<PathBuf> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && is_clip_file(&path) {
                files.push(path);
            }
        }
        files.sort();

        let mut summary = ImportSummary::default();
        for path in files {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();

            let token = match GlossToken::new(&stem) {
                Ok(token) => token,
                Err(e) => {
                    summary.failed.push((file_name, e));
                    continue;
                }
            };

            if self.get_exact(&token)?.is_some() {
                summary.skipped += 1;
                continue;
            }

            let info = match self.media.probe(&path).await {
                Ok(info) => info,
                Err(e) => {
                    warn!(file = %file_name, error = %e, "skipping unreadable library clip");
                    summary.failed.push((file_name, e.to_string()));
                    continue;
                }
            };
            if let Err(reason) = info.validate() {
                warn!(file = %file_name, reason = %reason, "skipping invalid library clip");
                summary.failed.push((file_name, reason));
                continue;
            }

            let data = ClipData {
                asset_path: path.to_string_lossy().to_string(),
                source_uri: None,
                duration_ms: info.duration_ms,
                resolution: info.resolution,
                frame_rate: info.frame_rate,
                origin: ClipOrigin::Local,
            };
            if self.register_checked(&token, data).await?.1 {
                summary.imported += 1;
            } else {
                summary.skipped += 1;
            }
        }

        info!(
            dir = %dir.display(),
            imported = summary.imported,
            skipped = summary.skipped,
            failed = summary.failed.len(),
            "clip library import finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::TestEnv;
    use engine::{ClipOrigin, GlossToken};

    #[tokio::test]
    async fn imports_library_directory() {
        let env = TestEnv::new();
        env.write_library_clip("hello.mp4", 900);
        env.write_library_clip("Thank You.mov", 1400);
        env.write_library_clip("HELLO.webm", 700);
        env.write_library_file("notes.txt", b"not a clip");
        env.write_library_file("broken.mp4", b"garbage");

        let summary = env.repository.import_library(&env.library_dir()).await.unwrap();
        assert_eq!(summary.imported, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "broken.mp4");

        // HELLO.webm sorts before hello.mp4 and wins.
        let hello = env.repository.get_exact(&GlossToken::new("hello").unwrap()).unwrap().unwrap();
        assert_eq!(hello.duration_ms, 700);
        assert_eq!(hello.origin, ClipOrigin::Local);
        assert!(env.repository.get_exact(&GlossToken::new("THANK-YOU").unwrap()).unwrap().is_some());

        let again = env.repository.import_library(&env.library_dir()).await.unwrap();
        assert_eq!(again.imported, 0);
        assert_eq!(again.skipped, 3);
    }
}
