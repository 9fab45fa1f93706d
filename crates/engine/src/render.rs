use crate::timeline::{AssemblyPlan, EntryKind, NormalizationTarget};
use std::path::{Path, PathBuf};

/// One ffmpeg invocation producing a normalized segment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentCommand {
    pub position: usize,
    pub ffmpeg_args: Vec<String>,
    pub output_path: PathBuf,
}

pub struct RenderCommand {
    pub segment_commands: Vec<SegmentCommand>,
    pub concat_list: String,
    pub concat_list_path: PathBuf, // Path to concat demuxer list file
    pub ffmpeg_args: Vec<String>,
    pub output_path: PathBuf,
}

pub fn millis_to_secs(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

fn scale_filter(target: &NormalizationTarget) -> String {
    let w = target.resolution.width;
    let h = target.resolution.height;
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={},format=yuv420p",
        target.frame_rate
    )
}

/// Re-encode `input` to the target format, trimmed to `duration_ms`, without audio.
pub fn normalize_clip_args(
    input: &Path,
    output: &Path,
    target: &NormalizationTarget,
    duration_ms: u64,
) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-t".to_string(),
        millis_to_secs(duration_ms),
        "-vf".to_string(),
        scale_filter(target),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "fast".to_string(),
        "-crf".to_string(),
        "23".to_string(),
        "-an".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Black hold frame of `duration_ms` in the target format.
pub fn placeholder_args(output: &Path, target: &NormalizationTarget, duration_ms: u64) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "lavfi".to_string(),
        "-i".to_string(),
        format!(
            "color=c=black:s={}:r={}:d={}",
            target.resolution,
            target.frame_rate,
            millis_to_secs(duration_ms)
        ),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "fast".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-an".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Concat demuxer list; single quotes in paths are escaped the way ffmpeg expects.
pub fn concat_list(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', "'\\''")))
        .collect()
}

pub fn concat_args(list_path: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list_path.to_string_lossy().to_string(),
        "-c".to_string(),
        "copy".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Generate FFmpeg commands for a plan: one normalization per entry, then a stream-copy concat.
/// Hard cuts only, entries in plan order.
pub fn generate_render_commands(plan: &AssemblyPlan, work_dir: &Path, output_path: PathBuf) -> RenderCommand {
    let segment_commands: Vec<SegmentCommand> = plan
        .entries
        .iter()
        .map(|entry| {
            let segment_path = work_dir.join(format!("seg-{:04}.mp4", entry.position));
            let ffmpeg_args = match &entry.kind {
                EntryKind::Clip { source_path } => normalize_clip_args(
                    Path::new(source_path),
                    &segment_path,
                    &plan.target,
                    entry.duration_ms,
                ),
                EntryKind::Placeholder => {
                    placeholder_args(&segment_path, &plan.target, entry.duration_ms)
                }
            };
            SegmentCommand {
                position: entry.position,
                ffmpeg_args,
                output_path: segment_path,
            }
        })
        .collect();

    let segment_paths: Vec<PathBuf> = segment_commands.iter().map(|c| c.output_path.clone()).collect();
    let concat_list_path = work_dir.join("concat.txt");

    RenderCommand {
        concat_list: concat_list(&segment_paths),
        ffmpeg_args: concat_args(&concat_list_path, &output_path),
        concat_list_path,
        segment_commands,
        output_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_assembly_plan;
    use crate::gloss::GlossToken;
    use crate::segment::ResolvedSegment;
    use crate::clip::{ClipOrigin, ClipRecord};
    use crate::timeline::{FrameRate, Resolution, SubstitutionPolicy};
    use chrono::Utc;

    #[test]
    fn millis_formatting_is_exact() {
        assert_eq!(millis_to_secs(0), "0.000");
        assert_eq!(millis_to_secs(1234), "1.234");
        assert_eq!(millis_to_secs(60005), "60.005");
    }

    #[test]
    fn concat_list_escapes_quotes() {
        let list = concat_list(&[PathBuf::from("/tmp/a.mp4"), PathBuf::from("/tmp/it's.mp4")]);
        assert_eq!(list, "file '/tmp/a.mp4'\nfile '/tmp/it'\\''s.mp4'\n");
    }

    #[test]
    fn commands_follow_plan_order() {
        let what = ClipRecord {
            token: GlossToken::new("WHAT").unwrap(),
            source_path: "/clips/what.mp4".to_string(),
            source_uri: None,
            duration_ms: 900,
            resolution: Resolution::new(640, 480),
            frame_rate: FrameRate::new(25, 1),
            origin: ClipOrigin::Local,
            checksum: "x".to_string(),
            fetched_at: None,
            last_accessed_at: None,
            registered_at: Utc::now(),
        };
        let segments = vec![
            ResolvedSegment::missing(0, GlossToken::new("NAME").unwrap(), "nope"),
            ResolvedSegment::cache_hit(1, GlossToken::new("WHAT").unwrap(), what, false),
        ];

        let plan = compile_assembly_plan(
            &segments,
            SubstitutionPolicy::Placeholder { duration_ms: 400 },
            None,
        )
        .unwrap();
        let cmd = generate_render_commands(&plan, Path::new("/work/job1"), PathBuf::from("/out/job1.mp4"));

        assert_eq!(cmd.segment_commands.len(), 2);
        assert_eq!(cmd.segment_commands[0].output_path, PathBuf::from("/work/job1/seg-0000.mp4"));
        assert!(cmd.segment_commands[0].ffmpeg_args.iter().any(|a| a.starts_with("color=c=black:s=640x480:r=25/1:d=0.400")));
        assert!(cmd.segment_commands[1].ffmpeg_args.contains(&"/clips/what.mp4".to_string()));
        assert!(cmd.segment_commands[1].ffmpeg_args.contains(&"0.900".to_string()));
        assert_eq!(
            cmd.concat_list,
            "file '/work/job1/seg-0000.mp4'\nfile '/work/job1/seg-0001.mp4'\n"
        );
        assert_eq!(cmd.ffmpeg_args.last().unwrap(), "/out/job1.mp4");
    }
}
