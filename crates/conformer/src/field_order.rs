//! Field order detection with the engine's `idet` filter.

use crate::media::FieldOrder;
use crate::process::run_captured;
use crate::scanner::capture_u64;
use media_conformer_config::InterlaceSettings;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

const DEFAULT_ANALYZE_FRAMES: u32 = 200;

#[cfg(windows)]
const NULL_DEVICE: &str = "NUL";
#[cfg(not(windows))]
const NULL_DEVICE: &str = "/dev/null";

fn multi_frame_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"Multi frame detection:\s*TFF:\s*(?P<tff>\d+)\s+BFF:\s*(?P<bff>\d+)\s+Progressive:\s*(?P<progressive>\d+)",
        )
        .expect("idet pattern is valid")
    })
}

pub fn idet_args(input: &Path, settings: &InterlaceSettings) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-filter:v".to_string(),
        "idet".to_string(),
        "-frames:v".to_string(),
        settings
            .analyze_frames
            .unwrap_or(DEFAULT_ANALYZE_FRAMES)
            .to_string(),
        "-an".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-y".to_string(),
        NULL_DEVICE.to_string(),
    ]
}

/// Reads the multi-frame summary from `idet` output.
///
/// Returns `None` when the summary line is missing.
pub fn parse_idet_output(stderr: &str) -> Option<FieldOrder> {
    // the last summary wins if the filter printed more than one
    let caps = multi_frame_regex().captures_iter(stderr).last()?;
    let tff = capture_u64(&caps, "tff")?;
    let bff = capture_u64(&caps, "bff")?;
    debug!(tff, bff, "idet multi frame counts");
    Some(FieldOrder::from_counts(tff, bff))
}

/// Determines the field order of `input`.
///
/// Never fails: a failed run or unreadable output yields
/// [`FieldOrder::Unknown`] plus a warning for the analysis result.
pub async fn detect_field_order(
    ffmpeg: &Path,
    input: &Path,
    settings: &InterlaceSettings,
) -> (FieldOrder, Option<String>) {
    let args = idet_args(input, settings);
    match run_captured(ffmpeg, &args).await {
        Ok(output) => match parse_idet_output(&output.stderr) {
            Some(order) => (order, None),
            None => {
                warn!(input = %input.display(), "idet summary missing from output");
                (
                    FieldOrder::Unknown,
                    Some("field order detection produced no summary".to_string()),
                )
            }
        },
        Err(e) => {
            warn!(input = %input.display(), error = %e, "field order detection failed");
            (
                FieldOrder::Unknown,
                Some(format!("field order detection failed: {}", e)),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDET_OUTPUT: &str = "\
Output #0, rawvideo, to '/dev/null':
frame=  200 fps=0.0 q=-0.0 Lsize=  607500kB time=00:00:08.00 bitrate=622080.0kbits/s speed=14.9x
[Parsed_idet_0 @ 0x7f9c] Repeated Fields: Neither:   201 Top:     0 Bottom:     0
[Parsed_idet_0 @ 0x7f9c] Single frame detection: TFF:   120 BFF:     3 Progressive:    40 Undetermined:    38
[Parsed_idet_0 @ 0x7f9c] Multi frame detection: TFF:   187 BFF:     0 Progressive:     5 Undetermined:     9
";

    #[test]
    fn test_parse_tff_summary() {
        assert_eq!(parse_idet_output(IDET_OUTPUT), Some(FieldOrder::TopFieldFirst));
    }

    #[test]
    fn test_parse_progressive_summary() {
        let out = "[Parsed_idet_0 @ 0x1] Multi frame detection: TFF:     2 BFF:     1 Progressive:   190 Undetermined:     8\n";
        assert_eq!(parse_idet_output(out), Some(FieldOrder::Progressive));
    }

    #[test]
    fn test_parse_bff_summary() {
        let out = "Multi frame detection: TFF:     0 BFF:   150 Progressive:    10 Undetermined:    40";
        assert_eq!(parse_idet_output(out), Some(FieldOrder::BottomFieldFirst));
    }

    #[test]
    fn test_single_frame_line_alone_is_not_enough() {
        let out = "Single frame detection: TFF:   120 BFF:     3 Progressive:    40 Undetermined:    38\n";
        assert_eq!(parse_idet_output(out), None);
    }

    #[test]
    fn test_idet_args_order() {
        let args = idet_args(Path::new("clip.mxf"), &InterlaceSettings::default());
        assert_eq!(&args[..5], &["-hide_banner", "-i", "clip.mxf", "-filter:v", "idet"]);
        assert_eq!(&args[5..7], &["-frames:v", "200"]);
        assert_eq!(&args[7..11], &["-an", "-f", "rawvideo", "-y"]);
        assert_eq!(args.last().map(String::as_str), Some(NULL_DEVICE));

        let custom = idet_args(
            Path::new("clip.mxf"),
            &InterlaceSettings {
                analyze_frames: Some(50),
            },
        );
        assert_eq!(custom[6], "50");
    }

    #[tokio::test]
    async fn test_failed_run_is_unknown_with_warning() {
        let (order, warning) = detect_field_order(
            Path::new("/nonexistent/ffmpeg"),
            Path::new("clip.mxf"),
            &InterlaceSettings::default(),
        )
        .await;
        assert_eq!(order, FieldOrder::Unknown);
        assert!(warning.unwrap().contains("field order detection failed"));
    }
}
