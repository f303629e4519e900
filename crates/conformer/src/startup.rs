//! Startup checks
//!
//! Verifies that the engine binaries can be run and that the engine is new
//! enough for the enabled analysis features.

use crate::config::Config;
use crate::process::run_captured;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// First engine release shipping the `freezedetect` filter.
pub const FREEZEDETECT_MIN_VERSION: (u32, u32) = (4, 2);

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{tool} not available: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("FFmpeg version requirement not met: {0}")]
    FfmpegVersion(String),
}

/// Parse the engine's `-version` banner into (major, minor)
///
/// Handles various version formats:
/// - Standard: "ffmpeg version 4.4.2-0ubuntu0.22.04.1 ..."
/// - N-prefixed: "ffmpeg version n6.1-... ..."
/// - Major only: "ffmpeg version 7 ..."
///
/// Snapshot builds ("ffmpeg version N-109421-g...") have no release number
/// and yield `None`.
pub fn parse_ffmpeg_version(version_output: &str) -> Option<(u32, u32)> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');
    let mut parts = version_str.split(|c: char| c == '.' || c == '-');

    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()
        .and_then(|m| m.parse().ok())
        .unwrap_or(0);
    Some((major, minor))
}

/// Check that `tool -version` runs and return its banner
pub async fn check_tool_available(tool: &Path) -> Result<String, StartupError> {
    let output = run_captured(tool, &["-version".to_string()])
        .await
        .map_err(|e| StartupError::ToolUnavailable {
            tool: tool.display().to_string(),
            reason: format!("`{} -version` failed; is it installed and in PATH? {}", tool.display(), e),
        })?;
    Ok(output.stdout)
}

/// Check the engine version against what the preset needs
///
/// Unparseable versions are accepted with a warning.
pub fn check_ffmpeg_version(cfg: &Config, version_output: &str) -> Result<(), StartupError> {
    let Some((major, minor)) = parse_ffmpeg_version(version_output) else {
        warn!(
            banner = version_output.lines().next().unwrap_or("(empty)"),
            "could not parse FFmpeg version, assuming a recent build"
        );
        return Ok(());
    };
    info!(major, minor, "FFmpeg version detected");

    if cfg.preset.freeze_frames.is_some() && (major, minor) < FREEZEDETECT_MIN_VERSION {
        return Err(StartupError::FfmpegVersion(format!(
            "freeze frame detection needs FFmpeg {}.{} or newer, got: {}.{}",
            FREEZEDETECT_MIN_VERSION.0, FREEZEDETECT_MIN_VERSION.1, major, minor
        )));
    }

    Ok(())
}

/// Run all startup checks in order
///
/// 1. ffprobe availability
/// 2. ffmpeg availability
/// 3. ffmpeg version
pub async fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    check_tool_available(&cfg.paths.ffprobe).await?;
    let banner = check_tool_available(&cfg.paths.ffmpeg).await?;
    check_ffmpeg_version(cfg, &banner)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FreezeFrameSettings;
    use proptest::prelude::*;
    use std::path::PathBuf;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_version_parsing(
            major in 1u32..20,
            minor in 0u32..10,
            patch in 0u32..10,
            use_n_prefix in any::<bool>(),
        ) {
            let prefix = if use_n_prefix { "n" } else { "" };
            let output = format!(
                "ffmpeg version {}{}.{}.{} Copyright (c) 2000-2023 the FFmpeg developers\nbuilt with gcc 12",
                prefix, major, minor, patch
            );
            prop_assert_eq!(parse_ffmpeg_version(&output), Some((major, minor)));
        }
    }

    #[test]
    fn test_parse_distribution_version() {
        let output = "ffmpeg version 4.4.2-0ubuntu0.22.04.1 Copyright (c) 2000-2021";
        assert_eq!(parse_ffmpeg_version(output), Some((4, 4)));
    }

    #[test]
    fn test_parse_major_only() {
        assert_eq!(parse_ffmpeg_version("ffmpeg version 7 Copyright"), Some((7, 0)));
    }

    #[test]
    fn test_parse_snapshot_is_none() {
        let output = "ffmpeg version N-109421-g9adf02247c Copyright (c) 2000-2022";
        assert_eq!(parse_ffmpeg_version(output), None);
        assert_eq!(parse_ffmpeg_version(""), None);
    }

    #[test]
    fn test_old_engine_rejected_only_with_freeze_detection() {
        let banner = "ffmpeg version 4.1.6 Copyright (c) 2000-2020";

        let cfg = Config::default();
        assert!(cfg.preset.freeze_frames.is_none());
        assert!(check_ffmpeg_version(&cfg, banner).is_ok());

        let mut with_freeze = Config::default();
        with_freeze.preset.freeze_frames = Some(FreezeFrameSettings::default());
        assert!(matches!(
            check_ffmpeg_version(&with_freeze, banner),
            Err(StartupError::FfmpegVersion(_))
        ));
        assert!(check_ffmpeg_version(&with_freeze, "ffmpeg version 4.2 Copyright").is_ok());
    }

    #[test]
    fn test_snapshot_build_accepted() {
        let mut cfg = Config::default();
        cfg.preset.freeze_frames = Some(FreezeFrameSettings::default());
        assert!(check_ffmpeg_version(&cfg, "ffmpeg version N-109421-g9adf02247c").is_ok());
    }

    #[tokio::test]
    async fn test_missing_tool_is_unavailable() {
        let mut cfg = Config::default();
        cfg.paths.ffprobe = PathBuf::from("/nonexistent/ffprobe");
        match run_startup_checks(&cfg).await {
            Err(StartupError::ToolUnavailable { tool, .. }) => {
                assert_eq!(tool, "/nonexistent/ffprobe")
            }
            other => panic!("expected unavailable tool, got {:?}", other),
        }
    }
}
