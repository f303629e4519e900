//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Locations of the external engine binaries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolPaths {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from(if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" })
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from(if cfg!(windows) { "ffprobe.exe" } else { "ffprobe" })
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

/// File-level parallelism
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConcurrencyConfig {
    /// Files analysed at the same time (0 = auto-derive)
    #[serde(default)]
    pub max_concurrent_files: u32,
}

/// `blackdetect` parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BlackFrameSettings {
    /// Minimum black duration in seconds (default 2.0)
    pub black_duration: Option<f64>,
    /// Ratio of black pixels for a picture to count as black (default 0.98)
    pub black_ratio: Option<f64>,
    /// Luminance threshold for a pixel to count as black (default 0.1)
    pub black_threshold: Option<f64>,
}

/// `freezedetect` parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FreezeFrameSettings {
    /// Noise tolerance (default 0.001)
    pub freeze_noise: Option<f64>,
    /// Minimum freeze duration, engine time syntax (default "2s")
    pub freeze_duration: Option<String>,
}

/// `cropdetect` parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BorderSettings {
    pub threshold: Option<f64>,
    /// Dimension divisor (default 8)
    pub round: Option<u32>,
    /// Frames between crop area resets (default 0)
    pub reset: Option<u32>,
}

/// Field order detection parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InterlaceSettings {
    /// Number of frames fed to `idet` (default 200)
    pub analyze_frames: Option<u32>,
}

/// `silencedetect` parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SilenceSettings {
    /// Noise floor (default "-60dB")
    pub noise: Option<String>,
    /// Minimum silence duration (default "2")
    pub duration: Option<String>,
}

/// Target field order for interlaced output
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InterlaceTarget {
    Tff,
    Bff,
}

impl InterlaceTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterlaceTarget::Tff => "tff",
            InterlaceTarget::Bff => "bff",
        }
    }
}

/// `loudnorm` targets; unset values fall back to the filter defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoudnessTarget {
    pub integrated: Option<f64>,
    pub true_peak: Option<f64>,
    pub lra: Option<f64>,
    pub dual_mono: Option<bool>,
}

/// Scaling, rate conversion and (de)interlacing overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FormatOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    /// Audio sample rate passed to `-ar` (e.g. "48k")
    pub audio_rate: Option<String>,
    pub interlaced: Option<InterlaceTarget>,
    /// Container passed to `-f`
    pub format: Option<String>,
    pub colorspace: Option<String>,
}

/// Encoder stage. An empty table selects the default encoder; leaving the
/// table out of a profile copies the stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EncoderSpec {
    pub encoder: Option<String>,
    pub encoder_options: Option<Vec<String>>,
}

/// One render target for every analysed file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EncodeProfile {
    /// Appended to the source file stem
    pub postfix: String,
    /// Output extension, source extension when unset
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub loudness: Option<LoudnessTarget>,
    #[serde(default)]
    pub format: Option<FormatOverrides>,
    #[serde(default)]
    pub video_encoder: Option<EncoderSpec>,
    #[serde(default)]
    pub audio_encoder: Option<EncoderSpec>,
}

/// Analysis features and render targets.
///
/// A detection feature is enabled by the presence of its table, even an
/// empty one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Preset {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub black_frames: Option<BlackFrameSettings>,
    #[serde(default)]
    pub freeze_frames: Option<FreezeFrameSettings>,
    #[serde(default)]
    pub borders: Option<BorderSettings>,
    #[serde(default)]
    pub interlaced: Option<InterlaceSettings>,
    #[serde(default)]
    pub silence: Option<SilenceSettings>,
    /// Measure source loudness for single-pass normalization
    #[serde(default)]
    pub loudness: bool,
    #[serde(default)]
    pub encoders: Vec<EncodeProfile>,
}

impl Preset {
    /// Whether any of the anomaly detectors is enabled
    pub fn detects_anomalies(&self) -> bool {
        self.black_frames.is_some()
            || self.freeze_frames.is_some()
            || self.borders.is_some()
            || self.silence.is_some()
    }
}

impl Default for Preset {
    /// Freeze detection stays off: it needs a recent engine build.
    fn default() -> Self {
        Self {
            name: String::new(),
            black_frames: Some(BlackFrameSettings::default()),
            freeze_frames: None,
            borders: Some(BorderSettings::default()),
            interlaced: Some(InterlaceSettings::default()),
            silence: Some(SilenceSettings::default()),
            loudness: true,
            encoders: vec![
                EncodeProfile {
                    postfix: "_YOUTUBE".to_string(),
                    loudness: Some(LoudnessTarget {
                        integrated: Some(-14.0),
                        ..Default::default()
                    }),
                    video_encoder: Some(EncoderSpec::default()),
                    audio_encoder: Some(EncoderSpec::default()),
                    ..Default::default()
                },
                EncodeProfile {
                    postfix: "_TV".to_string(),
                    loudness: Some(LoudnessTarget {
                        integrated: Some(-23.0),
                        ..Default::default()
                    }),
                    format: Some(FormatOverrides {
                        width: Some(1024),
                        ..Default::default()
                    }),
                    video_encoder: Some(EncoderSpec::default()),
                    audio_encoder: Some(EncoderSpec::default()),
                    ..Default::default()
                },
            ],
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: ToolPaths,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub preset: Preset,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// - CONFORMER_FFMPEG -> paths.ffmpeg
    /// - CONFORMER_FFPROBE -> paths.ffprobe
    /// - CONFORMER_MAX_CONCURRENT_FILES -> concurrency.max_concurrent_files
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("CONFORMER_FFMPEG") {
            if !val.trim().is_empty() {
                self.paths.ffmpeg = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("CONFORMER_FFPROBE") {
            if !val.trim().is_empty() {
                self.paths.ffprobe = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("CONFORMER_MAX_CONCURRENT_FILES") {
            if let Ok(files) = val.parse::<u32>() {
                self.concurrency.max_concurrent_files = files;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        env::remove_var("CONFORMER_FFMPEG");
        env::remove_var("CONFORMER_FFPROBE");
        env::remove_var("CONFORMER_MAX_CONCURRENT_FILES");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            max_files in 0u32..64,
            width in proptest::option::of(16u32..4096),
            frame_rate in proptest::option::of(1u32..120),
            integrated in -40i32..0,
            loudness in proptest::bool::ANY,
        ) {
            let toml_str = format!(
                r#"
[paths]
ffmpeg = "/opt/ff/ffmpeg"
ffprobe = "/opt/ff/ffprobe"

[concurrency]
max_concurrent_files = {}

[preset]
name = "broadcast"
loudness = {}

[preset.black_frames]

[[preset.encoders]]
postfix = "_OUT"

[preset.encoders.loudness]
integrated = {}

[preset.encoders.format]
{}
{}

[preset.encoders.video_encoder]
"#,
                max_files,
                loudness,
                integrated,
                width.map(|w| format!("width = {}", w)).unwrap_or_default(),
                frame_rate.map(|r| format!("frame_rate = {}.0", r)).unwrap_or_default(),
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.paths.ffmpeg, PathBuf::from("/opt/ff/ffmpeg"));
            prop_assert_eq!(config.paths.ffprobe, PathBuf::from("/opt/ff/ffprobe"));
            prop_assert_eq!(config.concurrency.max_concurrent_files, max_files);
            prop_assert_eq!(config.preset.loudness, loudness);
            prop_assert!(config.preset.black_frames.is_some());
            prop_assert!(config.preset.silence.is_none());

            let profile = &config.preset.encoders[0];
            prop_assert_eq!(&profile.postfix, "_OUT");
            prop_assert_eq!(
                profile.loudness.as_ref().and_then(|l| l.integrated),
                Some(integrated as f64)
            );
            let format = profile.format.as_ref().expect("format table present");
            prop_assert_eq!(format.width, width);
            prop_assert_eq!(format.frame_rate, frame_rate.map(|r| r as f64));
            prop_assert_eq!(profile.video_encoder.clone(), Some(EncoderSpec::default()));
            prop_assert!(profile.audio_encoder.is_none());
        }

        #[test]
        fn prop_env_overrides_max_concurrent_files(
            initial in 0u32..8,
            override_files in 0u32..64,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[concurrency]
max_concurrent_files = {}
"#,
                initial
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("CONFORMER_MAX_CONCURRENT_FILES", override_files.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.concurrency.max_concurrent_files, override_files);
        }

        #[test]
        fn prop_env_overrides_tool_paths(
            ffmpeg in "/[a-z]{1,12}/ffmpeg",
            ffprobe in "/[a-z]{1,12}/ffprobe",
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = Config::parse_toml("").expect("Valid TOML");

            env::set_var("CONFORMER_FFMPEG", &ffmpeg);
            env::set_var("CONFORMER_FFPROBE", &ffprobe);
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.paths.ffmpeg, PathBuf::from(ffmpeg));
            prop_assert_eq!(config.paths.ffprobe, PathBuf::from(ffprobe));
        }
    }

    #[test]
    fn test_invalid_env_value_is_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::parse_toml("[concurrency]\nmax_concurrent_files = 3\n")
            .expect("Valid TOML");
        env::set_var("CONFORMER_MAX_CONCURRENT_FILES", "many");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.concurrency.max_concurrent_files, 3);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.paths, ToolPaths::default());
        assert_eq!(config.concurrency.max_concurrent_files, 0);
        assert!(config.preset.black_frames.is_some());
        assert!(config.preset.borders.is_some());
        assert!(config.preset.silence.is_some());
        assert!(config.preset.interlaced.is_some());
        assert!(config.preset.freeze_frames.is_none());
        assert!(config.preset.loudness);
        assert_eq!(config.preset.encoders.len(), 2);
        assert_eq!(config.preset.encoders[0].postfix, "_YOUTUBE");
        assert_eq!(config.preset.encoders[1].postfix, "_TV");
        assert_eq!(
            config.preset.encoders[1].format.as_ref().and_then(|f| f.width),
            Some(1024)
        );
    }

    #[test]
    fn test_explicit_preset_starts_with_features_off() {
        let toml_str = r#"
[preset]
name = "silence only"

[preset.silence]
noise = "-50dB"
"#;
        let config = Config::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(config.preset.name, "silence only");
        assert!(!config.preset.loudness);
        assert!(config.preset.black_frames.is_none());
        assert!(config.preset.encoders.is_empty());
        assert_eq!(
            config.preset.silence.as_ref().and_then(|s| s.noise.as_deref()),
            Some("-50dB")
        );
        assert!(config.preset.detects_anomalies());
    }

    #[test]
    fn test_interlace_target_parses_lowercase() {
        let toml_str = r#"
[preset]
[[preset.encoders]]
postfix = "_I"
[preset.encoders.format]
interlaced = "bff"
"#;
        let config = Config::parse_toml(toml_str).expect("Valid TOML");
        let format = config.preset.encoders[0].format.as_ref().unwrap();
        assert_eq!(format.interlaced, Some(InterlaceTarget::Bff));
        assert_eq!(InterlaceTarget::Bff.as_str(), "bff");
    }

    #[test]
    fn test_load_or_default_without_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let config = Config::load_or_default("/nonexistent/conformer.toml")
            .expect("missing file falls back to defaults");
        assert_eq!(config, Config::default());
    }
}
