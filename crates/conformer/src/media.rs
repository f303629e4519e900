//! Media description and analysis data model.
//!
//! These types are produced by the analysis phases and consumed by the
//! render argument builder. All of them serialize to JSON for the CLI.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of an elementary stream as reported by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Audio,
    Video,
    #[serde(other)]
    Other,
}

/// Codec-level information of a stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodecDescriptor {
    pub kind: Option<StreamKind>,
    pub name: Option<String>,
    pub long_name: Option<String>,
    pub time_base: Option<String>,
    pub tag_string: Option<String>,
    pub is_avc: Option<String>,
}

/// One stream of a probed file.
///
/// Video and audio fields are both carried for every stream; the ones that
/// do not apply to the stream kind are simply `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub codec: CodecDescriptor,

    // video
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_aspect_ratio: Option<String>,
    pub display_aspect_ratio: Option<String>,
    pub pix_fmt: Option<String>,
    pub bits_per_raw_sample: Option<String>,

    // audio
    pub sample_fmt: Option<String>,
    pub sample_rate: Option<String>,
    pub channels: Option<u32>,
    pub channel_layout: Option<String>,
    pub bits_per_sample: Option<u32>,

    // common
    pub time_base: Option<String>,
    pub start_time: Option<String>,
    pub duration_ts: Option<u64>,
    pub duration: Option<String>,
    pub bit_rate: Option<String>,
    pub max_bit_rate: Option<String>,
    pub nb_frames: Option<String>,
}

/// Container-level information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub name: Option<String>,
    pub long_name: Option<String>,
    pub start_time: Option<String>,
    /// Total duration in seconds.
    pub duration: Option<f64>,
    pub bit_rate: Option<u64>,
    pub max_bit_rate: Option<u64>,
}

/// Interlacing polarity of the video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldOrder {
    Unknown,
    Progressive,
    #[serde(rename = "tff")]
    TopFieldFirst,
    #[serde(rename = "bff")]
    BottomFieldFirst,
}

/// Frames classified as interlaced below this count are treated as noise.
const INTERLACED_FRAME_NOISE: u64 = 10;

impl FieldOrder {
    /// Derive the field order from idet's multi-frame counts.
    pub fn from_counts(tff: u64, bff: u64) -> Self {
        if tff <= INTERLACED_FRAME_NOISE && bff <= INTERLACED_FRAME_NOISE {
            FieldOrder::Progressive
        } else if tff > bff {
            FieldOrder::TopFieldFirst
        } else {
            FieldOrder::BottomFieldFirst
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldOrder::Unknown => "unknown",
            FieldOrder::Progressive => "progressive",
            FieldOrder::TopFieldFirst => "tff",
            FieldOrder::BottomFieldFirst => "bff",
        }
    }
}

impl std::fmt::Display for FieldOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the loudness measurement pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoudnessMeasurement {
    pub integrated: f64,
    pub range: f64,
    pub true_peak: f64,
    pub threshold: f64,
}

/// Everything known about a source file after analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescription {
    pub name: String,
    pub streams: Vec<StreamDescriptor>,
    pub format: FormatDescriptor,
    pub field_order: Option<FieldOrder>,
    pub loudness: Option<LoudnessMeasurement>,
}

impl MediaDescription {
    /// Container duration in seconds, 0 when unknown.
    pub fn duration_secs(&self) -> f64 {
        self.format.duration.unwrap_or(0.0)
    }

    /// First video stream, if any.
    pub fn video_stream(&self) -> Option<&StreamDescriptor> {
        self.streams
            .iter()
            .find(|s| s.codec.kind == Some(StreamKind::Video))
    }
}

/// A detected span in seconds. Open intervals carry zero `duration`/`end`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyInterval {
    pub start: f64,
    pub duration: f64,
    pub end: f64,
}

impl AnomalyInterval {
    /// An interval whose closing event has not been seen yet.
    pub fn open(start: f64) -> Self {
        Self {
            start,
            duration: 0.0,
            end: 0.0,
        }
    }

    pub fn closed(start: f64, end: f64) -> Self {
        Self {
            start,
            duration: end - start,
            end,
        }
    }

    pub fn close_at(&mut self, end: f64) {
        self.end = end;
        self.duration = end - self.start;
    }
}

/// Anomalies found in one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Anomalies {
    pub black_frames: Vec<AnomalyInterval>,
    pub freeze_frames: Vec<AnomalyInterval>,
    pub silences: Vec<AnomalyInterval>,
    pub borders: Vec<AnomalyInterval>,
}

impl Anomalies {
    pub fn is_empty(&self) -> bool {
        self.black_frames.is_empty()
            && self.freeze_frames.is_empty()
            && self.silences.is_empty()
            && self.borders.is_empty()
    }
}

/// Result of analysing one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub path: PathBuf,
    pub media: MediaDescription,
    pub anomalies: Anomalies,
    pub warnings: Vec<String>,
}

/// An output that could not be produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderFailure {
    pub output: PathBuf,
    pub reason: String,
}

/// Result of rendering one source to every configured profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderResult {
    pub path: PathBuf,
    pub outputs: Vec<PathBuf>,
    pub failures: Vec<RenderFailure>,
}
