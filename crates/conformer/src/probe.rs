//! Probe module for reading stream and container metadata.
//!
//! Runs ffprobe with JSON output and maps the payload onto a
//! [`MediaDescription`]. Fields missing from the payload stay `None`; the
//! consumers apply their own defaults.

use crate::media::{CodecDescriptor, FormatDescriptor, MediaDescription, StreamDescriptor, StreamKind};
use crate::process::{run_captured, ProcessError};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The payload parsed but lists no streams.
    #[error("not media: probe output contains no streams")]
    NotMedia,

    /// Failed to parse ffprobe JSON output.
    #[error("failed to parse ffprobe output: {0}")]
    Parse(String),

    /// ffprobe could not be run or exited with an error.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Raw ffprobe JSON structures for parsing.
///
/// ffprobe prints most numbers as strings, so numeric fields accept both.
mod ffprobe_json {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;
    use std::str::FromStr;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub codec_long_name: Option<String>,
        pub codec_time_base: Option<String>,
        pub codec_tag_string: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        pub is_avc: Option<String>,

        #[serde(default, deserialize_with = "lenient_number")]
        pub width: Option<u32>,
        #[serde(default, deserialize_with = "lenient_number")]
        pub height: Option<u32>,
        pub sample_aspect_ratio: Option<String>,
        pub display_aspect_ratio: Option<String>,
        pub pix_fmt: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        pub bits_per_raw_sample: Option<String>,

        pub sample_fmt: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        pub sample_rate: Option<String>,
        #[serde(default, deserialize_with = "lenient_number")]
        pub channels: Option<u32>,
        pub channel_layout: Option<String>,
        #[serde(default, deserialize_with = "lenient_number")]
        pub bits_per_sample: Option<u32>,

        pub time_base: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        pub start_time: Option<String>,
        #[serde(default, deserialize_with = "lenient_number")]
        pub duration_ts: Option<u64>,
        #[serde(default, deserialize_with = "lenient_string")]
        pub duration: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        pub bit_rate: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        pub max_bit_rate: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        pub nb_frames: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub format_name: Option<String>,
        pub format_long_name: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        pub start_time: Option<String>,
        #[serde(default, deserialize_with = "lenient_number")]
        pub duration: Option<f64>,
        #[serde(default, deserialize_with = "lenient_number")]
        pub bit_rate: Option<u64>,
        #[serde(default, deserialize_with = "lenient_number")]
        pub max_bit_rate: Option<u64>,
    }

    fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Value>::deserialize(deserializer)? {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        })
    }

    // Non-numeric strings such as "N/A" become None.
    fn lenient_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr,
    {
        Ok(match Option::<Value>::deserialize(deserializer)? {
            Some(Value::String(s)) => s.trim().parse().ok(),
            Some(Value::Number(n)) => n.to_string().parse().ok(),
            _ => None,
        })
    }
}

/// Arguments for a JSON probe of `input`.
pub fn probe_args(input: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "quiet".to_string(),
        "-print_format".to_string(),
        "json".to_string(),
        "-show_streams".to_string(),
        "-show_format".to_string(),
        input.to_string_lossy().into_owned(),
    ]
}

/// Probes a media file and returns its description.
///
/// Field order and loudness are left unset; later analysis phases fill them.
pub async fn probe_file(ffprobe: &Path, input: &Path) -> Result<MediaDescription, ProbeError> {
    let output = run_captured(ffprobe, &probe_args(input)).await?;
    debug!(input = %input.display(), stderr = %output.stderr.trim(), "ffprobe finished");

    let media = parse_probe_output(&input.to_string_lossy(), &output.stdout)?;
    info!(
        input = %input.display(),
        streams = media.streams.len(),
        duration = ?media.format.duration,
        "probed media"
    );
    Ok(media)
}

/// Parses ffprobe JSON output into a MediaDescription named `name`.
pub fn parse_probe_output(name: &str, json_str: &str) -> Result<MediaDescription, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let streams = ffprobe.streams.unwrap_or_default();
    if streams.is_empty() {
        return Err(ProbeError::NotMedia);
    }

    let streams = streams.into_iter().map(map_stream).collect();
    let format = ffprobe.format.map(map_format).unwrap_or_default();

    Ok(MediaDescription {
        name: name.to_string(),
        streams,
        format,
        field_order: None,
        loudness: None,
    })
}

fn map_stream(s: ffprobe_json::Stream) -> StreamDescriptor {
    let kind = s.codec_type.as_deref().map(|t| match t {
        "audio" => StreamKind::Audio,
        "video" => StreamKind::Video,
        _ => StreamKind::Other,
    });

    StreamDescriptor {
        codec: CodecDescriptor {
            kind,
            name: s.codec_name,
            long_name: s.codec_long_name,
            time_base: s.codec_time_base,
            tag_string: s.codec_tag_string,
            is_avc: s.is_avc,
        },
        width: s.width,
        height: s.height,
        sample_aspect_ratio: s.sample_aspect_ratio,
        display_aspect_ratio: s.display_aspect_ratio,
        pix_fmt: s.pix_fmt,
        bits_per_raw_sample: s.bits_per_raw_sample,
        sample_fmt: s.sample_fmt,
        sample_rate: s.sample_rate,
        channels: s.channels,
        channel_layout: s.channel_layout,
        bits_per_sample: s.bits_per_sample,
        time_base: s.time_base,
        start_time: s.start_time,
        duration_ts: s.duration_ts,
        duration: s.duration,
        bit_rate: s.bit_rate,
        max_bit_rate: s.max_bit_rate,
        nb_frames: s.nb_frames,
    }
}

fn map_format(f: ffprobe_json::Format) -> FormatDescriptor {
    FormatDescriptor {
        name: f.format_name,
        long_name: f.format_long_name,
        start_time: f.start_time,
        duration: f.duration,
        bit_rate: f.bit_rate,
        max_bit_rate: f.max_bit_rate,
    }
}
