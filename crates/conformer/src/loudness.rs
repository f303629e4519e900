//! Loudness measurement with the engine's `loudnorm` filter.
//!
//! The filter prints its measurement as a twelve-line JSON object at the
//! very end of stderr.

use crate::media::LoudnessMeasurement;
use crate::process::{run_captured, ProcessError};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Lines of the measurement block, braces included.
const JSON_BLOCK_LINES: usize = 12;

#[derive(Debug, Error)]
pub enum LoudnessError {
    #[error("no loudness measurement found in engine output")]
    MissingMeasurement,

    #[error("failed to parse loudness measurement: {0}")]
    Parse(String),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

#[derive(Debug, Deserialize)]
struct LoudnormOutput {
    input_i: String,
    input_lra: String,
    input_tp: String,
    input_thresh: String,
}

pub fn loudness_args(input: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-filter:a".to_string(),
        "loudnorm=print_format=json".to_string(),
        "-vn".to_string(),
        "-f".to_string(),
        "null".to_string(),
        "-threads".to_string(),
        "1".to_string(),
        "-".to_string(),
    ]
}

fn parse_value(field: &str, raw: &str) -> Result<f64, LoudnessError> {
    // "-inf" and "inf" parse as infinities
    raw.trim()
        .parse::<f64>()
        .map_err(|_| LoudnessError::Parse(format!("{} is not a number: {:?}", field, raw)))
}

fn from_json(json: &str) -> Result<LoudnessMeasurement, LoudnessError> {
    let raw: LoudnormOutput =
        serde_json::from_str(json).map_err(|e| LoudnessError::Parse(e.to_string()))?;
    Ok(LoudnessMeasurement {
        integrated: parse_value("input_i", &raw.input_i)?,
        range: parse_value("input_lra", &raw.input_lra)?,
        true_peak: parse_value("input_tp", &raw.input_tp)?,
        threshold: parse_value("input_thresh", &raw.input_thresh)?,
    })
}

/// The fixed-size block right above the last `\n`-separated segment.
///
/// Output ending in a newline has an empty last segment, so the block is
/// the final twelve lines.
fn tail_block(stderr: &str) -> Option<String> {
    let segments: Vec<&str> = stderr.split('\n').collect();
    if segments.len() <= JSON_BLOCK_LINES {
        return None;
    }
    let last = segments.len() - 1;
    Some(segments[last - JSON_BLOCK_LINES..last].join("\n"))
}

/// The last `{ ... }` block anywhere in the output.
fn last_brace_block(stderr: &str) -> Option<&str> {
    let end = stderr.rfind('}')?;
    let start = stderr[..end].rfind('{')?;
    Some(&stderr[start..=end])
}

/// Extracts the measurement from the stderr of a `loudnorm` run.
pub fn parse_loudness_output(stderr: &str) -> Result<LoudnessMeasurement, LoudnessError> {
    if let Some(block) = tail_block(stderr) {
        if let Ok(measurement) = from_json(&block) {
            return Ok(measurement);
        }
    }

    match last_brace_block(stderr) {
        Some(block) => from_json(block),
        None => Err(LoudnessError::MissingMeasurement),
    }
}

/// Measures the integrated loudness of `input`.
pub async fn measure_loudness(
    ffmpeg: &Path,
    input: &Path,
) -> Result<LoudnessMeasurement, LoudnessError> {
    let output = run_captured(ffmpeg, &loudness_args(input)).await?;
    let measurement = parse_loudness_output(&output.stderr)?;
    info!(
        input = %input.display(),
        integrated = measurement.integrated,
        true_peak = measurement.true_peak,
        "loudness measured"
    );
    Ok(measurement)
}
