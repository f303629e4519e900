//! Engine argument construction for one render output.
//!
//! [`build_render_args`] is a pure function of the analysed source and the
//! encode profile, so identical inputs always produce identical argument
//! lists.

use crate::media::{FieldOrder, LoudnessMeasurement, MediaDescription};
use media_conformer_config::{EncodeProfile, FormatOverrides, InterlaceTarget, LoudnessTarget};
use std::path::{Path, PathBuf};

const DEFAULT_VIDEO_ENCODER: &str = "libx264";
const DEFAULT_VIDEO_QUALITY: [&str; 2] = ["-crf", "18"];
const DEFAULT_AUDIO_ENCODER: &str = "aac";
const DEFAULT_FRAME_RATE: f64 = 25.0;
const NORMALIZED_AUDIO_RATE: &str = "48k";

const DEFAULT_INTEGRATED: f64 = -23.0;
const DEFAULT_LRA: f64 = 13.0;
const DEFAULT_TRUE_PEAK: f64 = -1.0;

/// Path of the file produced for `profile` next to `input`.
///
/// The profile's extension replaces the source extension when given.
pub fn output_path(input: &Path, profile: &EncodeProfile) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let extension = match profile.extension.as_deref() {
        Some(ext) if ext.starts_with('.') => ext.to_string(),
        Some(ext) => format!(".{}", ext),
        None => input
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default(),
    };

    let file_name = format!("{}{}{}", stem, profile.postfix, extension);
    match input.parent() {
        Some(dir) => dir.join(file_name),
        None => PathBuf::from(file_name),
    }
}

/// Builds the complete engine invocation for rendering `input` to `output`.
pub fn build_render_args(
    input: &Path,
    output: &Path,
    media: &MediaDescription,
    profile: &EncodeProfile,
) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
    ];

    match &profile.video_encoder {
        Some(spec) => {
            args.push("-codec:v".to_string());
            args.push(
                spec.encoder
                    .clone()
                    .unwrap_or_else(|| DEFAULT_VIDEO_ENCODER.to_string()),
            );
            match &spec.encoder_options {
                Some(options) => args.extend(options.iter().cloned()),
                None => args.extend(DEFAULT_VIDEO_QUALITY.map(String::from)),
            }

            if let Some(format) = &profile.format {
                let filters = video_filters(format, media.field_order);
                if !filters.is_empty() {
                    args.push("-filter:v".to_string());
                    args.push(filters.join(","));
                }
            }
        }
        None => {
            args.push("-codec:v".to_string());
            args.push("copy".to_string());
        }
    }

    match &profile.audio_encoder {
        Some(spec) => {
            args.push("-codec:a".to_string());
            args.push(
                spec.encoder
                    .clone()
                    .unwrap_or_else(|| DEFAULT_AUDIO_ENCODER.to_string()),
            );
            if let Some(options) = &spec.encoder_options {
                args.extend(options.iter().cloned());
            }

            if let Some(target) = &profile.loudness {
                args.push("-filter:a".to_string());
                args.push(loudnorm_filter(target, media.loudness.as_ref()));
            }

            let audio_rate = profile.format.as_ref().and_then(|f| f.audio_rate.clone());
            match audio_rate {
                Some(rate) => {
                    args.push("-ar".to_string());
                    args.push(rate);
                }
                None if profile.loudness.is_some() => {
                    args.push("-ar".to_string());
                    args.push(NORMALIZED_AUDIO_RATE.to_string());
                }
                None => {}
            }
        }
        None => {
            args.push("-codec:a".to_string());
            args.push("copy".to_string());
        }
    }

    if let Some(container) = profile.format.as_ref().and_then(|f| f.format.as_ref()) {
        args.push("-f".to_string());
        args.push(container.clone());
    }

    let interlaced_target = profile.format.as_ref().and_then(|f| f.interlaced);
    if profile.video_encoder.is_some() && interlaced_target.is_some() {
        args.push("-flags".to_string());
        args.push("+ildct+ilme".to_string());
    }

    args.push(output.to_string_lossy().into_owned());
    args
}

/// Video filter stages in application order.
///
/// `source` is `None` when field order detection did not run.
pub fn video_filters(format: &FormatOverrides, source: Option<FieldOrder>) -> Vec<String> {
    let mut filters = Vec::new();
    let rate = format.frame_rate.unwrap_or(DEFAULT_FRAME_RATE);

    if format.width.is_some() || format.height.is_some() {
        filters.push(format!(
            "scale=w={}:h={}",
            dimension(format.width),
            dimension(format.height)
        ));
    }

    if source != Some(FieldOrder::Progressive) && format.interlaced.is_none() {
        filters.push(deinterlace_filter(source, rate));
    }

    if let Some(target) = format.interlaced {
        if source == Some(FieldOrder::Progressive) {
            // weaving needs two progressive frames per output frame
            filters.push(format!("fps={}", rate * 2.0));
            filters.push(format!("tinterlace=mode={}", interleave_mode(target)));
        }
        filters.push(format!("fieldorder={}", target.as_str()));
    } else if let Some(frame_rate) = format.frame_rate {
        filters.push(format!("fps={}", frame_rate));
    }

    if let Some(colorspace) = &format.colorspace {
        filters.push(format!("colorspace={}", colorspace));
    } else if let Some(height) = format.height {
        let colorspace = if height >= 720 { "bt601-6-625" } else { "bt709" };
        filters.push(format!("colorspace={}", colorspace));
    }

    filters
}

fn dimension(value: Option<u32>) -> String {
    value.map_or_else(|| "-1".to_string(), |v| v.to_string())
}

fn deinterlace_filter(source: Option<FieldOrder>, rate: f64) -> String {
    // one frame per field at field rate, one frame per frame otherwise
    let mode = if rate >= 50.0 { 1 } else { 0 };
    let parity = match source {
        Some(FieldOrder::TopFieldFirst) => 0,
        Some(FieldOrder::BottomFieldFirst) => 1,
        _ => -1,
    };
    let deint = match source {
        Some(FieldOrder::TopFieldFirst) | Some(FieldOrder::BottomFieldFirst) => 0,
        _ => -1,
    };
    format!("bwdif=mode={}:parity={}:deint={}", mode, parity, deint)
}

fn interleave_mode(target: InterlaceTarget) -> &'static str {
    match target {
        InterlaceTarget::Tff => "interleave_top",
        InterlaceTarget::Bff => "interleave_bottom",
    }
}

/// Single-pass `loudnorm` stage, seeded with the source measurement when
/// one is available.
pub fn loudnorm_filter(target: &LoudnessTarget, measured: Option<&LoudnessMeasurement>) -> String {
    let measured = measured
        .map(|m| {
            format!(
                "measured_i={}:measured_lra={}:measured_tp={}:measured_thresh={}:",
                m.integrated, m.range, m.true_peak, m.threshold
            )
        })
        .unwrap_or_default();

    format!(
        "loudnorm={}i={}:lra={}:tp={}:dual_mono={}",
        measured,
        target.integrated.unwrap_or(DEFAULT_INTEGRATED),
        target.lra.unwrap_or(DEFAULT_LRA),
        target.true_peak.unwrap_or(DEFAULT_TRUE_PEAK),
        target.dual_mono.unwrap_or(false),
    )
}
