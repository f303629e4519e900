//! Anomaly detection over the engine's diagnostic stream.
//!
//! One engine run applies `blackdetect`, `freezedetect`, `cropdetect` and
//! `silencedetect` at once and prints their findings interleaved on stderr.
//! [`StreamEventParser`] consumes that output chunk by chunk with one
//! scanner per detector family and assembles the reported events into
//! closed intervals.
//!
//! Freeze and silence detectors print start and end on separate lines with
//! nothing tying them together except their order, so the Nth end event
//! always closes the Nth start event of the same family.

use crate::media::{Anomalies, AnomalyInterval};
use crate::process::{run_streaming, ProcessError, ProcessExit};
use crate::scanner::{capture_f64, capture_u64, PatternScanner};
use media_conformer_config::Preset;
use regex::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Crop reports closer together than this belong to the same interval,
/// which is also the length of an interval made from a single report.
pub const CROP_CONTINUITY_SECS: f64 = 0.4;

/// Frame size a crop report is compared against. Reports of the full frame
/// carry no border.
pub const REFERENCE_FRAME: (u64, u64) = (1920, 1080);

/// Crop timestamps are printed with microsecond precision.
const CROP_TIME_EPSILON: f64 = 1e-9;

const NUM: &str = r"-?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?";

fn black_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"black_start:\s*(?P<start>{NUM})\s+black_end:\s*(?P<end>{NUM})\s+black_duration:\s*(?P<duration>{NUM})"
        ))
        .expect("black pattern is valid")
    })
}

fn freeze_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"lavfi\.freezedetect\.freeze_(?P<event>start|end):\s*(?P<time>{NUM})"
        ))
        .expect("freeze pattern is valid")
    })
}

fn silence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"silence_(?:start:\s*(?P<start>{NUM})|end:\s*(?P<end>{NUM})\s*\|\s*silence_duration:\s*(?P<duration>{NUM}))"
        ))
        .expect("silence pattern is valid")
    })
}

fn crop_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"x1:(?P<x1>\d+) x2:(?P<x2>\d+) y1:(?P<y1>\d+) y2:(?P<y2>\d+) w:(?P<w>\d+) h:(?P<h>\d+) x:(?P<x>\d+) y:(?P<y>\d+) pts:(?P<pts>{NUM}) t:(?P<t>{NUM})(?: limit:\S+)? crop=(?P<crop>\d+:\d+:\d+:\d+)"
        ))
        .expect("crop pattern is valid")
    })
}

/// Intervals whose start and end arrive as separate events.
#[derive(Debug, Default)]
struct OrdinalIntervals {
    intervals: Vec<AnomalyInterval>,
    /// Intervals before this index have seen their end event.
    closed: usize,
}

impl OrdinalIntervals {
    fn open(&mut self, start: f64) {
        self.intervals.push(AnomalyInterval::open(start));
    }

    /// Closes the oldest interval still waiting for its end event.
    fn close_next(&mut self, end: f64) -> bool {
        match self.intervals.get_mut(self.closed) {
            Some(interval) => {
                interval.close_at(end);
                self.closed += 1;
                true
            }
            None => false,
        }
    }

    /// Closes every interval still open at the end of the stream.
    fn close_remaining(&mut self, end: f64) -> usize {
        let open = self.intervals.len() - self.closed;
        for interval in &mut self.intervals[self.closed..] {
            interval.close_at(end);
        }
        self.closed = self.intervals.len();
        open
    }
}

#[derive(Debug)]
struct OpenCrop {
    interval: AnomalyInterval,
    last_seen: f64,
}

#[derive(Debug, Default)]
struct CropTracker {
    closed: Vec<AnomalyInterval>,
    current: Option<OpenCrop>,
}

impl CropTracker {
    fn report(&mut self, t: f64, total_duration: f64) {
        if let Some(open) = self.current.as_mut() {
            let gap = t - open.last_seen;
            if gap <= CROP_CONTINUITY_SECS + CROP_TIME_EPSILON && t != total_duration {
                open.last_seen = t;
                let end = (t + CROP_CONTINUITY_SECS).max(open.interval.end);
                open.interval.close_at(end);
                return;
            }
        }

        if let Some(done) = self.current.take() {
            self.closed.push(done.interval);
        }
        self.current = Some(OpenCrop {
            interval: AnomalyInterval::closed(t, t + CROP_CONTINUITY_SECS),
            last_seen: t,
        });
    }

    fn finish(mut self) -> Vec<AnomalyInterval> {
        if let Some(done) = self.current.take() {
            self.closed.push(done.interval);
        }
        self.closed
    }
}

/// Assembles anomaly intervals from the detection run's stderr.
///
/// Constructed fresh for each engine invocation.
#[derive(Debug)]
pub struct StreamEventParser {
    total_duration: f64,
    black_scanner: PatternScanner,
    freeze_scanner: PatternScanner,
    crop_scanner: PatternScanner,
    silence_scanner: PatternScanner,
    black_frames: Vec<AnomalyInterval>,
    freezes: OrdinalIntervals,
    silences: OrdinalIntervals,
    borders: CropTracker,
}

impl StreamEventParser {
    /// `total_duration` is the container duration used to close intervals
    /// that are still open when the stream ends.
    pub fn new(total_duration: f64) -> Self {
        Self {
            total_duration,
            black_scanner: PatternScanner::new(black_regex()),
            freeze_scanner: PatternScanner::new(freeze_regex()),
            crop_scanner: PatternScanner::new(crop_regex()),
            silence_scanner: PatternScanner::new(silence_regex()),
            black_frames: Vec::new(),
            freezes: OrdinalIntervals::default(),
            silences: OrdinalIntervals::default(),
            borders: CropTracker::default(),
        }
    }

    /// Consumes the next chunk of diagnostic output.
    pub fn feed(&mut self, chunk: &str) {
        let total_duration = self.total_duration;

        self.black_scanner
            .feed(chunk, |caps| on_black(&mut self.black_frames, caps));
        self.freeze_scanner
            .feed(chunk, |caps| on_freeze(&mut self.freezes, caps));
        self.crop_scanner
            .feed(chunk, |caps| on_crop(&mut self.borders, caps, total_duration));
        self.silence_scanner
            .feed(chunk, |caps| on_silence(&mut self.silences, caps));
    }

    /// Completes the parse once the process has exited.
    ///
    /// # Errors
    /// A non-zero exit discards everything collected so far and returns the
    /// process error.
    pub fn finish(mut self, exit: &ProcessExit) -> Result<Anomalies, ProcessError> {
        exit.check()?;

        let total_duration = self.total_duration;
        self.black_scanner
            .finish(|caps| on_black(&mut self.black_frames, caps));
        self.freeze_scanner
            .finish(|caps| on_freeze(&mut self.freezes, caps));
        self.crop_scanner
            .finish(|caps| on_crop(&mut self.borders, caps, total_duration));
        self.silence_scanner
            .finish(|caps| on_silence(&mut self.silences, caps));

        // a freeze or silence running into the end of the file never gets
        // an end event
        let open_freezes = self.freezes.close_remaining(total_duration);
        let open_silences = self.silences.close_remaining(total_duration);
        if open_freezes + open_silences > 0 {
            debug!(
                open_freezes,
                open_silences, total_duration, "closed trailing intervals at end of file"
            );
        }

        Ok(Anomalies {
            black_frames: self.black_frames,
            freeze_frames: self.freezes.intervals,
            silences: self.silences.intervals,
            borders: self.borders.finish(),
        })
    }
}

fn on_black(black_frames: &mut Vec<AnomalyInterval>, caps: &Captures<'_>) {
    if let (Some(start), Some(end)) = (capture_f64(caps, "start"), capture_f64(caps, "end")) {
        black_frames.push(AnomalyInterval::closed(start, end));
    }
}

fn on_freeze(freezes: &mut OrdinalIntervals, caps: &Captures<'_>) {
    let Some(time) = capture_f64(caps, "time") else {
        return;
    };
    match caps.name("event").map(|m| m.as_str()) {
        Some("start") => freezes.open(time),
        Some("end") => {
            if !freezes.close_next(time) {
                debug!(end = time, "freeze end without a pending start");
            }
        }
        _ => {}
    }
}

fn on_silence(silences: &mut OrdinalIntervals, caps: &Captures<'_>) {
    if let Some(start) = capture_f64(caps, "start") {
        silences.open(start);
    } else if let Some(end) = capture_f64(caps, "end") {
        if !silences.close_next(end) {
            debug!(end, "silence end without a pending start");
        }
    }
}

fn on_crop(borders: &mut CropTracker, caps: &Captures<'_>, total_duration: f64) {
    let (Some(w), Some(h), Some(t)) = (
        capture_u64(caps, "w"),
        capture_u64(caps, "h"),
        capture_f64(caps, "t"),
    ) else {
        return;
    };
    if (w, h) == REFERENCE_FRAME {
        return;
    }
    borders.report(t, total_duration);
}

/// Video and audio filter chains for the enabled detectors.
pub fn detection_filters(preset: &Preset) -> (Option<String>, Option<String>) {
    let mut video = Vec::new();

    if let Some(black) = &preset.black_frames {
        video.push(format!(
            "blackdetect=d={}:pic_th={}:pix_th={}",
            black
                .black_duration
                .map(|d| d.to_string())
                .unwrap_or_else(|| "2.0".to_string()),
            black.black_ratio.unwrap_or(0.98),
            black.black_threshold.unwrap_or(0.1),
        ));
    }

    if let Some(borders) = &preset.borders {
        let limit = borders
            .threshold
            .map(|t| format!("limit={}:", t))
            .unwrap_or_default();
        video.push(format!(
            "cropdetect={}round={}:reset={}",
            limit,
            borders.round.unwrap_or(8),
            borders.reset.unwrap_or(0),
        ));
    }

    if let Some(freeze) = &preset.freeze_frames {
        video.push(format!(
            "freezedetect=n={}:d={}",
            freeze.freeze_noise.unwrap_or(0.001),
            freeze.freeze_duration.as_deref().unwrap_or("2s"),
        ));
    }

    let audio = preset.silence.as_ref().map(|silence| {
        format!(
            "silencedetect=n={}:d={}",
            silence.noise.as_deref().unwrap_or("-60dB"),
            silence.duration.as_deref().unwrap_or("2"),
        )
    });

    let video = if video.is_empty() {
        None
    } else {
        Some(video.join(","))
    };
    (video, audio)
}

/// Engine arguments for the detection run, `None` when no detector is
/// enabled.
pub fn detection_args(input: &Path, preset: &Preset) -> Option<Vec<String>> {
    let (video, audio) = detection_filters(preset);
    if video.is_none() && audio.is_none() {
        return None;
    }

    let mut args = vec![
        "-hide_banner".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
    ];
    if let Some(video) = video {
        args.push("-filter:v".to_string());
        args.push(video);
    }
    if let Some(audio) = audio {
        args.push("-filter:a".to_string());
        args.push(audio);
    }
    args.extend(["-f", "null", "-"].map(String::from));
    Some(args)
}

/// Runs the detection pass over `input` and collects its anomalies.
pub async fn detect_anomalies(
    ffmpeg: &Path,
    input: &Path,
    preset: &Preset,
    total_duration: f64,
) -> Result<Anomalies, ProcessError> {
    let Some(args) = detection_args(input, preset) else {
        return Ok(Anomalies::default());
    };

    let mut parser = StreamEventParser::new(total_duration);
    let exit = run_streaming(ffmpeg, &args, |chunk| parser.feed(chunk)).await?;
    let anomalies = parser.finish(&exit)?;

    info!(
        input = %input.display(),
        blacks = anomalies.black_frames.len(),
        freezes = anomalies.freeze_frames.len(),
        silences = anomalies.silences.len(),
        borders = anomalies.borders.len(),
        "anomaly detection completed"
    );
    Ok(anomalies)
}
