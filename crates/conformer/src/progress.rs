//! Encoder status line parsing.

use crate::scanner::{capture_f64, capture_u64, PatternScanner};
use regex::{Captures, Regex};
use serde::Serialize;
use std::sync::OnceLock;
use tracing::trace;

fn status_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"frame=\s*(?P<frame>\d+)\s+fps=\s*(?P<fps>[\d.]+)\s+q=\s*-?[\d.]+\s+L?size=\s*\S+\s+time=\s*(?P<h>\d+):(?P<m>\d{2}):(?P<s>\d{2}(?:\.\d+)?)\s+bitrate=\s*(?P<bitrate>\S+)(?:\s+\w+=\s*\S+)*\s+speed=\s*(?P<speed>[\d.]+|N/A)x?",
        )
        .expect("status pattern is valid")
    })
}

/// One encoder status line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSample {
    pub frame: u64,
    pub fps: f64,
    /// Output timestamp in seconds.
    pub elapsed_secs: f64,
    pub bitrate: String,
    /// Encoding speed relative to realtime, `None` when not reported.
    pub speed: Option<f64>,
}

impl ProgressSample {
    fn from_captures(caps: &Captures<'_>) -> Option<Self> {
        let hours = capture_f64(caps, "h")?;
        let minutes = capture_f64(caps, "m")?;
        let seconds = capture_f64(caps, "s")?;
        Some(Self {
            frame: capture_u64(caps, "frame")?,
            fps: capture_f64(caps, "fps")?,
            elapsed_secs: hours * 3600.0 + minutes * 60.0 + seconds,
            bitrate: caps.name("bitrate")?.as_str().to_string(),
            speed: capture_f64(caps, "speed"),
        })
    }

    /// Fraction of `total_secs` encoded so far. Not clamped to `[0, 1]`.
    pub fn fraction_of(&self, total_secs: f64) -> f64 {
        self.elapsed_secs / total_secs
    }
}

/// Turns the encoder's stderr into completion fractions.
#[derive(Debug)]
pub struct ProgressParser {
    total_secs: Option<f64>,
    scanner: PatternScanner,
    last: Option<ProgressSample>,
}

impl ProgressParser {
    /// A parser for a source of `total_secs` seconds. Unknown or zero
    /// durations disable progress reporting.
    pub fn new(total_secs: Option<f64>) -> Self {
        Self {
            total_secs: total_secs.filter(|t| *t > 0.0),
            scanner: PatternScanner::new(status_regex()),
            last: None,
        }
    }

    /// Feeds a stderr chunk, calling `on_progress` with the fraction of each
    /// complete status line.
    pub fn feed<F>(&mut self, chunk: &str, mut on_progress: F)
    where
        F: FnMut(f64),
    {
        let Some(total) = self.total_secs else {
            return;
        };
        let last = &mut self.last;
        self.scanner.feed(chunk, |caps| {
            if let Some(sample) = ProgressSample::from_captures(caps) {
                let fraction = sample.fraction_of(total);
                trace!(frame = sample.frame, fraction, "encoder progress");
                on_progress(fraction);
                *last = Some(sample);
            }
        });
    }

    /// Most recent status line seen.
    pub fn last_sample(&self) -> Option<&ProgressSample> {
        self.last.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const STATUS: &str = "frame=  250 fps= 49 q=28.0 size=    1024kB time=00:00:10.00 bitrate= 838.9kbits/s speed=1.96x    \r";

    fn fractions(parser: &mut ProgressParser, chunks: &[&str]) -> Vec<f64> {
        let mut seen = Vec::new();
        for chunk in chunks {
            parser.feed(chunk, |f| seen.push(f));
        }
        seen
    }

    #[test]
    fn test_status_line_fraction() {
        let mut parser = ProgressParser::new(Some(40.0));
        assert_eq!(fractions(&mut parser, &[STATUS]), vec![0.25]);

        let sample = parser.last_sample().unwrap();
        assert_eq!(sample.frame, 250);
        assert_eq!(sample.fps, 49.0);
        assert_eq!(sample.elapsed_secs, 10.0);
        assert_eq!(sample.bitrate, "838.9kbits/s");
        assert_eq!(sample.speed, Some(1.96));
    }

    #[test]
    fn test_dup_and_drop_counters_before_speed() {
        let line = "frame=  250 fps= 49 q=28.0 size=    1024kB time=00:00:05.00 bitrate= 838.9kbits/s dup=125 drop=0 speed=1.96x\r";
        let mut parser = ProgressParser::new(Some(10.0));
        assert_eq!(fractions(&mut parser, &[line]), vec![0.5]);
        assert_eq!(parser.last_sample().unwrap().speed, Some(1.96));
    }

    #[test]
    fn test_final_lsize_line() {
        let line = "frame= 1000 fps=120 q=-1.0 Lsize=    4096kB time=01:02:03.50 bitrate= 900.0kbits/s speed=15.1x\n";
        let mut parser = ProgressParser::new(Some(3723.5));
        assert_eq!(fractions(&mut parser, &[line]), vec![1.0]);
    }

    #[test]
    fn test_fraction_is_not_clamped() {
        let mut parser = ProgressParser::new(Some(5.0));
        let seen = fractions(&mut parser, &[STATUS]);
        assert_eq!(seen, vec![2.0]);
    }

    #[test]
    fn test_unknown_duration_is_noop() {
        let mut parser = ProgressParser::new(None);
        assert!(fractions(&mut parser, &[STATUS]).is_empty());

        let mut parser = ProgressParser::new(Some(0.0));
        assert!(fractions(&mut parser, &[STATUS]).is_empty());
    }

    #[test]
    fn test_malformed_lines_are_ignored() {
        let mut parser = ProgressParser::new(Some(10.0));
        let seen = fractions(
            &mut parser,
            &["Press [q] to stop\n", "frame=  N/A fps=0.0\r", "Input #0, mov\n"],
        );
        assert!(seen.is_empty());
        assert!(parser.last_sample().is_none());
    }

    #[test]
    fn test_status_line_split_across_chunks() {
        let mut parser = ProgressParser::new(Some(20.0));
        let (a, b) = STATUS.split_at(37);
        assert_eq!(fractions(&mut parser, &[a, b]), vec![0.5]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_fraction_matches_timestamp(h in 0u32..10, m in 0u32..60, s in 0u32..60, total in 1u32..100_000) {
            let line = format!(
                "frame=  1 fps=0.0 q=0.0 size=       0kB time={:02}:{:02}:{:02}.00 bitrate=N/A speed=N/A\r",
                h, m, s
            );
            let mut parser = ProgressParser::new(Some(total as f64));
            let seen = fractions(&mut parser, &[&line]);
            let elapsed = (h * 3600 + m * 60 + s) as f64;
            prop_assert_eq!(seen, vec![elapsed / total as f64]);
            prop_assert_eq!(parser.last_sample().unwrap().speed, None);
        }
    }
}
