//! Incremental pattern scanning over chunked text.
//!
//! The engine writes its diagnostics unbuffered, so a single line can be
//! split across two reads. A [`PatternScanner`] keeps the unterminated tail
//! of what it has been fed and only matches against complete lines, which
//! means every occurrence is reported exactly once no matter where the
//! chunk boundaries fall.

use regex::{Captures, Regex};

/// Unterminated text kept before it is scanned anyway.
const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Scans a stream of chunks for every non-overlapping match of one regex.
///
/// Each scanner owns its own cursor; create one per pattern family per
/// process invocation.
#[derive(Debug)]
pub struct PatternScanner {
    regex: &'static Regex,
    pending: String,
}

impl PatternScanner {
    pub fn new(regex: &'static Regex) -> Self {
        Self {
            regex,
            pending: String::new(),
        }
    }

    /// Feeds the next chunk, calling `on_match` for each match found in the
    /// lines it completes.
    ///
    /// Both `\n` and `\r` terminate a line; the engine uses the latter for
    /// its status line.
    pub fn feed<F>(&mut self, chunk: &str, mut on_match: F)
    where
        F: FnMut(&Captures<'_>),
    {
        self.pending.push_str(chunk);

        match self.pending.rfind(|c: char| c == '\n' || c == '\r') {
            Some(cut) => {
                let complete: String = self.pending.drain(..=cut).collect();
                self.scan(&complete, &mut on_match);
            }
            None if self.pending.len() > MAX_PENDING_BYTES => {
                let oversized = std::mem::take(&mut self.pending);
                self.scan(&oversized, &mut on_match);
            }
            None => {}
        }
    }

    /// Scans whatever is still buffered. Call once the stream has ended.
    pub fn finish<F>(&mut self, mut on_match: F)
    where
        F: FnMut(&Captures<'_>),
    {
        let rest = std::mem::take(&mut self.pending);
        self.scan(&rest, &mut on_match);
    }

    /// Bytes waiting for a line terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn scan<F>(&self, text: &str, on_match: &mut F)
    where
        F: FnMut(&Captures<'_>),
    {
        for caps in self.regex.captures_iter(text) {
            on_match(&caps);
        }
    }
}

/// Parses a capture group as `f64`, `None` when absent or malformed.
pub fn capture_f64(caps: &Captures<'_>, name: &str) -> Option<f64> {
    caps.name(name).and_then(|m| m.as_str().parse().ok())
}

/// Parses a capture group as `u64`, `None` when absent or malformed.
pub fn capture_u64(caps: &Captures<'_>, name: &str) -> Option<u64> {
    caps.name(name).and_then(|m| m.as_str().parse().ok())
}
