//! External process supervision.
//!
//! Spawns the engine binaries, hands their stderr to a consumer chunk by
//! chunk as it arrives, and turns exit statuses into [`ProcessError`]s.

use std::io;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, trace};

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Bytes of stderr kept for error reports.
const STDERR_TAIL_BYTES: usize = 4 * 1024;

/// Error type for external process execution
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The binary could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Reading the process output failed
    #[error("IO error while reading process output: {0}")]
    Io(#[from] io::Error),

    /// Process exited with non-zero status
    #[error("{program} failed with exit code {code}")]
    Failed {
        program: String,
        code: i32,
        stderr_tail: String,
    },

    /// Process was terminated by signal
    #[error("{program} was terminated by signal")]
    Terminated { program: String },
}

impl ProcessError {
    /// Exit code of a process that ran to completion with an error.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessError::Failed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Collected output of a finished process.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

/// How a streamed process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub program: String,
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stderr_tail: String,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Converts a non-zero or missing exit code into an error.
    pub fn check(&self) -> Result<(), ProcessError> {
        match self.code {
            Some(0) => Ok(()),
            Some(code) => Err(ProcessError::Failed {
                program: self.program.clone(),
                code,
                stderr_tail: self.stderr_tail.clone(),
            }),
            None => Err(ProcessError::Terminated {
                program: self.program.clone(),
            }),
        }
    }
}

fn program_name(program: &Path) -> String {
    program.to_string_lossy().into_owned()
}

fn spawn_error(program: &Path, source: io::Error) -> ProcessError {
    ProcessError::Spawn {
        program: program_name(program),
        source,
    }
}

/// Runs `program` to completion and collects stdout and stderr.
///
/// # Errors
/// Returns an error if the process fails to start, exits with a non-zero
/// status, or is terminated by a signal.
pub async fn run_captured(program: &Path, args: &[String]) -> Result<CapturedOutput, ProcessError> {
    debug!(program = %program.display(), ?args, "running process");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| spawn_error(program, e))?;

    let captured = CapturedOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    let exit = ProcessExit {
        program: program_name(program),
        code: output.status.code(),
        stderr_tail: tail_of(&captured.stderr, STDERR_TAIL_BYTES).to_string(),
    };
    exit.check()?;

    Ok(captured)
}

/// Runs `program`, passing each decoded stderr chunk to `on_chunk` as it
/// arrives.
///
/// Chunk boundaries are whatever the pipe delivers; only UTF-8 sequences
/// are kept whole. The exit status is returned rather than checked so that
/// callers can decide what a failure means for the data they collected.
pub async fn run_streaming<F>(
    program: &Path,
    args: &[String],
    mut on_chunk: F,
) -> Result<ProcessExit, ProcessError>
where
    F: FnMut(&str),
{
    debug!(program = %program.display(), ?args, "spawning streaming process");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr was not captured"))?;

    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    let mut decoder = Utf8ChunkDecoder::default();
    let mut tail = String::new();

    loop {
        let read = stderr.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        let text = decoder.decode(&buf[..read]);
        if text.is_empty() {
            continue;
        }
        trace!(program = %program.display(), chunk = %text, "stderr chunk");
        push_tail(&mut tail, &text);
        on_chunk(&text);
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        push_tail(&mut tail, &rest);
        on_chunk(&rest);
    }

    let status = child.wait().await?;
    debug!(program = %program.display(), code = ?status.code(), "process exited");

    Ok(ProcessExit {
        program: program_name(program),
        code: status.code(),
        stderr_tail: tail,
    })
}

fn push_tail(tail: &mut String, text: &str) {
    tail.push_str(text);
    if tail.len() > STDERR_TAIL_BYTES {
        let keep_from = tail.len() - tail_of(tail, STDERR_TAIL_BYTES).len();
        tail.drain(..keep_from);
    }
}

/// Last `max` bytes of `s`, moved forward to a char boundary.
fn tail_of(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut cut = s.len() - max;
    while !s.is_char_boundary(cut) {
        cut += 1;
    }
    &s[cut..]
}

/// Decodes UTF-8 read in arbitrary pieces, holding back a sequence that
/// is split across two reads.
#[derive(Debug, Default)]
struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match e.error_len() {
                        // incomplete sequence at the end: wait for more bytes
                        None => {
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + invalid);
                        }
                    }
                }
            }
        }

        out
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
