//! Media conformer
//!
//! Analyses media files with ffprobe and ffmpeg (field order, black and
//! frozen frames, borders, silence, loudness) and renders them to encode
//! profiles with a deterministic filter graph.

pub mod analyzer;
pub mod anomalies;
pub mod concurrency;
pub mod conformer;
pub mod field_order;
pub mod loudness;
pub mod media;
pub mod probe;
pub mod process;
pub mod progress;
pub mod render_args;
pub mod renderer;
pub mod scan;
pub mod scanner;
pub mod startup;
pub mod work_unit;

pub use analyzer::{AnalysisError, Analyzer};
pub use anomalies::{
    detect_anomalies, detection_args, StreamEventParser, CROP_CONTINUITY_SECS, REFERENCE_FRAME,
};
pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use conformer::{Conformer, ConformerError};
pub use field_order::{detect_field_order, parse_idet_output};
pub use loudness::{measure_loudness, parse_loudness_output, LoudnessError};
pub use media::{
    AnalysisResult, Anomalies, AnomalyInterval, FieldOrder, LoudnessMeasurement,
    MediaDescription, RenderFailure, RenderResult,
};
pub use media_conformer_config as config;
pub use media_conformer_config::Config;
pub use probe::{parse_probe_output, probe_file, ProbeError};
pub use process::{ProcessError, ProcessExit};
pub use progress::{ProgressParser, ProgressSample};
pub use render_args::{build_render_args, output_path};
pub use renderer::{RenderError, Renderer};
pub use scan::expand_inputs;
pub use scanner::PatternScanner;
pub use startup::{parse_ffmpeg_version, run_startup_checks, StartupError};
pub use work_unit::{ProgressHub, ProgressReport, ReportKind, WorkState, WorkUnit, WorkUnitError};
