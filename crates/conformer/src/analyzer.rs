//! Per-file analysis.
//!
//! Runs the enabled phases one after another: probe, field order, anomaly
//! detection and loudness measurement. Only a failed probe stops the
//! analysis; the other phases record a warning and let it continue.

use crate::anomalies::detect_anomalies;
use crate::config::{Preset, ToolPaths};
use crate::field_order::detect_field_order;
use crate::loudness::measure_loudness;
use crate::media::{AnalysisResult, Anomalies};
use crate::probe::{probe_file, ProbeError};
use crate::work_unit::{ProgressHub, ReportKind, WorkUnit, WorkUnitError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("probe failed for {path}: {source}")]
    Probe {
        path: PathBuf,
        #[source]
        source: ProbeError,
    },

    #[error(transparent)]
    WorkUnit(#[from] WorkUnitError),

    #[error("analysis task aborted: {0}")]
    Aborted(String),
}

/// Analyses files according to a preset.
#[derive(Debug, Clone)]
pub struct Analyzer {
    paths: ToolPaths,
    preset: Arc<Preset>,
    hub: ProgressHub,
}

impl Analyzer {
    pub fn new(paths: ToolPaths, preset: Arc<Preset>, hub: ProgressHub) -> Self {
        Self { paths, preset, hub }
    }

    /// Steps one analysis declares: the probe plus one per enabled phase.
    pub fn steps(&self) -> u32 {
        1 + u32::from(self.preset.interlaced.is_some())
            + u32::from(self.preset.detects_anomalies())
            + u32::from(self.preset.loudness)
    }

    pub async fn analyze(&self, input: &Path) -> Result<AnalysisResult, AnalysisError> {
        let mut unit = WorkUnit::new(input, ReportKind::Analysis, self.hub.clone());
        unit.declare_steps(self.steps());

        let mut media = match probe_file(&self.paths.ffprobe, input).await {
            Ok(media) => media,
            Err(source) => {
                error!(input = %input.display(), error = %source, "probe failed");
                unit.fail_step(Some(&source.to_string()));
                return Err(AnalysisError::Probe {
                    path: input.to_path_buf(),
                    source,
                });
            }
        };
        unit.completed()?;

        if let Some(settings) = &self.preset.interlaced {
            let (order, warning) = detect_field_order(&self.paths.ffmpeg, input, settings).await;
            media.field_order = Some(order);
            if let Some(warning) = warning {
                unit.add_warning(warning);
            }
            unit.completed()?;
        }

        let mut anomalies = Anomalies::default();
        if self.preset.detects_anomalies() {
            match detect_anomalies(&self.paths.ffmpeg, input, &self.preset, media.duration_secs())
                .await
            {
                Ok(found) => anomalies = found,
                Err(e) => {
                    warn!(input = %input.display(), error = %e, "anomaly detection failed");
                    unit.add_warning(format!("anomaly detection failed: {}", e));
                }
            }
            unit.completed()?;
        }

        if self.preset.loudness {
            match measure_loudness(&self.paths.ffmpeg, input).await {
                Ok(measurement) => media.loudness = Some(measurement),
                Err(e) => {
                    warn!(input = %input.display(), error = %e, "loudness measurement failed");
                    unit.add_warning(format!("loudness measurement failed: {}", e));
                }
            }
            unit.completed()?;
        }

        info!(
            input = %input.display(),
            field_order = ?media.field_order,
            warnings = unit.warnings().len(),
            "analysis completed"
        );

        Ok(AnalysisResult {
            path: input.to_path_buf(),
            media,
            anomalies,
            warnings: unit.into_warnings(),
        })
    }
}
