//! Rendering of analysed sources to every encode profile of the preset.
//!
//! All profiles of one source are launched together and awaited one by
//! one; a failed output never cancels its siblings.

use crate::config::{EncodeProfile, Preset};
use crate::media::{AnalysisResult, MediaDescription, RenderFailure, RenderResult};
use crate::process::{run_streaming, ProcessError};
use crate::progress::ProgressParser;
use crate::render_args::{build_render_args, output_path};
use crate::work_unit::{ProgressHub, ReportKind, WorkUnit, WorkUnitError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    WorkUnit(#[from] WorkUnitError),
}

#[derive(Debug, Clone)]
pub struct Renderer {
    ffmpeg: PathBuf,
    preset: Arc<Preset>,
    hub: ProgressHub,
}

impl Renderer {
    pub fn new(ffmpeg: PathBuf, preset: Arc<Preset>, hub: ProgressHub) -> Self {
        Self { ffmpeg, preset, hub }
    }

    /// Renders `analysis.path` once per encode profile.
    pub async fn render(&self, analysis: &AnalysisResult) -> RenderResult {
        let media = Arc::new(analysis.media.clone());

        let handles: Vec<_> = self
            .preset
            .encoders
            .iter()
            .map(|profile| {
                let output = output_path(&analysis.path, profile);
                let renderer = self.clone();
                let input = analysis.path.clone();
                let media = Arc::clone(&media);
                let profile = profile.clone();
                let task_output = output.clone();
                let handle = tokio::spawn(async move {
                    renderer
                        .render_profile(&input, &task_output, &media, &profile)
                        .await
                });
                (output, handle)
            })
            .collect();

        let mut result = RenderResult {
            path: analysis.path.clone(),
            ..Default::default()
        };

        for (output, handle) in handles {
            let reason = match handle.await {
                Ok(Ok(())) => {
                    result.outputs.push(output);
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(join_error) => {
                    error!(output = %output.display(), error = %join_error, "render task aborted");
                    format!("render task aborted: {}", join_error)
                }
            };
            result.failures.push(RenderFailure { output, reason });
        }

        result
    }

    /// Encodes `input` to `output` with one profile, reporting progress.
    pub async fn render_profile(
        &self,
        input: &Path,
        output: &Path,
        media: &MediaDescription,
        profile: &EncodeProfile,
    ) -> Result<(), RenderError> {
        let mut unit = WorkUnit::new(output, ReportKind::Render, self.hub.clone());
        unit.declare_steps(1);
        unit.report_progress(0.0);

        let args = build_render_args(input, output, media, profile);
        let mut progress = ProgressParser::new(media.format.duration);

        let outcome = run_streaming(&self.ffmpeg, &args, |chunk| {
            progress.feed(chunk, |fraction| unit.report_progress(fraction))
        })
        .await
        .and_then(|exit| exit.check());

        match outcome {
            Ok(()) => {
                unit.completed()?;
                info!(output = %output.display(), "render completed");
                Ok(())
            }
            Err(e) => {
                error!(output = %output.display(), error = %e, "render failed");
                unit.fail_step(Some(&e.to_string()));
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{Anomalies, FieldOrder, FormatDescriptor};
    use crate::work_unit::ProgressReport;
    use tokio::sync::mpsc;

    fn analysis(path: &Path, duration: Option<f64>) -> AnalysisResult {
        AnalysisResult {
            path: path.to_path_buf(),
            media: MediaDescription {
                name: path.to_string_lossy().into_owned(),
                streams: Vec::new(),
                format: FormatDescriptor {
                    duration,
                    ..Default::default()
                },
                field_order: Some(FieldOrder::Progressive),
                loudness: None,
            },
            anomalies: Anomalies::default(),
            warnings: Vec::new(),
        }
    }

    fn reports(rx: &mut mpsc::UnboundedReceiver<ProgressReport>) -> Vec<ProgressReport> {
        let mut seen = Vec::new();
        while let Ok(report) = rx.try_recv() {
            seen.push(report);
        }
        seen
    }

    #[tokio::test]
    async fn test_missing_engine_fails_every_output() {
        let hub = ProgressHub::new();
        let mut rx = hub.subscribe();
        let renderer = Renderer::new(
            PathBuf::from("/nonexistent/ffmpeg"),
            Arc::new(Preset::default()),
            hub,
        );

        let result = renderer.render(&analysis(Path::new("/media/clip.mov"), Some(10.0))).await;
        assert!(result.outputs.is_empty());
        assert_eq!(result.failures.len(), 2);
        assert_eq!(result.failures[0].output, PathBuf::from("/media/clip_YOUTUBE.mov"));
        assert_eq!(result.failures[1].output, PathBuf::from("/media/clip_TV.mov"));

        // each unit announced itself before failing
        let starts: Vec<_> = reports(&mut rx).into_iter().filter(|r| r.progress == 0.0).collect();
        assert_eq!(starts.len(), 2);
        assert!(starts.iter().all(|r| r.kind == ReportKind::Render));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_is_isolated_per_output() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = dir.path().join("ffmpeg");
        std::fs::write(
            &ffmpeg,
            "#!/bin/sh\n\
             for last; do :; done\n\
             printf 'frame=  125 fps= 50 q=28.0 size=     512kB time=00:00:05.00 bitrate= 838.9kbits/s speed=2.0x\\r' >&2\n\
             case \"$last\" in *_TV*) exit 2;; esac\n\
             exit 0\n",
        )
        .unwrap();
        std::fs::set_permissions(&ffmpeg, std::fs::Permissions::from_mode(0o755)).unwrap();

        let hub = ProgressHub::new();
        let mut rx = hub.subscribe();
        let renderer = Renderer::new(ffmpeg, Arc::new(Preset::default()), hub);

        let source = Path::new("/media/clip.mov");
        let result = renderer.render(&analysis(source, Some(10.0))).await;
        assert_eq!(result.outputs, vec![PathBuf::from("/media/clip_YOUTUBE.mov")]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].output, PathBuf::from("/media/clip_TV.mov"));
        assert!(result.failures[0].reason.contains("exit code 2"));

        let youtube: Vec<f64> = reports(&mut rx)
            .into_iter()
            .filter(|r| r.path == PathBuf::from("/media/clip_YOUTUBE.mov"))
            .map(|r| r.progress)
            .collect();
        assert_eq!(youtube, vec![0.0, 0.5, 1.0]);
    }
}
