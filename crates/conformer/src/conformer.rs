//! The conformer service.
//!
//! Owns the configuration, the concurrency plan and the progress hub, and
//! drives analysis and rendering for any number of files.

use crate::analyzer::{AnalysisError, Analyzer};
use crate::concurrency::{derive_plan, ConcurrencyPlan};
use crate::config::Config;
use crate::media::{AnalysisResult, RenderFailure, RenderResult};
use crate::renderer::Renderer;
use crate::startup::{run_startup_checks, StartupError};
use crate::work_unit::{ProgressHub, ProgressReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info};

/// Error type for service operations
#[derive(Debug, Error)]
pub enum ConformerError {
    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Analysis failed
    #[error("Analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
}

/// Analysis and render front end shared by all callers.
pub struct Conformer {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Derived concurrency plan
    pub concurrency_plan: ConcurrencyPlan,
    hub: ProgressHub,
    analyzer: Analyzer,
    renderer: Renderer,
    semaphore: Arc<Semaphore>,
}

impl Conformer {
    /// Initialize the service after verifying the engine binaries
    pub async fn new(config: Config) -> Result<Self, ConformerError> {
        run_startup_checks(&config).await?;
        Ok(Self::new_without_checks(config))
    }

    /// Initialize the service without running startup checks
    ///
    /// Useful for testing when ffmpeg and ffprobe are not available.
    pub fn new_without_checks(config: Config) -> Self {
        let concurrency_plan = derive_plan(&config);
        let hub = ProgressHub::new();
        let preset = Arc::new(config.preset.clone());
        let analyzer = Analyzer::new(config.paths.clone(), Arc::clone(&preset), hub.clone());
        let renderer = Renderer::new(config.paths.ffmpeg.clone(), preset, hub.clone());
        let semaphore = Arc::new(Semaphore::new(
            concurrency_plan.max_concurrent_files.max(1) as usize,
        ));

        info!(
            max_concurrent_files = concurrency_plan.max_concurrent_files,
            total_cores = concurrency_plan.total_cores,
            "conformer initialized"
        );

        Self {
            config,
            concurrency_plan,
            hub,
            analyzer,
            renderer,
            semaphore,
        }
    }

    /// Receive every progress report published from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProgressReport> {
        self.hub.subscribe()
    }

    pub async fn analyze(&self, input: &Path) -> Result<AnalysisResult, ConformerError> {
        Ok(self.analyzer.analyze(input).await?)
    }

    /// Analyse `inputs` concurrently, at most `max_concurrent_files` at a time.
    ///
    /// Results come back in input order.
    pub async fn analyze_all(
        &self,
        inputs: &[PathBuf],
    ) -> Vec<Result<AnalysisResult, ConformerError>> {
        let handles: Vec<_> = inputs
            .iter()
            .cloned()
            .map(|input| {
                let analyzer = self.analyzer.clone();
                let semaphore = Arc::clone(&self.semaphore);
                tokio::spawn(async move {
                    // the semaphore is never closed
                    let _permit = semaphore.acquire_owned().await.ok();
                    analyzer.analyze(&input).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (input, handle) in inputs.iter().zip(handles) {
            let result = match handle.await {
                Ok(result) => result.map_err(ConformerError::from),
                Err(join_error) => {
                    error!(input = %input.display(), error = %join_error, "analysis task aborted");
                    Err(ConformerError::Analysis(AnalysisError::Aborted(
                        join_error.to_string(),
                    )))
                }
            };
            results.push(result);
        }
        results
    }

    /// Render an analysed file to every encode profile
    pub async fn render(&self, analysis: &AnalysisResult) -> RenderResult {
        let _permit = self.semaphore.acquire().await.ok();
        self.renderer.render(analysis).await
    }

    /// Render several analysed files, at most `max_concurrent_files` at a
    /// time. Results come back in input order.
    pub async fn render_all(&self, analyses: &[AnalysisResult]) -> Vec<RenderResult> {
        let handles: Vec<_> = analyses
            .iter()
            .cloned()
            .map(|analysis| {
                let renderer = self.renderer.clone();
                let semaphore = Arc::clone(&self.semaphore);
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    renderer.render(&analysis).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (analysis, handle) in analyses.iter().zip(handles) {
            let result = handle.await.unwrap_or_else(|join_error| {
                error!(input = %analysis.path.display(), error = %join_error, "render task aborted");
                RenderResult {
                    path: analysis.path.clone(),
                    outputs: Vec::new(),
                    failures: vec![RenderFailure {
                        output: analysis.path.clone(),
                        reason: format!("render task aborted: {}", join_error),
                    }],
                }
            });
            results.push(result);
        }
        results
    }
}
