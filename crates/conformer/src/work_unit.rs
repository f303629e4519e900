//! Per-file work tracking and progress fan-out.
//!
//! A [`WorkUnit`] tracks one file through one operation: how many steps
//! were declared, how many completed, and whether any of them failed.
//! Every change of progress is published to the shared [`ProgressHub`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Reason recorded when a step fails without saying why.
pub const UNKNOWN_FAILURE: &str = "Failed for unknown reason";

/// Operation a work unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Analysis,
    Render,
}

impl std::fmt::Display for ReportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportKind::Analysis => write!(f, "analysis"),
            ReportKind::Render => write!(f, "render"),
        }
    }
}

/// A single progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub kind: ReportKind,
    /// Source file for analysis, output file for render.
    pub path: PathBuf,
    pub progress: f64,
}

/// Fan-out of progress reports to any number of subscribers.
///
/// Cloning the hub shares the subscriber list.
#[derive(Debug, Clone, Default)]
pub struct ProgressHub {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ProgressReport>>>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber that receives every report published
    /// from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProgressReport> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Delivers `report` to every live subscriber.
    pub fn publish(&self, report: ProgressReport) {
        let mut subscribers = self.lock();
        // dropped receivers are pruned here
        subscribers.retain(|tx| tx.send(report.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<ProgressReport>>> {
        // a panic while holding the lock cannot leave the list inconsistent
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Lifecycle of a work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    /// No steps declared yet.
    Pending,
    Running,
    /// Every declared step completed without a failure.
    Finished,
    /// A step failed. Terminal.
    Failed,
}

impl Default for WorkState {
    fn default() -> Self {
        Self::Pending
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkUnitError {
    #[error("step completed on a work unit without declared steps")]
    NoStepsDeclared,
}

/// Step and failure tracking for one file in one operation.
#[derive(Debug)]
pub struct WorkUnit {
    path: PathBuf,
    kind: ReportKind,
    declared_steps: u32,
    completed_steps: u32,
    state: WorkState,
    failure: Option<String>,
    warnings: Vec<String>,
    hub: ProgressHub,
}

impl WorkUnit {
    pub fn new(path: impl Into<PathBuf>, kind: ReportKind, hub: ProgressHub) -> Self {
        Self {
            path: path.into(),
            kind,
            declared_steps: 0,
            completed_steps: 0,
            state: WorkState::Pending,
            failure: None,
            warnings: Vec::new(),
            hub,
        }
    }

    /// Adds `steps` to the number of steps this unit will complete.
    pub fn declare_steps(&mut self, steps: u32) {
        self.declared_steps += steps;
        if self.state == WorkState::Pending {
            self.state = WorkState::Running;
        }
    }

    /// Marks one step done and publishes the new completion fraction.
    ///
    /// # Errors
    /// Completing a step before any were declared is a caller bug.
    pub fn completed(&mut self) -> Result<f64, WorkUnitError> {
        if self.declared_steps == 0 {
            return Err(WorkUnitError::NoStepsDeclared);
        }

        self.completed_steps += 1;
        let fraction = self.completed_steps as f64 / self.declared_steps as f64;
        if self.completed_steps >= self.declared_steps && self.state == WorkState::Running {
            self.state = WorkState::Finished;
        }

        self.report_progress(fraction);
        Ok(fraction)
    }

    /// Marks the unit failed.
    ///
    /// The first reason is kept as the failure; reasons given afterwards are
    /// recorded as warnings.
    pub fn fail_step(&mut self, reason: Option<&str>) {
        let reason = reason.unwrap_or(UNKNOWN_FAILURE).to_string();
        warn!(kind = %self.kind, path = %self.path.display(), %reason, "step failed");

        self.state = WorkState::Failed;
        match self.failure {
            None => self.failure = Some(reason),
            Some(_) => self.warnings.push(reason),
        }
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        debug!(path = %self.path.display(), %warning, "warning recorded");
        self.warnings.push(warning);
    }

    /// Publishes a raw progress fraction for this unit.
    pub fn report_progress(&self, progress: f64) {
        self.hub.publish(ProgressReport {
            kind: self.kind,
            path: self.path.clone(),
            progress,
        });
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ReportKind {
        self.kind
    }

    pub fn state(&self) -> WorkState {
        self.state
    }

    pub fn is_failed(&self) -> bool {
        self.state == WorkState::Failed
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn declared_steps(&self) -> u32 {
        self.declared_steps
    }

    pub fn completed_steps(&self) -> u32 {
        self.completed_steps
    }

    /// Consumes the unit, returning its warnings.
    pub fn into_warnings(self) -> Vec<String> {
        self.warnings
    }
}
