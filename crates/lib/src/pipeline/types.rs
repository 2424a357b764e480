use serde::Serialize;
use thiserror::Error;

use crate::install::InstallationError;
use crate::materialize::CopyError;
use crate::plan::{Stage, Step};
use crate::provision::PermissionError;
use crate::resolve::ResolutionError;
use crate::snapshot::{Snapshot, TreeDiff};

use super::state::PipelineState;

/// Any error a pipeline component can raise. All of them are fatal.
#[derive(Debug, Error)]
pub enum StepError {
  #[error("base resolution failed: {0}")]
  Resolution(#[from] ResolutionError),

  #[error("directory provisioning failed: {0}")]
  Permission(#[from] PermissionError),

  #[error("package installation failed: {0}")]
  Installation(#[from] InstallationError),

  #[error("source copy failed: {0}")]
  Copy(#[from] CopyError),
}

impl StepError {
  pub fn kind(&self) -> &'static str {
    match self {
      StepError::Resolution(_) => "ResolutionError",
      StepError::Permission(_) => "PermissionError",
      StepError::Installation(_) => "InstallationError",
      StepError::Copy(_) => "CopyError",
    }
  }
}

/// The step that stopped the pipeline and why.
#[derive(Debug)]
pub struct StepFailure {
  pub step: Step,
  pub error: StepError,
}

impl std::fmt::Display for StepFailure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}: {}", self.step.describe(), self.error)
  }
}

/// What a successful step changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
  pub stage: Stage,
  pub description: String,
  pub added: usize,
  pub removed: usize,
  pub changed: usize,
}

impl StepReport {
  pub fn new(step: &Step, diff: &TreeDiff) -> Self {
    Self {
      stage: step.stage(),
      description: step.describe(),
      added: diff.added.len(),
      removed: diff.removed.len(),
      changed: diff.changed.len(),
    }
  }
}

/// Result of one pipeline run.
///
/// On failure `result` holds the step that stopped the run; no partial
/// snapshot is ever handed out.
#[derive(Debug)]
pub struct PipelineOutcome {
  pub state: PipelineState,
  pub result: Result<Snapshot, StepFailure>,
  pub reports: Vec<StepReport>,
  /// Every state entered, starting with `NotStarted`.
  pub transitions: Vec<PipelineState>,
}

impl PipelineOutcome {
  pub fn is_success(&self) -> bool {
    self.state == PipelineState::Complete
  }

  pub fn snapshot(&self) -> Option<&Snapshot> {
    self.result.as_ref().ok()
  }

  pub fn failure(&self) -> Option<&StepFailure> {
    self.result.as_ref().err()
  }

  pub fn into_result(self) -> Result<Snapshot, StepFailure> {
    self.result
  }
}
