//! The provisioning pipeline.
//!
//! A plan's steps are folded over an owned [`Snapshot`]: base resolution,
//! directory provisioning, package installation, source materialization,
//! strictly in that order. The first error stops the run and the pipeline
//! enters [`PipelineState::Failed`]; later steps are never attempted.

mod state;
mod types;

pub use state::PipelineState;
pub use types::{PipelineOutcome, StepError, StepFailure, StepReport};

use tracing::{error, info, warn};

use crate::install::{Installer, invoke_installer};
use crate::materialize::{BuildContext, materialize};
use crate::plan::{Plan, Stage, Step};
use crate::provision::provision_directory;
use crate::resolve::{ArtifactSource, resolve_base};
use crate::snapshot::{Snapshot, diff};

const STAGES: [Stage; 4] = [Stage::Base, Stage::Directory, Stage::Packages, Stage::Source];

/// The external collaborators a run needs.
pub struct Pipeline<'a> {
  source: &'a dyn ArtifactSource,
  installer: &'a mut dyn Installer,
  context: &'a BuildContext,
}

struct RunLog {
  state: PipelineState,
  transitions: Vec<PipelineState>,
  reports: Vec<StepReport>,
}

impl RunLog {
  fn enter(&mut self, to: PipelineState) {
    if !self.state.can_transition(to) {
      warn!(from = %self.state, to = %to, "unexpected pipeline transition");
    }
    info!(state = %to, "pipeline state");
    self.state = to;
    self.transitions.push(to);
  }
}

impl<'a> Pipeline<'a> {
  pub fn new(source: &'a dyn ArtifactSource, installer: &'a mut dyn Installer, context: &'a BuildContext) -> Self {
    Self {
      source,
      installer,
      context,
    }
  }

  /// Run every step of `plan`.
  pub fn run(&mut self, plan: &Plan) -> PipelineOutcome {
    let mut log = RunLog {
      state: PipelineState::NotStarted,
      transitions: vec![PipelineState::NotStarted],
      reports: Vec::new(),
    };

    let result = self.execute(plan, &mut log);
    match &result {
      Ok(snapshot) => {
        log.enter(PipelineState::Complete);
        info!(
          files = snapshot.file_count(),
          packages = snapshot.packages().len(),
          "pipeline complete"
        );
      }
      Err(failure) => {
        error!(step = %failure.step.describe(), kind = failure.error.kind(), error = %failure.error, "pipeline failed");
        log.enter(PipelineState::Failed);
      }
    }

    PipelineOutcome {
      state: log.state,
      result,
      reports: log.reports,
      transitions: log.transitions,
    }
  }

  fn execute(&mut self, plan: &Plan, log: &mut RunLog) -> Result<Snapshot, StepFailure> {
    let steps = plan.steps();
    let mut snapshot = Snapshot::new(plan.base.clone());

    for stage in STAGES {
      for step in steps.iter().filter(|s| s.stage() == stage) {
        info!(step = %step.describe(), "running step");
        let before = snapshot.clone();
        snapshot = self.apply(step, snapshot).map_err(|error| StepFailure {
          step: step.clone(),
          error,
        })?;
        log.reports.push(StepReport::new(step, &diff(&before, &snapshot)));
      }
      log.enter(PipelineState::after(stage));
    }

    Ok(snapshot)
  }

  fn apply(&mut self, step: &Step, snapshot: Snapshot) -> Result<Snapshot, StepError> {
    match step {
      Step::ResolveBase { base } => Ok(resolve_base(self.source, base)?),
      Step::ProvisionDir { path, workdir } => {
        let mut snapshot = provision_directory(snapshot, path)?;
        if *workdir {
          snapshot.set_workdir(path.clone());
        }
        Ok(snapshot)
      }
      Step::InstallPackages { requirement } => Ok(invoke_installer(&mut *self.installer, snapshot, requirement)?),
      Step::CopySource { directive } => Ok(materialize(snapshot, self.context, directive)?),
    }
  }
}
