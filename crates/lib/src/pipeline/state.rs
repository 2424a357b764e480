use serde::{Deserialize, Serialize};

use crate::plan::Stage;

/// Progress of one pipeline run.
///
/// ```text
/// NotStarted -> BaseResolved -> DirectoryReady -> PackagesInstalled -> SourceCopied -> Complete
///      \______________\_______________\__________________\__________________\-> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
  NotStarted,
  BaseResolved,
  DirectoryReady,
  PackagesInstalled,
  SourceCopied,
  Complete,
  Failed,
}

impl PipelineState {
  /// The state reached once every step of `stage` has succeeded.
  pub fn after(stage: Stage) -> PipelineState {
    match stage {
      Stage::Base => PipelineState::BaseResolved,
      Stage::Directory => PipelineState::DirectoryReady,
      Stage::Packages => PipelineState::PackagesInstalled,
      Stage::Source => PipelineState::SourceCopied,
    }
  }

  /// The success successor, or `None` for terminal states.
  pub fn next(self) -> Option<PipelineState> {
    match self {
      PipelineState::NotStarted => Some(PipelineState::BaseResolved),
      PipelineState::BaseResolved => Some(PipelineState::DirectoryReady),
      PipelineState::DirectoryReady => Some(PipelineState::PackagesInstalled),
      PipelineState::PackagesInstalled => Some(PipelineState::SourceCopied),
      PipelineState::SourceCopied => Some(PipelineState::Complete),
      PipelineState::Complete | PipelineState::Failed => None,
    }
  }

  pub fn is_terminal(self) -> bool {
    self.next().is_none()
  }

  /// Whether moving from `self` to `to` is a legal transition.
  pub fn can_transition(self, to: PipelineState) -> bool {
    match to {
      PipelineState::Failed => !self.is_terminal(),
      to => self.next() == Some(to),
    }
  }
}

impl std::fmt::Display for PipelineState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      PipelineState::NotStarted => "not started",
      PipelineState::BaseResolved => "base resolved",
      PipelineState::DirectoryReady => "directory ready",
      PipelineState::PackagesInstalled => "packages installed",
      PipelineState::SourceCopied => "source copied",
      PipelineState::Complete => "complete",
      PipelineState::Failed => "failed",
    };
    f.write_str(name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn success_path_is_linear() {
    let mut state = PipelineState::NotStarted;
    let mut visited = vec![state];
    while let Some(next) = state.next() {
      state = next;
      visited.push(state);
    }
    assert_eq!(visited.len(), 6);
    assert_eq!(state, PipelineState::Complete);
  }

  #[test]
  fn any_live_state_can_fail() {
    for state in [
      PipelineState::NotStarted,
      PipelineState::BaseResolved,
      PipelineState::DirectoryReady,
      PipelineState::PackagesInstalled,
      PipelineState::SourceCopied,
    ] {
      assert!(state.can_transition(PipelineState::Failed));
    }
    assert!(!PipelineState::Complete.can_transition(PipelineState::Failed));
    assert!(!PipelineState::Failed.can_transition(PipelineState::Failed));
  }

  #[test]
  fn states_cannot_be_skipped() {
    assert!(!PipelineState::NotStarted.can_transition(PipelineState::DirectoryReady));
    assert!(!PipelineState::PackagesInstalled.can_transition(PipelineState::BaseResolved));
  }

  #[test]
  fn stage_completion_maps_to_states() {
    assert_eq!(PipelineState::after(Stage::Base), PipelineState::BaseResolved);
    assert_eq!(PipelineState::after(Stage::Source), PipelineState::SourceCopied);
  }
}
