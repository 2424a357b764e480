use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::placeholder::PlaceholderError;
use crate::plan::PackageRequirement;
use crate::snapshot::{Snapshot, TreeError};

/// The two installer invocations, always run in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPhase {
  Upgrade,
  Install,
}

impl std::fmt::Display for InstallPhase {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      InstallPhase::Upgrade => f.write_str("upgrade"),
      InstallPhase::Install => f.write_str("install"),
    }
  }
}

#[derive(Debug, Error)]
pub enum InstallationError {
  #[error("installer '{tool}' is not present in the snapshot")]
  ToolMissing { tool: String },

  #[error("package '{name}' not found in index {index}")]
  PackageNotFound { name: String, index: PathBuf },

  #[error("{phase} command failed with exit code {code:?}: {cmd}")]
  CommandFailed {
    phase: InstallPhase,
    cmd: String,
    code: Option<i32>,
  },

  #[error("invalid command template: {0}")]
  Placeholder(#[from] PlaceholderError),

  #[error("failed to write installed files: {0}")]
  Tree(#[from] TreeError),

  #[error("io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// An external package installer operating on a snapshot.
///
/// Both calls consume the snapshot and return the next one; on error the
/// snapshot is dropped.
pub trait Installer {
  /// Bring the installer tool itself to its latest version.
  fn upgrade(&mut self, snapshot: Snapshot, tool: &str) -> Result<Snapshot, InstallationError>;

  /// Install every package in `requirement`, with dependencies.
  fn install(&mut self, snapshot: Snapshot, requirement: &PackageRequirement) -> Result<Snapshot, InstallationError>;
}
