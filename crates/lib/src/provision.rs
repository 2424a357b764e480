//! Directory provisioning.

use thiserror::Error;
use tracing::{debug, info};

use crate::consts::DEFAULT_DIR_MODE;
use crate::snapshot::{SnapPath, Snapshot, TreeError};

/// A directory could not be created.
#[derive(Debug, Error)]
#[error("cannot create directory {path}: {reason}")]
pub struct PermissionError {
  pub path: SnapPath,
  #[source]
  pub reason: TreeError,
}

/// Ensure `path` exists as a directory in `snapshot`.
///
/// Missing segments are created with mode `0755`. An existing directory is
/// left untouched, so provisioning twice gives the same snapshot as once.
pub fn provision_directory(mut snapshot: Snapshot, path: &SnapPath) -> Result<Snapshot, PermissionError> {
  let created = snapshot
    .mkdir_p(path, DEFAULT_DIR_MODE)
    .map_err(|reason| PermissionError {
      path: path.clone(),
      reason,
    })?;

  if created == 0 {
    debug!(path = %path, "directory already present");
  } else {
    info!(path = %path, created, "directory provisioned");
  }
  Ok(snapshot)
}
