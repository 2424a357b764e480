mod build;
mod plan;
mod snapshot;

use std::path::{Path, PathBuf};

use envbake_lib::consts::DESCRIPTOR_FILENAME;

pub use build::{BuildArgs, cmd_build};
pub use plan::cmd_plan;
pub use snapshot::{SnapshotCommand, cmd_snapshot};

/// The descriptor to read: `file` when given, else `Bakefile` in the context.
fn descriptor_path(file: Option<&Path>, context: &Path) -> PathBuf {
  match file {
    Some(file) => file.to_path_buf(),
    None => context.join(DESCRIPTOR_FILENAME),
  }
}
