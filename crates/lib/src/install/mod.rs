//! Package installation.
//!
//! [`invoke_installer`] drives an [`Installer`] through its two phases:
//! upgrade the installer tool, then install the requested packages. Two
//! installers ship with the crate:
//!
//! - [`IndexInstaller`] resolves packages from a local directory index
//! - [`CommandInstaller`] shells out to a real installer using command templates

mod command;
mod index;
mod types;

pub use command::{CommandInstaller, CommandTemplates};
pub use index::IndexInstaller;
pub use types::*;

use tracing::info;

use crate::plan::PackageRequirement;
use crate::snapshot::{SnapPath, Snapshot};

/// Directories searched for installer launchers.
const BIN_DIRS: &[&str] = &["/usr/local/bin", "/usr/bin", "/bin"];

/// Upgrade the installer, then install `requirement`.
///
/// The upgrade always runs first, even when the requirement names no
/// packages. Any failure stops immediately; nothing is retried.
pub fn invoke_installer(
  installer: &mut dyn Installer,
  snapshot: Snapshot,
  requirement: &PackageRequirement,
) -> Result<Snapshot, InstallationError> {
  let tool = requirement.tool.as_str();
  ensure_tool(&snapshot, tool)?;

  info!(tool, "upgrading installer");
  let snapshot = installer.upgrade(snapshot, tool)?;

  if requirement.names.is_empty() {
    return Ok(snapshot);
  }

  info!(tool, count = requirement.names.len(), no_cache = requirement.no_cache, "installing packages");
  installer.install(snapshot, requirement)
}

/// The tool counts as present when the base registered it or ships a launcher.
pub fn ensure_tool(snapshot: &Snapshot, tool: &str) -> Result<(), InstallationError> {
  let registered = snapshot.package_version(tool).is_some();
  let launcher = BIN_DIRS.iter().any(|dir| {
    SnapPath::absolute(dir)
      .map(|dir| snapshot.exists(&dir.join(tool)))
      .unwrap_or(false)
  });

  if registered || launcher {
    Ok(())
  } else {
    Err(InstallationError::ToolMissing { tool: tool.to_string() })
  }
}

/// pip-style name normalization: lowercase, with runs of `-`, `_` and `.`
/// collapsed to a single `-`.
pub fn normalize_name(name: &str) -> String {
  let mut out = String::with_capacity(name.len());
  let mut last_sep = false;
  for ch in name.chars() {
    if matches!(ch, '-' | '_' | '.') {
      if !last_sep {
        out.push('-');
      }
      last_sep = true;
    } else {
      out.push(ch.to_ascii_lowercase());
      last_sep = false;
    }
  }
  out
}
