//! Platform directories used by envbake.
//!
//! XDG variables on Unix, `%APPDATA%` on Windows. `ENVBAKE_DATA_DIR`,
//! `ENVBAKE_ARTIFACTS` and `ENVBAKE_INDEX` override their directories.

use std::path::PathBuf;

use crate::consts::APP_NAME;

/// A directory named by an environment variable, ignoring empty values.
fn env_dir(var: &str) -> Option<PathBuf> {
  std::env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}

#[cfg(not(windows))]
fn home_dir() -> PathBuf {
  env_dir("HOME").unwrap_or_else(|| PathBuf::from("/"))
}

#[cfg(windows)]
fn appdata_dir() -> PathBuf {
  env_dir("APPDATA")
    .or_else(|| env_dir("USERPROFILE").map(|p| p.join("AppData").join("Roaming")))
    .unwrap_or_else(|| PathBuf::from("."))
}

/// Directory holding `config.json`.
pub fn config_dir() -> PathBuf {
  #[cfg(windows)]
  let base = appdata_dir();
  #[cfg(not(windows))]
  let base = env_dir("XDG_CONFIG_HOME").unwrap_or_else(|| home_dir().join(".config"));
  base.join(APP_NAME)
}

/// Root for snapshots and, unless overridden, artifacts and the index.
pub fn data_dir() -> PathBuf {
  if let Some(dir) = env_dir("ENVBAKE_DATA_DIR") {
    return dir;
  }
  #[cfg(windows)]
  let base = appdata_dir();
  #[cfg(not(windows))]
  let base = env_dir("XDG_DATA_HOME").unwrap_or_else(|| home_dir().join(".local").join("share"));
  base.join(APP_NAME)
}

/// Snapshot records and exported root filesystems.
pub fn snapshots_dir() -> PathBuf {
  data_dir().join("snapshots")
}

/// Base artifacts, laid out as `{name}/{version}[-{variant}]/`.
pub fn artifacts_dir() -> PathBuf {
  env_dir("ENVBAKE_ARTIFACTS").unwrap_or_else(|| data_dir().join("artifacts"))
}

/// Local package index, laid out as `{name}/{version}/`.
pub fn index_dir() -> PathBuf {
  env_dir("ENVBAKE_INDEX").unwrap_or_else(|| data_dir().join("index"))
}
