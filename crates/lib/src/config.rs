//! Optional user configuration.
//!
//! Read from `{config_dir}/config.json`. Every field is optional; a missing
//! file is the same as an empty one.
//!
//! ```json
//! {
//!   "artifacts": "/srv/envbake/artifacts",
//!   "site_dir": "/usr/local/lib/site-packages",
//!   "installer": { "type": "command", "templates": { "no_cache_flag": "--no-cache-dir" } }
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::DEFAULT_SITE_DIR;
use crate::install::{CommandInstaller, CommandTemplates, IndexInstaller, Installer};
use crate::paths;
use crate::snapshot::{PathError, SnapPath};

pub const CONFIG_FILENAME: &str = "config.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeConfig {
  /// Root of the base artifact directory. Defaults to `paths::artifacts_dir()`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub artifacts: Option<PathBuf>,

  /// Site directory inside the snapshot that packages are installed into.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub site_dir: Option<String>,

  pub installer: InstallerConfig,
}

/// Which [`Installer`] a bake uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstallerConfig {
  /// Resolve packages from a local directory index.
  Index {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
  },
  /// Run real installer commands.
  Command {
    #[serde(default)]
    templates: CommandTemplates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shell: Option<String>,
  },
}

impl Default for InstallerConfig {
  fn default() -> Self {
    InstallerConfig::Index { path: None }
  }
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write config file: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize config: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("invalid site directory: {0}")]
  SiteDir(#[from] PathError),
}

impl BakeConfig {
  /// Load a config file.
  ///
  /// Returns `Ok(None)` if the file doesn't exist.
  pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(ConfigError::Read(e)),
    };

    let config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(path = %path.display(), "loaded config");
    Ok(Some(config))
  }

  /// Load `{config_dir}/config.json`, falling back to defaults.
  pub fn load_default() -> Result<Self, ConfigError> {
    Ok(Self::load(&default_path())?.unwrap_or_default())
  }

  pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(ConfigError::Write)?;
    }
    fs::write(path, content).map_err(ConfigError::Write)
  }

  /// Point base resolution at `dir`.
  pub fn with_artifacts(mut self, dir: impl Into<PathBuf>) -> Self {
    self.artifacts = Some(dir.into());
    self
  }

  /// Use the directory index at `dir`, replacing any command installer.
  pub fn with_index(mut self, dir: impl Into<PathBuf>) -> Self {
    self.installer = InstallerConfig::Index { path: Some(dir.into()) };
    self
  }

  pub fn artifacts_dir(&self) -> PathBuf {
    self.artifacts.clone().unwrap_or_else(paths::artifacts_dir)
  }

  pub fn site_dir(&self) -> Result<SnapPath, ConfigError> {
    Ok(SnapPath::absolute(self.site_dir.as_deref().unwrap_or(DEFAULT_SITE_DIR))?)
  }

  /// Build the configured installer.
  pub fn installer(&self) -> Result<Box<dyn Installer>, ConfigError> {
    let site_dir = self.site_dir()?;
    Ok(match &self.installer {
      InstallerConfig::Index { path } => {
        let index = path.clone().unwrap_or_else(paths::index_dir);
        debug!(index = %index.display(), "using index installer");
        Box::new(IndexInstaller::new(index, site_dir))
      }
      InstallerConfig::Command { templates, shell } => {
        debug!(shell = ?shell, "using command installer");
        let installer = CommandInstaller::new(templates.clone(), site_dir);
        match shell {
          Some(shell) => Box::new(installer.with_shell(shell.clone())),
          None => Box::new(installer),
        }
      }
    })
  }
}

pub fn default_path() -> PathBuf {
  paths::config_dir().join(CONFIG_FILENAME)
}
