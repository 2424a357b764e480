//! Installer that runs real commands.
//!
//! Each phase renders a command template, runs it through the shell with an
//! isolated environment, and merges whatever the command wrote into `$${out}`
//! into the snapshot's site directory. Installed versions are read back from
//! the `{name}-{version}.dist-info` directories the installer leaves behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::placeholder::{self, Placeholder, PlaceholderError, Resolver};
use crate::plan::PackageRequirement;
use crate::snapshot::{SnapPath, Snapshot};

use super::normalize_name;
use super::types::{InstallPhase, InstallationError, Installer};

/// Command templates for the two installer phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTemplates {
  pub upgrade: String,
  pub install: String,
  /// Substituted for `$${cache_flags}` when the requirement asks for no cache.
  pub no_cache_flag: String,
}

impl Default for CommandTemplates {
  fn default() -> Self {
    Self {
      upgrade: "$${tool} install --upgrade --target $${out} $${tool}".to_string(),
      install: "$${tool} install $${cache_flags} --target $${out} $${packages}".to_string(),
      no_cache_flag: "--no-cache-dir".to_string(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct CommandInstaller {
  templates: CommandTemplates,
  site_dir: SnapPath,
  shell: Option<String>,
  env: BTreeMap<String, String>,
}

struct TemplateValues {
  out: String,
  tool: String,
  packages: String,
  cache_flags: String,
}

impl Resolver for TemplateValues {
  fn resolve(&self, placeholder: &Placeholder) -> Result<&str, PlaceholderError> {
    Ok(match placeholder {
      Placeholder::Out => &self.out,
      Placeholder::Tool => &self.tool,
      Placeholder::Packages => &self.packages,
      Placeholder::CacheFlags => &self.cache_flags,
    })
  }
}

impl CommandInstaller {
  pub fn new(templates: CommandTemplates, site_dir: SnapPath) -> Self {
    Self {
      templates,
      site_dir,
      shell: None,
      env: BTreeMap::new(),
    }
  }

  /// Run commands with `shell` instead of the platform default.
  pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
    self.shell = Some(shell.into());
    self
  }

  /// Extra environment variables for every command.
  pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  fn run_phase(
    &self,
    mut snapshot: Snapshot,
    phase: InstallPhase,
    template: &str,
    tool: &str,
    packages: &[String],
    cache_flags: &str,
  ) -> Result<Snapshot, InstallationError> {
    let staging = tempfile::Builder::new()
      .prefix("envbake-install-")
      .tempdir()
      .map_err(|source| InstallationError::Io {
        path: std::env::temp_dir(),
        source,
      })?;
    let out_dir = staging.path().join("out");
    let tmp_dir = staging.path().join("tmp");
    for dir in [&out_dir, &tmp_dir] {
      fs::create_dir_all(dir).map_err(|source| InstallationError::Io {
        path: dir.clone(),
        source,
      })?;
    }

    let values = TemplateValues {
      out: out_dir.to_string_lossy().into_owned(),
      tool: shell_quote(tool),
      packages: packages.iter().map(|p| shell_quote(p)).collect::<Vec<_>>().join(" "),
      cache_flags: cache_flags.to_string(),
    };
    let cmd = placeholder::substitute(template, &values)?;

    self.execute(phase, &cmd, &out_dir, &tmp_dir)?;

    let installed = read_dist_info(&out_dir)?;
    let written = snapshot.import_dir(&out_dir, &self.site_dir, &|_| false)?;
    for (name, version) in &installed {
      snapshot.record_package(name, version);
    }

    info!(%phase, files = written, packages = installed.len(), "installer output merged");
    Ok(snapshot)
  }

  fn execute(&self, phase: InstallPhase, cmd: &str, out_dir: &Path, tmp_dir: &Path) -> Result<(), InstallationError> {
    info!(%phase, cmd = %cmd, "executing installer command");

    let (program, args) = shell_invocation(self.shell.as_deref());

    let mut command = Command::new(program);
    command
      .args(args)
      .arg(cmd)
      .current_dir(out_dir)
      .env_clear()
      // The installer itself has to be found on the host
      .env("PATH", std::env::var_os("PATH").unwrap_or_default())
      .env("HOME", tmp_dir)
      .env("TMPDIR", tmp_dir)
      .env("TMP", tmp_dir)
      .env("TEMP", tmp_dir)
      .env("out", out_dir)
      .env("LANG", "C")
      .env("LC_ALL", "C")
      // 1980-01-01, the ZIP epoch
      .env("SOURCE_DATE_EPOCH", "315532800");

    for (key, value) in &self.env {
      command.env(key, value);
    }

    debug!(shell = %program, "spawning process");
    let output = command.output().map_err(|source| InstallationError::Io {
      path: PathBuf::from(program),
      source,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.trim().is_empty() {
      debug!(stdout = %stdout.trim(), "command stdout");
    }
    if !stderr.trim().is_empty() {
      debug!(stderr = %stderr.trim(), "command stderr");
    }

    if !output.status.success() {
      return Err(InstallationError::CommandFailed {
        phase,
        cmd: cmd.to_string(),
        code: output.status.code(),
      });
    }

    Ok(())
  }
}

impl Installer for CommandInstaller {
  fn upgrade(&mut self, snapshot: Snapshot, tool: &str) -> Result<Snapshot, InstallationError> {
    self.run_phase(snapshot, InstallPhase::Upgrade, &self.templates.upgrade, tool, &[], "")
  }

  fn install(&mut self, snapshot: Snapshot, requirement: &PackageRequirement) -> Result<Snapshot, InstallationError> {
    let cache_flags = if requirement.no_cache {
      self.templates.no_cache_flag.as_str()
    } else {
      ""
    };
    self.run_phase(
      snapshot,
      InstallPhase::Install,
      &self.templates.install,
      &requirement.tool,
      &requirement.names,
      cache_flags,
    )
  }
}

/// `{name}-{version}.dist-info` entries at the top of `dir`.
fn read_dist_info(dir: &Path) -> Result<BTreeMap<String, String>, InstallationError> {
  let entries = fs::read_dir(dir).map_err(|source| InstallationError::Io {
    path: dir.to_path_buf(),
    source,
  })?;

  let mut found = BTreeMap::new();
  for entry in entries.flatten() {
    let file_name = entry.file_name();
    let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(".dist-info")) else {
      continue;
    };
    if let Some((name, version)) = stem.rsplit_once('-') {
      found.insert(normalize_name(name), version.to_string());
    }
  }
  Ok(found)
}

fn shell_quote(word: &str) -> String {
  if !word.is_empty()
    && word
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
  {
    word.to_string()
  } else {
    format!("'{}'", word.replace('\'', r"'\''"))
  }
}

const POSIX_ARGS: &[&str] = &["-c"];
const POWERSHELL_ARGS: &[&str] = &["-NoProfile", "-NonInteractive", "-Command"];
const CMD_ARGS: &[&str] = &["/C"];

/// Program plus the leading arguments that make it run one command string.
///
/// A configured shell is recognized by its file stem. Without one, commands
/// go to `/bin/sh` (or PowerShell on Windows), never to `$SHELL`.
fn shell_invocation(configured: Option<&str>) -> (&str, &'static [&'static str]) {
  let Some(shell) = configured else {
    return if cfg!(windows) {
      ("powershell.exe", POWERSHELL_ARGS)
    } else {
      ("/bin/sh", POSIX_ARGS)
    };
  };

  let stem = Path::new(shell)
    .file_stem()
    .and_then(|s| s.to_str())
    .unwrap_or(shell)
    .to_ascii_lowercase();
  let args = match stem.as_str() {
    "powershell" | "pwsh" => POWERSHELL_ARGS,
    "cmd" => CMD_ARGS,
    _ => POSIX_ARGS,
  };
  (shell, args)
}
