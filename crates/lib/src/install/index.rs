//! Installer backed by a local package index.
//!
//! ```text
//! {index}/
//! └── requests/
//!     └── 2.31.0/
//!         ├── requires.txt      # optional, one dependency per line
//!         └── requests/...      # files copied into the site directory
//! ```

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::consts::{DEFAULT_FILE_MODE, REQUIRES_FILENAME};
use crate::plan::PackageRequirement;
use crate::snapshot::{SnapPath, Snapshot};
use crate::util::version;

use super::types::{InstallationError, Installer};
use super::normalize_name;

/// A resolved package: normalized name, chosen version, and its directory.
#[derive(Debug, Clone)]
struct Resolved {
  name: String,
  version: String,
  dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct IndexInstaller {
  index: PathBuf,
  site_dir: SnapPath,
}

impl IndexInstaller {
  pub fn new(index: impl Into<PathBuf>, site_dir: SnapPath) -> Self {
    Self {
      index: index.into(),
      site_dir,
    }
  }

  pub fn index(&self) -> &Path {
    &self.index
  }

  /// Latest version of `name`, or `None` when the index doesn't carry it.
  fn lookup(&self, name: &str) -> Result<Option<Resolved>, InstallationError> {
    let name = normalize_name(name);
    if name.is_empty() || name.contains(['/', '\\']) {
      return Ok(None);
    }
    let dir = self.index.join(&name);

    let entries = match fs::read_dir(&dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => return Err(InstallationError::Io { path: dir, source }),
    };

    let mut versions = Vec::new();
    for entry in entries {
      let entry = entry.map_err(|source| InstallationError::Io {
        path: dir.clone(),
        source,
      })?;
      if entry.path().is_dir()
        && let Some(version) = entry.file_name().to_str()
      {
        versions.push(version.to_string());
      }
    }

    Ok(version::latest(versions.iter().map(String::as_str)).map(|version| Resolved {
      dir: dir.join(version),
      version: version.to_string(),
      name,
    }))
  }

  fn requires(dir: &Path) -> Result<Vec<String>, InstallationError> {
    let path = dir.join(REQUIRES_FILENAME);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(source) => return Err(InstallationError::Io { path, source }),
    };

    Ok(
      content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| {
          let end = l.find(['=', '<', '>', '!', '~', ';', '[', ' ']).unwrap_or(l.len());
          l[..end].to_string()
        })
        .filter(|n| !n.is_empty())
        .collect(),
    )
  }

  /// Every package needed for `names`, dependencies before dependents.
  fn resolve_all(&self, names: &[String]) -> Result<Vec<Resolved>, InstallationError> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    for name in names {
      self.visit(name, &mut seen, &mut order)?;
    }
    Ok(order)
  }

  fn visit(&self, name: &str, seen: &mut HashSet<String>, order: &mut Vec<Resolved>) -> Result<(), InstallationError> {
    // A name already seen is either done or on the current path; either way
    // it is not revisited, which also breaks dependency cycles.
    if !seen.insert(normalize_name(name)) {
      return Ok(());
    }

    let resolved = self.lookup(name)?.ok_or_else(|| InstallationError::PackageNotFound {
      name: name.to_string(),
      index: self.index.clone(),
    })?;

    for dep in Self::requires(&resolved.dir)? {
      self.visit(&dep, seen, order)?;
    }
    order.push(resolved);
    Ok(())
  }

  fn place(&self, snapshot: &mut Snapshot, package: &Resolved) -> Result<usize, InstallationError> {
    let written = snapshot.import_dir(&package.dir, &self.site_dir, &|rel: &Path| {
      rel == Path::new(REQUIRES_FILENAME)
    })?;
    snapshot.record_package(&package.name, &package.version);
    Ok(written)
  }
}

impl Installer for IndexInstaller {
  fn upgrade(&mut self, mut snapshot: Snapshot, tool: &str) -> Result<Snapshot, InstallationError> {
    let Some(latest) = self.lookup(tool)? else {
      debug!(tool, "installer not in index, keeping base version");
      return Ok(snapshot);
    };

    let current = snapshot.package_version(&latest.name).map(str::to_string);
    if let Some(current) = &current
      && version::compare(current, &latest.version).is_ge()
    {
      debug!(tool, version = %current, "installer already up to date");
      return Ok(snapshot);
    }

    self.place(&mut snapshot, &latest)?;
    info!(tool, from = ?current, to = %latest.version, "installer upgraded");
    Ok(snapshot)
  }

  fn install(&mut self, mut snapshot: Snapshot, requirement: &PackageRequirement) -> Result<Snapshot, InstallationError> {
    let packages = self.resolve_all(&requirement.names)?;
    debug!(
      requested = requirement.names.len(),
      resolved = packages.len(),
      "package set resolved"
    );

    let cache_dir = SnapPath::absolute("/root/.cache")
      .map(|root| root.join(&requirement.tool))
      .unwrap_or_else(|_| SnapPath::root());

    for package in &packages {
      if snapshot.package_version(&package.name) == Some(package.version.as_str()) {
        debug!(package = %package.name, version = %package.version, "already installed");
        continue;
      }

      let written = self.place(&mut snapshot, package)?;
      debug!(package = %package.name, version = %package.version, files = written, "package installed");

      if !requirement.no_cache {
        let marker = cache_dir.join(&format!("{}-{}.cached", package.name, package.version));
        snapshot.write_file(&marker, package.version.clone().into_bytes(), DEFAULT_FILE_MODE)?;
      }
    }

    info!(count = packages.len(), "packages installed");
    Ok(snapshot)
  }
}
