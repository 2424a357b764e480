//! Base artifact resolution.
//!
//! An [`ArtifactSource`] turns a [`BaseArtifact`] identifier into the initial
//! [`Snapshot`]. The stock source reads artifacts unpacked on disk:
//!
//! ```text
//! {root}/
//! └── python/
//!     └── 3.11-slim/
//!         ├── artifact.json   # optional: {"packages": {"pip": "23.0.1"}}
//!         └── rootfs/         # the filesystem
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::consts::{ARTIFACT_METADATA_FILENAME, ARTIFACT_ROOTFS_DIR};
use crate::descriptor::{BaseArtifact, ReferenceError};
use crate::snapshot::{Snapshot, TreeError};

#[derive(Debug, Error)]
pub enum ResolutionError {
  #[error("base artifact {reference} cannot be resolved: {source}")]
  InvalidReference {
    reference: BaseArtifact,
    #[source]
    source: ReferenceError,
  },

  #[error("base artifact {reference} not found (looked in {path})")]
  NotFound { reference: BaseArtifact, path: PathBuf },

  #[error("base artifact {reference} could not be read: {source}")]
  Unreadable {
    reference: BaseArtifact,
    #[source]
    source: TreeError,
  },

  #[error("failed to read artifact metadata {path}: {source}")]
  MetadataUnreadable {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid artifact metadata {path}: {source}")]
  InvalidMetadata {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// Somewhere base artifacts can be fetched from.
///
/// Resolving the same identifier twice must yield equal snapshots.
pub trait ArtifactSource {
  fn resolve(&self, base: &BaseArtifact) -> Result<Snapshot, ResolutionError>;
}

/// Metadata shipped next to an artifact's rootfs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
  /// Packages preinstalled in the image, name to version.
  #[serde(default)]
  pub packages: BTreeMap<String, String>,
}

/// Artifacts unpacked under a local directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
  root: PathBuf,
}

impl DirectorySource {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// `{root}/{name}/{version}[-{variant}]`
  pub fn artifact_dir(&self, base: &BaseArtifact) -> PathBuf {
    self.root.join(&base.name).join(base.tag())
  }

  fn read_metadata(dir: &Path) -> Result<ArtifactMetadata, ResolutionError> {
    let path = dir.join(ARTIFACT_METADATA_FILENAME);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ArtifactMetadata::default()),
      Err(source) => return Err(ResolutionError::MetadataUnreadable { path, source }),
    };
    serde_json::from_str(&content).map_err(|source| ResolutionError::InvalidMetadata { path, source })
  }
}

impl ArtifactSource for DirectorySource {
  fn resolve(&self, base: &BaseArtifact) -> Result<Snapshot, ResolutionError> {
    // Hand-built identifiers get the same checks as parsed ones
    base
      .to_string()
      .parse::<BaseArtifact>()
      .map_err(|source| ResolutionError::InvalidReference {
        reference: base.clone(),
        source,
      })?;
    let dir = self.artifact_dir(base);
    let rootfs = dir.join(ARTIFACT_ROOTFS_DIR);
    debug!(base = %base, path = %rootfs.display(), "resolving base artifact");

    if !rootfs.is_dir() {
      return Err(ResolutionError::NotFound {
        reference: base.clone(),
        path: dir,
      });
    }

    let metadata = Self::read_metadata(&dir)?;
    let mut snapshot = Snapshot::load(base.clone(), &rootfs).map_err(|source| ResolutionError::Unreadable {
      reference: base.clone(),
      source,
    })?;
    for (name, version) in &metadata.packages {
      snapshot.record_package(name, version);
    }

    info!(
      base = %base,
      files = snapshot.file_count(),
      packages = snapshot.packages().len(),
      "base artifact resolved"
    );
    Ok(snapshot)
  }
}

/// Resolve `base` through `source`.
pub fn resolve_base(source: &dyn ArtifactSource, base: &BaseArtifact) -> Result<Snapshot, ResolutionError> {
  source.resolve(base)
}
