//! Source materialization: copying the build context into the snapshot.
//!
//! The build context is a host directory. A `.bakeignore` file at its root
//! excludes entries, one pattern per line:
//!
//! - `name` matches an entry with that file name anywhere (or that exact
//!   relative path, when the pattern contains `/`)
//! - `dir/` matches a directory and everything beneath it
//! - `*.ext` matches file names ending in `.ext`
//!
//! Blank lines and lines starting with `#` are ignored.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::consts::IGNORE_FILENAME;
use crate::plan::FileCopyDirective;
use crate::snapshot::{SnapPath, Snapshot, TreeError};
use crate::util::hash::{ContentHash, DirHashError, hash_directory};

#[derive(Debug, Error)]
pub enum CopyError {
  #[error("build context {path} is not readable: {source}")]
  ContextUnreadable {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("copy source '{path}' does not exist in build context {context}")]
  SourceMissing { path: String, context: PathBuf },

  #[error("cannot write to {path}: {reason}")]
  DestinationNotWritable {
    path: SnapPath,
    #[source]
    reason: TreeError,
  },

  #[error("failed to read build context: {0}")]
  Read(#[source] TreeError),

  #[error("failed to hash build context: {0}")]
  Hash(#[from] DirHashError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum IgnorePattern {
  /// Matches a file name, or a full relative path when it contains `/`.
  Exact(String),
  /// Matches a relative path and everything beneath it.
  Dir(String),
  /// Matches file names with this suffix.
  Suffix(String),
}

/// Exclusion rules read from `.bakeignore`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreRules {
  patterns: Vec<IgnorePattern>,
}

impl IgnoreRules {
  pub fn parse(text: &str) -> Self {
    let patterns = text
      .lines()
      .map(str::trim)
      .filter(|l| !l.is_empty() && !l.starts_with('#'))
      .map(|l| {
        let l = l.trim_start_matches("./").trim_start_matches('/');
        if let Some(ext) = l.strip_prefix('*') {
          IgnorePattern::Suffix(ext.to_string())
        } else if let Some(dir) = l.strip_suffix('/') {
          IgnorePattern::Dir(dir.to_string())
        } else {
          IgnorePattern::Exact(l.to_string())
        }
      })
      .collect();
    Self { patterns }
  }

  pub fn is_empty(&self) -> bool {
    self.patterns.is_empty()
  }

  /// Whether `rel`, a `/`-separated path relative to the context root, is excluded.
  pub fn is_ignored(&self, rel: &str) -> bool {
    let name = rel.rsplit('/').next().unwrap_or(rel);
    self.patterns.iter().any(|pattern| match pattern {
      IgnorePattern::Exact(p) if p.contains('/') => rel == p,
      IgnorePattern::Exact(p) => name == p,
      IgnorePattern::Dir(p) if p.contains('/') => rel == p || rel.starts_with(&format!("{}/", p)),
      IgnorePattern::Dir(p) => rel.split('/').any(|segment| segment == p),
      IgnorePattern::Suffix(s) => name.ends_with(s.as_str()),
    })
  }
}

/// The host directory sources are copied from.
#[derive(Debug, Clone)]
pub struct BuildContext {
  root: PathBuf,
  ignore: IgnoreRules,
}

impl BuildContext {
  /// Canonicalize `root` and load its `.bakeignore`, if any.
  pub fn open(root: &Path) -> Result<Self, CopyError> {
    let unreadable = |source| CopyError::ContextUnreadable {
      path: root.to_path_buf(),
      source,
    };

    let root = dunce::canonicalize(root).map_err(unreadable)?;
    fs::read_dir(&root).map_err(|source| CopyError::ContextUnreadable {
      path: root.clone(),
      source,
    })?;

    let ignore_path = root.join(IGNORE_FILENAME);
    let ignore = match fs::read_to_string(&ignore_path) {
      Ok(text) => IgnoreRules::parse(&text),
      Err(e) if e.kind() == io::ErrorKind::NotFound => IgnoreRules::default(),
      Err(source) => {
        return Err(CopyError::ContextUnreadable {
          path: ignore_path,
          source,
        });
      }
    };

    debug!(root = %root.display(), ignore_patterns = ignore.patterns.len(), "build context opened");
    Ok(Self { root, ignore })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn ignore(&self) -> &IgnoreRules {
    &self.ignore
  }

  fn is_ignored(&self, rel: &Path) -> bool {
    let rel = rel.to_string_lossy().replace('\\', "/");
    self.ignore.is_ignored(&rel)
  }

  /// Hash of every non-ignored file in the context.
  pub fn content_hash(&self) -> Result<ContentHash, CopyError> {
    Ok(hash_directory(&self.root, &|rel| self.is_ignored(rel))?)
  }
}

/// Copy one directive's source from `context` into `snapshot`.
///
/// A directory source copies its contents into the destination. A file
/// source replaces the destination, or lands inside it when the destination
/// is a directory.
pub fn materialize(
  mut snapshot: Snapshot,
  context: &BuildContext,
  directive: &FileCopyDirective,
) -> Result<Snapshot, CopyError> {
  let missing = || CopyError::SourceMissing {
    path: directive.source.clone(),
    context: context.root.clone(),
  };

  let is_root = directive.source == ".";
  if !is_root && context.ignore.is_ignored(&directive.source) {
    return Err(missing());
  }

  let host_path = if is_root {
    context.root.clone()
  } else {
    context.root.join(&directive.source)
  };
  let metadata = host_path.symlink_metadata().map_err(|_| missing())?;
  let dest = &directive.destination;

  if metadata.is_dir() {
    // Destination must be, or lead to, a directory
    snapshot.resolve_path(dest).map_err(|e| classify(dest, e))?;

    let prefix = if is_root { PathBuf::new() } else { PathBuf::from(&directive.source) };
    let written = snapshot
      .import_dir(&host_path, dest, &|rel| context.is_ignored(&prefix.join(rel)))
      .map_err(|e| classify(dest, e))?;
    info!(source = %directive.source, destination = %dest, entries = written, "source copied");
  } else {
    let target = match host_path.file_name().and_then(|n| n.to_str()) {
      Some(name) if directive.into_dir || resolves_to_dir(&snapshot, dest) => dest.join(name),
      _ => dest.clone(),
    };
    snapshot
      .import_file(&host_path, &target)
      .map_err(|e| classify(&target, e))?;
    info!(source = %directive.source, destination = %target, "file copied");
  }

  Ok(snapshot)
}

fn resolves_to_dir(snapshot: &Snapshot, path: &SnapPath) -> bool {
  snapshot.resolve_path(path).is_ok_and(|resolved| snapshot.is_dir(&resolved))
}

/// Tree conflicts are the destination's fault; io errors are the context's.
fn classify(dest: &SnapPath, error: TreeError) -> CopyError {
  match error {
    TreeError::NotADirectory { .. }
    | TreeError::IsADirectory { .. }
    | TreeError::DanglingSymlink { .. }
    | TreeError::SymlinkLoop { .. } => CopyError::DestinationNotWritable {
      path: dest.clone(),
      reason: error,
    },
    other => CopyError::Read(other),
  }
}
