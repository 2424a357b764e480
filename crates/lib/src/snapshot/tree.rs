//! The in-memory filesystem snapshot threaded through the pipeline.
//!
//! A [`Snapshot`] is an owned value. Pipeline steps take it by value and hand
//! back the next one, so no step can observe or mutate another step's state.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{trace, warn};
use walkdir::WalkDir;

use crate::consts::{DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};
use crate::descriptor::BaseArtifact;
use crate::util::hash::{ContentHash, hash_bytes};

use super::path::SnapPath;

/// Symlinks followed while resolving one path, as in Linux's `ELOOP` limit.
const MAX_SYMLINK_HOPS: usize = 40;

/// One filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
  Dir { mode: u32 },
  File { mode: u32, data: Vec<u8> },
  Symlink { target: String },
}

impl Node {
  pub fn is_dir(&self) -> bool {
    matches!(self, Node::Dir { .. })
  }

  fn kind(&self) -> &'static str {
    match self {
      Node::Dir { .. } => "directory",
      Node::File { .. } => "file",
      Node::Symlink { .. } => "symlink",
    }
  }
}

#[derive(Debug, Error)]
pub enum TreeError {
  #[error("{path} is a {kind}, not a directory")]
  NotADirectory { path: SnapPath, kind: &'static str },

  #[error("{path} is a directory")]
  IsADirectory { path: SnapPath },

  #[error("{path} is a dangling symlink to '{target}'")]
  DanglingSymlink { path: SnapPath, target: String },

  #[error("too many levels of symbolic links resolving {path}")]
  SymlinkLoop { path: SnapPath },

  #[error("non UTF-8 file name under {0}")]
  InvalidName(PathBuf),

  #[error("io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl TreeError {
  fn io(path: &Path) -> impl FnOnce(io::Error) -> TreeError + '_ {
    move |source| TreeError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

/// Filesystem state plus the image metadata that travels with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
  base: BaseArtifact,
  entries: BTreeMap<SnapPath, Node>,
  workdir: Option<SnapPath>,
  packages: BTreeMap<String, String>,
}

impl Snapshot {
  /// An empty snapshot containing only `/`.
  pub fn new(base: BaseArtifact) -> Self {
    let mut entries = BTreeMap::new();
    entries.insert(SnapPath::root(), Node::Dir { mode: DEFAULT_DIR_MODE });
    Self {
      base,
      entries,
      workdir: None,
      packages: BTreeMap::new(),
    }
  }

  /// Read a host directory tree as the contents of a new snapshot.
  pub fn load(base: BaseArtifact, root: &Path) -> Result<Self, TreeError> {
    let mut snapshot = Self::new(base);
    snapshot.import_dir(root, &SnapPath::root(), &|_| false)?;
    Ok(snapshot)
  }

  pub fn base(&self) -> &BaseArtifact {
    &self.base
  }

  pub fn workdir(&self) -> Option<&SnapPath> {
    self.workdir.as_ref()
  }

  /// Record the working directory. The caller is responsible for having
  /// created it first.
  pub fn set_workdir(&mut self, path: SnapPath) {
    self.workdir = Some(path);
  }

  pub fn packages(&self) -> &BTreeMap<String, String> {
    &self.packages
  }

  pub fn package_version(&self, name: &str) -> Option<&str> {
    self.packages.get(name).map(String::as_str)
  }

  pub fn record_package(&mut self, name: &str, version: &str) {
    self.packages.insert(name.to_string(), version.to_string());
  }

  pub fn get(&self, path: &SnapPath) -> Option<&Node> {
    self.entries.get(path)
  }

  pub fn exists(&self, path: &SnapPath) -> bool {
    self.entries.contains_key(path)
  }

  pub fn is_dir(&self, path: &SnapPath) -> bool {
    self.entries.get(path).is_some_and(Node::is_dir)
  }

  pub fn entries(&self) -> impl Iterator<Item = (&SnapPath, &Node)> {
    self.entries.iter()
  }

  /// Entries at or beneath `prefix`.
  pub fn entries_under<'a>(&'a self, prefix: &'a SnapPath) -> impl Iterator<Item = (&'a SnapPath, &'a Node)> {
    self.entries.iter().filter(move |(p, _)| p.starts_with(prefix))
  }

  pub fn file_count(&self) -> usize {
    self.entries.values().filter(|n| matches!(n, Node::File { .. })).count()
  }

  pub fn total_bytes(&self) -> u64 {
    self
      .entries
      .values()
      .map(|n| match n {
        Node::File { data, .. } => data.len() as u64,
        _ => 0,
      })
      .sum()
  }

  /// Create `path` and every missing ancestor.
  ///
  /// Symlinks along the way are followed inside the snapshot, the way
  /// `mkdir -p` follows them on a real filesystem. Returns how many
  /// directories were created; zero means everything already existed.
  pub fn mkdir_p(&mut self, path: &SnapPath, mode: u32) -> Result<usize, TreeError> {
    self.ensure_dir(path, mode).map(|(_, created)| created)
  }

  /// The path `path` refers to once every symlink in it is followed.
  ///
  /// Missing trailing segments are appended unresolved. A dangling link, a
  /// link to something other than a directory, or a file in the middle of
  /// the path is an error.
  pub fn resolve_path(&self, path: &SnapPath) -> Result<SnapPath, TreeError> {
    let (mut resolved, missing) = self.walk(path, &mut 0)?;
    for segment in &missing {
      resolved = resolved.join(segment);
    }
    Ok(resolved)
  }

  fn ensure_dir(&mut self, path: &SnapPath, mode: u32) -> Result<(SnapPath, usize), TreeError> {
    let (mut dir, missing) = self.walk(path, &mut 0)?;
    for segment in &missing {
      dir = dir.join(segment);
      trace!(path = %dir, "creating directory");
      self.entries.insert(dir.clone(), Node::Dir { mode });
    }
    Ok((dir, missing.len()))
  }

  /// Follow `path` from `/` through existing directories and symlinks.
  ///
  /// Returns the resolved deepest existing directory plus the segments
  /// beneath it that do not exist yet.
  fn walk(&self, path: &SnapPath, hops: &mut usize) -> Result<(SnapPath, Vec<String>), TreeError> {
    let mut current = SnapPath::root();
    let mut segments = path.segments();

    while let Some(segment) = segments.next() {
      let next = current.join(segment);
      match self.entries.get(&next) {
        Some(Node::Dir { .. }) => current = next,
        Some(Node::Symlink { target }) => {
          *hops += 1;
          if *hops > MAX_SYMLINK_HOPS {
            return Err(TreeError::SymlinkLoop { path: path.clone() });
          }
          let (resolved, missing) = self.walk(&current.resolve(target), hops)?;
          if !missing.is_empty() {
            return Err(TreeError::DanglingSymlink {
              path: next,
              target: target.clone(),
            });
          }
          current = resolved;
        }
        Some(other) => {
          return Err(TreeError::NotADirectory {
            path: next,
            kind: other.kind(),
          });
        }
        None => {
          let mut missing = vec![segment.to_string()];
          missing.extend(segments.map(str::to_string));
          return Ok((current, missing));
        }
      }
    }

    Ok((current, Vec::new()))
  }

  /// Write a regular file, creating parent directories.
  ///
  /// Files and symlinks already at `path` are replaced.
  pub fn write_file(&mut self, path: &SnapPath, data: Vec<u8>, mode: u32) -> Result<(), TreeError> {
    let leaf = self.prepare_leaf(path)?;
    self.entries.insert(leaf, Node::File { mode, data });
    Ok(())
  }

  pub fn symlink(&mut self, path: &SnapPath, target: &str) -> Result<(), TreeError> {
    let leaf = self.prepare_leaf(path)?;
    self.entries.insert(
      leaf,
      Node::Symlink {
        target: target.to_string(),
      },
    );
    Ok(())
  }

  /// Create the parent of `path` and return where the leaf really lives.
  fn prepare_leaf(&mut self, path: &SnapPath) -> Result<SnapPath, TreeError> {
    let leaf = match (path.parent(), path.file_name()) {
      (Some(parent), Some(name)) => {
        let (dir, _) = self.ensure_dir(&parent, DEFAULT_DIR_MODE)?;
        dir.join(name)
      }
      _ => path.clone(),
    };
    if self.is_dir(&leaf) {
      return Err(TreeError::IsADirectory { path: path.clone() });
    }
    Ok(leaf)
  }

  /// Copy a host directory tree into the snapshot under `dest`.
  ///
  /// Entries are visited in sorted order. `skip` receives paths relative to
  /// `root`; a skipped directory drops its whole subtree. Returns the number
  /// of entries written.
  pub fn import_dir(&mut self, root: &Path, dest: &SnapPath, skip: &dyn Fn(&Path) -> bool) -> Result<usize, TreeError> {
    let mut written = 0;

    let walker = WalkDir::new(root)
      .follow_links(false)
      .sort_by_file_name()
      .into_iter()
      .filter_entry(|e| match e.path().strip_prefix(root) {
        Ok(rel) if !rel.as_os_str().is_empty() => !skip(rel),
        _ => true,
      });

    for entry in walker {
      let entry = entry.map_err(|e| {
        let path = e.path().unwrap_or(root).to_path_buf();
        TreeError::Io {
          path,
          source: io::Error::other(e.to_string()),
        }
      })?;
      let host_path = entry.path();
      let rel = host_path.strip_prefix(root).unwrap_or(host_path);
      let rel = rel
        .to_str()
        .ok_or_else(|| TreeError::InvalidName(host_path.to_path_buf()))?
        .replace('\\', "/");
      let target = dest.join(&rel);

      let metadata = entry.path().symlink_metadata().map_err(TreeError::io(host_path))?;
      let file_type = metadata.file_type();

      if rel.is_empty() {
        // The destination itself keeps its own mode
        self.mkdir_p(&target, DEFAULT_DIR_MODE)?;
      } else if file_type.is_dir() {
        // Directories that already exist keep their mode
        self.mkdir_p(&target, host_mode(&metadata, DEFAULT_DIR_MODE))?;
      } else if !self.import_file(host_path, &target)? {
        continue;
      }
      written += 1;
    }

    Ok(written)
  }

  /// Copy a single host file or symlink to `target`.
  ///
  /// Returns `false` when the entry is neither (sockets, devices) and was
  /// skipped.
  pub fn import_file(&mut self, host_path: &Path, target: &SnapPath) -> Result<bool, TreeError> {
    let metadata = host_path.symlink_metadata().map_err(TreeError::io(host_path))?;
    let file_type = metadata.file_type();

    if file_type.is_symlink() {
      let link = fs::read_link(host_path).map_err(TreeError::io(host_path))?;
      self.symlink(target, &link.to_string_lossy())?;
    } else if file_type.is_file() {
      let data = fs::read(host_path).map_err(TreeError::io(host_path))?;
      self.write_file(target, data, host_mode(&metadata, DEFAULT_FILE_MODE))?;
    } else {
      warn!(path = %host_path.display(), "skipping special file");
      return Ok(false);
    }
    Ok(true)
  }

  /// Materialize the snapshot into a host directory.
  ///
  /// Directory modes are applied last so read-only directories can still be
  /// populated.
  pub fn export(&self, dest: &Path) -> Result<(), TreeError> {
    fs::create_dir_all(dest).map_err(TreeError::io(dest))?;

    for (path, node) in &self.entries {
      let host = dest.join(path.relative());
      match node {
        Node::Dir { .. } => fs::create_dir_all(&host).map_err(TreeError::io(&host))?,
        Node::File { mode, data } => {
          fs::write(&host, data).map_err(TreeError::io(&host))?;
          set_mode(&host, *mode)?;
        }
        Node::Symlink { target } => create_symlink(target, &host)?,
      }
    }

    for (path, node) in self.entries.iter().rev() {
      if let Node::Dir { mode } = node {
        set_mode(&dest.join(path.relative()), *mode)?;
      }
    }

    Ok(())
  }

  /// Deterministic hash of the snapshot's filesystem and metadata.
  ///
  /// Covers paths, entry kinds, modes, file contents, symlink targets, the
  /// working directory and installed packages. The base reference is not
  /// included: identical trees hash identically wherever they came from.
  pub fn content_hash(&self) -> ContentHash {
    let mut hasher = Sha256::new();

    for (path, node) in &self.entries {
      let line = match node {
        Node::Dir { mode } => format!("D:{}:{:o}", path, mode),
        Node::File { mode, data } => format!("F:{}:{:o}:{}", path, mode, hash_bytes(data)),
        Node::Symlink { target } => format!("L:{}:{}", path, target),
      };
      hasher.update(line.as_bytes());
      hasher.update(b"\n");
    }

    if let Some(workdir) = &self.workdir {
      hasher.update(format!("W:{}\n", workdir).as_bytes());
    }
    for (name, version) in &self.packages {
      hasher.update(format!("P:{}={}\n", name, version).as_bytes());
    }

    ContentHash(format!("{:x}", hasher.finalize()))
  }
}

#[cfg(unix)]
fn host_mode(metadata: &fs::Metadata, _default: u32) -> u32 {
  use std::os::unix::fs::PermissionsExt;
  metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn host_mode(metadata: &fs::Metadata, default: u32) -> u32 {
  if metadata.permissions().readonly() {
    default & !0o222
  } else {
    default
  }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), TreeError> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(TreeError::io(path))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> Result<(), TreeError> {
  let mut perms = fs::metadata(path).map_err(TreeError::io(path))?.permissions();
  perms.set_readonly(mode & 0o222 == 0);
  fs::set_permissions(path, perms).map_err(TreeError::io(path))
}

#[cfg(unix)]
fn create_symlink(target: &str, link: &Path) -> Result<(), TreeError> {
  std::os::unix::fs::symlink(target, link).map_err(TreeError::io(link))
}

#[cfg(not(unix))]
fn create_symlink(target: &str, link: &Path) -> Result<(), TreeError> {
  warn!(link = %link.display(), link_target = %target, "symlinks are not exported on this platform");
  Ok(())
}
