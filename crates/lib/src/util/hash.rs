//! Plan identity and content hashing.
//!
//! `ObjectHash` keys plans and layers by their serialized form, `ContentHash`
//! is a full SHA-256 over bytes, files or a build context directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::consts::OBJ_HASH_PREFIX_LEN;

pub type HashError = serde_json::Error;

/// A content-addressed hash identifying a plan or a layer.
///
/// The hash is a 20-character truncated SHA-256 of the JSON-serialized struct.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string, e.g., `"a1b2c3d4e5f6789012ab"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    let serialized = serde_json::to_string(self)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    let full = format!("{:x}", hasher.finalize());
    Ok(ObjectHash(full[..OBJ_HASH_PREFIX_LEN].to_string()))
  }
}

/// A full 64-character SHA256 hash for content verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error while hashing a build context on disk.
#[derive(Debug, thiserror::Error)]
pub enum DirHashError {
  #[error("failed to walk {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Hash a directory tree by structure and content.
///
/// Each entry contributes one line (`D:path`, `F:path:sha256` or
/// `L:path:sha256(target)`), sorted by forward-slash relative path.
/// Timestamps and permissions do not take part. `skip` gets each relative
/// path and prunes the entry, and everything under it, when it returns true.
pub fn hash_directory(root: &Path, skip: &dyn Fn(&Path) -> bool) -> Result<ContentHash, DirHashError> {
  let mut lines = Vec::new();

  let walker = WalkDir::new(root)
    .min_depth(1)
    .into_iter()
    .filter_entry(|e| e.path().strip_prefix(root).map_or(true, |rel| !skip(rel)));

  for entry in walker {
    let entry = entry.map_err(|source| DirHashError::Walk {
      path: root.to_path_buf(),
      source,
    })?;
    let path = entry.path();
    let rel = path.strip_prefix(root).unwrap_or(path).to_string_lossy().replace('\\', "/");

    let file_type = entry.file_type();
    let line = if file_type.is_dir() {
      format!("D:{}", rel)
    } else if file_type.is_file() {
      format!("F:{}:{}", rel, hash_file(path)?)
    } else if file_type.is_symlink() {
      let target = fs::read_link(path).map_err(|source| DirHashError::Read {
        path: path.to_path_buf(),
        source,
      })?;
      format!("L:{}:{}", rel, hash_bytes(target.to_string_lossy().as_bytes()))
    } else {
      continue;
    };
    lines.push((rel, line));
  }

  lines.sort_unstable_by(|a, b| a.0.cmp(&b.0));

  let mut hasher = Sha256::new();
  for (_, line) in &lines {
    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }
  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Stream a file through SHA-256.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let read_err = |source| DirHashError::Read {
    path: path.to_path_buf(),
    source,
  };
  let mut file = fs::File::open(path).map_err(read_err)?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher).map_err(read_err)?;
  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(format!("{:x}", Sha256::digest(data)))
}
