use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::BaseArtifact;
use crate::plan::Layer;
use crate::util::hash::{ContentHash, ObjectHash};

use super::path::SnapPath;
use super::tree::TreeError;

/// Current on-disk index format.
pub const SNAPSHOT_INDEX_VERSION: u32 = 1;

/// Everything known about a completed bake, stored next to its exported rootfs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
  pub id: String,
  pub created_at: u64,
  pub descriptor_path: Option<PathBuf>,
  pub base: BaseArtifact,
  pub plan_hash: ObjectHash,
  pub content_hash: ContentHash,
  pub layers: Vec<Layer>,
  pub workdir: Option<SnapPath>,
  pub packages: BTreeMap<String, String>,
  pub file_count: usize,
  pub total_bytes: u64,
}

impl SnapshotRecord {
  pub fn to_metadata(&self) -> SnapshotMetadata {
    SnapshotMetadata {
      id: self.id.clone(),
      created_at: self.created_at,
      descriptor_path: self.descriptor_path.clone(),
      base: self.base.to_string(),
      content_hash: self.content_hash.clone(),
      package_count: self.packages.len(),
    }
  }
}

/// Summary kept in the index so listing does not load every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
  pub id: String,
  pub created_at: u64,
  pub descriptor_path: Option<PathBuf>,
  pub base: String,
  pub content_hash: ContentHash,
  pub package_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotIndex {
  pub version: u32,
  pub snapshots: Vec<SnapshotMetadata>,
  pub current: Option<String>,
}

impl Default for SnapshotIndex {
  fn default() -> Self {
    Self::new()
  }
}

impl SnapshotIndex {
  pub fn new() -> Self {
    Self {
      version: SNAPSHOT_INDEX_VERSION,
      snapshots: Vec::new(),
      current: None,
    }
  }

  pub fn len(&self) -> usize {
    self.snapshots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.snapshots.is_empty()
  }

  /// Insert or replace by id, keeping chronological order.
  pub fn add(&mut self, metadata: SnapshotMetadata) {
    self.snapshots.retain(|s| s.id != metadata.id);
    let pos = self
      .snapshots
      .partition_point(|s| (s.created_at, s.id.as_str()) <= (metadata.created_at, metadata.id.as_str()));
    self.snapshots.insert(pos, metadata);
  }

  /// Remove by id, clearing `current` if it pointed there.
  pub fn remove(&mut self, id: &str) {
    self.snapshots.retain(|s| s.id != id);
    if self.current.as_deref() == Some(id) {
      self.current = None;
    }
  }

  pub fn get(&self, id: &str) -> Option<&SnapshotMetadata> {
    self.snapshots.iter().find(|s| s.id == id)
  }

  pub fn set_current(&mut self, id: &str) -> Result<(), SnapshotError> {
    if self.get(id).is_none() {
      return Err(SnapshotError::NotFound(id.to_string()));
    }
    self.current = Some(id.to_string());
    Ok(())
  }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
  #[error("snapshot not found: {0}")]
  NotFound(String),

  #[error("unsupported snapshot index version: {0}")]
  UnsupportedVersion(u32),

  #[error("failed to create snapshot directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to read snapshot data: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write snapshot data: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse snapshot data: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize snapshot data: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("failed to export snapshot tree: {0}")]
  Export(#[source] TreeError),

  #[error("failed to load snapshot tree: {0}")]
  Load(#[source] TreeError),
}

/// Seconds since the Unix epoch.
pub fn now_unix() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

/// Time-ordered unique id: hex nanoseconds since the epoch.
pub fn generate_snapshot_id() -> String {
  let nanos = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_nanos();
  format!("{:x}", nanos)
}
