//! Snapshot storage for envbake.
//!
//! Handles reading and writing baked snapshots to disk.
//!
//! # Storage Layout
//!
//! ```text
//! {data_dir}/snapshots/
//! ├── index.json          # SnapshotIndex: list + current pointer
//! ├── <id>.json           # Individual SnapshotRecord files
//! └── <id>/rootfs/        # Exported filesystem of the snapshot
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::consts::ARTIFACT_ROOTFS_DIR;
use crate::paths::snapshots_dir;

use super::tree::Snapshot;
use super::types::{SNAPSHOT_INDEX_VERSION, SnapshotError, SnapshotIndex, SnapshotMetadata, SnapshotRecord};

/// Index file name.
const INDEX_FILENAME: &str = "index.json";

/// Manages snapshot storage on disk.
///
/// Records and the index are written atomically (temp file, then rename).
#[derive(Debug, Clone)]
pub struct SnapshotStore {
  base_path: PathBuf,
}

impl SnapshotStore {
  pub fn new(base_path: PathBuf) -> Self {
    Self { base_path }
  }

  pub fn base_path(&self) -> &Path {
    &self.base_path
  }

  /// Store at the platform data directory, e.g. `~/.local/share/envbake/snapshots`.
  pub fn default_store() -> Self {
    Self::new(snapshots_dir())
  }

  fn index_path(&self) -> PathBuf {
    self.base_path.join(INDEX_FILENAME)
  }

  fn record_path(&self, id: &str) -> PathBuf {
    self.base_path.join(format!("{}.json", id))
  }

  /// Host directory holding the exported filesystem of snapshot `id`.
  pub fn rootfs_path(&self, id: &str) -> PathBuf {
    self.base_path.join(id).join(ARTIFACT_ROOTFS_DIR)
  }

  fn ensure_dir(&self) -> Result<(), SnapshotError> {
    fs::create_dir_all(&self.base_path).map_err(SnapshotError::CreateDir)
  }

  /// Load the snapshot index.
  ///
  /// Returns an empty index if the file doesn't exist.
  pub fn load_index(&self) -> Result<SnapshotIndex, SnapshotError> {
    let content = match fs::read_to_string(self.index_path()) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SnapshotIndex::new()),
      Err(e) => return Err(SnapshotError::Read(e)),
    };

    let index: SnapshotIndex = serde_json::from_str(&content).map_err(SnapshotError::Parse)?;

    if index.version != SNAPSHOT_INDEX_VERSION {
      return Err(SnapshotError::UnsupportedVersion(index.version));
    }

    Ok(index)
  }

  fn save_index(&self, index: &SnapshotIndex) -> Result<(), SnapshotError> {
    self.ensure_dir()?;
    let content = serde_json::to_string_pretty(index).map_err(SnapshotError::Serialize)?;
    write_atomic(&self.index_path(), &content)
  }

  pub fn current_id(&self) -> Result<Option<String>, SnapshotError> {
    Ok(self.load_index()?.current)
  }

  /// Load the most recently saved-as-current record, if any.
  pub fn load_current(&self) -> Result<Option<SnapshotRecord>, SnapshotError> {
    match self.load_index()?.current {
      Some(id) => Ok(Some(self.load_record(&id)?)),
      None => Ok(None),
    }
  }

  pub fn load_record(&self, id: &str) -> Result<SnapshotRecord, SnapshotError> {
    let content = fs::read_to_string(self.record_path(id)).map_err(|e| {
      if e.kind() == io::ErrorKind::NotFound {
        SnapshotError::NotFound(id.to_string())
      } else {
        SnapshotError::Read(e)
      }
    })?;

    serde_json::from_str(&content).map_err(SnapshotError::Parse)
  }

  /// Rebuild the in-memory snapshot from a stored record and its rootfs.
  pub fn load_tree(&self, record: &SnapshotRecord) -> Result<Snapshot, SnapshotError> {
    let rootfs = self.rootfs_path(&record.id);
    if !rootfs.is_dir() {
      return Err(SnapshotError::NotFound(record.id.clone()));
    }
    let mut snapshot = Snapshot::load(record.base.clone(), &rootfs).map_err(SnapshotError::Load)?;
    if let Some(workdir) = &record.workdir {
      snapshot.set_workdir(workdir.clone());
    }
    for (name, version) in &record.packages {
      snapshot.record_package(name, version);
    }
    Ok(snapshot)
  }

  /// Save a record and export its filesystem.
  ///
  /// Does NOT set the snapshot as current; use `set_current` for that.
  pub fn save_snapshot(&self, record: &SnapshotRecord, tree: &Snapshot) -> Result<(), SnapshotError> {
    self.write_snapshot(record, tree)?;

    let mut index = self.load_index()?;
    index.add(record.to_metadata());
    self.save_index(&index)
  }

  /// Save a record, export its filesystem and point `current` at it.
  pub fn save_and_set_current(&self, record: &SnapshotRecord, tree: &Snapshot) -> Result<(), SnapshotError> {
    self.write_snapshot(record, tree)?;

    let mut index = self.load_index()?;
    index.add(record.to_metadata());
    index.current = Some(record.id.clone());
    self.save_index(&index)
  }

  fn write_snapshot(&self, record: &SnapshotRecord, tree: &Snapshot) -> Result<(), SnapshotError> {
    self.ensure_dir()?;

    let rootfs = self.rootfs_path(&record.id);
    remove_dir_if_exists(&rootfs)?;
    debug!(id = %record.id, path = %rootfs.display(), "exporting snapshot tree");
    tree.export(&rootfs).map_err(SnapshotError::Export)?;

    let content = serde_json::to_string_pretty(record).map_err(SnapshotError::Serialize)?;
    write_atomic(&self.record_path(&record.id), &content)
  }

  /// Returns an error if the snapshot doesn't exist.
  pub fn set_current(&self, id: &str) -> Result<(), SnapshotError> {
    if !self.record_path(id).exists() {
      return Err(SnapshotError::NotFound(id.to_string()));
    }

    let mut index = self.load_index()?;
    index.set_current(id)?;
    self.save_index(&index)
  }

  /// Clear the current pointer without removing any snapshots.
  pub fn clear_current(&self) -> Result<(), SnapshotError> {
    let mut index = self.load_index()?;
    index.current = None;
    self.save_index(&index)
  }

  /// All snapshots, oldest first.
  pub fn list(&self) -> Result<Vec<SnapshotMetadata>, SnapshotError> {
    Ok(self.load_index()?.snapshots)
  }

  /// Delete a snapshot's record and rootfs, and drop it from the index.
  ///
  /// Deleting an unknown id succeeds.
  pub fn delete_snapshot(&self, id: &str) -> Result<(), SnapshotError> {
    match fs::remove_file(self.record_path(id)) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(SnapshotError::Write(e)),
    }
    remove_dir_if_exists(&self.base_path.join(id))?;

    let mut index = self.load_index()?;
    index.remove(id);
    self.save_index(&index)
  }
}

fn write_atomic(path: &Path, content: &str) -> Result<(), SnapshotError> {
  let mut temp_path = path.as_os_str().to_owned();
  temp_path.push(".tmp");
  let temp_path = PathBuf::from(temp_path);

  fs::write(&temp_path, content).map_err(SnapshotError::Write)?;
  fs::rename(&temp_path, path).map_err(SnapshotError::Write)
}

fn remove_dir_if_exists(path: &Path) -> Result<(), SnapshotError> {
  if !path.exists() {
    return Ok(());
  }
  make_writable(path);
  fs::remove_dir_all(path).map_err(SnapshotError::Write)
}

/// Exported trees may contain read-only directories.
#[cfg(unix)]
fn make_writable(path: &Path) {
  use std::os::unix::fs::PermissionsExt;

  for entry in walkdir::WalkDir::new(path).follow_links(false).into_iter().flatten() {
    if entry.file_type().is_dir() {
      let _ = fs::set_permissions(entry.path(), fs::Permissions::from_mode(0o755));
    }
  }
}

#[cfg(not(unix))]
fn make_writable(path: &Path) {
  for entry in walkdir::WalkDir::new(path).follow_links(false).into_iter().flatten() {
    if let Ok(meta) = entry.metadata() {
      let mut perms = meta.permissions();
      if perms.readonly() {
        perms.set_readonly(false);
        let _ = fs::set_permissions(entry.path(), perms);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use super::*;
  use crate::descriptor::BaseArtifact;
  use crate::snapshot::SnapPath;
  use crate::util::hash::ObjectHash;
  use tempfile::TempDir;

  fn temp_store() -> (TempDir, SnapshotStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = SnapshotStore::new(temp_dir.path().to_path_buf());
    (temp_dir, store)
  }

  fn base() -> BaseArtifact {
    BaseArtifact::new("python", "3.11", Some("slim"))
  }

  fn make_tree() -> Snapshot {
    let mut tree = Snapshot::new(base());
    tree
      .write_file(&SnapPath::absolute("/app/main.py").unwrap(), b"print('hi')".to_vec(), 0o644)
      .unwrap();
    tree.set_workdir(SnapPath::absolute("/app").unwrap());
    tree.record_package("pip", "24.0");
    tree
  }

  fn make_record(id: &str, tree: &Snapshot) -> SnapshotRecord {
    SnapshotRecord {
      id: id.to_string(),
      created_at: 1000,
      descriptor_path: None,
      base: base(),
      plan_hash: ObjectHash("p".repeat(20)),
      content_hash: tree.content_hash(),
      layers: Vec::new(),
      workdir: tree.workdir().cloned(),
      packages: tree.packages().clone(),
      file_count: tree.file_count(),
      total_bytes: tree.total_bytes(),
    }
  }

  #[test]
  fn load_index_empty_when_not_exists() {
    let (_temp, store) = temp_store();
    let index = store.load_index().unwrap();
    assert!(index.is_empty());
    assert!(index.current.is_none());
  }

  #[test]
  fn save_and_load_record_roundtrip() {
    let (_temp, store) = temp_store();
    let tree = make_tree();
    let record = make_record("test123", &tree);

    store.save_snapshot(&record, &tree).unwrap();
    let loaded = store.load_record("test123").unwrap();

    assert_eq!(record, loaded);
    assert!(store.rootfs_path("test123").join("app/main.py").is_file());
  }

  #[test]
  fn load_tree_reproduces_content_hash() {
    let (_temp, store) = temp_store();
    let tree = make_tree();
    let record = make_record("abc", &tree);
    store.save_snapshot(&record, &tree).unwrap();

    let loaded = store.load_tree(&record).unwrap();
    assert_eq!(loaded.content_hash(), record.content_hash);
    assert_eq!(loaded.package_version("pip"), Some("24.0"));
  }

  #[test]
  fn load_record_not_found() {
    let (_temp, store) = temp_store();
    let result = store.load_record("nonexistent");
    assert!(matches!(result, Err(SnapshotError::NotFound(_))));
  }

  #[test]
  fn save_and_set_current() {
    let (_temp, store) = temp_store();
    let tree = make_tree();

    store.save_and_set_current(&make_record("test123", &tree), &tree).unwrap();

    assert_eq!(store.current_id().unwrap(), Some("test123".to_string()));
    assert_eq!(store.load_current().unwrap().unwrap().id, "test123");
  }

  #[test]
  fn set_current_validates_exists() {
    let (_temp, store) = temp_store();
    let result = store.set_current("nonexistent");
    assert!(matches!(result, Err(SnapshotError::NotFound(_))));
  }

  #[test]
  fn list_snapshots_in_order() {
    let (_temp, store) = temp_store();
    let tree = make_tree();

    let mut snap1 = make_record("first", &tree);
    snap1.created_at = 1000;
    let mut snap2 = make_record("second", &tree);
    snap2.created_at = 2000;
    let mut snap3 = make_record("third", &tree);
    snap3.created_at = 3000;

    store.save_snapshot(&snap2, &tree).unwrap();
    store.save_snapshot(&snap1, &tree).unwrap();
    store.save_snapshot(&snap3, &tree).unwrap();

    let ids: Vec<String> = store.list().unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["first", "second", "third"]);
  }

  #[test]
  fn delete_removes_record_and_rootfs() {
    let (_temp, store) = temp_store();
    let tree = make_tree();

    store.save_and_set_current(&make_record("test123", &tree), &tree).unwrap();
    store.delete_snapshot("test123").unwrap();

    let index = store.load_index().unwrap();
    assert!(index.is_empty());
    assert!(index.current.is_none());
    assert!(store.load_record("test123").is_err());
    assert!(!store.base_path().join("test123").exists());
  }

  #[cfg(unix)]
  #[test]
  fn delete_handles_read_only_directories() {
    let (_temp, store) = temp_store();
    let mut tree = make_tree();
    tree.mkdir_p(&SnapPath::absolute("/locked").unwrap(), 0o555).unwrap();
    store.save_snapshot(&make_record("ro", &tree), &tree).unwrap();

    store.delete_snapshot("ro").unwrap();
    assert!(!store.base_path().join("ro").exists());
  }

  #[test]
  fn delete_nonexistent_succeeds() {
    let (_temp, store) = temp_store();
    store.delete_snapshot("nonexistent").unwrap();
  }

  #[test]
  fn clear_current_keeps_snapshot() {
    let (_temp, store) = temp_store();
    let tree = make_tree();
    store.save_and_set_current(&make_record("test123", &tree), &tree).unwrap();

    store.clear_current().unwrap();

    assert!(store.current_id().unwrap().is_none());
    assert!(store.load_record("test123").is_ok());
    assert_eq!(store.list().unwrap().len(), 1);
  }

  #[test]
  fn load_index_handles_corrupted_json() {
    let (temp, store) = temp_store();
    fs::write(temp.path().join(INDEX_FILENAME), "not valid json {{{").unwrap();
    assert!(matches!(store.load_index(), Err(SnapshotError::Parse(_))));
  }

  #[test]
  fn load_index_handles_unsupported_version() {
    let (temp, store) = temp_store();
    fs::write(
      temp.path().join(INDEX_FILENAME),
      r#"{"version": 99999, "snapshots": [], "current": null}"#,
    )
    .unwrap();

    let result = store.load_index();
    assert!(matches!(result, Err(SnapshotError::UnsupportedVersion(99999))));
  }

  #[test]
  fn load_current_handles_missing_record_file() {
    let (temp, store) = temp_store();
    let mut index = SnapshotIndex::new();
    index.add(SnapshotMetadata {
      id: "gone".to_string(),
      created_at: 12345,
      descriptor_path: None,
      base: "python:3.11-slim".to_string(),
      content_hash: make_tree().content_hash(),
      package_count: 0,
    });
    index.current = Some("gone".to_string());
    fs::write(
      temp.path().join(INDEX_FILENAME),
      serde_json::to_string_pretty(&index).unwrap(),
    )
    .unwrap();

    assert!(matches!(store.load_current(), Err(SnapshotError::NotFound(_))));
  }

  #[test]
  fn load_record_handles_wrong_schema() {
    let (temp, store) = temp_store();
    fs::write(temp.path().join("weird.json"), r#"{"unexpected": "structure"}"#).unwrap();
    assert!(matches!(store.load_record("weird"), Err(SnapshotError::Parse(_))));
  }

  #[test]
  fn packages_survive_roundtrip() {
    let (_temp, store) = temp_store();
    let tree = make_tree();
    let record = make_record("pk", &tree);
    store.save_snapshot(&record, &tree).unwrap();

    let expected: BTreeMap<String, String> = [("pip".to_string(), "24.0".to_string())].into();
    assert_eq!(store.load_record("pk").unwrap().packages, expected);
  }
}
