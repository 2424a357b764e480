//! Filesystem snapshots and their on-disk store.
//!
//! A [`Snapshot`] is the in-memory state each pipeline step consumes and
//! produces. Completed bakes are persisted by [`SnapshotStore`] as a
//! [`SnapshotRecord`] plus an exported rootfs.

mod diff;
mod path;
mod storage;
mod tree;
mod types;

pub use diff::{TreeDiff, diff};
pub use path::{PathError, SnapPath};
pub use storage::SnapshotStore;
pub use tree::{Node, Snapshot, TreeError};
pub use types::{
  SNAPSHOT_INDEX_VERSION, SnapshotError, SnapshotIndex, SnapshotMetadata, SnapshotRecord, generate_snapshot_id,
  now_unix,
};
