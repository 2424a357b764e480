//! Bake orchestration.
//!
//! [`bake`] is the entry point for `envbake build`:
//!
//! 1. Hash the build context and compute the plan's layer keys
//! 2. Run the pipeline
//! 3. On success, save a [`SnapshotRecord`] and its rootfs under the store lock
//!
//! A failed run stores nothing and leaves `current` untouched.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};

use crate::install::Installer;
use crate::materialize::{BuildContext, CopyError};
use crate::pipeline::{Pipeline, PipelineState, StepFailure, StepReport};
use crate::plan::Plan;
use crate::resolve::ArtifactSource;
use crate::snapshot::{Snapshot, SnapshotError, SnapshotRecord, SnapshotStore, generate_snapshot_id, now_unix};
use crate::store_lock::{LockMode, StoreLock, StoreLockError};
use crate::util::hash::{HashError, Hashable};

#[derive(Debug, Clone)]
pub struct BakeOptions {
  /// Descriptor file the plan came from, recorded in the snapshot.
  pub descriptor_path: Option<PathBuf>,

  /// Persist the snapshot and make it current.
  pub save: bool,

  /// Recorded in the store lock so contending processes can name the holder.
  pub command: String,
}

impl Default for BakeOptions {
  fn default() -> Self {
    Self {
      descriptor_path: None,
      save: true,
      command: "envbake build".to_string(),
    }
  }
}

/// Result of a successful bake.
#[derive(Debug)]
pub struct BakeResult {
  pub record: SnapshotRecord,
  pub snapshot: Snapshot,
  pub reports: Vec<StepReport>,
  pub transitions: Vec<PipelineState>,
  /// Whether the record was written to the store.
  pub saved: bool,
}

#[derive(Debug, Error)]
pub enum BakeError {
  #[error("build context error: {0}")]
  Context(#[from] CopyError),

  #[error("failed to hash plan: {0}")]
  Hash(#[from] HashError),

  /// The pipeline stopped at a step.
  #[error("{failure}")]
  Pipeline {
    failure: StepFailure,
    reports: Vec<StepReport>,
    transitions: Vec<PipelineState>,
  },

  #[error("snapshot error: {0}")]
  Snapshot(#[from] SnapshotError),

  #[error(transparent)]
  Lock(#[from] StoreLockError),
}

/// Run `plan` and, when `options.save` is set, store the resulting snapshot.
pub fn bake(
  plan: &Plan,
  source: &dyn ArtifactSource,
  installer: &mut dyn Installer,
  context: &BuildContext,
  store: &SnapshotStore,
  options: &BakeOptions,
) -> Result<BakeResult, BakeError> {
  info!(base = %plan.base, context = %context.root().display(), "starting bake");

  let plan_hash = plan.compute_hash()?;
  let context_hash = context.content_hash()?;
  let layers = plan.layer_keys(&context_hash)?;
  debug!(plan = %plan_hash, context = %context_hash, layers = layers.len(), "plan hashed");

  let outcome = Pipeline::new(source, installer, context).run(plan);
  let (reports, transitions) = (outcome.reports, outcome.transitions);
  let snapshot = match outcome.result {
    Ok(snapshot) => snapshot,
    Err(failure) => {
      return Err(BakeError::Pipeline {
        failure,
        reports,
        transitions,
      });
    }
  };

  let record = SnapshotRecord {
    id: generate_snapshot_id(),
    created_at: now_unix(),
    descriptor_path: options.descriptor_path.clone(),
    base: plan.base.clone(),
    plan_hash,
    content_hash: snapshot.content_hash(),
    layers,
    workdir: snapshot.workdir().cloned(),
    packages: snapshot.packages().clone(),
    file_count: snapshot.file_count(),
    total_bytes: snapshot.total_bytes(),
  };

  if options.save {
    let _lock = StoreLock::acquire(store.base_path(), LockMode::Exclusive, &options.command)?;
    store.save_and_set_current(&record, &snapshot)?;
    info!(id = %record.id, hash = %record.content_hash, "snapshot saved");
  } else {
    debug!(id = %record.id, "skipping snapshot save");
  }

  Ok(BakeResult {
    record,
    snapshot,
    reports,
    transitions,
    saved: options.save,
  })
}
