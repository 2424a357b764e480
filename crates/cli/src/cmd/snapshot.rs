use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use serde::Serialize;
use tracing::{debug, info};

use envbake_lib::snapshot::{SnapshotRecord, SnapshotStore, TreeDiff, diff};
use envbake_lib::store_lock::{LockMode, StoreLock};

use crate::output::{
  OutputFormat, PathChange, print_error, print_info, print_json, print_path_change, print_stat, print_success,
  print_warning, short_hash, symbols,
};
use crate::prompts::confirm_deletion;

#[derive(Subcommand, Debug)]
pub enum SnapshotCommand {
  /// List all snapshots
  List {
    /// Show additional details (descriptor path, content hash)
    #[arg(short, long)]
    verbose: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Show details of a specific snapshot
  Show {
    /// Snapshot ID to show (default: current)
    id: Option<String>,

    /// Include installed packages and layer keys
    #[arg(short, long)]
    verbose: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Delete snapshots
  Delete {
    /// Snapshot IDs to delete
    ids: Vec<String>,

    /// Delete snapshots older than this duration (e.g., "7d", "24h", "2w")
    #[arg(long, value_parser = humantime::parse_duration)]
    older_than: Option<Duration>,

    /// Also delete the current snapshot if selected
    #[arg(long)]
    include_current: bool,

    /// Preview what would be deleted without actually deleting
    #[arg(long)]
    dry_run: bool,

    /// Skip confirmation prompt
    #[arg(long)]
    force: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Write a snapshot's filesystem to a directory
  Export {
    /// Snapshot ID to export
    id: String,

    /// Destination directory (must not exist or be empty)
    dest: PathBuf,
  },

  /// Compare the filesystems of two snapshots
  Diff {
    /// Older snapshot (default: the one before current)
    from: Option<String>,

    /// Newer snapshot (default: current)
    to: Option<String>,

    /// List every changed path
    #[arg(short, long)]
    verbose: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

#[derive(Debug, Serialize)]
struct DeleteResult {
  deleted: Vec<String>,
  failed: Vec<DeleteFailure>,
  skipped_current: Option<String>,
  dry_run: bool,
}

#[derive(Debug, Serialize)]
struct DeleteFailure {
  id: String,
  error: String,
}

pub fn cmd_snapshot(command: SnapshotCommand) -> Result<()> {
  match command {
    SnapshotCommand::List { verbose, output } => cmd_list(verbose, output),
    SnapshotCommand::Show { id, verbose, output } => cmd_show(id.as_deref(), verbose, output),
    SnapshotCommand::Delete {
      ids,
      older_than,
      include_current,
      dry_run,
      force,
      output,
    } => cmd_delete(ids, older_than, include_current, dry_run, force, output),
    SnapshotCommand::Export { id, dest } => cmd_export(&id, &dest),
    SnapshotCommand::Diff {
      from,
      to,
      verbose,
      output,
    } => cmd_diff(from, to, verbose, output),
  }
}

fn cmd_list(verbose: bool, output: OutputFormat) -> Result<()> {
  let store = SnapshotStore::default_store();

  let mut snapshots = store.list()?;
  let current_id = store.current_id()?;

  snapshots.reverse();

  if output.is_json() {
    #[derive(Serialize)]
    struct ListOutput {
      snapshots: Vec<SnapshotListItem>,
      current: Option<String>,
    }

    #[derive(Serialize)]
    struct SnapshotListItem {
      id: String,
      created_at: u64,
      is_current: bool,
      base: String,
      content_hash: String,
      package_count: usize,
      #[serde(skip_serializing_if = "Option::is_none")]
      descriptor_path: Option<String>,
    }

    let items: Vec<SnapshotListItem> = snapshots
      .iter()
      .map(|s| SnapshotListItem {
        id: s.id.clone(),
        created_at: s.created_at,
        is_current: current_id.as_ref() == Some(&s.id),
        base: s.base.clone(),
        content_hash: s.content_hash.0.clone(),
        package_count: s.package_count,
        descriptor_path: s.descriptor_path.as_ref().map(|p| p.display().to_string()),
      })
      .collect();

    print_json(&ListOutput {
      snapshots: items,
      current: current_id,
    })?;
  } else {
    if snapshots.is_empty() {
      print_info("No snapshots found");
      return Ok(());
    }

    for snapshot in &snapshots {
      let is_current = current_id.as_ref() == Some(&snapshot.id);
      let current_marker = if is_current { " (current)" } else { "" };
      let timestamp = format_timestamp(snapshot.created_at);

      if verbose {
        let descriptor_str = snapshot
          .descriptor_path
          .as_ref()
          .map(|p| format!(" descriptor={}", p.display()))
          .unwrap_or_default();

        println!(
          "{}{} - {} {}{} (packages: {}, hash: {})",
          snapshot.id,
          current_marker,
          timestamp,
          snapshot.base,
          descriptor_str,
          snapshot.package_count,
          short_hash(&snapshot.content_hash.0)
        );
      } else {
        println!("{}{} - {} {}", snapshot.id, current_marker, timestamp, snapshot.base);
      }
    }

    print_info(&format!("{} snapshot(s) total", snapshots.len()));
  }

  Ok(())
}

/// Load `id`, or the current snapshot when `id` is `None`.
fn load_record(store: &SnapshotStore, id: Option<&str>) -> Result<SnapshotRecord> {
  match id {
    Some(id) => store
      .load_record(id)
      .with_context(|| format!("Failed to load snapshot: {}", id)),
    None => store
      .load_current()
      .context("Failed to load current snapshot")?
      .context("No current snapshot set"),
  }
}

fn cmd_show(id: Option<&str>, verbose: bool, output: OutputFormat) -> Result<()> {
  let store = SnapshotStore::default_store();

  let record = load_record(&store, id)?;
  let is_current = store.current_id()?.as_ref() == Some(&record.id);

  if output.is_json() {
    #[derive(Serialize)]
    struct ShowOutput<'a> {
      #[serde(flatten)]
      record: &'a SnapshotRecord,
      is_current: bool,
      rootfs: String,
    }

    return print_json(&ShowOutput {
      record: &record,
      is_current,
      rootfs: store.rootfs_path(&record.id).display().to_string(),
    });
  }

  let current_marker = if is_current { " (current)" } else { "" };
  println!("Snapshot: {}{}", record.id, current_marker);
  print_stat("Created", &format_timestamp(record.created_at));
  print_stat("Base", &record.base.to_string());
  if let Some(descriptor) = &record.descriptor_path {
    print_stat("Descriptor", &descriptor.display().to_string());
  }
  if let Some(workdir) = &record.workdir {
    print_stat("Workdir", workdir.as_str());
  }
  print_stat("Plan hash", &record.plan_hash.0);
  print_stat("Content hash", &record.content_hash.0);
  print_stat("Packages", &record.packages.len().to_string());
  print_stat("Files", &record.file_count.to_string());
  print_stat("Rootfs", &store.rootfs_path(&record.id).display().to_string());

  if verbose {
    if !record.packages.is_empty() {
      println!("\nPackages:");
      for (name, version) in &record.packages {
        println!("  {} {}", name, version);
      }
    }

    println!("\nLayers:");
    for layer in &record.layers {
      println!("  {} [{}] {}", short_hash(&layer.key.0), layer.stage, layer.description);
    }
  }

  Ok(())
}

fn cmd_delete(
  ids: Vec<String>,
  older_than: Option<Duration>,
  include_current: bool,
  dry_run: bool,
  force: bool,
  output: OutputFormat,
) -> Result<()> {
  let store = SnapshotStore::default_store();

  let mut candidates: Vec<String> = ids;
  let current_id = store.current_id()?;

  if let Some(duration) = older_than {
    let now = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_secs())
      .unwrap_or(0);
    let cutoff = now.saturating_sub(duration.as_secs());

    for snapshot in store.list()? {
      if snapshot.created_at < cutoff && !candidates.contains(&snapshot.id) {
        candidates.push(snapshot.id);
      }
    }
  }

  let mut skipped_current: Option<String> = None;
  if !include_current
    && let Some(ref current) = current_id
    && candidates.contains(current)
  {
    skipped_current = Some(current.clone());
    candidates.retain(|id| id != current);
  }

  if candidates.is_empty() {
    if output.is_json() {
      print_json(&DeleteResult {
        deleted: vec![],
        failed: vec![],
        skipped_current,
        dry_run,
      })?;
    } else if skipped_current.is_some() {
      print_warning("Refusing to delete the current snapshot. Use --include-current.");
    } else {
      print_info("No snapshots to delete");
    }
    return Ok(());
  }

  if !output.is_json() {
    if dry_run {
      print_info("Dry run - the following snapshots would be deleted:");
    } else {
      println!("The following snapshots will be deleted:");
    }
    for id in &candidates {
      println!("  {}", id);
    }
    if let Some(ref current) = skipped_current {
      print_warning(&format!("Skipping current snapshot: {} (use --include-current)", current));
    }
  }

  if dry_run {
    if output.is_json() {
      print_json(&DeleteResult {
        deleted: candidates,
        failed: vec![],
        skipped_current,
        dry_run: true,
      })?;
    } else {
      print_info("Dry run - no changes made");
    }
    return Ok(());
  }

  if !confirm_deletion(candidates.len(), force)? {
    if output.is_json() {
      print_json(&DeleteResult {
        deleted: vec![],
        failed: vec![],
        skipped_current,
        dry_run,
      })?;
    } else {
      print_info("Cancelled");
    }
    return Ok(());
  }

  let _lock = StoreLock::acquire(store.base_path(), LockMode::Exclusive, "envbake snapshot delete")?;

  let known: Vec<String> = store.list()?.into_iter().map(|s| s.id).collect();
  let mut deleted = Vec::new();
  let mut failed = Vec::new();

  for id in candidates {
    debug!(snapshot_id = %id, "deleting snapshot");
    if !known.contains(&id) {
      failed.push(DeleteFailure {
        id,
        error: "snapshot not found".to_string(),
      });
      continue;
    }
    match store.delete_snapshot(&id) {
      Ok(()) => {
        info!(snapshot_id = %id, "deleted snapshot");
        deleted.push(id);
      }
      Err(e) => {
        debug!(snapshot_id = %id, error = %e, "failed to delete snapshot");
        failed.push(DeleteFailure {
          id,
          error: e.to_string(),
        });
      }
    }
  }

  if output.is_json() {
    print_json(&DeleteResult {
      deleted,
      failed,
      skipped_current,
      dry_run: false,
    })?;
  } else {
    if !deleted.is_empty() {
      print_success(&format!("Deleted {} snapshot(s)", deleted.len()));
    }
    for f in &failed {
      print_error(&format!("Failed to delete {}: {}", f.id, f.error));
    }
  }

  Ok(())
}

fn cmd_export(id: &str, dest: &Path) -> Result<()> {
  let store = SnapshotStore::default_store();
  let _lock = StoreLock::acquire(store.base_path(), LockMode::Shared, "envbake snapshot export")?;

  let record = load_record(&store, Some(id))?;

  if dest.exists()
    && dest
      .read_dir()
      .with_context(|| format!("Failed to read {}", dest.display()))?
      .next()
      .is_some()
  {
    bail!("Destination is not empty: {}", dest.display());
  }

  let tree = store
    .load_tree(&record)
    .with_context(|| format!("Failed to load snapshot filesystem: {}", id))?;
  tree
    .export(dest)
    .with_context(|| format!("Failed to export to {}", dest.display()))?;

  info!(snapshot_id = %id, dest = %dest.display(), "exported snapshot");
  print_success(&format!("Exported {} to {}", id, dest.display()));
  Ok(())
}

fn cmd_diff(from: Option<String>, to: Option<String>, verbose: bool, output: OutputFormat) -> Result<()> {
  let store = SnapshotStore::default_store();

  let (old, new) = match (from, to) {
    (Some(from), Some(to)) => (load_record(&store, Some(&from))?, load_record(&store, Some(&to))?),
    (Some(from), None) => (load_record(&store, Some(&from))?, load_record(&store, None)?),
    (None, None) => {
      let index = store.load_index().context("Failed to load snapshot index")?;
      let current = load_record(&store, None)?;
      let position = index
        .snapshots
        .iter()
        .position(|s| s.id == current.id)
        .context("Current snapshot not found in index")?;
      if position == 0 {
        bail!("No previous snapshot to compare to. Current is the oldest snapshot.");
      }
      (load_record(&store, Some(&index.snapshots[position - 1].id))?, current)
    }
    (None, Some(to)) => bail!("Specify the snapshot to compare {} against", to),
  };

  let old_tree = store.load_tree(&old).context("Failed to load snapshot filesystem")?;
  let new_tree = store.load_tree(&new).context("Failed to load snapshot filesystem")?;
  let changes = diff(&old_tree, &new_tree);

  if output.is_json() {
    #[derive(Serialize)]
    struct DiffOutput<'a> {
      from: &'a str,
      to: &'a str,
      #[serde(flatten)]
      diff: &'a TreeDiff,
    }
    return print_json(&DiffOutput {
      from: &old.id,
      to: &new.id,
      diff: &changes,
    });
  }

  println!("{} {} {}", old.id, symbols::ARROW, new.id);
  if changes.is_empty() {
    print_info("No filesystem changes");
    return Ok(());
  }

  print_stat("Added", &changes.added.len().to_string());
  print_stat("Removed", &changes.removed.len().to_string());
  print_stat("Changed", &changes.changed.len().to_string());

  if verbose {
    println!();
    let entries = [
      (PathChange::Added, &changes.added),
      (PathChange::Removed, &changes.removed),
      (PathChange::Changed, &changes.changed),
    ];
    for (change, paths) in entries {
      for path in paths {
        print_path_change(change, path.as_str());
      }
    }
  }

  Ok(())
}

fn format_timestamp(timestamp: u64) -> String {
  let datetime = UNIX_EPOCH + Duration::from_secs(timestamp);
  if let Ok(duration) = SystemTime::now().duration_since(datetime) {
    let secs = duration.as_secs();
    if secs < 60 {
      format!("{} seconds ago", secs)
    } else if secs < 3600 {
      format!("{} minutes ago", secs / 60)
    } else if secs < 86400 {
      format!("{} hours ago", secs / 3600)
    } else {
      format!("{} days ago", secs / 86400)
    }
  } else {
    format!("timestamp: {}", timestamp)
  }
}
