//! Differences between two snapshots.
//!
//! Used to report what each pipeline step changed, and by the CLI to compare
//! stored snapshots.

use serde::Serialize;

use super::path::SnapPath;
use super::tree::Snapshot;

/// Paths added, removed or changed between an older and a newer snapshot.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct TreeDiff {
  pub added: Vec<SnapPath>,
  pub removed: Vec<SnapPath>,
  pub changed: Vec<SnapPath>,
}

impl TreeDiff {
  pub fn is_empty(&self) -> bool {
    self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
  }

  pub fn len(&self) -> usize {
    self.added.len() + self.removed.len() + self.changed.len()
  }
}

/// Compute the entry-level diff from `old` to `new`.
///
/// Both entry maps are sorted, so this is a single merge pass.
pub fn diff(old: &Snapshot, new: &Snapshot) -> TreeDiff {
  let mut result = TreeDiff::default();
  let mut left = old.entries().peekable();
  let mut right = new.entries().peekable();

  loop {
    match (left.peek(), right.peek()) {
      (Some((lp, ln)), Some((rp, rn))) => match lp.cmp(rp) {
        std::cmp::Ordering::Less => {
          result.removed.push((*lp).clone());
          left.next();
        }
        std::cmp::Ordering::Greater => {
          result.added.push((*rp).clone());
          right.next();
        }
        std::cmp::Ordering::Equal => {
          if ln != rn {
            result.changed.push((*lp).clone());
          }
          left.next();
          right.next();
        }
      },
      (Some((lp, _)), None) => {
        result.removed.push((*lp).clone());
        left.next();
      }
      (None, Some((rp, _))) => {
        result.added.push((*rp).clone());
        right.next();
      }
      (None, None) => break,
    }
  }

  result
}
