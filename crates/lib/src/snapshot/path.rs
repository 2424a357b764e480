//! Absolute paths inside a snapshot.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
  #[error("path must be absolute: '{0}'")]
  NotAbsolute(String),
}

/// A normalized absolute path inside a snapshot.
///
/// Always `/`-separated, never contains `.` segments or trailing slashes, and
/// `..` never climbs above `/`. Ordering is plain string ordering, so a
/// directory always sorts before everything beneath it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapPath(String);

impl SnapPath {
  pub fn root() -> Self {
    SnapPath("/".to_string())
  }

  /// Parse an absolute path, normalizing it.
  pub fn absolute(input: &str) -> Result<Self, PathError> {
    if !input.starts_with('/') {
      return Err(PathError::NotAbsolute(input.to_string()));
    }
    Ok(Self::from_segments(normalize(Vec::new(), input)))
  }

  /// Resolve `input` against `self` when relative; absolute inputs ignore `self`.
  pub fn resolve(&self, input: &str) -> Self {
    if input.starts_with('/') {
      return Self::from_segments(normalize(Vec::new(), input));
    }
    let base: Vec<&str> = self.segments().collect();
    Self::from_segments(normalize(base, input))
  }

  pub fn join(&self, relative: &str) -> Self {
    self.resolve(relative.trim_start_matches('/'))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn is_root(&self) -> bool {
    self.0 == "/"
  }

  pub fn segments(&self) -> impl Iterator<Item = &str> {
    self.0.split('/').filter(|s| !s.is_empty())
  }

  pub fn file_name(&self) -> Option<&str> {
    self.segments().last()
  }

  pub fn parent(&self) -> Option<SnapPath> {
    if self.is_root() {
      return None;
    }
    let segments: Vec<&str> = self.segments().collect();
    Some(Self::from_segments(segments[..segments.len() - 1].to_vec()))
  }

  /// Every proper ancestor from `/` downwards, excluding `self`.
  pub fn ancestors(&self) -> Vec<SnapPath> {
    let segments: Vec<&str> = self.segments().collect();
    (0..segments.len())
      .map(|n| Self::from_segments(segments[..n].to_vec()))
      .collect()
  }

  pub fn starts_with(&self, prefix: &SnapPath) -> bool {
    prefix.is_root() || self.0 == prefix.0 || self.0.starts_with(&format!("{}/", prefix.0))
  }

  /// The path without its leading `/`, for joining onto a host directory.
  pub fn relative(&self) -> &str {
    self.0.trim_start_matches('/')
  }

  fn from_segments(segments: Vec<&str>) -> Self {
    SnapPath(format!("/{}", segments.join("/")))
  }
}

impl std::fmt::Display for SnapPath {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

fn normalize<'a>(mut stack: Vec<&'a str>, input: &'a str) -> Vec<&'a str> {
  for segment in input.split('/') {
    match segment {
      "" | "." => {}
      ".." => {
        stack.pop();
      }
      other => stack.push(other),
    }
  }
  stack
}
