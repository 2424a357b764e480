use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A named, versioned starting image, e.g. `python:3.11-slim`.
///
/// The reference splits on the last `:` into name and tag, and the tag on its
/// first `-` into version and variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaseArtifact {
  pub name: String,
  pub version: String,
  pub variant: Option<String>,
}

impl BaseArtifact {
  pub fn new(name: &str, version: &str, variant: Option<&str>) -> Self {
    Self {
      name: name.to_string(),
      version: version.to_string(),
      variant: variant.map(str::to_string),
    }
  }

  /// `version[-variant]`, the directory name used by artifact sources.
  pub fn tag(&self) -> String {
    match &self.variant {
      Some(variant) => format!("{}-{}", self.version, variant),
      None => self.version.clone(),
    }
  }
}

impl std::fmt::Display for BaseArtifact {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}", self.name, self.tag())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
  #[error("missing ':' between name and version in '{0}'")]
  MissingTag(String),

  #[error("empty {part} in '{reference}'")]
  Empty { part: &'static str, reference: String },

  #[error("invalid character {ch:?} in '{reference}'")]
  InvalidChar { ch: char, reference: String },

  #[error("{part} in '{reference}' must be a relative path without '.' or '..' segments")]
  UnsafePath { part: &'static str, reference: String },
}

/// A `/`-separated relative path whose segments are all ordinary names.
fn is_plain_relative(path: &str) -> bool {
  !path.contains('\\') && path.split('/').all(|segment| !matches!(segment, "" | "." | ".."))
}

impl FromStr for BaseArtifact {
  type Err = ReferenceError;

  fn from_str(reference: &str) -> Result<Self, Self::Err> {
    if let Some(ch) = reference.chars().find(|c| c.is_whitespace() || c.is_control()) {
      return Err(ReferenceError::InvalidChar {
        ch,
        reference: reference.to_string(),
      });
    }

    let (name, tag) = reference
      .rsplit_once(':')
      .ok_or_else(|| ReferenceError::MissingTag(reference.to_string()))?;

    let empty = |part| ReferenceError::Empty {
      part,
      reference: reference.to_string(),
    };

    if name.is_empty() {
      return Err(empty("name"));
    }
    let unsafe_path = |part| ReferenceError::UnsafePath {
      part,
      reference: reference.to_string(),
    };
    if !is_plain_relative(name) {
      return Err(unsafe_path("name"));
    }
    if tag.contains('/') || !is_plain_relative(tag) {
      return Err(unsafe_path("tag"));
    }

    let (version, variant) = match tag.split_once('-') {
      Some((version, variant)) => (version, Some(variant)),
      None => (tag, None),
    };

    if version.is_empty() {
      return Err(empty("version"));
    }
    if variant == Some("") {
      return Err(empty("variant"));
    }

    Ok(BaseArtifact::new(name, version, variant))
  }
}

/// One instruction of a descriptor, after `RUN` commands have been recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
  /// `FROM name:version[-variant]`
  From(BaseArtifact),

  /// `WORKDIR /path`
  Workdir(String),

  /// `RUN mkdir -p a b c`
  Mkdir { paths: Vec<String> },

  /// `RUN pip install --upgrade pip`
  UpgradeInstaller { tool: String },

  /// `RUN pip install [--no-cache-dir] name...`
  Install {
    tool: String,
    packages: Vec<String>,
    no_cache: bool,
  },

  /// `COPY src... dest`
  Copy { sources: Vec<String>, destination: String },
}

impl Instruction {
  pub fn keyword(&self) -> &'static str {
    match self {
      Instruction::From(_) => "FROM",
      Instruction::Workdir(_) => "WORKDIR",
      Instruction::Mkdir { .. } | Instruction::UpgradeInstaller { .. } | Instruction::Install { .. } => "RUN",
      Instruction::Copy { .. } => "COPY",
    }
  }
}

/// An instruction together with the 1-based line it started on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
  pub number: usize,
  pub instruction: Instruction,
}

/// A parsed descriptor: instructions in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
  pub lines: Vec<Line>,
}

#[derive(Debug, Error)]
pub enum ParseError {
  #[error("failed to read descriptor {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("line {line}: unsupported instruction '{keyword}'")]
  UnsupportedInstruction { line: usize, keyword: String },

  #[error("line {line}: {instruction} requires {expected}")]
  MissingArgument {
    line: usize,
    instruction: &'static str,
    expected: &'static str,
  },

  #[error("line {line}: unexpected argument '{argument}' to {instruction}")]
  UnexpectedArgument {
    line: usize,
    instruction: &'static str,
    argument: String,
  },

  #[error("line {line}: unsupported command '{command}'")]
  UnsupportedCommand { line: usize, command: String },

  #[error("line {line}: unsupported flag '{flag}'")]
  UnsupportedFlag { line: usize, flag: String },

  #[error("line {line}: invalid package name '{name}'")]
  InvalidPackageName { line: usize, name: String },

  #[error("line {line}: version constraints are not supported: '{requirement}'")]
  VersionConstraint { line: usize, requirement: String },

  #[error("line {line}: invalid base reference: {source}")]
  InvalidReference {
    line: usize,
    #[source]
    source: ReferenceError,
  },

  #[error("line {line}: line continuation at end of file")]
  DanglingContinuation { line: usize },
}
