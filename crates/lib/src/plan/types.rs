use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::{BaseArtifact, Instruction};
use crate::snapshot::SnapPath;
use crate::util::hash::{Hashable, ObjectHash};

/// Pipeline component an instruction belongs to. Instructions never move to
/// an earlier stage than the one before them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
  Base,
  Directory,
  Packages,
  Source,
}

impl Stage {
  pub fn of(instruction: &Instruction) -> Stage {
    match instruction {
      Instruction::From(_) => Stage::Base,
      Instruction::Workdir(_) | Instruction::Mkdir { .. } => Stage::Directory,
      Instruction::UpgradeInstaller { .. } | Instruction::Install { .. } => Stage::Packages,
      Instruction::Copy { .. } => Stage::Source,
    }
  }
}

impl std::fmt::Display for Stage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Stage::Base => "base",
      Stage::Directory => "directory",
      Stage::Packages => "packages",
      Stage::Source => "source",
    };
    f.write_str(name)
  }
}

/// Unpinned package names for one installer tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRequirement {
  pub tool: String,
  pub names: Vec<String>,
  pub no_cache: bool,
}

impl PackageRequirement {
  pub fn new(tool: &str) -> Self {
    Self {
      tool: tool.to_string(),
      names: Vec::new(),
      no_cache: false,
    }
  }

  /// Append names, skipping ones already present.
  pub fn extend<'a>(&mut self, names: impl IntoIterator<Item = &'a String>) {
    for name in names {
      if !self.names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
        self.names.push(name.clone());
      }
    }
  }
}

/// Copy `source` (relative to the build context, `.` for all of it) to
/// `destination` inside the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCopyDirective {
  pub source: String,
  pub destination: SnapPath,
  /// A file source lands inside `destination` rather than replacing it.
  pub into_dir: bool,
}

/// A directory to create, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryStep {
  pub path: SnapPath,
  /// Declared by `WORKDIR`; becomes the snapshot's working directory.
  pub workdir: bool,
}

/// The validated form of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
  pub base: BaseArtifact,
  pub workdir: Option<SnapPath>,
  pub directories: Vec<DirectoryStep>,
  pub packages: Option<PackageRequirement>,
  pub copies: Vec<FileCopyDirective>,
}

impl Hashable for Plan {}

/// One unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
  ResolveBase { base: BaseArtifact },
  ProvisionDir { path: SnapPath, workdir: bool },
  InstallPackages { requirement: PackageRequirement },
  CopySource { directive: FileCopyDirective },
}

impl Step {
  pub fn stage(&self) -> Stage {
    match self {
      Step::ResolveBase { .. } => Stage::Base,
      Step::ProvisionDir { .. } => Stage::Directory,
      Step::InstallPackages { .. } => Stage::Packages,
      Step::CopySource { .. } => Stage::Source,
    }
  }

  /// Human readable one-liner, close to the descriptor syntax.
  pub fn describe(&self) -> String {
    match self {
      Step::ResolveBase { base } => format!("FROM {}", base),
      Step::ProvisionDir { path, workdir: true } => format!("WORKDIR {}", path),
      Step::ProvisionDir { path, workdir: false } => format!("mkdir -p {}", path),
      Step::InstallPackages { requirement } => {
        let mut line = format!("{} install", requirement.tool);
        if requirement.no_cache {
          line.push_str(" --no-cache-dir");
        }
        for name in &requirement.names {
          line.push(' ');
          line.push_str(name);
        }
        line
      }
      Step::CopySource { directive } => format!("COPY {} {}", directive.source, directive.destination),
    }
  }
}

/// Cache key of a step: the hash of the step, its parent key, and for
/// source copies the build context hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
  pub stage: Stage,
  pub description: String,
  pub key: ObjectHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
  #[error("descriptor has no instructions")]
  Empty,

  #[error("line {line}: descriptor must start with FROM, found {keyword}")]
  MissingBase { line: usize, keyword: &'static str },

  #[error("line {line}: only one FROM is allowed")]
  DuplicateBase { line: usize },

  #[error("line {line}: {keyword} belongs to the {stage} stage and cannot follow the {after} stage")]
  OutOfOrder {
    line: usize,
    keyword: &'static str,
    stage: Stage,
    after: Stage,
  },

  #[error("line {line}: the installer upgrade must come before any package install")]
  InstallBeforeUpgrade { line: usize },

  #[error("line {line}: all package lines must use {expected}, found {found}")]
  MixedTools {
    line: usize,
    expected: String,
    found: String,
  },

  #[error("line {line}: WORKDIR must be absolute, got '{path}'")]
  WorkdirNotAbsolute { line: usize, path: String },

  #[error("line {line}: relative path '{path}' needs a preceding WORKDIR")]
  RelativeWithoutWorkdir { line: usize, path: String },

  #[error("line {line}: copy source '{path}' is outside the build context")]
  SourceOutsideContext { line: usize, path: String },
}
