//! Validated build plans.
//!
//! [`Plan::from_descriptor`] checks a parsed descriptor for ordering and path
//! problems and groups its instructions by pipeline component. The resulting
//! plan is content-hashed and expands into the typed [`Step`] list the
//! pipeline folds over.

mod types;

pub use types::*;

use serde::Serialize;
use tracing::debug;

use crate::descriptor::{Descriptor, Instruction, Line};
use crate::snapshot::SnapPath;
use crate::util::hash::{ContentHash, HashError, Hashable, ObjectHash};

impl Plan {
  /// Validate a descriptor and turn it into a plan.
  pub fn from_descriptor(descriptor: &Descriptor) -> Result<Plan, PlanError> {
    let mut lines = descriptor.lines.iter();
    let first = lines.next().ok_or(PlanError::Empty)?;

    let base = match &first.instruction {
      Instruction::From(base) => base.clone(),
      other => {
        return Err(PlanError::MissingBase {
          line: first.number,
          keyword: other.keyword(),
        });
      }
    };

    let mut builder = PlanBuilder::default();
    for line in lines {
      builder.push(line)?;
    }

    let plan = Plan {
      base,
      workdir: builder.workdir,
      directories: builder.directories,
      packages: builder.packages,
      copies: builder.copies,
    };
    debug!(
      base = %plan.base,
      directories = plan.directories.len(),
      packages = plan.packages.as_ref().map_or(0, |p| p.names.len()),
      copies = plan.copies.len(),
      "plan validated"
    );
    Ok(plan)
  }

  /// The ordered step list: base, directories, packages, sources.
  pub fn steps(&self) -> Vec<Step> {
    let mut steps = vec![Step::ResolveBase { base: self.base.clone() }];
    steps.extend(self.directories.iter().map(|d| Step::ProvisionDir {
      path: d.path.clone(),
      workdir: d.workdir,
    }));
    if let Some(requirement) = &self.packages {
      steps.push(Step::InstallPackages {
        requirement: requirement.clone(),
      });
    }
    steps.extend(self.copies.iter().map(|c| Step::CopySource { directive: c.clone() }));
    steps
  }

  /// Chained cache keys, one per step.
  ///
  /// Each key covers its step and the key before it; copy steps also cover
  /// the build context hash. Changing source files therefore only changes
  /// the copy layers.
  pub fn layer_keys(&self, context: &ContentHash) -> Result<Vec<Layer>, HashError> {
    let mut parent: Option<ObjectHash> = None;
    let mut layers = Vec::new();

    for step in self.steps() {
      let input = LayerInput {
        parent: parent.as_ref(),
        context: matches!(step, Step::CopySource { .. }).then_some(context),
        step: &step,
      };
      let key = input.compute_hash()?;
      layers.push(Layer {
        stage: step.stage(),
        description: step.describe(),
        key: key.clone(),
      });
      parent = Some(key);
    }

    Ok(layers)
  }
}

#[derive(Serialize)]
struct LayerInput<'a> {
  parent: Option<&'a ObjectHash>,
  context: Option<&'a ContentHash>,
  step: &'a Step,
}

impl Hashable for LayerInput<'_> {}

#[derive(Default)]
struct PlanBuilder {
  stage: Option<Stage>,
  workdir: Option<SnapPath>,
  directories: Vec<DirectoryStep>,
  packages: Option<PackageRequirement>,
  install_seen: bool,
  copies: Vec<FileCopyDirective>,
}

impl PlanBuilder {
  fn push(&mut self, line: &Line) -> Result<(), PlanError> {
    let number = line.number;

    let stage = Stage::of(&line.instruction);
    if stage > Stage::Base
      && let Some(after) = self.stage
      && stage < after
    {
      return Err(PlanError::OutOfOrder {
        line: number,
        keyword: line.instruction.keyword(),
        stage,
        after,
      });
    }
    self.stage = Some(stage);

    match &line.instruction {
      Instruction::From(_) => return Err(PlanError::DuplicateBase { line: number }),
      Instruction::Workdir(path) => {
        let path = SnapPath::absolute(path).map_err(|_| PlanError::WorkdirNotAbsolute {
          line: number,
          path: path.clone(),
        })?;
        self.directories.push(DirectoryStep {
          path: path.clone(),
          workdir: true,
        });
        self.workdir = Some(path);
      }
      Instruction::Mkdir { paths } => {
        for path in paths {
          let path = self.resolve(number, path)?;
          self.directories.push(DirectoryStep { path, workdir: false });
        }
      }
      Instruction::UpgradeInstaller { tool } => {
        if self.install_seen {
          return Err(PlanError::InstallBeforeUpgrade { line: number });
        }
        self.requirement(number, tool)?;
      }
      Instruction::Install {
        tool,
        packages,
        no_cache,
      } => {
        self.install_seen = true;
        let requirement = self.requirement(number, tool)?;
        requirement.extend(packages);
        requirement.no_cache |= *no_cache;
      }
      Instruction::Copy { sources, destination } => {
        let dest = self.resolve(number, destination)?;
        let into_dir = destination.ends_with('/') || sources.len() > 1;
        for source in sources {
          let source = normalize_source(source).ok_or_else(|| PlanError::SourceOutsideContext {
            line: number,
            path: source.clone(),
          })?;
          self.copies.push(FileCopyDirective {
            source,
            destination: dest.clone(),
            into_dir,
          });
        }
      }
    }

    Ok(())
  }

  fn requirement(&mut self, line: usize, tool: &str) -> Result<&mut PackageRequirement, PlanError> {
    let requirement = self.packages.get_or_insert_with(|| PackageRequirement::new(tool));
    if requirement.tool != tool {
      return Err(PlanError::MixedTools {
        line,
        expected: requirement.tool.clone(),
        found: tool.to_string(),
      });
    }
    Ok(requirement)
  }

  fn resolve(&self, line: usize, path: &str) -> Result<SnapPath, PlanError> {
    if path.starts_with('/') {
      return SnapPath::absolute(path).map_err(|_| PlanError::RelativeWithoutWorkdir {
        line,
        path: path.to_string(),
      });
    }
    match &self.workdir {
      Some(workdir) => Ok(workdir.resolve(path)),
      None => Err(PlanError::RelativeWithoutWorkdir {
        line,
        path: path.to_string(),
      }),
    }
  }
}

/// Normalize a context-relative source. Returns `None` when it is absolute
/// or climbs out of the context.
fn normalize_source(source: &str) -> Option<String> {
  if source.starts_with('/') {
    return None;
  }
  let mut stack: Vec<&str> = Vec::new();
  for segment in source.split('/') {
    match segment {
      "" | "." => {}
      ".." => {
        stack.pop()?;
      }
      other => stack.push(other),
    }
  }
  if stack.is_empty() {
    Some(".".to_string())
  } else {
    Some(stack.join("/"))
  }
}
