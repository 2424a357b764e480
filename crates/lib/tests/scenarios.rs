//! End-to-end pipeline scenarios against on-disk fixtures.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use envbake_lib::descriptor::{BaseArtifact, parse};
use envbake_lib::install::{IndexInstaller, InstallationError, Installer};
use envbake_lib::materialize::BuildContext;
use envbake_lib::pipeline::{Pipeline, PipelineOutcome, PipelineState, StepError};
use envbake_lib::plan::{PackageRequirement, Plan, Stage, Step};
use envbake_lib::resolve::DirectorySource;
use envbake_lib::snapshot::{SnapPath, Snapshot};
use tempfile::TempDir;
use tracing_test::traced_test;

const DESCRIPTOR: &str = "\
FROM python:3.11-slim
WORKDIR /app
RUN mkdir -p /app/workspace
RUN pip install --upgrade pip
RUN pip install --no-cache-dir requests beautifulsoup4 lxml pandas numpy matplotlib scipy scikit-learn
COPY . /app
";

const PACKAGES: [&str; 8] = [
  "requests",
  "beautifulsoup4",
  "lxml",
  "pandas",
  "numpy",
  "matplotlib",
  "scipy",
  "scikit-learn",
];

struct World {
  _temp: TempDir,
  source: DirectorySource,
  index: PathBuf,
  context: BuildContext,
}

fn write_package(index: &Path, name: &str, version: &str, requires: &[&str]) {
  let dir = index.join(name).join(version);
  let module = dir.join(name.replace('-', "_"));
  fs::create_dir_all(&module).unwrap();
  fs::write(module.join("__init__.py"), format!("__version__ = \"{}\"\n", version)).unwrap();
  if !requires.is_empty() {
    fs::write(dir.join("requires.txt"), requires.join("\n")).unwrap();
  }
}

fn world() -> World {
  let temp = TempDir::new().unwrap();
  let root = temp.path();

  let rootfs = root.join("artifacts/python/3.11-slim/rootfs");
  fs::create_dir_all(rootfs.join("usr/local/bin")).unwrap();
  fs::create_dir_all(rootfs.join("usr/local/lib/site-packages")).unwrap();
  fs::write(rootfs.join("usr/local/bin/python3"), "#!/bin/sh\n").unwrap();
  fs::write(rootfs.join("usr/local/bin/pip"), "#!/bin/sh\n").unwrap();
  fs::write(
    root.join("artifacts/python/3.11-slim/artifact.json"),
    r#"{ "packages": { "pip": "23.0.1" } }"#,
  )
  .unwrap();

  let index = root.join("index");
  write_package(&index, "pip", "24.0", &[]);
  write_package(&index, "requests", "2.31.0", &["idna", "urllib3"]);
  write_package(&index, "idna", "3.6", &[]);
  write_package(&index, "urllib3", "2.1.0", &[]);
  write_package(&index, "beautifulsoup4", "4.12.2", &["soupsieve>1.2"]);
  write_package(&index, "soupsieve", "2.5", &[]);
  write_package(&index, "lxml", "4.9.3", &[]);
  write_package(&index, "numpy", "1.26.2", &[]);
  write_package(&index, "pandas", "2.1.4", &["numpy>=1.23.2"]);
  write_package(&index, "matplotlib", "3.8.2", &["numpy"]);
  write_package(&index, "scipy", "1.11.4", &["numpy"]);
  write_package(&index, "scikit-learn", "1.3.2", &["numpy", "scipy"]);

  let context = root.join("context");
  fs::create_dir_all(context.join("src")).unwrap();
  fs::write(context.join("main.py"), "from src import app\n").unwrap();
  fs::write(context.join("src/app.py"), "def run():\n    pass\n").unwrap();

  World {
    source: DirectorySource::new(root.join("artifacts")),
    context: BuildContext::open(&context).unwrap(),
    index,
    _temp: temp,
  }
}

fn site() -> SnapPath {
  SnapPath::absolute("/usr/local/lib/site-packages").unwrap()
}

fn plan(text: &str) -> Plan {
  Plan::from_descriptor(&parse(text).unwrap()).unwrap()
}

fn run(world: &World, installer: &mut dyn Installer, text: &str) -> PipelineOutcome {
  Pipeline::new(&world.source, installer, &world.context).run(&plan(text))
}

fn path(p: &str) -> SnapPath {
  SnapPath::absolute(p).unwrap()
}

/// Records the order of installer phases and delegates to a real installer.
struct Recording {
  inner: IndexInstaller,
  calls: Rc<RefCell<Vec<String>>>,
}

impl Installer for Recording {
  fn upgrade(&mut self, snapshot: Snapshot, tool: &str) -> Result<Snapshot, InstallationError> {
    self.calls.borrow_mut().push(format!("upgrade {}", tool));
    self.inner.upgrade(snapshot, tool)
  }

  fn install(&mut self, snapshot: Snapshot, requirement: &PackageRequirement) -> Result<Snapshot, InstallationError> {
    self.calls.borrow_mut().push(format!("install {}", requirement.names.join(" ")));
    self.inner.install(snapshot, requirement)
  }
}

fn recording(world: &World) -> (Recording, Rc<RefCell<Vec<String>>>) {
  let calls = Rc::new(RefCell::new(Vec::new()));
  (
    Recording {
      inner: IndexInstaller::new(&world.index, site()),
      calls: calls.clone(),
    },
    calls,
  )
}

#[test]
fn python_environment_is_fully_provisioned() {
  let world = world();
  let mut installer = IndexInstaller::new(&world.index, site());
  let outcome = run(&world, &mut installer, DESCRIPTOR);

  assert_eq!(outcome.state, PipelineState::Complete);
  let snapshot = outcome.snapshot().unwrap();

  assert!(snapshot.is_dir(&path("/app/workspace")));
  assert_eq!(snapshot.workdir(), Some(&path("/app")));
  for name in PACKAGES {
    assert!(snapshot.package_version(name).is_some(), "{} not installed", name);
  }
  assert_eq!(snapshot.package_version("pip"), Some("24.0"));
  assert_eq!(snapshot.package_version("soupsieve"), Some("2.5"));
  assert!(snapshot.exists(&site().join("scikit_learn/__init__.py")));

  assert!(snapshot.exists(&path("/app/main.py")));
  assert!(snapshot.exists(&path("/app/src/app.py")));
  assert!(!snapshot.exists(&path("/root/.cache/pip")));
}

#[test]
fn unknown_base_fails_before_anything_else() {
  let world = world();
  let (mut installer, calls) = recording(&world);
  let outcome = run(&world, &mut installer, &DESCRIPTOR.replace("3.11-slim", "99.99-slim"));

  assert_eq!(outcome.state, PipelineState::Failed);
  let failure = outcome.failure().unwrap();
  assert!(matches!(failure.error, StepError::Resolution(_)));
  assert_eq!(failure.error.kind(), "ResolutionError");
  assert!(outcome.reports.is_empty());
  assert!(calls.borrow().is_empty());
  assert!(!outcome.transitions.contains(&PipelineState::DirectoryReady));
}

#[test]
#[traced_test]
fn misspelled_package_fails_after_upgrade() {
  let world = world();
  let (mut installer, calls) = recording(&world);
  let outcome = run(&world, &mut installer, &DESCRIPTOR.replace("pandas", "panadas"));

  assert_eq!(outcome.state, PipelineState::Failed);
  let failure = outcome.failure().unwrap();
  assert!(matches!(failure.step, Step::InstallPackages { .. }));
  match &failure.error {
    StepError::Installation(InstallationError::PackageNotFound { name, .. }) => assert_eq!(name, "panadas"),
    other => panic!("expected a missing package, got {}", other),
  }

  let calls = calls.borrow();
  assert_eq!(calls.len(), 2);
  assert_eq!(calls[0], "upgrade pip");
  assert!(calls[1].starts_with("install "));

  assert!(outcome.reports.iter().all(|r| r.stage < Stage::Packages));
  assert!(!outcome.transitions.contains(&PipelineState::SourceCopied));
  assert!(logs_contain("pipeline failed"));
}

#[test]
fn upgrade_runs_before_install() {
  let world = world();
  let (mut installer, calls) = recording(&world);
  let outcome = run(&world, &mut installer, DESCRIPTOR);

  assert!(outcome.is_success());
  assert_eq!(
    *calls.borrow(),
    vec![
      "upgrade pip".to_string(),
      format!("install {}", PACKAGES.join(" "))
    ]
  );
}

#[test]
fn copy_runs_only_after_packages() {
  let world = world();
  let mut installer = IndexInstaller::new(&world.index, site());
  // instructions are validated in stage order, so the copy line always trails
  let outcome = run(&world, &mut installer, DESCRIPTOR);

  let stages: Vec<Stage> = outcome.reports.iter().map(|r| r.stage).collect();
  let mut sorted = stages.clone();
  sorted.sort();
  assert_eq!(stages, sorted);
  assert_eq!(stages.last(), Some(&Stage::Source));

  let packages = outcome
    .transitions
    .iter()
    .position(|s| *s == PipelineState::PackagesInstalled)
    .unwrap();
  let copied = outcome
    .transitions
    .iter()
    .position(|s| *s == PipelineState::SourceCopied)
    .unwrap();
  assert!(packages < copied);
}

#[test]
fn copy_before_install_is_rejected() {
  let text = "FROM python:3.11-slim\nWORKDIR /app\nCOPY . /app\nRUN pip install requests\n";
  assert!(Plan::from_descriptor(&parse(text).unwrap()).is_err());
}

#[test]
fn identical_inputs_give_identical_snapshots() {
  let world = world();

  let mut first = IndexInstaller::new(&world.index, site());
  let a = run(&world, &mut first, DESCRIPTOR).into_result().unwrap();
  let mut second = IndexInstaller::new(&world.index, site());
  let b = run(&world, &mut second, DESCRIPTOR).into_result().unwrap();

  assert_eq!(a.content_hash(), b.content_hash());
  assert_eq!(a.packages(), b.packages());
}

#[test]
fn base_resolution_is_deterministic() {
  let world = world();
  let base = BaseArtifact::new("python", "3.11", Some("slim"));

  let a = envbake_lib::resolve::resolve_base(&world.source, &base).unwrap();
  let b = envbake_lib::resolve::resolve_base(&world.source, &base).unwrap();
  assert_eq!(a.content_hash(), b.content_hash());
  assert_eq!(a.package_version("pip"), Some("23.0.1"));
}

#[test]
fn repeated_mkdir_is_idempotent() {
  let world = world();
  let mut installer = IndexInstaller::new(&world.index, site());
  let once = run(&world, &mut installer, "FROM python:3.11-slim\nRUN mkdir -p /app/workspace\n")
    .into_result()
    .unwrap();
  let twice = run(
    &world,
    &mut installer,
    "FROM python:3.11-slim\nRUN mkdir -p /app/workspace\nRUN mkdir -p /app/workspace\n",
  )
  .into_result()
  .unwrap();

  assert_eq!(once.content_hash(), twice.content_hash());
}
