//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// The descriptor the project ships with.
pub const DESCRIPTOR: &str = "\
FROM python:3.11-slim
WORKDIR /app
RUN mkdir -p /app/workspace
RUN pip install --upgrade pip
RUN pip install --no-cache-dir requests beautifulsoup4 lxml pandas numpy matplotlib scipy scikit-learn
COPY . /app
";

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the build context,
/// base artifacts, package index, data directory and config directory.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// An environment with a `python:3.11-slim` base, an index carrying every
  /// package `DESCRIPTOR` needs, and a small build context.
  pub fn new() -> Self {
    let env = Self::empty();

    env.add_base("python", "3.11-slim", &[("pip", "23.0.1")]);
    env.add_package("pip", "24.0", &[]);
    env.add_package("requests", "2.31.0", &["idna"]);
    env.add_package("idna", "3.6", &[]);
    env.add_package("beautifulsoup4", "4.12.2", &["soupsieve"]);
    env.add_package("soupsieve", "2.5", &[]);
    env.add_package("lxml", "4.9.3", &[]);
    env.add_package("numpy", "1.26.2", &[]);
    env.add_package("pandas", "2.1.4", &["numpy"]);
    env.add_package("matplotlib", "3.8.2", &["numpy"]);
    env.add_package("scipy", "1.11.4", &["numpy"]);
    env.add_package("scikit-learn", "1.3.2", &["numpy", "scipy"]);

    env.write_file("Bakefile", DESCRIPTOR);
    env.write_file("main.py", "print('hello')\n");
    env.write_file("src/app.py", "def run():\n    pass\n");
    env
  }

  /// An environment with empty artifact, index and context directories.
  pub fn empty() -> Self {
    let temp = TempDir::new().unwrap();
    for dir in ["context", "artifacts", "index", "data", "config"] {
      std::fs::create_dir_all(temp.path().join(dir)).unwrap();
    }
    Self { temp }
  }

  fn dir(&self, name: &str) -> PathBuf {
    let p = self.temp.path().join(name);
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn context_path(&self) -> PathBuf {
    self.dir("context")
  }

  pub fn data_path(&self) -> PathBuf {
    self.dir("data")
  }

  pub fn snapshots_path(&self) -> PathBuf {
    self.data_path().join("snapshots")
  }

  /// Write a file relative to the build context.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    write(&self.context_path().join(relative_path), content);
  }

  /// Add a base artifact `{name}:{tag}` with the given pre-installed packages.
  pub fn add_base(&self, name: &str, tag: &str, packages: &[(&str, &str)]) {
    let dir = self.dir("artifacts").join(name).join(tag);
    let rootfs = dir.join("rootfs");
    write(&rootfs.join("etc/os-release"), &format!("ID={}\n", name));
    write(&rootfs.join("usr/local/bin/python3"), "#!/bin/sh\n");
    std::fs::create_dir_all(rootfs.join("usr/local/lib/site-packages")).unwrap();

    let packages: serde_json::Map<String, serde_json::Value> = packages
      .iter()
      .map(|(n, v)| (n.to_string(), serde_json::Value::from(*v)))
      .collect();
    write(
      &dir.join("artifact.json"),
      &serde_json::json!({ "packages": packages }).to_string(),
    );
  }

  /// Add a package to the local index.
  pub fn add_package(&self, name: &str, version: &str, requires: &[&str]) {
    let dir = self.dir("index").join(name).join(version);
    write(
      &dir.join(name.replace('-', "_")).join("__init__.py"),
      &format!("__version__ = \"{}\"\n", version),
    );
    if !requires.is_empty() {
      write(&dir.join("requires.txt"), &requires.join("\n"));
    }
  }

  /// Get a pre-configured Command for the envbake binary.
  ///
  /// Runs inside the build context with isolated data, config, artifact and
  /// index directories.
  pub fn envbake_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("envbake");
    cmd.current_dir(self.context_path());
    cmd.env("ENVBAKE_DATA_DIR", self.data_path());
    cmd.env("ENVBAKE_ARTIFACTS", self.dir("artifacts"));
    cmd.env("ENVBAKE_INDEX", self.dir("index"));
    cmd.env("XDG_CONFIG_HOME", self.dir("config"));
    cmd.env("APPDATA", self.dir("config")); // For Windows
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// Run `envbake build -o json` and return the new snapshot id.
  pub fn build(&self) -> String {
    let output = self.envbake_cmd().args(["build", "-o", "json"]).output().unwrap();
    assert!(
      output.status.success(),
      "build failed: {}",
      String::from_utf8_lossy(&output.stderr)
    );
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    parsed["snapshot_id"].as_str().expect("snapshot id").to_string()
  }
}

fn write(path: &Path, content: &str) {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(path, content).unwrap();
}
