use predicates::prelude::*;

use super::common::{DESCRIPTOR, TestEnv};

#[test]
fn build_succeeds_and_reports_snapshot() {
  let env = TestEnv::new();

  env
    .envbake_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Baked python:3.11-slim"))
    .stdout(predicate::str::contains("COPY . /app"))
    .stdout(predicate::str::contains("Snapshot"));

  let index = std::fs::read_to_string(env.snapshots_path().join("index.json")).unwrap();
  let parsed: serde_json::Value = serde_json::from_str(&index).unwrap();
  assert_eq!(parsed["snapshots"].as_array().unwrap().len(), 1);
  assert!(parsed["current"].is_string());
}

#[test]
fn build_json_lists_packages_and_states() {
  let env = TestEnv::new();

  let output = env.envbake_cmd().args(["build", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
  assert_eq!(parsed["state"], "complete");
  for name in ["requests", "pandas", "scikit-learn", "pip"] {
    assert!(parsed["packages"][name].is_string(), "{} missing", name);
  }
  let transitions: Vec<&str> = parsed["transitions"]
    .as_array()
    .unwrap()
    .iter()
    .map(|s| s.as_str().unwrap())
    .collect();
  assert_eq!(
    transitions,
    [
      "not_started",
      "base_resolved",
      "directory_ready",
      "packages_installed",
      "source_copied",
      "complete"
    ]
  );
}

#[test]
fn build_exports_rootfs_with_context() {
  let env = TestEnv::new();
  let id = env.build();

  let rootfs = env.snapshots_path().join(&id).join("rootfs");
  assert!(rootfs.join("app/workspace").is_dir());
  assert!(rootfs.join("app/main.py").is_file());
  assert!(rootfs.join("app/src/app.py").is_file());
  assert!(rootfs.join("usr/local/lib/site-packages/numpy/__init__.py").is_file());
}

#[test]
fn build_no_save_leaves_store_empty() {
  let env = TestEnv::new();

  env
    .envbake_cmd()
    .args(["build", "--no-save"])
    .assert()
    .success()
    .stdout(predicate::str::contains("not saved"));

  assert!(!env.snapshots_path().join("index.json").exists());
}

#[test]
fn build_unknown_base_fails_with_resolution_error() {
  let env = TestEnv::new();
  env.write_file("Bakefile", &DESCRIPTOR.replace("3.11-slim", "99.99-slim"));

  env
    .envbake_cmd()
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("ResolutionError"));

  assert!(!env.snapshots_path().join("index.json").exists());
}

#[test]
fn build_misspelled_package_fails_with_installation_error() {
  let env = TestEnv::new();
  env.write_file("Bakefile", &DESCRIPTOR.replace("pandas", "panadas"));

  let output = env.envbake_cmd().args(["build", "-o", "json"]).output().unwrap();
  assert!(!output.status.success());

  let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
  assert_eq!(parsed["state"], "failed");
  assert_eq!(parsed["error_kind"], "InstallationError");
  assert!(parsed["error"].as_str().unwrap().contains("panadas"));
  let steps = parsed["steps"].as_array().unwrap();
  assert!(steps.iter().all(|s| s["stage"] != "source" && s["stage"] != "packages"));
}

#[test]
fn build_with_explicit_file_and_context() {
  let env = TestEnv::new();
  let descriptor = env.temp.path().join("custom.bake");
  std::fs::write(&descriptor, "FROM python:3.11-slim\nWORKDIR /srv\nCOPY main.py /srv/\n").unwrap();

  env
    .envbake_cmd()
    .current_dir(env.temp.path())
    .arg("build")
    .arg(&descriptor)
    .args(["--context", "context"])
    .assert()
    .success();
}

#[test]
fn build_index_flag_overrides_environment() {
  let env = TestEnv::new();
  let empty_index = env.temp.path().join("empty-index");
  std::fs::create_dir_all(&empty_index).unwrap();

  env
    .envbake_cmd()
    .arg("build")
    .arg("--index")
    .arg(&empty_index)
    .assert()
    .failure()
    .stderr(predicate::str::contains("InstallationError"));
}

#[test]
fn build_rejects_invalid_descriptor() {
  let env = TestEnv::new();
  env.write_file("Bakefile", "WORKDIR /app\nFROM python:3.11-slim\n");

  env
    .envbake_cmd()
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Invalid descriptor"));
}
