use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn test_snapshot_list_empty() {
  let env = TestEnv::empty();

  let output = env.envbake_cmd().args(["snapshot", "list"]).output().unwrap();
  assert!(output.status.success());
  let combined = format!(
    "{}{}",
    String::from_utf8_lossy(&output.stdout),
    String::from_utf8_lossy(&output.stderr)
  );
  assert!(combined.contains("No snapshots"));
}

#[test]
fn test_snapshot_list_after_build() {
  let env = TestEnv::new();
  let id = env.build();

  env
    .envbake_cmd()
    .args(["snapshot", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains(format!("{} (current)", id)));
}

#[test]
fn test_snapshot_list_json() {
  let env = TestEnv::new();
  let first = env.build();
  let second = env.build();

  let output = env.envbake_cmd().args(["snapshot", "list", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
  let snapshots = parsed["snapshots"].as_array().unwrap();
  assert_eq!(snapshots.len(), 2);
  assert_eq!(parsed["current"], second.as_str());
  assert!(snapshots.iter().any(|s| s["id"] == first.as_str() && s["is_current"] == false));
  assert_eq!(snapshots[0]["package_count"], snapshots[1]["package_count"]);
}

#[test]
fn test_snapshot_show_defaults_to_current() {
  let env = TestEnv::new();
  let id = env.build();

  env
    .envbake_cmd()
    .args(["snapshot", "show", "--verbose"])
    .assert()
    .success()
    .stdout(predicate::str::contains(id))
    .stdout(predicate::str::contains("scikit-learn"))
    .stdout(predicate::str::contains("Layers:"));
}

#[test]
fn test_snapshot_show_json() {
  let env = TestEnv::new();
  let id = env.build();

  let output = env
    .envbake_cmd()
    .args(["snapshot", "show", &id, "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
  assert_eq!(parsed["id"], id.as_str());
  assert_eq!(parsed["is_current"], true);
  assert_eq!(parsed["workdir"], "/app");
  assert_eq!(parsed["layers"].as_array().unwrap().len(), 5);
}

#[test]
fn test_snapshot_show_unknown_fails() {
  let env = TestEnv::new();
  env.build();

  env
    .envbake_cmd()
    .args(["snapshot", "show", "does-not-exist"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("does-not-exist"));
}

#[test]
fn test_snapshot_delete_skips_current() {
  let env = TestEnv::new();
  let id = env.build();

  env
    .envbake_cmd()
    .args(["snapshot", "delete", &id, "--force"])
    .assert()
    .success()
    .stderr(predicate::str::contains("current snapshot"));

  assert!(env.snapshots_path().join(format!("{}.json", id)).exists());
}

#[test]
fn test_snapshot_delete_removes_record_and_rootfs() {
  let env = TestEnv::new();
  let old = env.build();
  let _current = env.build();

  env
    .envbake_cmd()
    .args(["snapshot", "delete", &old, "--force"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Deleted 1 snapshot(s)"));

  assert!(!env.snapshots_path().join(format!("{}.json", old)).exists());
  assert!(!env.snapshots_path().join(&old).exists());
}

#[test]
fn test_snapshot_delete_dry_run_keeps_everything() {
  let env = TestEnv::new();
  let old = env.build();
  env.build();

  let output = env
    .envbake_cmd()
    .args(["snapshot", "delete", &old, "--dry-run", "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
  assert_eq!(parsed["dry_run"], true);
  assert_eq!(parsed["deleted"][0], old.as_str());
  assert!(env.snapshots_path().join(&old).exists());
}

#[test]
fn test_snapshot_export() {
  let env = TestEnv::new();
  let id = env.build();
  let dest = env.temp.path().join("exported");

  env
    .envbake_cmd()
    .args(["snapshot", "export", &id])
    .arg(&dest)
    .assert()
    .success();

  assert!(dest.join("app/main.py").is_file());
  assert!(dest.join("app/workspace").is_dir());
}

#[test]
fn test_snapshot_export_refuses_non_empty_destination() {
  let env = TestEnv::new();
  let id = env.build();
  let dest = env.temp.path().join("occupied");
  std::fs::create_dir_all(&dest).unwrap();
  std::fs::write(dest.join("keep.txt"), "mine").unwrap();

  env
    .envbake_cmd()
    .args(["snapshot", "export", &id])
    .arg(&dest)
    .assert()
    .failure()
    .stderr(predicate::str::contains("not empty"));
}

#[test]
fn test_snapshot_diff_against_previous() {
  let env = TestEnv::new();
  env.build();
  env.write_file("extra.py", "x = 1\n");
  env.build();

  let output = env
    .envbake_cmd()
    .args(["snapshot", "diff", "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
  let added: Vec<&str> = parsed["added"]
    .as_array()
    .unwrap()
    .iter()
    .map(|p| p.as_str().unwrap())
    .collect();
  assert_eq!(added, ["/app/extra.py"]);
  assert!(parsed["removed"].as_array().unwrap().is_empty());
}

#[test]
fn test_snapshot_diff_needs_two_snapshots() {
  let env = TestEnv::new();
  env.build();

  env
    .envbake_cmd()
    .args(["snapshot", "diff"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("No previous snapshot"));
}
