use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn plan_lists_steps_in_order() {
  let env = TestEnv::new();

  let output = env.envbake_cmd().arg("plan").output().unwrap();
  assert!(output.status.success());

  let stdout = String::from_utf8_lossy(&output.stdout);
  let from = stdout.find("FROM python:3.11-slim").expect("base step");
  let mkdir = stdout.find("mkdir -p /app/workspace").expect("directory step");
  let install = stdout.find("pip install --no-cache-dir").expect("install step");
  let copy = stdout.find("COPY . /app").expect("copy step");
  assert!(from < mkdir && mkdir < install && install < copy);
}

#[test]
fn plan_json_has_a_key_per_step() {
  let env = TestEnv::new();

  let output = env.envbake_cmd().args(["plan", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
  assert_eq!(parsed["base"], "python:3.11-slim");
  assert_eq!(parsed["workdir"], "/app");
  let steps = parsed["steps"].as_array().unwrap();
  // FROM, WORKDIR, mkdir, install, COPY
  assert_eq!(steps.len(), 5);
  assert!(steps.iter().all(|s| s["key"].as_str().is_some_and(|k| k.len() == 20)));
}

#[test]
fn plan_keys_only_change_for_copy_when_context_changes() {
  let env = TestEnv::new();

  let keys = |env: &TestEnv| -> Vec<String> {
    let output = env.envbake_cmd().args(["plan", "-o", "json"]).output().unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    parsed["steps"]
      .as_array()
      .unwrap()
      .iter()
      .map(|s| s["key"].as_str().unwrap().to_string())
      .collect()
  };

  let before = keys(&env);
  env.write_file("main.py", "print('changed')\n");
  let after = keys(&env);

  assert_eq!(before[..4], after[..4]);
  assert_ne!(before[4], after[4]);
}

#[test]
fn plan_does_not_touch_the_store() {
  let env = TestEnv::new();
  env.envbake_cmd().arg("plan").assert().success();
  assert!(!env.snapshots_path().exists());
}

#[test]
fn plan_missing_descriptor_fails() {
  let env = TestEnv::empty();

  env
    .envbake_cmd()
    .arg("plan")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to parse descriptor"));
}

#[test]
fn plan_reports_out_of_order_line() {
  let env = TestEnv::new();
  env.write_file(
    "Bakefile",
    "FROM python:3.11-slim\nCOPY . /app\nRUN pip install requests\n",
  );

  env
    .envbake_cmd()
    .arg("plan")
    .assert()
    .failure()
    .stderr(predicate::str::contains("line 3"));
}
