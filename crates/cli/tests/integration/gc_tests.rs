use predicates::prelude::*;

use super::common::{COPY_DESCRIPTOR, TestEnv};

fn entry_count(env: &TestEnv) -> usize {
  let output = env.layercake_cmd().args(["ls", "-o", "json"]).output().unwrap();
  assert!(output.status.success());
  let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  entries.as_array().unwrap().len()
}

#[test]
fn gc_dry_run_keeps_entries() {
  let env = TestEnv::with_descriptor(COPY_DESCRIPTOR);
  env.write_file("src/main.py", "print('v1')");
  env.build_json();

  env
    .layercake_cmd()
    .args(["gc", "--max-entries", "0", "--dry-run"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Dry run"))
    .stdout(predicate::str::contains("Entries evicted: 3"));

  assert_eq!(entry_count(&env), 3);
}

#[test]
fn gc_enforces_entry_budget() {
  let env = TestEnv::with_descriptor(COPY_DESCRIPTOR);
  env.write_file("src/main.py", "print('v1')");
  env.build_json();

  let output = env
    .layercake_cmd()
    .args(["gc", "--max-entries", "1", "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());
  let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(stats["evicted"], 2);
  assert_eq!(stats["remaining_entries"], 1);

  assert_eq!(entry_count(&env), 1);
}

#[test]
fn evicted_prefix_is_rebuilt() {
  let env = TestEnv::with_descriptor(COPY_DESCRIPTOR);
  env.write_file("src/main.py", "print('v1')");
  env.build_json();

  env.layercake_cmd().args(["gc", "--max-entries", "0"]).assert().success();
  assert_eq!(entry_count(&env), 0);

  let rebuilt = env.build_json();
  assert_eq!(super::common::statuses(&rebuilt), vec!["miss", "miss", "miss"]);
}
