use predicates::prelude::*;

use super::common::{COPY_DESCRIPTOR, TestEnv, statuses};

#[test]
fn first_build_executes_every_step() {
  let env = TestEnv::with_descriptor(COPY_DESCRIPTOR);
  env.write_file("src/main.py", "print('v1')");

  env
    .layercake_cmd()
    .arg("build")
    .arg(&env.descriptor)
    .assert()
    .success()
    .stdout(predicate::str::contains("Built"))
    .stdout(predicate::str::contains("Cached: 0/3"))
    .stdout(predicate::str::contains("Entrypoint: python /app/main.py"));
}

#[test]
fn rebuild_is_served_from_cache() {
  let env = TestEnv::with_descriptor(COPY_DESCRIPTOR);
  env.write_file("src/main.py", "print('v1')");

  let first = env.build_json();
  let second = env.build_json();

  assert_eq!(statuses(&first), vec!["miss", "miss", "miss"]);
  assert_eq!(statuses(&second), vec!["hit", "hit", "hit"]);
  assert_eq!(first["artifact"], second["artifact"]);
}

#[test]
fn changed_source_invalidates_from_that_step() {
  let env = TestEnv::with_descriptor(COPY_DESCRIPTOR);
  env.write_file("src/main.py", "print('v1')");
  env.build_json();

  env.write_file("src/main.py", "print('v2')");
  let rebuilt = env.build_json();
  assert_eq!(statuses(&rebuilt), vec!["hit", "miss", "miss"]);
}

#[test]
fn export_writes_final_filesystem() {
  let env = TestEnv::with_descriptor(COPY_DESCRIPTOR);
  env.write_file("src/main.py", "print('v1')");
  let dest = env.path().join("out");

  env
    .layercake_cmd()
    .arg("build")
    .arg(&env.descriptor)
    .arg("--export")
    .arg(&dest)
    .assert()
    .success();

  assert_eq!(std::fs::read_to_string(dest.join("app/main.py")).unwrap(), "print('v1')");
}

#[test]
fn plan_reports_reusable_prefix() {
  let env = TestEnv::with_descriptor(COPY_DESCRIPTOR);
  env.write_file("src/main.py", "print('v1')");

  env
    .layercake_cmd()
    .arg("plan")
    .arg(&env.descriptor)
    .assert()
    .success()
    .stdout(predicate::str::contains("Reusable: 0/3"));

  env.build_json();

  env
    .layercake_cmd()
    .arg("plan")
    .arg(&env.descriptor)
    .assert()
    .success()
    .stdout(predicate::str::contains("Reusable: 3/3"));
}

#[test]
fn unknown_step_kind_fails_planning() {
  let env = TestEnv::with_descriptor("steps:\n  - kind: base-image\n    image: scratch\n  - kind: compile\n");

  env
    .layercake_cmd()
    .arg("build")
    .arg(&env.descriptor)
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown step kind 'compile'"));
}

#[test]
fn missing_input_file_fails_planning() {
  let env = TestEnv::with_descriptor(
    "steps:\n  - kind: base-image\n    image: scratch\n  - kind: dependency-install\n    run: pip install\n    files: [requirements.txt]\n",
  );

  env
    .layercake_cmd()
    .arg("build")
    .arg(&env.descriptor)
    .assert()
    .failure()
    .stderr(predicate::str::contains("Build failed while planning"));

  env
    .layercake_cmd()
    .arg("ls")
    .assert()
    .success()
    .stdout(predicate::str::contains("Cache is empty"));
}

#[cfg(unix)]
#[test]
fn failed_install_keeps_earlier_steps_cached() {
  let env = TestEnv::with_descriptor(
    r#"
steps:
  - kind: base-image
    image: scratch
  - kind: file-copy
    sources: [src]
    destination: /app/
  - kind: dependency-install
    run: test -f app/ready && printf ok > deps.txt
"#,
  );
  env.write_file("src/main.py", "print('v1')");

  env
    .layercake_cmd()
    .arg("build")
    .arg(&env.descriptor)
    .assert()
    .failure()
    .stderr(predicate::str::contains("Build failed while executing"));

  let output = env.layercake_cmd().args(["ls", "-o", "json"]).output().unwrap();
  let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(entries.as_array().unwrap().len(), 2);
}

#[cfg(unix)]
#[test]
fn install_reads_declared_files() {
  let env = TestEnv::with_descriptor(
    r#"
steps:
  - kind: base-image
    image: scratch
  - kind: dependency-install
    run: cp requirements.txt deps.txt
    files: [requirements.txt]
"#,
  );
  env.write_file("requirements.txt", "flask==3.0");
  let dest = env.path().join("out");

  env
    .layercake_cmd()
    .arg("build")
    .arg(&env.descriptor)
    .arg("--export")
    .arg(&dest)
    .assert()
    .success();
  assert_eq!(std::fs::read_to_string(dest.join("deps.txt")).unwrap(), "flask==3.0");

  env.write_file("requirements.txt", "flask==3.1");
  assert_eq!(statuses(&env.build_json()), vec!["hit", "miss"]);
}

#[test]
fn base_image_is_unpacked_from_images_dir() {
  let env = TestEnv::with_descriptor("steps:\n  - kind: base-image\n    image: python:3.12\n");
  env.write_file("images/python/3.12/usr/bin/python3", "#!");
  let dest = env.path().join("out");

  env
    .layercake_cmd()
    .arg("build")
    .arg(&env.descriptor)
    .arg("--images")
    .arg(env.path().join("images"))
    .arg("--export")
    .arg(&dest)
    .assert()
    .success()
    .stdout(predicate::str::contains("Base image: python:3.12"));

  assert!(dest.join("usr/bin/python3").is_file());
}
