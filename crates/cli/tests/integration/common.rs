//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Base image, a copy of `src/` into `/app/`, and an entrypoint. Runs no
/// external commands, so it works on every platform.
pub const COPY_DESCRIPTOR: &str = r#"
steps:
  - kind: base-image
    image: scratch
  - kind: file-copy
    sources: [src]
    destination: /app/
  - kind: entrypoint-config
    command: [python, /app/main.py]
"#;

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the build context and
/// the cache store.
pub struct TestEnv {
  pub temp: TempDir,
  pub descriptor: PathBuf,
}

impl TestEnv {
  /// Create an environment whose descriptor is `content`.
  pub fn with_descriptor(content: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let descriptor = temp.path().join("layercake.yaml");
    std::fs::write(&descriptor, content).unwrap();
    Self { temp, descriptor }
  }

  /// Write a file relative to the build context.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn path(&self) -> &Path {
    self.temp.path()
  }

  /// Store path (isolated per test).
  pub fn store_path(&self) -> PathBuf {
    let p = self.temp.path().join("store");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Get a pre-configured Command for the layercake binary.
  pub fn layercake_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("layercake");
    cmd.env("LAYERCAKE_STORE", self.store_path());
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// Run `build -o json` and return the parsed result.
  pub fn build_json(&self) -> serde_json::Value {
    let output = self
      .layercake_cmd()
      .arg("build")
      .arg(&self.descriptor)
      .args(["-o", "json"])
      .output()
      .unwrap();
    assert!(
      output.status.success(),
      "build failed: {}",
      String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
  }
}

/// The `status` of every step in a JSON build result.
pub fn statuses(result: &serde_json::Value) -> Vec<String> {
  result["steps"]
    .as_array()
    .unwrap()
    .iter()
    .map(|s| s["status"].as_str().unwrap().to_string())
    .collect()
}
