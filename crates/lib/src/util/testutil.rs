//! Test helpers shared across the crate.
//!
//! Install steps run real processes, so tests need platform-appropriate
//! command lines and small on-disk fixtures.

use std::fs;
use std::path::Path;

/// argv that runs `script` through the platform shell.
#[cfg(unix)]
pub fn shell_cmd(script: &str) -> Vec<String> {
  vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
}

#[cfg(windows)]
pub fn shell_cmd(script: &str) -> Vec<String> {
  vec!["cmd.exe".to_string(), "/C".to_string(), script.to_string()]
}

/// argv that writes `content` into `file` relative to the working directory.
#[cfg(unix)]
pub fn write_file_cmd(file: &str, content: &str) -> Vec<String> {
  shell_cmd(&format!("printf '%s' '{}' > {}", content, file))
}

#[cfg(windows)]
pub fn write_file_cmd(file: &str, content: &str) -> Vec<String> {
  shell_cmd(&format!("echo|set /p=\"{}\" > {}", content, file))
}

/// argv that sleeps for `secs` seconds.
#[cfg(unix)]
pub fn sleep_cmd(secs: u32) -> Vec<String> {
  shell_cmd(&format!("sleep {}", secs))
}

#[cfg(windows)]
pub fn sleep_cmd(secs: u32) -> Vec<String> {
  shell_cmd(&format!("ping -n {} 127.0.0.1 > NUL", secs + 1))
}

/// argv that exits non-zero.
pub fn fail_cmd() -> Vec<String> {
  shell_cmd("exit 3")
}

/// Create files (and their parent directories) under `root`.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
  for (path, content) in files {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(full, content).unwrap();
  }
}

pub fn read(root: &Path, path: &str) -> String {
  fs::read_to_string(root.join(path)).unwrap()
}
