//! The default package manager: run the command line inside the rootfs.
//!
//! The process gets a cleared environment:
//! - `PATH` from [`ExecuteConfig::path`](crate::execute::ExecuteConfig)
//! - `HOME` pointing nowhere useful
//! - `TMPDIR`/`TMP`/`TEMP` in a throwaway directory outside the rootfs
//! - `LANG`/`LC_ALL` set to `C`, `SOURCE_DATE_EPOCH` fixed
//! - the step's own `env` on top
//!
//! Changed paths are found by snapshotting the rootfs before and after.

use std::collections::BTreeSet;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::install::{InstallRequest, PackageManager};
use crate::consts::SOURCE_DATE_EPOCH;
use crate::execute::rootfs;
use crate::execute::types::{ActionError, blocking};

#[derive(Debug, Clone, Copy, Default)]
pub struct ShellPackageManager;

#[async_trait]
impl PackageManager for ShellPackageManager {
  async fn install(&self, request: InstallRequest<'_>) -> Result<BTreeSet<String>, ActionError> {
    let Some((program, args)) = request.command.split_first() else {
      return Err(ActionError::CommandFailed {
        command: String::new(),
        code: None,
        stderr: "empty command".to_string(),
      });
    };
    let command_line = request.command.join(" ");
    info!(cmd = %command_line, "running install command");

    let before = snapshot(request.workdir).await?;
    let tmp = tempfile::Builder::new()
      .prefix("layercake-tmp-")
      .tempdir()
      .map_err(ActionError::io("create temp dir for", request.workdir))?;

    let mut command = Command::new(program);
    command
      .args(args)
      .current_dir(request.workdir)
      .env_clear()
      .env("PATH", request.path)
      .env("HOME", "/homeless-shelter")
      .env("TMPDIR", tmp.path())
      .env("TMP", tmp.path())
      .env("TEMP", tmp.path())
      .env("LANG", "C")
      .env("LC_ALL", "C")
      .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH)
      .envs(request.env)
      .stdin(Stdio::null())
      .kill_on_drop(true);

    #[cfg(windows)]
    {
      if let Ok(root) = std::env::var("SystemRoot") {
        command.env("SystemRoot", root);
      }
    }

    debug!(program = %program, workdir = %request.workdir.display(), "spawning process");
    let output = command.output().await.map_err(|source| ActionError::Spawn {
      command: command_line.clone(),
      source,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
      debug!(stdout = %stdout.trim(), "command stdout");
    }
    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
      debug!(stderr = %stderr, "command stderr");
      return Err(ActionError::CommandFailed {
        command: command_line,
        code: output.status.code(),
        stderr,
      });
    }

    let after = snapshot(request.workdir).await?;
    let changed = rootfs::diff(&before, &after);
    debug!(changed = changed.len(), "install command finished");
    Ok(changed)
  }
}

async fn snapshot(root: &Path) -> Result<rootfs::TreeSnapshot, ActionError> {
  let owned = root.to_path_buf();
  blocking("scan", root, move || Ok(rootfs::snapshot(&owned)?)).await
}
