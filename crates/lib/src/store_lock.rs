//! Advisory lock over a cache store root.
//!
//! Builds hold the lock shared so several may publish concurrently; maintenance
//! that rewrites the store layout (eviction from the CLI) takes it exclusive.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::APP_NAME;

const LOCK_FILENAME: &str = ".lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
  Shared,
  Exclusive,
}

/// Written into the lock file by exclusive holders so a blocked process can
/// say who is in the way.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockHolder {
  pub pid: u32,
  pub acquired_at_unix: u64,
  pub command: String,
}

#[derive(Debug, Error)]
pub enum StoreLockError {
  #[error(
    "store {store} is locked by `{command}` (pid {pid}, since unix time {acquired_at_unix})\n\
     if no {app} process is running, delete {lock_path}",
    app = APP_NAME
  )]
  HeldBy {
    store: PathBuf,
    command: String,
    pid: u32,
    acquired_at_unix: u64,
    lock_path: PathBuf,
  },

  #[error("store {store} is locked by another process\nif none is running, delete {lock_path}")]
  Held { store: PathBuf, lock_path: PathBuf },

  #[error("failed to prepare lock file {path}: {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to record lock holder in {path}: {source}")]
  Record {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to lock {path}: {source}")]
  Lock {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Held for as long as the value lives; dropping the file handle releases it.
#[derive(Debug)]
pub struct StoreLock {
  file: File,
  path: PathBuf,
  mode: LockMode,
}

impl StoreLock {
  /// Take the lock on `root` without blocking, creating the root if needed.
  pub fn acquire(root: &Path, mode: LockMode, command: &str) -> Result<Self, StoreLockError> {
    let path = root.join(LOCK_FILENAME);
    let open_err = |source| StoreLockError::Open {
      path: path.clone(),
      source,
    };

    std::fs::create_dir_all(root).map_err(open_err)?;
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)
      .map_err(open_err)?;

    if let Err(source) = try_lock(&file, mode) {
      if source.kind() == io::ErrorKind::WouldBlock {
        return Err(held_error(root, &path));
      }
      return Err(StoreLockError::Lock { path, source });
    }

    let lock = StoreLock { file, path, mode };
    if mode == LockMode::Exclusive {
      lock.record_holder(command)?;
    }
    Ok(lock)
  }

  pub fn mode(&self) -> LockMode {
    self.mode
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Read the holder record through the handle already held. Opening the
  /// file again would fail on Windows while the lock is held.
  pub fn holder(&self) -> io::Result<LockHolder> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  fn record_holder(&self, command: &str) -> Result<(), StoreLockError> {
    let holder = LockHolder {
      pid: std::process::id(),
      acquired_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      command: command.to_string(),
    };
    let record_err = |source| StoreLockError::Record {
      path: self.path.clone(),
      source,
    };

    self.file.set_len(0).map_err(record_err)?;
    let mut writer = io::BufWriter::new(&self.file);
    serde_json::to_writer(&mut writer, &holder).map_err(|e| record_err(io::Error::other(e)))?;
    writer.flush().map_err(record_err)
  }
}

fn held_error(root: &Path, lock_path: &Path) -> StoreLockError {
  let holder = std::fs::read_to_string(lock_path)
    .ok()
    .and_then(|contents| serde_json::from_str::<LockHolder>(&contents).ok());

  match holder {
    Some(holder) => StoreLockError::HeldBy {
      store: root.to_path_buf(),
      command: holder.command,
      pid: holder.pid,
      acquired_at_unix: holder.acquired_at_unix,
      lock_path: lock_path.to_path_buf(),
    },
    None => StoreLockError::Held {
      store: root.to_path_buf(),
      lock_path: lock_path.to_path_buf(),
    },
  }
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = match mode {
    LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
  };

  // SAFETY: a zeroed OVERLAPPED is valid and the handle is owned by `file`.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
