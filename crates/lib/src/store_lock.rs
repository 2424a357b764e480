//! File-based locking of the snapshot store.
//!
//! Writers take an exclusive lock on `{store}/.lock` for the duration of a
//! save or delete; readers may take a shared one. The lock is released when
//! the [`StoreLock`] is dropped.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::snapshot::now_unix;

const LOCK_FILENAME: &str = ".lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

/// Who holds the store lock. Written into the lock file by exclusive holders.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub store: PathBuf,
}

impl LockMetadata {
  fn for_this_process(command: &str, store: &Path) -> Self {
    Self {
      version: 1,
      pid: std::process::id(),
      started_at_unix: now_unix(),
      command: command.to_string(),
      store: store.to_path_buf(),
    }
  }

  fn read_from(mut reader: impl Read) -> io::Result<Self> {
    let mut contents = String::new();
    reader.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }
}

#[derive(Debug, Error)]
pub enum StoreLockError {
  #[error(
    "Snapshot store is in use by `{command}` (PID {pid}, running for {held_secs}s)\n\
     Remove the lock file if no envbake process is running:\n  {lock_path}"
  )]
  Contention {
    command: String,
    pid: u32,
    held_secs: u64,
    lock_path: PathBuf,
  },

  #[error(
    "Snapshot store is in use by another process\n\
     Remove the lock file if no envbake process is running:\n  {lock_path}"
  )]
  ContentionUnknown { lock_path: PathBuf },

  #[error("failed to {action} {path}: {source}")]
  Io {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl StoreLockError {
  fn io<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> Self + 'a {
    move |source| Self::Io {
      action,
      path: path.to_path_buf(),
      source,
    }
  }
}

/// Advisory lock over a snapshot store directory.
pub struct StoreLock {
  file: File,
  lock_path: PathBuf,
}

impl StoreLock {
  /// Lock the store rooted at `store`, failing immediately if another
  /// process holds a conflicting lock.
  pub fn acquire(store: &Path, mode: LockMode, command: &str) -> Result<Self, StoreLockError> {
    std::fs::create_dir_all(store).map_err(StoreLockError::io("create", store))?;

    let lock_path = store.join(LOCK_FILENAME);
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(StoreLockError::io("open", &lock_path))?;

    match try_lock(&file, mode) {
      Ok(()) => {}
      Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Err(contention(&lock_path)),
      Err(err) => return Err(StoreLockError::io("lock", &lock_path)(err)),
    }

    let lock = StoreLock { file, lock_path };
    if mode == LockMode::Exclusive {
      lock.write_metadata(&LockMetadata::for_this_process(command, store))?;
    }

    debug!(path = %lock.lock_path.display(), ?mode, command, "store lock acquired");
    Ok(lock)
  }

  /// Reads the lock metadata through the held file handle.
  ///
  /// A second handle cannot read the file on Windows while the lock is held.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    LockMetadata::read_from(file)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  fn write_metadata(&self, metadata: &LockMetadata) -> Result<(), StoreLockError> {
    let write_err = StoreLockError::io("write", &self.lock_path);
    let bytes = serde_json::to_vec_pretty(metadata).map_err(io::Error::other);
    let mut file = &self.file;
    bytes
      .and_then(|bytes| {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&bytes)?;
        file.flush()
      })
      .map_err(write_err)
  }
}

fn contention(lock_path: &Path) -> StoreLockError {
  match File::open(lock_path).and_then(LockMetadata::read_from) {
    Ok(holder) => StoreLockError::Contention {
      command: holder.command,
      pid: holder.pid,
      held_secs: now_unix().saturating_sub(holder.started_at_unix),
      lock_path: lock_path.to_path_buf(),
    },
    Err(_) => StoreLockError::ContentionUnknown {
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

  // SAFETY: OVERLAPPED is plain data and valid when zeroed; the handle is
  // owned by `file` for the duration of the call.
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
