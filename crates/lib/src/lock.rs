//! Per-destination publish locking.
//!
//! The publisher itself takes no lock and is not safe against a concurrent
//! publisher targeting the same destination. Callers that may race hold a
//! [`PublishLock`] for the destination key around publish. The CLI does this
//! by default.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub output: PathBuf,
}

#[derive(Debug, Error)]
pub enum PublishLockError {
  #[error(
    "output {} is being published by another process: {command} (PID {pid}, started at unix time {started_at_unix}); \
     if no artiflow process is running, remove {}",
    .output.display(),
    .lock_path.display()
  )]
  Contention {
    command: String,
    pid: u32,
    started_at_unix: u64,
    output: PathBuf,
    lock_path: PathBuf,
  },

  #[error(
    "output is locked (could not read lock metadata); if no artiflow process is running, remove {}",
    .lock_path.display()
  )]
  ContentionUnknown { lock_path: PathBuf },

  #[error("failed to create output directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

/// An exclusive advisory lock on one destination key. Released on drop.
pub struct PublishLock {
  file: File,
  lock_path: PathBuf,
}

impl PublishLock {
  /// Lock file path for `output_name` in `output_dir`.
  pub fn lock_path(output_dir: &Path, output_name: &str) -> PathBuf {
    output_dir.join(format!(".{}.lock", output_name))
  }

  /// Try to take the lock without blocking.
  pub fn acquire(output_dir: &Path, output_name: &str, command: &str) -> Result<Self, PublishLockError> {
    let lock_path = Self::lock_path(output_dir, output_name);

    if !output_dir.exists() {
      std::fs::create_dir_all(output_dir).map_err(PublishLockError::CreateDir)?;
    }

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(PublishLockError::OpenFile)?;

    if let Err(err) = try_lock(&file) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(Self::read_contention_error(&lock_path));
      }
      return Err(PublishLockError::LockFailed(err));
    }

    Self::write_metadata(&file, command, &output_dir.join(output_name))?;

    Ok(PublishLock { file, lock_path })
  }

  /// Reads the lock metadata through the held handle.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn path(&self) -> &Path {
    &self.lock_path
  }

  fn write_metadata(file: &File, command: &str, output: &Path) -> Result<(), PublishLockError> {
    let metadata = LockMetadata {
      version: 1,
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      command: command.to_string(),
      output: output.to_path_buf(),
    };

    file.set_len(0).map_err(PublishLockError::WriteMetadata)?;
    let mut writer = io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &metadata)
      .map_err(|e| PublishLockError::WriteMetadata(io::Error::other(e)))?;
    writer.flush().map_err(PublishLockError::WriteMetadata)?;

    Ok(())
  }

  fn read_contention_error(lock_path: &Path) -> PublishLockError {
    if let Ok(mut file) = File::open(lock_path) {
      let mut contents = String::new();
      if file.read_to_string(&mut contents).is_ok()
        && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
      {
        return PublishLockError::Contention {
          command: metadata.command,
          pid: metadata.pid,
          started_at_unix: metadata.started_at_unix,
          output: metadata.output,
          lock_path: lock_path.to_path_buf(),
        };
      }
    }

    PublishLockError::ContentionUnknown {
      lock_path: lock_path.to_path_buf(),
    }
  }
}

#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
    .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(
      handle,
      LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
      0,
      1,
      0,
      &mut overlapped,
    )
  };

  if result == 0 {
    let err = io::Error::last_os_error();
    // ERROR_LOCK_VIOLATION
    if err.raw_os_error() == Some(33) {
      return Err(io::Error::new(io::ErrorKind::WouldBlock, err));
    }
    Err(err)
  } else {
    Ok(())
  }
}
