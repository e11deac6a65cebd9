//! Error taxonomy for pipeline runs.
//!
//! Every failure a run can surface maps to exactly one [`ErrorKind`]. Integrity
//! mismatches and external-command failures are never retried; they carry the
//! paths and hashes a caller needs to decide whether to re-run.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::lock::PublishLockError;
use crate::transform::TransformStep;
use crate::util::hash::ContentHash;

/// Stable categories for [`PipelineError`], used for the CLI's categorized
/// error line and exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
  SourceNotFound,
  SourceIntegrityMismatch,
  MalformedRecord,
  InvalidInput,
  CopyIntegrity,
  CustomizationFailed,
  ConversionFailed,
  StepTimedOut,
  AlreadyExists,
  PublishIntegrity,
  Lock,
  Io,
}

impl ErrorKind {
  pub fn as_str(self) -> &'static str {
    match self {
      ErrorKind::SourceNotFound => "source-not-found",
      ErrorKind::SourceIntegrityMismatch => "source-integrity-mismatch",
      ErrorKind::MalformedRecord => "malformed-record",
      ErrorKind::InvalidInput => "invalid-input",
      ErrorKind::CopyIntegrity => "copy-integrity",
      ErrorKind::CustomizationFailed => "customization-failed",
      ErrorKind::ConversionFailed => "conversion-failed",
      ErrorKind::StepTimedOut => "step-timed-out",
      ErrorKind::AlreadyExists => "already-exists",
      ErrorKind::PublishIntegrity => "publish-integrity",
      ErrorKind::Lock => "lock",
      ErrorKind::Io => "io",
    }
  }

  /// Process exit status for this category.
  pub fn exit_code(self) -> u8 {
    match self {
      ErrorKind::Io => 1,
      ErrorKind::SourceNotFound => 10,
      ErrorKind::SourceIntegrityMismatch => 11,
      ErrorKind::MalformedRecord => 12,
      ErrorKind::InvalidInput => 13,
      ErrorKind::CopyIntegrity => 20,
      ErrorKind::CustomizationFailed => 30,
      ErrorKind::ConversionFailed => 31,
      ErrorKind::StepTimedOut => 32,
      ErrorKind::AlreadyExists => 40,
      ErrorKind::PublishIntegrity => 41,
      ErrorKind::Lock => 42,
    }
  }
}

impl std::fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Observable result of an external command that did not succeed.
#[derive(Debug, Clone)]
pub struct CommandFailure {
  /// The command text as given by the caller.
  pub command: String,
  /// Exit code, `None` if the process was killed by a signal.
  pub code: Option<i32>,
  /// Full captured stderr.
  pub stderr: String,
  /// Working copy the command ran against. Left in place for inspection.
  pub working_copy: PathBuf,
}

impl CommandFailure {
  /// Last non-empty stderr line, for single-line reporting.
  pub fn summary(&self) -> &str {
    self
      .stderr
      .lines()
      .rev()
      .map(str::trim)
      .find(|line| !line.is_empty())
      .unwrap_or("")
  }
}

impl std::fmt::Display for CommandFailure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.code {
      Some(code) => write!(f, "`{}` exited with code {}", self.command, code)?,
      None => write!(f, "`{}` was terminated by a signal", self.command)?,
    }
    let summary = self.summary();
    if !summary.is_empty() {
      write!(f, ": {}", summary)?;
    }
    write!(f, " (working copy kept at {})", self.working_copy.display())
  }
}

/// Errors that can occur during a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
  /// The source artifact does not exist.
  #[error("source artifact not found: {}", .path.display())]
  SourceNotFound { path: PathBuf },

  /// An explicit source record exists and disagrees with the source content.
  #[error(
    "source {} does not match its record {}: expected {expected}, got {actual}",
    .path.display(),
    .record.display()
  )]
  SourceIntegrityMismatch {
    path: PathBuf,
    record: PathBuf,
    expected: ContentHash,
    actual: ContentHash,
  },

  /// A record file exists but its first token is not a digest.
  #[error("malformed hash record {}: {token:?} is not a sha256 digest", .path.display())]
  MalformedRecord { path: PathBuf, token: String },

  /// A caller-supplied name that must be a plain file name is not one.
  #[error("invalid {what} {value:?}: {reason}")]
  InvalidInput {
    what: &'static str,
    value: String,
    reason: &'static str,
  },

  /// The staged working copy does not hash to the source's hash.
  #[error(
    "working copy {} does not match source: expected {expected}, got {actual}",
    .path.display()
  )]
  CopyIntegrity {
    path: PathBuf,
    expected: ContentHash,
    actual: ContentHash,
  },

  /// The customization command exited non-zero.
  #[error("customization failed: {0}")]
  CustomizationFailed(CommandFailure),

  /// The conversion command exited non-zero or produced no output.
  #[error("conversion failed: {0}")]
  ConversionFailed(CommandFailure),

  /// A transform step exceeded the configured timeout and was killed.
  #[error("{step} step `{command}` timed out after {}s", .after.as_secs_f64())]
  StepTimedOut {
    step: TransformStep,
    command: String,
    after: Duration,
  },

  /// Output exists and overwrite was not requested. Nothing was touched.
  #[error("output already exists: {} (pass overwrite to replace it)", .path.display())]
  AlreadyExists { path: PathBuf },

  /// The published artifact does not hash to what was transformed.
  #[error(
    "published artifact {} failed verification: expected {expected}, got {actual}",
    .path.display()
  )]
  PublishIntegrity {
    path: PathBuf,
    expected: ContentHash,
    actual: ContentHash,
  },

  /// The destination lock could not be taken.
  #[error(transparent)]
  Lock(#[from] PublishLockError),

  /// Filesystem error on a specific path.
  #[error("io error on {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl PipelineError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      PipelineError::SourceNotFound { .. } => ErrorKind::SourceNotFound,
      PipelineError::SourceIntegrityMismatch { .. } => ErrorKind::SourceIntegrityMismatch,
      PipelineError::MalformedRecord { .. } => ErrorKind::MalformedRecord,
      PipelineError::InvalidInput { .. } => ErrorKind::InvalidInput,
      PipelineError::CopyIntegrity { .. } => ErrorKind::CopyIntegrity,
      PipelineError::CustomizationFailed(_) => ErrorKind::CustomizationFailed,
      PipelineError::ConversionFailed(_) => ErrorKind::ConversionFailed,
      PipelineError::StepTimedOut { .. } => ErrorKind::StepTimedOut,
      PipelineError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
      PipelineError::PublishIntegrity { .. } => ErrorKind::PublishIntegrity,
      PipelineError::Lock(_) => ErrorKind::Lock,
      PipelineError::Io { .. } => ErrorKind::Io,
    }
  }

  /// Adapter for `map_err` that attaches the path being operated on.
  pub fn io(path: &Path) -> impl FnOnce(io::Error) -> PipelineError + '_ {
    move |source| PipelineError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}
