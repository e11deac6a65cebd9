//! Detached integrity records.
//!
//! A record attests the content hash of an artifact at the time it was
//! written. Records are not atomically consistent with their artifact, so
//! callers must treat "record present but wrong" as a state distinct from
//! "record absent": [`Verification`] keeps the two apart.
//!
//! Pipeline logic only talks to [`RecordStore`]. [`FileRecordStore`] keeps
//! records as sidecar files next to the artifact they attest to.

mod file;

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::PipelineError;
use crate::util::hash::{ContentHash, hash_file};

pub use file::FileRecordStore;

/// Bytes of a record file that are read. A digest and file name fit many
/// times over; anything longer is not a record.
pub const RECORD_READ_LIMIT: u64 = 4096;

/// Characters of an unparseable token kept in the error.
const MALFORMED_TOKEN_DISPLAY: usize = 80;

/// Which record of an artifact is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
  /// The artifact's own content hash.
  Artifact,
  /// Hash of the source artifact that produced a published output.
  Provenance,
}

/// Three-way outcome of checking an artifact against a record.
///
/// Every variant carries the artifact's freshly computed hash so callers do
/// not have to hash a large artifact twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verification {
  Matches { actual: ContentHash },
  Mismatch { expected: ContentHash, actual: ContentHash },
  NotFound { actual: ContentHash },
}

impl Verification {
  fn compare(recorded: Option<ContentHash>, actual: ContentHash) -> Self {
    match recorded {
      Some(expected) if expected == actual => Verification::Matches { actual },
      Some(expected) => Verification::Mismatch { expected, actual },
      None => Verification::NotFound { actual },
    }
  }

  pub fn actual(&self) -> &ContentHash {
    match self {
      Verification::Matches { actual } | Verification::Mismatch { actual, .. } | Verification::NotFound { actual } => {
        actual
      }
    }
  }

  pub fn is_match(&self) -> bool {
    matches!(self, Verification::Matches { .. })
  }
}

/// Storage for the records attached to artifacts.
///
/// Implementations decide where records live; the pipeline only addresses
/// them by artifact path and [`RecordKind`].
pub trait RecordStore {
  /// Read a record. Absence is `Ok(None)`, never an error.
  fn read(&self, artifact: &Path, kind: RecordKind) -> Result<Option<ContentHash>, PipelineError>;

  /// Persist a record, replacing any existing one.
  fn write(&self, artifact: &Path, kind: RecordKind, hash: &ContentHash) -> Result<(), PipelineError>;

  /// Remove a record. Removing an absent record succeeds.
  fn remove(&self, artifact: &Path, kind: RecordKind) -> Result<(), PipelineError>;

  /// Hash `artifact` and compare it with its record of `kind`.
  fn verify(&self, artifact: &Path, kind: RecordKind) -> Result<Verification, PipelineError> {
    let recorded = self.read(artifact, kind)?;
    let actual = compute(artifact)?;
    Ok(Verification::compare(recorded, actual))
  }
}

/// Compute the content hash of an artifact.
pub fn compute(artifact: &Path) -> Result<ContentHash, PipelineError> {
  hash_file(artifact).map_err(PipelineError::io(artifact))
}

/// Write `hash` as a record at `record_path`.
///
/// The body is `<hex>  <artifact file name>\n`, the layout `sha256sum` emits.
/// The record is written to a temp file in the same directory and renamed
/// into place, so it is never observable half-written.
pub fn write_record(record_path: &Path, artifact_name: &str, hash: &ContentHash) -> Result<(), PipelineError> {
  let dir = record_path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));

  let mut temp = NamedTempFile::new_in(dir).map_err(PipelineError::io(dir))?;
  writeln!(temp, "{}  {}", hash, artifact_name).map_err(PipelineError::io(temp.path()))?;
  temp.as_file().sync_all().map_err(PipelineError::io(temp.path()))?;
  temp
    .persist(record_path)
    .map_err(|e| PipelineError::io(record_path)(e.error))?;

  debug!(record = %record_path.display(), hash = %hash.short(), "wrote hash record");
  Ok(())
}

/// Read the record at `record_path`.
///
/// Returns `Ok(None)` if the file does not exist. Only the first
/// [`RECORD_READ_LIMIT`] bytes are read. The first whitespace-delimited token
/// must be a well-formed digest; anything else, including bytes that are not
/// UTF-8, is [`PipelineError::MalformedRecord`].
pub fn read_record(record_path: &Path) -> Result<Option<ContentHash>, PipelineError> {
  let file = match File::open(record_path) {
    Ok(file) => file,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(PipelineError::io(record_path)(e)),
  };

  let mut head = Vec::new();
  file
    .take(RECORD_READ_LIMIT)
    .read_to_end(&mut head)
    .map_err(PipelineError::io(record_path))?;

  let malformed = |token: &str| PipelineError::MalformedRecord {
    path: record_path.to_path_buf(),
    token: token.chars().take(MALFORMED_TOKEN_DISPLAY).collect(),
  };

  let text = match std::str::from_utf8(&head) {
    Ok(text) => text,
    // The read limit may cut a multi-byte character short; keep what is whole.
    Err(e) if e.error_len().is_none() => std::str::from_utf8(&head[..e.valid_up_to()]).unwrap_or_default(),
    Err(_) => return Err(malformed(&String::from_utf8_lossy(&head))),
  };

  let token = text.split_whitespace().next().unwrap_or("");
  token.parse::<ContentHash>().map(Some).map_err(|_| malformed(token))
}

/// Verify `artifact` against the record at `record_path`.
pub fn verify(artifact: &Path, record_path: &Path) -> Result<Verification, PipelineError> {
  let recorded = read_record(record_path)?;
  let actual = compute(artifact)?;
  Ok(Verification::compare(recorded, actual))
}

/// Remove a file if it exists.
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool, PipelineError> {
  match fs::remove_file(path) {
    Ok(()) => Ok(true),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
    Err(e) => Err(PipelineError::io(path)(e)),
  }
}
