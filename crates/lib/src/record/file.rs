//! Sidecar-file record storage.

use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::util::hash::ContentHash;

use super::{RecordKind, RecordStore, read_record, remove_if_exists, write_record};

/// Suffix of an artifact's own record.
pub const ARTIFACT_RECORD_SUFFIX: &str = ".hash";

/// Suffix of a published output's provenance record.
pub const PROVENANCE_RECORD_SUFFIX: &str = ".source.hash";

/// Stores records as files next to the artifact.
///
/// ```text
/// out/
/// ├── disk.qcow2              # artifact
/// ├── disk.qcow2.hash         # RecordKind::Artifact
/// └── disk.qcow2.source.hash  # RecordKind::Provenance
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct FileRecordStore;

impl FileRecordStore {
  /// Path of the record of `kind` for `artifact`.
  pub fn record_path(artifact: &Path, kind: RecordKind) -> PathBuf {
    let suffix = match kind {
      RecordKind::Artifact => ARTIFACT_RECORD_SUFFIX,
      RecordKind::Provenance => PROVENANCE_RECORD_SUFFIX,
    };
    let mut name = artifact.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
  }
}

impl RecordStore for FileRecordStore {
  fn read(&self, artifact: &Path, kind: RecordKind) -> Result<Option<ContentHash>, PipelineError> {
    read_record(&Self::record_path(artifact, kind))
  }

  fn write(&self, artifact: &Path, kind: RecordKind, hash: &ContentHash) -> Result<(), PipelineError> {
    let name = artifact
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    write_record(&Self::record_path(artifact, kind), &name, hash)
  }

  fn remove(&self, artifact: &Path, kind: RecordKind) -> Result<(), PipelineError> {
    remove_if_exists(&Self::record_path(artifact, kind)).map(|_| ())
  }
}
