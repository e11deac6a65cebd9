//! Promotion of a transformed artifact into the output store.
//!
//! # Layout
//!
//! ```text
//! <output-dir>/
//! ├── <name>               # the artifact
//! ├── <name>.hash          # self record
//! └── <name>.source.hash   # provenance: hash of the source that produced it
//! ```
//!
//! # Ordering
//!
//! When overwriting, the prior artifact and both records are deleted before
//! the new artifact is copied in. A crash in between leaves the store in the
//! "output missing" state, which the oracle classifies as must-process,
//! rather than in a state where old records describe new bytes. Records are
//! written only after the artifact they attest to is fully in place.
//!
//! # Concurrency
//!
//! [`publish`] takes no lock and is **not** safe against a concurrent publish
//! to the same destination: a reader can observe the gap between delete and
//! rename, and two publishers can interleave their delete, copy, and record
//! steps. Callers that may race must serialize per destination, e.g. with
//! [`crate::lock::PublishLock`].

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::record::{RecordKind, RecordStore, Verification, compute, remove_if_exists};
use crate::util::hash::ContentHash;

/// Where an output is published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
  pub dir: PathBuf,
  pub name: String,
}

impl Destination {
  pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
    Self {
      dir: dir.into(),
      name: name.into(),
    }
  }

  /// Path of the published artifact.
  pub fn path(&self) -> PathBuf {
    self.dir.join(&self.name)
  }
}

/// Check that `name` is a plain file name that stays inside the output
/// directory.
pub fn validate_output_name(name: &str) -> Result<(), PipelineError> {
  if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
    return Err(PipelineError::InvalidInput {
      what: "output name",
      value: name.to_string(),
      reason: "must be a plain file name",
    });
  }
  Ok(())
}

/// Result of a successful publish.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedArtifact {
  pub path: PathBuf,
  pub hash: ContentHash,
  pub source_hash: ContentHash,
  /// Whether a prior output was replaced.
  pub replaced: bool,
}

/// Publish `transformed` (hashing to `transformed_hash`) as the output of a
/// source hashing to `source_hash`.
///
/// Fails with [`PipelineError::AlreadyExists`] without touching anything if
/// the destination exists and `overwrite` is false.
pub fn publish(
  transformed: &Path,
  transformed_hash: &ContentHash,
  source_hash: &ContentHash,
  dest: &Destination,
  overwrite: bool,
  records: &impl RecordStore,
) -> Result<PublishedArtifact, PipelineError> {
  let path = dest.path();
  let exists = path.symlink_metadata().is_ok();

  if exists && !overwrite {
    return Err(PipelineError::AlreadyExists { path });
  }

  if exists {
    info!(output = %path.display(), "removing prior output");
    records.remove(&path, RecordKind::Provenance)?;
    remove_if_exists(&path)?;
    records.remove(&path, RecordKind::Artifact)?;
  }

  fs::create_dir_all(&dest.dir).map_err(PipelineError::io(&dest.dir))?;

  let published_hash = copy_into_place(transformed, transformed_hash, dest)?;

  if let Err(e) = attest(&path, &published_hash, source_hash, records) {
    rollback(&path, records);
    return Err(e);
  }

  info!(output = %path.display(), hash = %published_hash.short(), "published");

  Ok(PublishedArtifact {
    path,
    hash: published_hash,
    source_hash: source_hash.clone(),
    replaced: exists,
  })
}

/// Copy through a temp file in the output directory, check its hash, then
/// rename it into place so readers never see a partial artifact.
fn copy_into_place(
  transformed: &Path,
  expected: &ContentHash,
  dest: &Destination,
) -> Result<ContentHash, PipelineError> {
  let path = dest.path();

  let mut temp = tempfile::Builder::new()
    .prefix(&format!(".{}.", dest.name))
    .suffix(".partial")
    .tempfile_in(&dest.dir)
    .map_err(PipelineError::io(&dest.dir))?;

  let mut input = File::open(transformed).map_err(PipelineError::io(transformed))?;
  io::copy(&mut input, temp.as_file_mut()).map_err(PipelineError::io(temp.path()))?;
  temp.as_file().sync_all().map_err(PipelineError::io(temp.path()))?;

  let actual = compute(temp.path())?;
  if &actual != expected {
    // Dropping `temp` deletes the partial copy.
    return Err(PipelineError::PublishIntegrity {
      path,
      expected: expected.clone(),
      actual,
    });
  }

  temp.persist_noclobber(&path).map_err(|e| {
    if e.error.kind() == io::ErrorKind::AlreadyExists {
      PipelineError::AlreadyExists { path: path.clone() }
    } else {
      PipelineError::io(&path)(e.error)
    }
  })?;

  Ok(actual)
}

/// Write the self and provenance records, then re-verify the artifact
/// against the self record just written.
fn attest(
  path: &Path,
  hash: &ContentHash,
  source_hash: &ContentHash,
  records: &impl RecordStore,
) -> Result<(), PipelineError> {
  records.write(path, RecordKind::Artifact, hash)?;
  records.write(path, RecordKind::Provenance, source_hash)?;

  match records.verify(path, RecordKind::Artifact)? {
    Verification::Matches { .. } => Ok(()),
    Verification::Mismatch { expected, actual } => Err(PipelineError::PublishIntegrity {
      path: path.to_path_buf(),
      expected,
      actual,
    }),
    Verification::NotFound { actual } => Err(PipelineError::PublishIntegrity {
      path: path.to_path_buf(),
      expected: hash.clone(),
      actual,
    }),
  }
}

/// Return the destination to the "output missing" state after a failed
/// attestation.
fn rollback(path: &Path, records: &impl RecordStore) {
  let steps = [
    records.remove(path, RecordKind::Provenance),
    remove_if_exists(path).map(|_| ()),
    records.remove(path, RecordKind::Artifact),
  ];
  for result in steps {
    if let Err(e) = result {
      warn!(output = %path.display(), error = %e, "rollback after failed publish incomplete");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lock::PublishLock;
  use crate::oracle::{Reuse, check_reusable};
  use crate::record::FileRecordStore;
  use crate::util::hash::hash_bytes;
  use tempfile::{TempDir, tempdir};

  fn transformed(temp: &TempDir, content: &[u8]) -> (PathBuf, ContentHash) {
    let path = temp.path().join("stage-converted");
    fs::write(&path, content).unwrap();
    (path, hash_bytes(content))
  }

  fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut entries: Vec<_> = fs::read_dir(dir)
      .unwrap()
      .map(|e| {
        let e = e.unwrap();
        (e.file_name().to_string_lossy().into_owned(), fs::read(e.path()).unwrap())
      })
      .collect();
    entries.sort();
    entries
  }

  #[test]
  fn publish_writes_artifact_and_records() {
    let temp = tempdir().unwrap();
    let (src, hash) = transformed(&temp, b"converted image");
    let dest = Destination::new(temp.path().join("out"), "img");
    let source_hash = hash_bytes(b"raw image");

    let published = publish(&src, &hash, &source_hash, &dest, false, &FileRecordStore).unwrap();

    assert_eq!(published.path, dest.path());
    assert_eq!(published.hash, hash);
    assert!(!published.replaced);
    assert_eq!(fs::read(dest.path()).unwrap(), b"converted image");

    let records = FileRecordStore;
    assert_eq!(records.read(&dest.path(), RecordKind::Artifact).unwrap(), Some(hash));
    assert_eq!(records.read(&dest.path(), RecordKind::Provenance).unwrap(), Some(source_hash.clone()));

    let names: Vec<_> = snapshot(&dest.dir).into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["img", "img.hash", "img.source.hash"]);

    // The oracle accepts what the publisher wrote.
    assert!(
      check_reusable(&source_hash, &dest.dir, &dest.name, &FileRecordStore)
        .unwrap()
        .is_reusable()
    );
  }

  #[test]
  fn existing_output_without_overwrite_is_untouched() {
    let temp = tempdir().unwrap();
    let dest = Destination::new(temp.path().join("out"), "img");
    let (first, first_hash) = transformed(&temp, b"first");
    publish(&first, &first_hash, &hash_bytes(b"src1"), &dest, false, &FileRecordStore).unwrap();
    let before = snapshot(&dest.dir);

    let (second, second_hash) = transformed(&temp, b"second");
    let err = publish(&second, &second_hash, &hash_bytes(b"src2"), &dest, false, &FileRecordStore).unwrap_err();

    assert!(matches!(err, PipelineError::AlreadyExists { .. }));
    assert_eq!(snapshot(&dest.dir), before);
  }

  #[test]
  fn overwrite_replaces_artifact_and_records() {
    let temp = tempdir().unwrap();
    let dest = Destination::new(temp.path().join("out"), "img");
    let (first, first_hash) = transformed(&temp, b"first");
    publish(&first, &first_hash, &hash_bytes(b"src1"), &dest, false, &FileRecordStore).unwrap();

    let (second, second_hash) = transformed(&temp, b"second");
    let published = publish(&second, &second_hash, &hash_bytes(b"src2"), &dest, true, &FileRecordStore).unwrap();

    assert!(published.replaced);
    assert_eq!(fs::read(dest.path()).unwrap(), b"second");
    assert_eq!(
      FileRecordStore.read(&dest.path(), RecordKind::Provenance).unwrap(),
      Some(hash_bytes(b"src2"))
    );
  }

  #[test]
  fn hash_mismatch_leaves_no_artifact_or_records() {
    let temp = tempdir().unwrap();
    let dest = Destination::new(temp.path().join("out"), "img");
    let (src, _) = transformed(&temp, b"what is on disk");

    let err = publish(
      &src,
      &hash_bytes(b"what the transform reported"),
      &hash_bytes(b"src"),
      &dest,
      false,
      &FileRecordStore,
    )
    .unwrap_err();

    assert!(matches!(err, PipelineError::PublishIntegrity { .. }));
    assert!(snapshot(&dest.dir).is_empty(), "no partial file or record may remain");
  }

  #[test]
  fn interrupted_overwrite_reads_as_output_missing() {
    let temp = tempdir().unwrap();
    let dest = Destination::new(temp.path().join("out"), "img");
    let (first, first_hash) = transformed(&temp, b"first");
    let source_hash = hash_bytes(b"src");
    publish(&first, &first_hash, &source_hash, &dest, false, &FileRecordStore).unwrap();

    // A crash after the prior artifact was deleted but before the new one
    // was renamed into place.
    fs::remove_file(dest.path()).unwrap();

    match check_reusable(&source_hash, &dest.dir, &dest.name, &FileRecordStore).unwrap() {
      Reuse::MustProcess { .. } => {}
      Reuse::Reusable { .. } => panic!("a missing artifact must never be reusable"),
    }
  }

  #[test]
  fn publisher_takes_no_destination_lock() {
    // Serialization is the caller's job: a held PublishLock does not stop
    // a direct publish to the same destination.
    let temp = tempdir().unwrap();
    let dest = Destination::new(temp.path().join("out"), "img");
    let _held = PublishLock::acquire(&dest.dir, &dest.name, "other publisher").unwrap();

    let (src, hash) = transformed(&temp, b"racing");
    publish(&src, &hash, &hash_bytes(b"src"), &dest, false, &FileRecordStore).unwrap();
  }

  #[test]
  fn interleaved_publishers_can_pair_records_with_wrong_bytes() {
    // Two unserialized publishers: B deletes and republishes between A's
    // copy and A's provenance write. The store ends up claiming A's source
    // for B's bytes, which is why callers must serialize per destination.
    let temp = tempdir().unwrap();
    let dest = Destination::new(temp.path().join("out"), "img");
    let records = FileRecordStore;

    let (a, a_hash) = transformed(&temp, b"from A");
    publish(&a, &a_hash, &hash_bytes(b"src A"), &dest, false, &records).unwrap();

    let b_path = temp.path().join("b");
    fs::write(&b_path, b"from B").unwrap();
    publish(&b_path, &hash_bytes(b"from B"), &hash_bytes(b"src B"), &dest, true, &records).unwrap();

    // A's late provenance write lands after B finished.
    records
      .write(&dest.path(), RecordKind::Provenance, &hash_bytes(b"src A"))
      .unwrap();

    let verdict = check_reusable(&hash_bytes(b"src A"), &dest.dir, &dest.name, &records).unwrap();
    assert!(
      verdict.is_reusable(),
      "without external locking the store can attribute B's output to source A"
    );
    assert_eq!(fs::read(dest.path()).unwrap(), b"from B");
  }
}
