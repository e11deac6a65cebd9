//! Cache-hit decisions for published outputs.
//!
//! A published output is reusable only if all of the following hold:
//!
//! 1. its provenance record exists and equals the current source hash
//! 2. the output artifact exists
//! 3. the output's own record exists and matches a fresh hash of the output
//!
//! Each failed check has its own [`MissReason`] so callers (and tests) can
//! tell "never processed" apart from "source changed" or "output corrupted".

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::PipelineError;
use crate::record::{RecordKind, RecordStore, compute};
use crate::util::hash::ContentHash;

/// Why a published output cannot be reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum MissReason {
  /// No provenance record: this output name was never published.
  NeverProcessed,
  /// The provenance record names a different source.
  SourceChanged {
    recorded: ContentHash,
    current: ContentHash,
  },
  /// Provenance matches but the artifact is gone.
  OutputMissing,
  /// The artifact has no self record to check it against.
  OutputUnattested,
  /// The artifact no longer matches its self record.
  OutputCorrupted {
    expected: ContentHash,
    actual: ContentHash,
  },
  /// A record exists but cannot be parsed.
  RecordMalformed { kind: RecordKind, token: String },
}

impl std::fmt::Display for MissReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      MissReason::NeverProcessed => write!(f, "never processed"),
      MissReason::SourceChanged { recorded, current } => write!(
        f,
        "source changed since last run (recorded {}, now {})",
        recorded.short(),
        current.short()
      ),
      MissReason::OutputMissing => write!(f, "output missing despite matching provenance"),
      MissReason::OutputUnattested => write!(f, "output has no hash record"),
      MissReason::OutputCorrupted { expected, actual } => write!(
        f,
        "output corrupted since last run (expected {}, got {})",
        expected.short(),
        actual.short()
      ),
      MissReason::RecordMalformed { kind, token } => write!(f, "malformed {:?} record ({:?})", kind, token),
    }
  }
}

/// Oracle verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Reuse {
  Reusable { path: PathBuf, output_hash: ContentHash },
  MustProcess { reason: MissReason },
}

impl Reuse {
  pub fn is_reusable(&self) -> bool {
    matches!(self, Reuse::Reusable { .. })
  }
}

/// Path of the published artifact named `output_name` in `output_dir`.
pub fn output_path(output_dir: &Path, output_name: &str) -> PathBuf {
  output_dir.join(output_name)
}

/// Decide whether the output published as `output_name` can stand in for a
/// run over a source hashing to `source_hash`.
///
/// Checks are ordered cheapest first; the output is only hashed once both
/// records and the artifact are known to be present.
pub fn check_reusable(
  source_hash: &ContentHash,
  output_dir: &Path,
  output_name: &str,
  records: &impl RecordStore,
) -> Result<Reuse, PipelineError> {
  let path = output_path(output_dir, output_name);
  let verdict = evaluate(source_hash, &path, records)?;

  match &verdict {
    Reuse::Reusable { path, .. } => info!(output = %path.display(), "cache hit"),
    Reuse::MustProcess { reason } => info!(output = %path.display(), %reason, "cache miss"),
  }

  Ok(verdict)
}

fn evaluate(source_hash: &ContentHash, path: &Path, records: &impl RecordStore) -> Result<Reuse, PipelineError> {
  let miss = |reason| Ok(Reuse::MustProcess { reason });

  let recorded = match read_tolerant(records, path, RecordKind::Provenance)? {
    Ok(Some(recorded)) => recorded,
    Ok(None) => return miss(MissReason::NeverProcessed),
    Err(reason) => return miss(reason),
  };

  if &recorded != source_hash {
    return miss(MissReason::SourceChanged {
      recorded,
      current: source_hash.clone(),
    });
  }

  if !path.is_file() {
    return miss(MissReason::OutputMissing);
  }

  let expected = match read_tolerant(records, path, RecordKind::Artifact)? {
    Ok(Some(expected)) => expected,
    Ok(None) => return miss(MissReason::OutputUnattested),
    Err(reason) => return miss(reason),
  };

  let actual = compute(path)?;
  if actual != expected {
    return miss(MissReason::OutputCorrupted { expected, actual });
  }

  Ok(Reuse::Reusable {
    path: path.to_path_buf(),
    output_hash: actual,
  })
}

/// Read a record, turning a malformed one into a miss reason instead of an
/// error: reprocessing rewrites it.
fn read_tolerant(
  records: &impl RecordStore,
  path: &Path,
  kind: RecordKind,
) -> Result<Result<Option<ContentHash>, MissReason>, PipelineError> {
  match records.read(path, kind) {
    Ok(hash) => Ok(Ok(hash)),
    Err(PipelineError::MalformedRecord { token, .. }) => Ok(Err(MissReason::RecordMalformed { kind, token })),
    Err(e) => Err(e),
  }
}
