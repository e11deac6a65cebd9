//! Staging area for working copies.
//!
//! The source artifact is never mutated. It is copied into a staging
//! directory under a prefixed working name, verified, and only the copy is
//! handed to the transform steps.
//!
//! # Ownership
//!
//! A staging directory is either ephemeral (created by the pipeline, removed
//! once empty) or caller-owned (never removed as a whole). In both cases only
//! files the pipeline created itself are ever deleted.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::artifact::Artifact;
use crate::config::staging_root;
use crate::consts::EPHEMERAL_DIR_PREFIX;
use crate::error::PipelineError;
use crate::record::{RecordKind, RecordStore, compute, remove_if_exists};
use crate::util::hash::ContentHash;

/// A resolved staging directory.
#[derive(Debug, Clone)]
pub struct StagingArea {
  dir: PathBuf,
  ephemeral: bool,
}

/// A staged, mutable duplicate of the source artifact.
#[derive(Debug, Clone)]
pub struct WorkingCopy {
  path: PathBuf,
  prefix: String,
  source_hash: ContentHash,
  resumed: bool,
  derived: Vec<PathBuf>,
}

/// Files and directories removed by [`StagingArea::discard`].
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct DiscardReport {
  pub removed: Vec<PathBuf>,
  pub dir_removed: bool,
}

impl StagingArea {
  /// Resolve the staging directory for a run.
  ///
  /// `None` (or an empty path) creates a fresh, uniquely named directory
  /// under [`staging_root`] and marks it ephemeral. Anything else is created
  /// if absent and treated as caller-owned.
  pub fn resolve(requested: Option<&Path>) -> Result<Self, PipelineError> {
    Self::resolve_in(requested, &staging_root())
  }

  /// Like [`resolve`](Self::resolve) with an explicit parent for ephemeral
  /// directories.
  pub fn resolve_in(requested: Option<&Path>, root: &Path) -> Result<Self, PipelineError> {
    match requested.filter(|p| !p.as_os_str().is_empty()) {
      Some(dir) => {
        fs::create_dir_all(dir).map_err(PipelineError::io(dir))?;
        debug!(dir = %dir.display(), "using caller-owned staging directory");
        Ok(Self {
          dir: dir.to_path_buf(),
          ephemeral: false,
        })
      }
      None => {
        fs::create_dir_all(root).map_err(PipelineError::io(root))?;
        let temp = tempfile::Builder::new()
          .prefix(EPHEMERAL_DIR_PREFIX)
          .tempdir_in(root)
          .map_err(PipelineError::io(root))?;
        // Removal is decided by `reclaim`, not by drop.
        let dir = temp.keep();
        debug!(dir = %dir.display(), "created ephemeral staging directory");
        Ok(Self { dir, ephemeral: true })
      }
    }
  }

  pub fn path(&self) -> &Path {
    &self.dir
  }

  pub fn is_ephemeral(&self) -> bool {
    self.ephemeral
  }

  /// Path a working copy of `source` would have under `prefix`.
  pub fn working_path(&self, source: &Artifact, prefix: &str) -> PathBuf {
    self.dir.join(format!("{}{}", prefix, source.file_name()))
  }

  /// Copy `source` into the staging directory as `<prefix><file name>`.
  ///
  /// An existing file at the working path whose hash equals the source's is
  /// reused without copying. Any other existing file there is replaced. The
  /// copy is hashed afterwards and must equal the source hash.
  pub fn stage(&self, source: &Artifact, prefix: &str) -> Result<WorkingCopy, PipelineError> {
    self.stage_with(source, prefix, |from, to| fs::copy(from, to))
  }

  fn stage_with<F>(&self, source: &Artifact, prefix: &str, copy: F) -> Result<WorkingCopy, PipelineError>
  where
    F: FnOnce(&Path, &Path) -> io::Result<u64>,
  {
    validate_prefix(prefix)?;
    let source_hash = source.hash()?.clone();
    let path = self.working_path(source, prefix);

    if same_file(&path, source.path()) {
      return Err(PipelineError::InvalidInput {
        what: "working-copy prefix",
        value: prefix.to_string(),
        reason: "places the working copy on the source artifact",
      });
    }

    if path.is_file() {
      let existing = compute(&path)?;
      if existing == source_hash {
        info!(path = %path.display(), "working copy already staged, skipping copy");
        return Ok(WorkingCopy {
          path,
          prefix: prefix.to_string(),
          source_hash,
          resumed: true,
          derived: Vec::new(),
        });
      }
      warn!(
        path = %path.display(),
        expected = %source_hash.short(),
        actual = %existing.short(),
        "stale working copy, recopying"
      );
      remove_if_exists(&path)?;
    }

    info!(source = %source.path().display(), dest = %path.display(), "staging working copy");
    copy(source.path(), &path).map_err(PipelineError::io(&path))?;

    let actual = compute(&path)?;
    if actual != source_hash {
      // A truncated copy is worthless; remove it so a retry starts clean.
      remove_if_exists(&path)?;
      return Err(PipelineError::CopyIntegrity {
        path,
        expected: source_hash,
        actual,
      });
    }

    Ok(WorkingCopy {
      path,
      prefix: prefix.to_string(),
      source_hash,
      resumed: false,
      derived: Vec::new(),
    })
  }

  /// Remove the working copy, every file derived from it, and their records.
  ///
  /// Also calls [`reclaim`](Self::reclaim), so an ephemeral directory left
  /// empty is removed.
  pub fn discard(&self, copy: &WorkingCopy, records: &impl RecordStore) -> Result<DiscardReport, PipelineError> {
    let mut report = DiscardReport::default();

    for path in std::iter::once(&copy.path).chain(copy.derived.iter()) {
      records.remove(path, RecordKind::Artifact)?;
      if remove_if_exists(path)? {
        debug!(path = %path.display(), "removed staged file");
        report.removed.push(path.clone());
      }
    }

    report.dir_removed = self.reclaim()?;
    Ok(report)
  }

  /// Remove the staging directory if it is ephemeral and empty.
  ///
  /// A non-empty ephemeral directory is left in place with a warning; it may
  /// hold output of an unrelated concurrent run. Caller-owned directories are
  /// never removed.
  pub fn reclaim(&self) -> Result<bool, PipelineError> {
    if !self.ephemeral {
      return Ok(false);
    }

    let mut entries = match fs::read_dir(&self.dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
      Err(e) => return Err(PipelineError::io(&self.dir)(e)),
    };

    if entries.next().is_some() {
      warn!(dir = %self.dir.display(), "ephemeral staging directory not empty, leaving it in place");
      return Ok(false);
    }

    fs::remove_dir(&self.dir).map_err(PipelineError::io(&self.dir))?;
    debug!(dir = %self.dir.display(), "removed ephemeral staging directory");
    Ok(true)
  }
}

impl WorkingCopy {
  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn prefix(&self) -> &str {
    &self.prefix
  }

  pub fn source_hash(&self) -> &ContentHash {
    &self.source_hash
  }

  /// Whether staging reused a copy left by an earlier run.
  pub fn is_resumed(&self) -> bool {
    self.resumed
  }

  /// Reserve a sibling path `<prefix><name>` owned by this working copy.
  ///
  /// Derived paths are removed together with the working copy.
  pub fn derive(&mut self, name: &str) -> PathBuf {
    let dir = self.path.parent().unwrap_or(Path::new("."));
    let path = dir.join(format!("{}{}", self.prefix, name));
    if !self.derived.contains(&path) {
      self.derived.push(path.clone());
    }
    path
  }

  pub fn derived(&self) -> &[PathBuf] {
    &self.derived
  }
}

fn validate_prefix(prefix: &str) -> Result<(), PipelineError> {
  let reason = if prefix.is_empty() {
    "must not be empty"
  } else if prefix.contains(['/', '\\']) || prefix == "." || prefix == ".." {
    "must be a plain name"
  } else {
    return Ok(());
  };
  Err(PipelineError::InvalidInput {
    what: "working-copy prefix",
    value: prefix.to_string(),
    reason,
  })
}

/// Whether `a` and `b` resolve to the same existing file.
fn same_file(a: &Path, b: &Path) -> bool {
  match (dunce::canonicalize(a), dunce::canonicalize(b)) {
    (Ok(a), Ok(b)) => a == b,
    _ => false,
  }
}
