//! Artifacts addressed by path.

use std::cell::OnceCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::record::compute;
use crate::util::hash::ContentHash;

/// An immutable byte blob on disk.
///
/// The content hash is computed on first use and cached, since artifacts may
/// be large enough that hashing dominates a run.
#[derive(Debug)]
pub struct Artifact {
  path: PathBuf,
  size: u64,
  hash: OnceCell<ContentHash>,
}

impl Artifact {
  /// Open an existing artifact.
  ///
  /// Returns [`PipelineError::SourceNotFound`] if nothing exists at `path`;
  /// a directory is not an artifact.
  pub fn open(path: &Path) -> Result<Self, PipelineError> {
    let metadata = match fs::metadata(path) {
      Ok(m) if m.is_file() => m,
      Ok(_) => {
        return Err(PipelineError::SourceNotFound {
          path: path.to_path_buf(),
        });
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(PipelineError::SourceNotFound {
          path: path.to_path_buf(),
        });
      }
      Err(e) => return Err(PipelineError::io(path)(e)),
    };

    Ok(Self {
      path: path.to_path_buf(),
      size: metadata.len(),
      hash: OnceCell::new(),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn size(&self) -> u64 {
    self.size
  }

  /// File name of the artifact, used to derive working and output names.
  pub fn file_name(&self) -> String {
    self
      .path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "artifact".to_string())
  }

  /// Content hash, computed at most once.
  pub fn hash(&self) -> Result<&ContentHash, PipelineError> {
    if let Some(hash) = self.hash.get() {
      return Ok(hash);
    }
    let computed = compute(&self.path)?;
    Ok(self.hash.get_or_init(|| computed))
  }

  /// Seed the cache with a hash already computed elsewhere (e.g. during
  /// verification). Ignored if the hash is already known.
  pub fn remember_hash(&self, hash: ContentHash) {
    let _ = self.hash.set(hash);
  }
}
