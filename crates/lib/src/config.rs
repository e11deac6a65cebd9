//! Environment-derived defaults.

use std::path::PathBuf;

use crate::consts::STAGING_ROOT_ENV;

/// Returns the directory under which ephemeral staging directories are created.
///
/// `ARTIFLOW_STAGING_ROOT` takes precedence; otherwise the system temp dir.
/// Large artifacts are staged here, so it should live on a filesystem with
/// room for a full copy of the source.
pub fn staging_root() -> PathBuf {
  std::env::var_os(STAGING_ROOT_ENV)
    .filter(|v| !v.is_empty())
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}
