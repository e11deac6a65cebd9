//! Reclaiming staging state at the end of a run.

use tracing::{debug, info};

use crate::error::PipelineError;
use crate::record::RecordStore;
use crate::staging::{DiscardReport, StagingArea, WorkingCopy};

/// Remove the run's working files and, if the staging directory is
/// ephemeral and now empty, the directory itself.
///
/// `copy` is `None` when a run aborts before anything was staged; only the
/// directory is considered then. Files the pipeline did not create are never
/// touched, and a caller-owned directory is never removed.
pub fn cleanup(
  staging: &StagingArea,
  copy: Option<&WorkingCopy>,
  records: &impl RecordStore,
) -> Result<DiscardReport, PipelineError> {
  let report = match copy {
    Some(copy) => staging.discard(copy, records)?,
    None => DiscardReport {
      removed: Vec::new(),
      dir_removed: staging.reclaim()?,
    },
  };

  if report.dir_removed {
    info!(dir = %staging.path().display(), files = report.removed.len(), "staging cleaned up");
  } else {
    debug!(dir = %staging.path().display(), files = report.removed.len(), "working files removed");
  }

  Ok(report)
}
