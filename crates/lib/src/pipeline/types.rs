//! Types for pipeline runs.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::artifact::Artifact;
use crate::error::ErrorKind;
use crate::publish::Destination;
use crate::staging::{StagingArea, WorkingCopy};
use crate::transform::{StepReport, TransformRunner};
use crate::util::hash::ContentHash;

/// Caller-supplied inputs for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
  /// Source artifact. Never modified.
  pub source: PathBuf,
  /// Explicit record for the source. A mismatch aborts the run; absence is
  /// tolerated with a warning.
  pub source_record: Option<PathBuf>,
  /// Output store directory.
  pub output_dir: PathBuf,
  /// Logical output name. Defaults to the source file name.
  pub output_name: Option<String>,
  /// Caller-owned staging directory. `None` uses an ephemeral one.
  pub staging_dir: Option<PathBuf>,
  /// Working-copy prefix. `None` derives one from the source hash.
  pub prefix: Option<String>,
  pub transform: TransformRunner,
  /// Replace an existing output. Defaults to false (fail closed).
  pub overwrite: bool,
  /// Consult the oracle again after staging, in case a concurrent run
  /// published while the copy was being made.
  pub recheck_after_stage: bool,
}

/// States a run passes through.
///
/// `Start → SourceVerified → CacheHit → Done`, or
/// `Start → SourceVerified → CacheMiss → Staged → Transformed → Published → CleanedUp → Done`.
/// With a recheck after staging, `Staged → CacheHit → Done` is also possible.
/// `Aborted` is terminal and reachable from any state but `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "kind", rename_all = "snake_case")]
pub enum RunState {
  Start,
  SourceVerified,
  CacheHit,
  CacheMiss,
  Staged,
  Transformed,
  Published,
  CleanedUp,
  Done,
  Aborted(ErrorKind),
}

/// What a successful run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
  /// Absolute path of the published artifact.
  pub path: PathBuf,
  /// True if a previously published output was reused without staging or
  /// running any transform step.
  pub cache_hit: bool,
  pub source_hash: ContentHash,
  pub output_hash: ContentHash,
  /// Whether staging reused a copy left by an earlier interrupted run.
  pub resumed: bool,
  pub steps: Vec<StepReport>,
  pub states: Vec<RunState>,
}

/// Transient state of one invocation, threaded through every stage.
#[derive(Debug)]
pub struct PipelineRun {
  pub source: Artifact,
  pub destination: Destination,
  pub overwrite: bool,
  pub staging: Option<StagingArea>,
  pub working: Option<WorkingCopy>,
  pub steps: Vec<StepReport>,
  states: Vec<RunState>,
}

impl PipelineRun {
  pub fn new(source: Artifact, destination: Destination, overwrite: bool) -> Self {
    Self {
      source,
      destination,
      overwrite,
      staging: None,
      working: None,
      steps: Vec::new(),
      states: vec![RunState::Start],
    }
  }

  pub fn advance(&mut self, state: RunState) {
    debug!(from = ?self.state(), to = ?state, "run state");
    self.states.push(state);
  }

  pub fn state(&self) -> RunState {
    self.states.last().copied().unwrap_or(RunState::Start)
  }

  pub fn states(&self) -> &[RunState] {
    &self.states
  }

  pub fn output_path(&self) -> PathBuf {
    self.destination.path()
  }

  pub fn working_path(&self) -> Option<&Path> {
    self.working.as_ref().map(WorkingCopy::path)
  }
}
