//! Run orchestration.
//!
//! [`Pipeline::run`] drives one invocation:
//!
//! 1. Open and optionally verify the source
//! 2. Ask the oracle whether the published output is still valid
//! 3. Refuse early if the output exists and overwrite is off
//! 4. Stage a working copy
//! 5. Optionally ask the oracle again
//! 6. Run the transform steps and record the result's hash
//! 7. Publish
//! 8. Clean up staging
//!
//! A failed transform step leaves the working copy in staging for
//! inspection. Every other abort removes the run's own staged files.

mod types;

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::artifact::Artifact;
use crate::cleanup::cleanup;
use crate::consts::GENERATED_PREFIX_LEN;
use crate::error::PipelineError;
use crate::oracle::{Reuse, check_reusable};
use crate::publish::{Destination, publish, validate_output_name};
use crate::record::{self, FileRecordStore, RecordKind, RecordStore, Verification};
use crate::staging::StagingArea;
use crate::util::hash::ContentHash;

pub use types::{PipelineRun, RunOptions, RunOutcome, RunState};

/// The pipeline, parameterised over where records are kept.
#[derive(Debug, Clone, Default)]
pub struct Pipeline<R = FileRecordStore> {
  records: R,
}

impl Pipeline<FileRecordStore> {
  pub fn new() -> Self {
    Self::default()
  }
}

impl<R: RecordStore> Pipeline<R> {
  pub fn with_records(records: R) -> Self {
    Self { records }
  }

  pub fn records(&self) -> &R {
    &self.records
  }

  /// Run the pipeline once.
  ///
  /// Returns the published artifact's absolute path on success. On a cache
  /// hit no staging or transform work is done.
  pub async fn run(&self, options: &RunOptions) -> Result<RunOutcome, PipelineError> {
    let mut run = self.begin(options)?;

    let result = self.drive(&mut run, options).await;
    match result {
      Ok(outcome) => Ok(outcome),
      Err(err) => {
        run.advance(RunState::Aborted(err.kind()));
        self.abort(&run, &err);
        Err(err)
      }
    }
  }

  /// Open the source, verify it if a record was given, and build the run.
  pub fn begin(&self, options: &RunOptions) -> Result<PipelineRun, PipelineError> {
    let source = Artifact::open(&options.source)?;
    let name = match &options.output_name {
      Some(name) => name.clone(),
      None => source.file_name(),
    };
    validate_output_name(&name)?;

    if let Some(record_path) = &options.source_record {
      match record::verify(source.path(), record_path)? {
        Verification::Matches { actual } => {
          info!(source = %source.path().display(), hash = %actual.short(), "source verified");
          source.remember_hash(actual);
        }
        Verification::Mismatch { expected, actual } => {
          return Err(PipelineError::SourceIntegrityMismatch {
            path: source.path().to_path_buf(),
            record: record_path.clone(),
            expected,
            actual,
          });
        }
        Verification::NotFound { actual } => {
          warn!(record = %record_path.display(), "source record not found, proceeding unverified");
          source.remember_hash(actual);
        }
      }
    } else {
      info!(source = %source.path().display(), "no source record given, trusting source as-is");
    }

    let mut run = PipelineRun::new(
      source,
      Destination::new(&options.output_dir, name),
      options.overwrite,
    );
    run.source.hash()?;
    run.advance(RunState::SourceVerified);
    Ok(run)
  }

  async fn drive(&self, run: &mut PipelineRun, options: &RunOptions) -> Result<RunOutcome, PipelineError> {
    let source_hash = run.source.hash()?.clone();
    let dest = run.destination.clone();

    if let Reuse::Reusable { path, output_hash } = check_reusable(&source_hash, &dest.dir, &dest.name, &self.records)? {
      run.advance(RunState::CacheHit);
      return Ok(finish(run, &path, true, source_hash, output_hash, false));
    }
    run.advance(RunState::CacheMiss);

    if !run.overwrite && dest.path().symlink_metadata().is_ok() {
      return Err(PipelineError::AlreadyExists { path: dest.path() });
    }

    let staging = StagingArea::resolve(options.staging_dir.as_deref())?;
    run.staging = Some(staging.clone());
    let prefix = match &options.prefix {
      Some(prefix) => prefix.clone(),
      None => format!("{}-", &source_hash.as_str()[..GENERATED_PREFIX_LEN]),
    };
    let copy = staging.stage(&run.source, &prefix)?;
    let resumed = copy.is_resumed();
    run.advance(RunState::Staged);
    let working = run.working.insert(copy);

    if options.recheck_after_stage
      && let Reuse::Reusable { path, output_hash } = check_reusable(&source_hash, &dest.dir, &dest.name, &self.records)?
    {
      info!("output published while staging, discarding working copy");
      cleanup(&staging, Some(&*working), &self.records)?;
      run.advance(RunState::CacheHit);
      return Ok(finish(run, &path, true, source_hash, output_hash, false));
    }

    let transformed = options.transform.run(working, &dest.name, &self.records).await?;
    run.steps = transformed.steps;

    let transformed_hash = record::compute(&transformed.path)?;
    self
      .records
      .write(&transformed.path, RecordKind::Artifact, &transformed_hash)?;
    run.advance(RunState::Transformed);

    let published = publish(
      &transformed.path,
      &transformed_hash,
      &source_hash,
      &dest,
      run.overwrite,
      &self.records,
    )?;
    run.advance(RunState::Published);

    match cleanup(&staging, run.working.as_ref(), &self.records) {
      Ok(_) => run.advance(RunState::CleanedUp),
      Err(e) => warn!(error = %e, "published, but staging cleanup failed"),
    }

    Ok(finish(run, &published.path, false, source_hash, published.hash, resumed))
  }

  /// Handle a failed run: keep the working copy after a transform failure,
  /// otherwise remove what this run staged.
  fn abort(&self, run: &PipelineRun, err: &PipelineError) {
    let Some(staging) = &run.staging else {
      return;
    };

    let keep_working = matches!(
      err,
      PipelineError::CustomizationFailed(_) | PipelineError::ConversionFailed(_) | PipelineError::StepTimedOut { .. }
    );

    if keep_working {
      if let Some(path) = run.working_path() {
        warn!(working_copy = %path.display(), "run aborted, working copy kept for inspection");
      }
      return;
    }

    if let Err(e) = cleanup(staging, run.working.as_ref(), &self.records) {
      warn!(dir = %staging.path().display(), error = %e, "cleanup after abort failed");
    }
  }
}

fn finish(
  run: &mut PipelineRun,
  path: &Path,
  cache_hit: bool,
  source_hash: ContentHash,
  output_hash: ContentHash,
  resumed: bool,
) -> RunOutcome {
  run.advance(RunState::Done);
  RunOutcome {
    path: absolute(path),
    cache_hit,
    source_hash,
    output_hash,
    resumed,
    steps: std::mem::take(&mut run.steps),
    states: run.states().to_vec(),
  }
}

fn absolute(path: &Path) -> PathBuf {
  dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
