//! Implementation of the `artiflow run` command.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use artiflow_lib::lock::PublishLock;
use artiflow_lib::publish::validate_output_name;
use artiflow_lib::transform::TransformRunner;
use artiflow_lib::{Pipeline, PipelineError, RunOptions, RunOutcome};

use crate::output::{
  OutputFormat, format_duration, print_info, print_json, print_result, print_stat, print_success, print_warning,
  truncate_hash,
};

/// Exit status after Ctrl-C, following the shell convention of 128 + SIGINT.
const INTERRUPTED_EXIT: u8 = 130;

pub struct RunArgs {
  pub source: PathBuf,
  pub output_dir: PathBuf,
  pub name: Option<String>,
  pub staging_dir: Option<PathBuf>,
  pub prefix: Option<String>,
  pub customize: Option<String>,
  pub convert: Option<String>,
  pub source_hash: Option<PathBuf>,
  pub overwrite: bool,
  pub timeout: Option<Duration>,
  pub recheck: bool,
  pub no_lock: bool,
}

/// Execute the run command.
///
/// Holds the publish lock for the output name for the whole run unless
/// `--no-lock` is given, then drives the pipeline:
/// - Verifies the source (against `--source-hash` if given)
/// - Reuses a valid published output, or
/// - Stages, transforms, publishes and cleans up
///
/// Prints the published path on stdout.
pub fn cmd_run(args: RunArgs, output: OutputFormat) -> Result<ExitCode> {
  let name = args
    .name
    .clone()
    .or_else(|| args.source.file_name().map(|n| n.to_string_lossy().into_owned()));

  // The name also names the lock file, so it is checked before anything is
  // created for it.
  if let Some(name) = &name {
    validate_output_name(name)?;
  }

  let _lock = match (&name, args.no_lock) {
    (Some(name), false) => {
      let lock = PublishLock::acquire(&args.output_dir, name, "run").map_err(PipelineError::from)?;
      debug!(path = %lock.path().display(), "publish lock acquired");
      Some(lock)
    }
    _ => None,
  };

  let options = RunOptions {
    source: args.source,
    source_record: args.source_hash,
    output_dir: args.output_dir,
    output_name: name,
    staging_dir: args.staging_dir,
    prefix: args.prefix,
    transform: TransformRunner {
      customize: args.customize,
      convert: args.convert,
      timeout: args.timeout,
      shell: None,
    },
    overwrite: args.overwrite,
    recheck_after_stage: args.recheck,
  };

  let rt = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .context("Failed to create async runtime")?;

  let pipeline = Pipeline::new();
  let outcome = rt.block_on(async {
    tokio::select! {
      result = pipeline.run(&options) => result.map(Some),
      _ = tokio::signal::ctrl_c() => Ok(None),
    }
  })?;

  let Some(outcome) = outcome else {
    print_warning("Interrupted; staged files were left in place");
    return Ok(ExitCode::from(INTERRUPTED_EXIT));
  };

  if output.is_json() {
    print_json(&outcome)?;
  } else {
    print_summary(&outcome);
    print_result(&outcome.path.display().to_string());
  }

  Ok(ExitCode::SUCCESS)
}

fn print_summary(outcome: &RunOutcome) {
  if outcome.cache_hit {
    print_info("Output is up to date, nothing to do");
  } else {
    print_success("Published");
    if outcome.resumed {
      print_stat("Staging", "resumed existing working copy");
    }
    for step in &outcome.steps {
      print_stat(&step.step.to_string(), &format_duration(step.elapsed));
    }
  }
  print_stat("Source", truncate_hash(outcome.source_hash.as_str()));
  print_stat("Output", truncate_hash(outcome.output_hash.as_str()));
}
