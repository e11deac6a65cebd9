use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use artiflow_lib::PipelineError;

mod cmd;
mod output;

use cmd::{RunArgs, cmd_hash, cmd_run, cmd_status, cmd_verify};
use output::{OutputFormat, print_error};

/// Idempotent, integrity-verified artifact transformation
#[derive(Parser)]
#[command(name = "artiflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging (overridden by RUST_LOG)
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(short = 'o', long, value_enum, default_value = "text", global = true)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Transform a source artifact and publish the result, reusing a valid
  /// earlier result when there is one
  Run {
    /// Source artifact (never modified)
    source: PathBuf,

    /// Directory the result is published into
    #[arg(short = 'd', long)]
    output_dir: PathBuf,

    /// Published file name (default: source file name)
    #[arg(short, long)]
    name: Option<String>,

    /// Staging directory to use instead of an ephemeral one
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Working-copy file name prefix (default: derived from the source hash)
    #[arg(long)]
    prefix: Option<String>,

    /// Command that customizes the working copy in place, invoked as `<cmd> <working-copy>`
    #[arg(long)]
    customize: Option<String>,

    /// Command that converts the working copy, invoked as `<cmd> <input> <output>`
    #[arg(long)]
    convert: Option<String>,

    /// Hash record the source must match
    #[arg(long)]
    source_hash: Option<PathBuf>,

    /// Replace an existing output
    #[arg(long)]
    overwrite: bool,

    /// Per-step time limit (e.g., "30s", "10m")
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Check for a valid output again after staging
    #[arg(long)]
    recheck: bool,

    /// Skip the per-output publish lock
    #[arg(long)]
    no_lock: bool,
  },

  /// Report whether the published output for a source can be reused
  Status {
    /// Source artifact
    source: PathBuf,

    /// Directory the result is published into
    #[arg(short = 'd', long)]
    output_dir: PathBuf,

    /// Published file name (default: source file name)
    #[arg(short, long)]
    name: Option<String>,
  },

  /// Check a file against its hash record
  Verify {
    /// File to check
    file: PathBuf,

    /// Record to check against (default: `<FILE>.hash`)
    #[arg(long)]
    record: Option<PathBuf>,
  },

  /// Hash a file and write its `<FILE>.hash` record
  Hash {
    /// File to hash
    file: PathBuf,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = match cli.command {
    Commands::Run {
      source,
      output_dir,
      name,
      staging_dir,
      prefix,
      customize,
      convert,
      source_hash,
      overwrite,
      timeout,
      recheck,
      no_lock,
    } => cmd_run(
      RunArgs {
        source,
        output_dir,
        name,
        staging_dir,
        prefix,
        customize,
        convert,
        source_hash,
        overwrite,
        timeout,
        recheck,
        no_lock,
      },
      cli.output,
    ),
    Commands::Status {
      source,
      output_dir,
      name,
    } => cmd_status(&source, &output_dir, name.as_deref(), cli.output),
    Commands::Verify { file, record } => cmd_verify(&file, record.as_deref(), cli.output),
    Commands::Hash { file } => cmd_hash(&file, cli.output),
  };

  match result {
    Ok(code) => code,
    Err(err) => report(&err),
  }
}

/// Print a failed command as one categorized line and map it to an exit code.
fn report(err: &anyhow::Error) -> ExitCode {
  match err.downcast_ref::<PipelineError>() {
    Some(pipeline) => {
      let kind = pipeline.kind();
      print_error(&format!("error[{}]: {}", kind, pipeline));
      ExitCode::from(kind.exit_code())
    }
    None => {
      print_error(&format!("error: {:#}", err));
      ExitCode::FAILURE
    }
  }
}
