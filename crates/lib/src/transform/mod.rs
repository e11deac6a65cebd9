//! External transform steps.
//!
//! Two optional steps run against the staged working copy, synchronously and
//! in order:
//!
//! 1. customize: `<cmd> <working-copy>`, may mutate the file in place
//! 2. convert: `<cmd> <working-copy> <converted>`, must leave a file at
//!    `<converted>`
//!
//! Commands are shell snippets. Paths are passed as positional arguments and
//! never spliced into the command text. Neither step is retried: a failed
//! customization leaves the working copy as-is for inspection.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::consts::CONVERTED_MARKER;
use crate::error::{CommandFailure, PipelineError};
use crate::record::{RecordKind, RecordStore, remove_if_exists};
use crate::staging::WorkingCopy;

/// Which transform step a command belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformStep {
  Customize,
  Convert,
}

impl std::fmt::Display for TransformStep {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      TransformStep::Customize => write!(f, "customize"),
      TransformStep::Convert => write!(f, "convert"),
    }
  }
}

/// What a successful step did, kept for the caller's diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
  pub step: TransformStep,
  pub command: String,
  pub code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
  #[serde(serialize_with = "serialize_millis")]
  pub elapsed: Duration,
}

/// The artifact produced by the transform steps.
#[derive(Debug, Clone)]
pub struct TransformedArtifact {
  pub path: PathBuf,
  pub steps: Vec<StepReport>,
}

/// Runs the configured customize and convert commands.
#[derive(Debug, Clone, Default)]
pub struct TransformRunner {
  /// Customization command, invoked as `<cmd> <working-copy>`.
  pub customize: Option<String>,
  /// Conversion command, invoked as `<cmd> <input> <output>`.
  pub convert: Option<String>,
  /// Per-step limit. `None` waits as long as the command runs.
  pub timeout: Option<Duration>,
  /// Shell used to run commands. Defaults to `/bin/sh` (PowerShell on Windows).
  pub shell: Option<String>,
}

impl TransformRunner {
  /// Staged file name of the conversion output for `output_name`.
  pub fn converted_name(output_name: &str) -> String {
    format!("{}{}", CONVERTED_MARKER, output_name)
  }

  /// Run customize then convert against `copy`.
  ///
  /// With no convert step the working copy itself is the result.
  pub async fn run(
    &self,
    copy: &mut WorkingCopy,
    output_name: &str,
    records: &impl RecordStore,
  ) -> Result<TransformedArtifact, PipelineError> {
    let mut steps = Vec::new();
    let working = copy.path().to_path_buf();

    if let Some(cmd) = &self.customize {
      let report = self
        .run_step(TransformStep::Customize, cmd, &[working.as_path()], &working)
        .await?;
      steps.push(report);
    }

    let Some(cmd) = &self.convert else {
      return Ok(TransformedArtifact { path: working, steps });
    };

    let converted = copy.derive(&Self::converted_name(output_name));
    // A leftover from an interrupted run would mask a convert that writes nothing.
    remove_if_exists(&converted)?;
    records.remove(&converted, RecordKind::Artifact)?;

    let report = self
      .run_step(TransformStep::Convert, cmd, &[working.as_path(), converted.as_path()], &working)
      .await?;

    if !converted.is_file() {
      return Err(PipelineError::ConversionFailed(CommandFailure {
        command: cmd.clone(),
        code: report.code,
        stderr: format!("{}\nno output produced at {}", report.stderr, converted.display()),
        working_copy: working,
      }));
    }

    steps.push(report);
    Ok(TransformedArtifact { path: converted, steps })
  }

  async fn run_step(
    &self,
    step: TransformStep,
    cmd: &str,
    args: &[&Path],
    working: &Path,
  ) -> Result<StepReport, PipelineError> {
    info!(%step, cmd = %cmd, "running transform step");

    let (shell_cmd, mut command) = build_command(self.shell.as_deref(), cmd, args);
    command
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    debug!(shell = %shell_cmd, "spawning process");

    let started = Instant::now();
    let child = command.spawn().map_err(PipelineError::io(Path::new(&shell_cmd)))?;

    let output = match self.timeout {
      Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(result) => result,
        Err(_) => {
          return Err(PipelineError::StepTimedOut {
            step,
            command: cmd.to_string(),
            after: limit,
          });
        }
      },
      None => child.wait_with_output().await,
    }
    .map_err(PipelineError::io(Path::new(&shell_cmd)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !stderr.is_empty() {
      debug!(%step, stderr = %stderr.trim_end(), "command stderr");
    }
    if !stdout.is_empty() {
      debug!(%step, stdout = %stdout.trim_end(), "command stdout");
    }

    if !output.status.success() {
      let failure = CommandFailure {
        command: cmd.to_string(),
        code: output.status.code(),
        stderr,
        working_copy: working.to_path_buf(),
      };
      return Err(match step {
        TransformStep::Customize => PipelineError::CustomizationFailed(failure),
        TransformStep::Convert => PipelineError::ConversionFailed(failure),
      });
    }

    Ok(StepReport {
      step,
      command: cmd.to_string(),
      code: output.status.code(),
      stdout,
      stderr,
      elapsed: started.elapsed(),
    })
  }
}

/// Build the process for `cmd` with `args` appended as positional parameters.
///
/// On Unix the snippet runs as `sh -c '<cmd> "$@"' artiflow <args>`, so paths
/// containing spaces or shell metacharacters reach the command intact.
#[cfg(unix)]
fn build_command(override_shell: Option<&str>, cmd: &str, args: &[&Path]) -> (String, Command) {
  let shell = override_shell.unwrap_or("/bin/sh").to_string();
  let mut command = Command::new(&shell);
  command
    .arg("-c")
    .arg(format!("{} \"$@\"", cmd))
    .arg(crate::consts::APP_NAME)
    .args(args);
  (shell, command)
}

#[cfg(windows)]
fn build_command(override_shell: Option<&str>, cmd: &str, args: &[&Path]) -> (String, Command) {
  let shell = override_shell.unwrap_or("powershell.exe").to_string();
  let quoted: Vec<String> = args
    .iter()
    .map(|p| format!("'{}'", p.display().to_string().replace('\'', "''")))
    .collect();
  let mut command = Command::new(&shell);
  command
    .arg("-NoProfile")
    .arg("-ExecutionPolicy")
    .arg("Bypass")
    .arg("-Command")
    .arg(format!("{} {}", cmd, quoted.join(" ")));
  (shell, command)
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
  s.serialize_u64(d.as_millis() as u64)
}
