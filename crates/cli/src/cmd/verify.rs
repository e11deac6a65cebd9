//! Implementation of the `artiflow verify` command.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use serde::Serialize;

use artiflow_lib::artifact::Artifact;
use artiflow_lib::record::{self, FileRecordStore, RecordKind, Verification};

use crate::output::{OutputFormat, print_error, print_json, print_result, print_success, print_warning, truncate_hash};

/// Exit status when the file does not match its record.
const MISMATCH_EXIT: u8 = 3;
/// Exit status when there is no record to check against.
const NO_RECORD_EXIT: u8 = 4;

#[derive(Serialize)]
struct VerifyReport<'a> {
  file: &'a Path,
  record: &'a Path,
  #[serde(flatten)]
  verification: &'a Verification,
}

pub fn cmd_verify(file: &Path, record_path: Option<&Path>, output: OutputFormat) -> Result<ExitCode> {
  let artifact = Artifact::open(file)?;
  let record_path = match record_path {
    Some(path) => path.to_path_buf(),
    None => FileRecordStore::record_path(artifact.path(), RecordKind::Artifact),
  };

  let verification = record::verify(artifact.path(), &record_path)?;

  if output.is_json() {
    print_json(&VerifyReport {
      file,
      record: &record_path,
      verification: &verification,
    })?;
  } else {
    match &verification {
      Verification::Matches { actual } => {
        print_success(&format!("{} matches {}", file.display(), record_path.display()));
        print_result(actual.as_str());
      }
      Verification::Mismatch { expected, actual } => {
        print_error(&format!(
          "{} does not match {} (expected {}, got {})",
          file.display(),
          record_path.display(),
          truncate_hash(expected.as_str()),
          truncate_hash(actual.as_str())
        ));
        print_result(actual.as_str());
      }
      Verification::NotFound { actual } => {
        print_warning(&format!("No record at {}", record_path.display()));
        print_result(actual.as_str());
      }
    }
  }

  Ok(match verification {
    Verification::Matches { .. } => ExitCode::SUCCESS,
    Verification::Mismatch { .. } => ExitCode::from(MISMATCH_EXIT),
    Verification::NotFound { .. } => ExitCode::from(NO_RECORD_EXIT),
  })
}
