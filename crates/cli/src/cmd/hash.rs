//! Implementation of the `artiflow hash` command.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;

use artiflow_lib::artifact::Artifact;
use artiflow_lib::record::{FileRecordStore, RecordKind, RecordStore};
use artiflow_lib::util::hash::ContentHash;

use crate::output::{OutputFormat, format_bytes, format_duration, print_json, print_result, print_stat};

#[derive(Serialize)]
struct HashReport<'a> {
  path: &'a Path,
  hash: &'a ContentHash,
  size: u64,
  record: PathBuf,
}

/// Hash `file` and write its `.hash` record next to it.
pub fn cmd_hash(file: &Path, output: OutputFormat) -> Result<ExitCode> {
  let start = Instant::now();
  let artifact = Artifact::open(file)?;
  let hash = artifact.hash()?;

  let records = FileRecordStore;
  records.write(artifact.path(), RecordKind::Artifact, hash)?;
  let record = FileRecordStore::record_path(artifact.path(), RecordKind::Artifact);

  if output.is_json() {
    print_json(&HashReport {
      path: file,
      hash,
      size: artifact.size(),
      record,
    })?;
  } else {
    print_stat("Size", &format_bytes(artifact.size()));
    print_stat("Record", &record.display().to_string());
    print_stat("Duration", &format_duration(start.elapsed()));
    print_result(hash.as_str());
  }

  Ok(ExitCode::SUCCESS)
}
