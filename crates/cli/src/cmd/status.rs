//! Implementation of the `artiflow status` command.
//!
//! Asks the reuse oracle about a source's published output. Never stages or
//! runs a transform.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use serde::Serialize;

use artiflow_lib::artifact::Artifact;
use artiflow_lib::oracle::{Reuse, check_reusable, output_path};
use artiflow_lib::record::FileRecordStore;
use artiflow_lib::util::hash::ContentHash;

use crate::output::{OutputFormat, print_info, print_json, print_result, print_stat, print_success, truncate_hash};

#[derive(Serialize)]
struct StatusReport<'a> {
  source: &'a Path,
  source_hash: &'a ContentHash,
  output: &'a Path,
  #[serde(flatten)]
  verdict: &'a Reuse,
}

pub fn cmd_status(source: &Path, output_dir: &Path, name: Option<&str>, output: OutputFormat) -> Result<ExitCode> {
  let artifact = Artifact::open(source)?;
  let name = name.map(str::to_string).unwrap_or_else(|| artifact.file_name());
  let source_hash = artifact.hash()?;

  let verdict = check_reusable(source_hash, output_dir, &name, &FileRecordStore)?;
  let out = output_path(output_dir, &name);

  if output.is_json() {
    print_json(&StatusReport {
      source,
      source_hash,
      output: &out,
      verdict: &verdict,
    })?;
    return Ok(ExitCode::SUCCESS);
  }

  match &verdict {
    Reuse::Reusable { path, output_hash } => {
      print_success("Published output is reusable");
      print_stat("Output", &path.display().to_string());
      print_stat("Output hash", truncate_hash(output_hash.as_str()));
      print_result("reusable");
    }
    Reuse::MustProcess { reason } => {
      print_info(&format!("Run required: {}", reason));
      print_stat("Output", &out.display().to_string());
      print_result("stale");
    }
  }
  print_stat("Source hash", truncate_hash(source_hash.as_str()));

  Ok(ExitCode::SUCCESS)
}
