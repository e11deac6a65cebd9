//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Customize step that appends a marker and logs each invocation to `calls`.
pub const CUSTOMIZE: &str = "sh -c 'echo customize >> \"$(dirname \"$1\")/../calls\"; printf +custom >> \"$1\"' customize";

/// Convert step that upper-cases its input.
pub const CONVERT: &str = "sh -c 'tr a-z A-Z < \"$1\" > \"$2\"' convert";

/// Isolated test environment.
///
/// Each test gets its own temporary directory with a source artifact, an
/// output directory and a staging root.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// Create an environment whose source artifact `img` holds `content`.
  pub fn with_source(content: &[u8]) -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("img"), content).unwrap();
    Self { temp }
  }

  pub fn source_path(&self) -> PathBuf {
    self.temp.path().join("img")
  }

  /// Output directory (created on first use).
  pub fn output_path(&self) -> PathBuf {
    let p = self.temp.path().join("out");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Caller-owned staging directory, one level below the temp root so the
  /// customize step can find `calls`.
  pub fn staging_path(&self) -> PathBuf {
    let p = self.temp.path().join("stage");
    std::fs::create_dir_all(&p).unwrap();
    p
  }

  /// Root for ephemeral staging directories.
  pub fn staging_root(&self) -> PathBuf {
    let p = self.temp.path().join("staging-root");
    std::fs::create_dir_all(&p).unwrap();
    p
  }

  /// Number of times the customize step ran.
  pub fn customize_calls(&self) -> usize {
    std::fs::read_to_string(self.temp.path().join("calls"))
      .map(|s| s.lines().count())
      .unwrap_or(0)
  }

  pub fn write_source(&self, content: &[u8]) {
    std::fs::write(self.source_path(), content).unwrap();
  }

  /// Get a pre-configured Command for the artiflow binary.
  ///
  /// Sets `ARTIFLOW_STAGING_ROOT` to an isolated directory.
  pub fn artiflow_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("artiflow");
    cmd.env("ARTIFLOW_STAGING_ROOT", self.staging_root());
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// `artiflow run` for the source into the output directory, staging in
  /// the caller-owned directory with both transform steps configured.
  pub fn run_cmd(&self) -> Command {
    let mut cmd = self.artiflow_cmd();
    cmd
      .arg("run")
      .arg(self.source_path())
      .arg("--output-dir")
      .arg(self.output_path())
      .arg("--staging-dir")
      .arg(self.staging_path())
      .args(["--customize", CUSTOMIZE])
      .args(["--convert", CONVERT]);
    cmd
  }
}
