use predicates::prelude::*;

use super::common::TestEnv;

fn stdout_of(cmd: &mut assert_cmd::Command) -> String {
  let out = cmd.assert().success().get_output().stdout.clone();
  String::from_utf8(out).unwrap()
}

#[test]
fn run_prints_only_the_published_path() {
  let env = TestEnv::with_source(b"raw");

  let stdout = stdout_of(&mut env.run_cmd());
  let published = env.output_path().join("img");

  assert_eq!(stdout, format!("{}\n", published.display()));
  assert_eq!(std::fs::read(&published).unwrap(), b"RAW+CUSTOM");
  assert!(env.output_path().join("img.hash").exists());
  assert!(env.output_path().join("img.source.hash").exists());
}

#[test]
fn second_run_is_a_cache_hit() {
  let env = TestEnv::with_source(b"raw");

  let first = stdout_of(&mut env.run_cmd());
  env
    .run_cmd()
    .assert()
    .success()
    .stdout(first)
    .stderr(predicate::str::contains("up to date"));

  assert_eq!(env.customize_calls(), 1);
}

#[test]
fn changed_source_without_overwrite_fails_closed() {
  let env = TestEnv::with_source(b"raw");
  env.run_cmd().assert().success();

  env.write_source(b"raw v2");
  env
    .run_cmd()
    .assert()
    .code(40)
    .stdout("")
    .stderr(predicate::str::contains("error[already-exists]"));

  assert_eq!(std::fs::read(env.output_path().join("img")).unwrap(), b"RAW+CUSTOM");
}

#[test]
fn changed_source_with_overwrite_republishes() {
  let env = TestEnv::with_source(b"raw");
  env.run_cmd().assert().success();

  env.write_source(b"raw v2");
  env.run_cmd().arg("--overwrite").assert().success();

  assert_eq!(std::fs::read(env.output_path().join("img")).unwrap(), b"RAW V2+CUSTOM");
  assert_eq!(env.customize_calls(), 2);
}

#[test]
fn failed_customization_is_categorized() {
  let env = TestEnv::with_source(b"raw");

  env
    .artiflow_cmd()
    .arg("run")
    .arg(env.source_path())
    .arg("--output-dir")
    .arg(env.output_path())
    .arg("--staging-dir")
    .arg(env.staging_path())
    .args(["--customize", "echo 'no space left' >&2; exit 7; true"])
    .assert()
    .code(30)
    .stderr(predicate::str::contains("error[customization-failed]"))
    .stderr(predicate::str::contains("no space left"));

  assert!(!env.output_path().join("img").exists());
}

#[test]
fn source_hash_mismatch_is_categorized() {
  let env = TestEnv::with_source(b"raw");
  std::fs::write(env.temp.path().join("img.sha256"), format!("{}\n", "0".repeat(64))).unwrap();

  env
    .run_cmd()
    .arg("--source-hash")
    .arg(env.temp.path().join("img.sha256"))
    .assert()
    .code(11)
    .stderr(predicate::str::contains("error[source-integrity-mismatch]"));

  assert_eq!(env.customize_calls(), 0);
}

#[test]
fn missing_source_is_categorized() {
  let env = TestEnv::with_source(b"raw");

  env
    .artiflow_cmd()
    .arg("run")
    .arg(env.temp.path().join("missing.img"))
    .arg("--output-dir")
    .arg(env.output_path())
    .arg("--no-lock")
    .assert()
    .code(10)
    .stderr(predicate::str::contains("error[source-not-found]"));
}

#[test]
fn invalid_name_is_rejected_before_locking() {
  let env = TestEnv::with_source(b"raw");

  env
    .run_cmd()
    .args(["--name", "sub/img"])
    .assert()
    .code(13)
    .stderr(predicate::str::contains("error[invalid-input]"));

  assert_eq!(std::fs::read_dir(env.output_path()).unwrap().count(), 0);
  assert_eq!(env.customize_calls(), 0);
}

#[test]
fn empty_prefix_is_rejected() {
  let env = TestEnv::with_source(b"raw");

  env
    .run_cmd()
    .args(["--prefix", ""])
    .assert()
    .code(13)
    .stderr(predicate::str::contains("error[invalid-input]"));

  assert_eq!(std::fs::read(env.source_path()).unwrap(), b"raw");
  assert!(!env.output_path().join("img").exists());
}

#[test]
fn ephemeral_staging_leaves_nothing_behind() {
  let env = TestEnv::with_source(b"raw");

  env
    .artiflow_cmd()
    .arg("run")
    .arg(env.source_path())
    .arg("--output-dir")
    .arg(env.output_path())
    .args(["--convert", super::common::CONVERT])
    .assert()
    .success();

  assert_eq!(std::fs::read_dir(env.staging_root()).unwrap().count(), 0);
  assert_eq!(std::fs::read(env.output_path().join("img")).unwrap(), b"RAW");
}

#[test]
fn custom_name_and_json_output() {
  let env = TestEnv::with_source(b"raw");

  let stdout = stdout_of(env.run_cmd().args(["--name", "disk.qcow2", "-o", "json"]));
  let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();

  assert_eq!(json["cache_hit"], false);
  assert_eq!(json["steps"].as_array().unwrap().len(), 2);
  assert!(json["path"].as_str().unwrap().ends_with("disk.qcow2"));
  assert!(env.output_path().join("disk.qcow2.source.hash").exists());
}

#[test]
fn slow_step_times_out() {
  let env = TestEnv::with_source(b"raw");

  env
    .artiflow_cmd()
    .arg("run")
    .arg(env.source_path())
    .arg("--output-dir")
    .arg(env.output_path())
    .arg("--staging-dir")
    .arg(env.staging_path())
    .args(["--customize", "sleep 5; true"])
    .args(["--timeout", "200ms"])
    .assert()
    .code(32)
    .stderr(predicate::str::contains("error[step-timed-out]"));
}
