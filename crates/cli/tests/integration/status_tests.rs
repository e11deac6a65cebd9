use predicates::prelude::*;

use super::common::TestEnv;

fn publish_unchanged(env: &TestEnv) {
  env
    .artiflow_cmd()
    .arg("run")
    .arg(env.source_path())
    .arg("--output-dir")
    .arg(env.output_path())
    .assert()
    .success();
}

fn status_cmd(env: &TestEnv) -> assert_cmd::Command {
  let mut cmd = env.artiflow_cmd();
  cmd
    .arg("status")
    .arg(env.source_path())
    .arg("--output-dir")
    .arg(env.output_path());
  cmd
}

#[test]
fn status_before_any_run_is_stale() {
  let env = TestEnv::with_source(b"raw");

  status_cmd(&env)
    .assert()
    .success()
    .stdout("stale\n")
    .stderr(predicate::str::contains("never processed"));
}

#[test]
fn status_after_run_is_reusable() {
  let env = TestEnv::with_source(b"raw");
  publish_unchanged(&env);

  status_cmd(&env).assert().success().stdout("reusable\n");
}

#[test]
fn status_reports_changed_source() {
  let env = TestEnv::with_source(b"raw");
  publish_unchanged(&env);
  env.write_source(b"raw v2");

  status_cmd(&env)
    .assert()
    .success()
    .stdout("stale\n")
    .stderr(predicate::str::contains("source changed"));
}

#[test]
fn status_reports_corrupted_output() {
  let env = TestEnv::with_source(b"raw");
  publish_unchanged(&env);
  std::fs::write(env.output_path().join("img"), b"tampered").unwrap();

  let out = status_cmd(&env)
    .args(["-o", "json"])
    .assert()
    .success()
    .get_output()
    .stdout
    .clone();
  let json: serde_json::Value = serde_json::from_slice(&out).unwrap();

  assert_eq!(json["verdict"], "must_process");
  assert_eq!(json["reason"]["reason"], "output_corrupted");
}

#[test]
fn status_never_stages() {
  let env = TestEnv::with_source(b"raw");

  status_cmd(&env).assert().success();

  assert_eq!(std::fs::read_dir(env.staging_root()).unwrap().count(), 0);
}
