//! End-to-end runs through the public library API.

use std::fs;
use std::path::{Path, PathBuf};

use artiflow_lib::record::{FileRecordStore, RecordKind, RecordStore, read_record};
use artiflow_lib::transform::TransformRunner;
use artiflow_lib::util::hash::{ContentHash, hash_file};
use artiflow_lib::{ErrorKind, Pipeline, RunOptions};
use tempfile::TempDir;

fn options(temp: &Path) -> RunOptions {
  RunOptions {
    source: temp.join("img"),
    output_dir: temp.join("out"),
    output_name: Some("img".to_string()),
    staging_dir: Some(temp.join("stage")),
    transform: TransformRunner {
      customize: Some(format!(
        "sh -c 'echo run >> {}; printf %s -customized >> \"$1\"' customize",
        temp.join("calls").display()
      )),
      convert: Some("cp".to_string()),
      ..Default::default()
    },
    ..Default::default()
  }
}

fn calls(temp: &Path) -> usize {
  fs::read_to_string(temp.join("calls"))
    .map(|s| s.lines().count())
    .unwrap_or(0)
}

fn record(path: PathBuf) -> ContentHash {
  read_record(&path).unwrap().unwrap()
}

#[tokio::test]
async fn published_layout_and_unchanged_rerun() {
  let temp = TempDir::new().unwrap();
  fs::write(temp.path().join("img"), b"base image").unwrap();
  let h1 = hash_file(&temp.path().join("img")).unwrap();

  let pipeline = Pipeline::new();
  let first = pipeline.run(&options(temp.path())).await.unwrap();

  let out = temp.path().join("out");
  let published = fs::read(out.join("img")).unwrap();
  assert_eq!(published, b"base image-customized");

  let h1_prime = hash_file(&out.join("img")).unwrap();
  assert_eq!(record(out.join("img.hash")), h1_prime);
  assert_eq!(record(out.join("img.source.hash")), h1);

  let second = pipeline.run(&options(temp.path())).await.unwrap();
  assert!(second.cache_hit);
  assert_eq!(second.path, first.path);
  assert_eq!(fs::read(out.join("img")).unwrap(), published);
  assert_eq!(calls(temp.path()), 1);
}

#[tokio::test]
async fn tampered_output_without_overwrite_is_refused_untouched() {
  let temp = TempDir::new().unwrap();
  fs::write(temp.path().join("img"), b"base image").unwrap();

  let pipeline = Pipeline::new();
  pipeline.run(&options(temp.path())).await.unwrap();

  let out = temp.path().join("out");
  fs::write(out.join("img"), b"bit rot").unwrap();
  let hash_record = fs::read(out.join("img.hash")).unwrap();

  let err = pipeline.run(&options(temp.path())).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::AlreadyExists);
  assert_eq!(fs::read(out.join("img")).unwrap(), b"bit rot");
  assert_eq!(fs::read(out.join("img.hash")).unwrap(), hash_record);

  let mut overwrite = options(temp.path());
  overwrite.overwrite = true;
  let outcome = pipeline.run(&overwrite).await.unwrap();
  assert!(!outcome.cache_hit);
  assert_eq!(fs::read(out.join("img")).unwrap(), b"base image-customized");
  assert!(
    FileRecordStore
      .verify(&out.join("img"), RecordKind::Artifact)
      .unwrap()
      .is_match()
  );
}

#[tokio::test]
async fn source_is_never_modified() {
  let temp = TempDir::new().unwrap();
  fs::write(temp.path().join("img"), b"base image").unwrap();

  Pipeline::new().run(&options(temp.path())).await.unwrap();

  assert_eq!(fs::read(temp.path().join("img")).unwrap(), b"base image");
  assert!(!temp.path().join("img.hash").exists());
}
