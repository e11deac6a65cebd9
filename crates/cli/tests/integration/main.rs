mod common;
#[cfg(unix)]
mod run_tests;
mod status_tests;
