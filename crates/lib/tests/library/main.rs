#[cfg(unix)]
mod scenario_tests;
