//! Common test utilities

#![allow(dead_code)]

use anyhow::{Context, Result};
use std::time::Duration;

use process_streams::{LaunchArgs, Output, ProcessState, StateSignal};

/// Install a test-friendly tracing subscriber once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Launch arguments for `sh -c <script>`
pub fn sh(script: &str) -> LaunchArgs {
    LaunchArgs::new(["sh", "-c", script]).unwrap()
}

/// Decode the collected stdout of a finished process
pub fn stdout_text(output: &Output) -> Result<String> {
    String::from_utf8(output.stdout.clone()).context("stdout is not valid UTF-8")
}

/// The states recorded in a signal's history, without timestamps
pub fn recorded_states(signal: &StateSignal) -> Vec<ProcessState> {
    signal.history().into_iter().map(|t| t.state).collect()
}

/// Check whether a process with the given pid still exists
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;

    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Short pause used to let a process make progress
pub async fn settle() {
    smol::Timer::after(Duration::from_millis(100)).await;
}
