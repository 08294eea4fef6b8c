//! Local process launching backend

use async_process::{Child, Stdio};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::args::LaunchArgs;
use crate::error::{Error, Result};
use crate::launcher::Launcher;
use crate::process::{ExitStatus, KillSwitch, ProcessHandle, RawReader, RawWriter};

/// Launcher for executing processes locally
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLauncher;

/// A handle to a local child process
pub struct LocalProcessHandle {
    /// The underlying child process
    child: Child,
    /// Read end of the shared stdout/stderr pipe when streams are merged
    merged: Option<RawReader>,
    /// Set once the process has been reaped, after which its pid may be reused
    reaped: Arc<AtomicBool>,
}

#[async_trait]
impl Launcher for LocalLauncher {
    async fn launch(&self, args: &LaunchArgs) -> Result<Box<dyn ProcessHandle>> {
        let mut cmd = args.prepare();
        cmd.stdin(Stdio::piped());

        let merged = if args.merges_error_into_output() {
            Some(merge_output(&mut cmd, args)?)
        } else {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
            None
        };

        let child = cmd
            .spawn()
            .map_err(|e| Error::launch_failed(args.program(), e.to_string()))?;

        // The command still owns the parent's copies of the merged pipe's
        // write end; the reader only sees EOF once they are gone.
        drop(cmd);

        let merged = match merged {
            Some(reader) => Some(into_async_reader(reader, args)?),
            None => None,
        };

        debug!(
            program = args.program(),
            pid = child.id(),
            merged = args.merges_error_into_output(),
            "launched local process"
        );

        Ok(Box::new(LocalProcessHandle {
            child,
            merged,
            reaped: Arc::new(AtomicBool::new(false)),
        }))
    }
}

#[cfg(unix)]
fn merge_output(
    cmd: &mut async_process::Command,
    args: &LaunchArgs,
) -> Result<std::io::PipeReader> {
    let launch_error = |e: std::io::Error| Error::launch_failed(args.program(), e.to_string());

    let (reader, writer) = std::io::pipe().map_err(launch_error)?;
    let error_writer = writer.try_clone().map_err(launch_error)?;
    cmd.stdout(writer);
    cmd.stderr(error_writer);
    Ok(reader)
}

#[cfg(unix)]
fn into_async_reader(reader: std::io::PipeReader, args: &LaunchArgs) -> Result<RawReader> {
    use std::os::fd::OwnedFd;

    let reader = std::fs::File::from(OwnedFd::from(reader));
    let reader = async_io::Async::new(reader)
        .map_err(|e| Error::launch_failed(args.program(), e.to_string()))?;
    Ok(Box::pin(reader))
}

#[cfg(not(unix))]
fn merge_output(_cmd: &mut async_process::Command, args: &LaunchArgs) -> Result<()> {
    Err(Error::launch_failed(
        args.program(),
        "merging stderr into stdout is only supported on Unix",
    ))
}

#[cfg(not(unix))]
fn into_async_reader(_reader: (), args: &LaunchArgs) -> Result<RawReader> {
    Err(Error::launch_failed(
        args.program(),
        "merging stderr into stdout is only supported on Unix",
    ))
}

#[async_trait]
impl ProcessHandle for LocalProcessHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn take_stdin(&mut self) -> Option<RawWriter> {
        self.child
            .stdin
            .take()
            .map(|stdin| Box::pin(stdin) as RawWriter)
    }

    fn take_stdout(&mut self) -> Option<RawReader> {
        if let Some(merged) = self.merged.take() {
            return Some(merged);
        }
        self.child
            .stdout
            .take()
            .map(|stdout| Box::pin(stdout) as RawReader)
    }

    fn take_stderr(&mut self) -> Option<RawReader> {
        self.child
            .stderr
            .take()
            .map(|stderr| Box::pin(stderr) as RawReader)
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self
            .child
            .status()
            .await
            .map_err(|e| Error::exit_wait_failed(e.to_string()))?;

        self.reaped.store(true, Ordering::Release);
        Ok(status.into())
    }

    fn kill_switch(&self) -> KillSwitch {
        let pid = self.child.id();
        let reaped = self.reaped.clone();

        KillSwitch::new(move || {
            if reaped.load(Ordering::Acquire) {
                debug!(pid, "process already reaped, not killing");
                return Ok(());
            }
            send_kill(pid)
        })
    }
}

#[cfg(unix)]
fn send_kill(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(Error::kill_failed(pid, e.to_string())),
    }
}

#[cfg(not(unix))]
fn send_kill(pid: u32) -> Result<()> {
    Err(Error::kill_failed(
        pid,
        "forced termination is only supported on Unix",
    ))
}
