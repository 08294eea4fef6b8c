//! Native process traits and types

use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncWrite};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;

/// A raw readable OS stream (the process's stdout or stderr)
pub type RawReader = Pin<Box<dyn AsyncRead + Send>>;

/// A raw writable OS stream (the process's stdin)
pub type RawWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// A handle to a running native process
///
/// Each stream can be taken once. The stderr stream is absent when the
/// process was launched with its error output merged into stdout.
#[async_trait]
pub trait ProcessHandle: Send {
    /// Get the process ID
    fn pid(&self) -> Option<u32>;

    /// Take the writable end of the process's stdin
    fn take_stdin(&mut self) -> Option<RawWriter>;

    /// Take the readable end of the process's stdout
    fn take_stdout(&mut self) -> Option<RawReader>;

    /// Take the readable end of the process's stderr
    fn take_stderr(&mut self) -> Option<RawReader>;

    /// Wait for the process to complete and return its exit status
    async fn wait(&mut self) -> Result<ExitStatus>;

    /// Get a switch that force-kills this process without waiting for it
    fn kill_switch(&self) -> KillSwitch;
}

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process (Unix only)
    #[cfg(unix)]
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Status of a process that exited normally with `code`
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            #[cfg(unix)]
            signal: None,
        }
    }

    /// Returns true if the process exited successfully (code 0)
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Returns true if the process was terminated by a signal
    pub fn terminated_by_signal(&self) -> bool {
        #[cfg(unix)]
        {
            self.signal.is_some()
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    /// Collapse the status into a single integer code
    ///
    /// Signal deaths follow the shell convention of `128 + signal`.
    pub fn exit_code(&self) -> i32 {
        if let Some(code) = self.code {
            return code;
        }
        #[cfg(unix)]
        if let Some(signal) = self.signal {
            return 128 + signal;
        }
        -1
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            #[cfg(unix)]
            signal: {
                use std::os::unix::process::ExitStatusExt;
                status.signal()
            },
        }
    }
}

/// A cloneable, non-blocking forced-termination request
///
/// Firing the switch only requests the kill; reaping the process is left to
/// whoever owns its [`ProcessHandle`].
#[derive(Clone)]
pub struct KillSwitch {
    kill: Arc<dyn Fn() -> Result<()> + Send + Sync>,
}

impl KillSwitch {
    /// Create a kill switch from the given kill operation
    pub fn new(kill: impl Fn() -> Result<()> + Send + Sync + 'static) -> Self {
        Self {
            kill: Arc::new(kill),
        }
    }

    /// A switch that does nothing, for processes that cannot be killed
    pub fn noop() -> Self {
        Self::new(|| Ok(()))
    }

    /// Request forced termination
    pub fn kill(&self) -> Result<()> {
        (self.kill)()
    }
}

impl fmt::Debug for KillSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KillSwitch").finish_non_exhaustive()
    }
}
