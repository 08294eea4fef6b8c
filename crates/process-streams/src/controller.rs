//! Subprocess lifecycle controller
//!
//! A [`Controller`] turns [`LaunchArgs`] into a lazy, single-shot
//! [`Subprocess`]. Nothing is spawned until [`Subprocess::run`] is awaited;
//! the process's streams live exactly as long as the scope passed to it, and
//! the process is always waited on before `run` returns.

use futures::TryStreamExt;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::args::LaunchArgs;
use crate::backends::LocalLauncher;
use crate::bridge::{Guarded, ReadPolicy, StreamSet, read_source, write_sink};
use crate::destroy::{DestroyAction, DestroyChannel};
use crate::error::{Error, Result};
use crate::handle::{InputSink, OutputStream, SubprocessHandle};
use crate::launcher::Launcher;
use crate::process::{KillSwitch, ProcessHandle, RawReader, RawWriter};
use crate::state::{ProcessState, StateSignal};

/// Settings shared by every subprocess a [`Controller`] spawns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// When stdout/stderr sequences end
    #[serde(default)]
    pub read_policy: ReadPolicy,
}

/// Spawns subprocesses through a [`Launcher`]
pub struct Controller<L: Launcher = LocalLauncher> {
    launcher: Arc<L>,
    config: ControllerConfig,
}

impl Controller<LocalLauncher> {
    /// Create a controller for local processes
    pub fn local() -> Self {
        Self::new(LocalLauncher)
    }
}

impl<L: Launcher> Controller<L> {
    /// Create a controller with the given launcher
    pub fn new(launcher: L) -> Self {
        Self {
            launcher: Arc::new(launcher),
            config: ControllerConfig::default(),
        }
    }

    /// Replace the controller settings
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the read policy for stdout and stderr
    pub fn with_read_policy(mut self, policy: ReadPolicy) -> Self {
        self.config.read_policy = policy;
        self
    }

    /// Get the controller settings
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Prepare a subprocess; no native process exists until it is run
    pub fn spawn(&self, args: LaunchArgs) -> Subprocess {
        Subprocess {
            launcher: self.launcher.clone(),
            args,
            read_policy: self.config.read_policy,
            state: StateSignal::new(),
            destroy: DestroyChannel::new(),
            started: false,
        }
    }
}

impl<L: Launcher> Clone for Controller<L> {
    fn clone(&self) -> Self {
        Self {
            launcher: self.launcher.clone(),
            config: self.config.clone(),
        }
    }
}

/// Prepare a local subprocess with the default settings
pub fn spawn(args: LaunchArgs) -> Subprocess {
    Controller::local().spawn(args)
}

/// Everything collected from a process run to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// The terminal state of the process
    pub state: ProcessState,
    /// All bytes read from stdout
    pub stdout: Vec<u8>,
    /// All bytes read from stderr
    pub stderr: Vec<u8>,
}

/// A process that has been described but not yet acquired
///
/// The state signal and destroy channel can be taken out before the process
/// is run and shared freely. Running consumes the subprocess, so at most one
/// native process is ever created from it. Dropping it without running closes
/// both, so pending `destroy()` and `wait_terminal()` calls complete.
pub struct Subprocess {
    launcher: Arc<dyn Launcher>,
    args: LaunchArgs,
    read_policy: ReadPolicy,
    state: StateSignal,
    destroy: DestroyChannel,
    /// Set once `run` starts; release then owns the cleanup
    started: bool,
}

impl Subprocess {
    /// The arguments this subprocess will be launched with
    pub fn args(&self) -> &LaunchArgs {
        &self.args
    }

    /// A signal tracking the lifecycle of this subprocess
    pub fn state(&self) -> StateSignal {
        self.state.clone()
    }

    /// The channel that force-kills this subprocess
    pub fn destroyer(&self) -> DestroyChannel {
        self.destroy.clone()
    }

    /// Launch the process and hand its streams to `scope`
    ///
    /// `Running` is published before `scope` sees the handle. When `scope`
    /// finishes, fails, or stops reading early, the streams are closed, the
    /// process is waited on and `Exited(code)` is published; stopping early
    /// does not kill the process. A launch failure is returned before any
    /// state is published.
    pub async fn run<F, Fut, T>(mut self, scope: F) -> Result<T>
    where
        F: FnOnce(SubprocessHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.started = true;
        let launcher = self.launcher.clone();
        let args = self.args.clone();
        let read_policy = self.read_policy;
        let state = self.state.clone();
        let destroy = self.destroy.clone();
        drop(self);

        let mut process = match launcher.launch(&args).await {
            Ok(process) => process,
            Err(e) => {
                warn!(program = args.program(), error = %e, "launch failed");
                destroy.close();
                state.close();
                return Err(e);
            }
        };

        let pid = process.pid();
        info!(program = args.program(), ?pid, "subprocess started");
        state.publish(ProcessState::Running);

        let (handle, streams) = bridge(&mut *process, read_policy);
        destroy.arm(destroy_action(
            process.kill_switch(),
            streams.clone(),
            state.clone(),
        ));

        let mut release = Release {
            process: Some(process),
            streams,
            state,
            destroy,
        };

        let outcome = scope(handle).await;
        let released = release.release().await;

        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), released) => {
                if let Err(release_error) = released {
                    warn!(error = %release_error, "release failed after scope error");
                }
                Err(e)
            }
        }
    }

    /// Run the process to completion, collecting its output
    ///
    /// Stdin is closed immediately.
    pub async fn output(self) -> Result<Output> {
        let state = self.state();
        let (stdout, stderr) = self
            .run(|handle| async move {
                let (stdin, stdout, stderr) = handle.into_parts();
                drop(stdin);
                futures::try_join!(collect(stdout), collect(stderr))
            })
            .await?;

        Ok(Output {
            state: state.get(),
            stdout,
            stderr,
        })
    }
}

impl Drop for Subprocess {
    fn drop(&mut self) {
        if self.started {
            return;
        }
        debug!(program = self.args.program(), "subprocess dropped without running");
        self.destroy.close();
        self.state.close();
    }
}

async fn collect(chunks: OutputStream<Vec<u8>>) -> Result<Vec<u8>> {
    chunks
        .try_fold(Vec::new(), |mut all, chunk| async move {
            all.extend_from_slice(&chunk);
            Ok::<_, Error>(all)
        })
        .await
}

/// Wrap the raw streams of `process` into a handle, registering each in the
/// returned stream set
fn bridge(process: &mut dyn ProcessHandle, policy: ReadPolicy) -> (SubprocessHandle, StreamSet) {
    let mut streams = StreamSet::new();

    let stdin: InputSink<Vec<u8>> = match process.take_stdin() {
        Some(stdin) => Box::pin(write_sink(Guarded::<RawWriter>::new(stdin, &mut streams))),
        None => Box::pin(write_sink(Guarded::<RawWriter>::closed())),
    };

    let mut source = |reader: Option<RawReader>| -> OutputStream<Vec<u8>> {
        match reader {
            Some(reader) => read_source(Guarded::new(reader, &mut streams), policy).boxed(),
            None => stream::empty().boxed(),
        }
    };
    let stdout = source(process.take_stdout());
    let stderr = source(process.take_stderr());

    let handle = SubprocessHandle::new(process.pid(), stdin, stdout, stderr);
    (handle, streams)
}

fn destroy_action(kill: KillSwitch, streams: StreamSet, state: StateSignal) -> DestroyAction {
    Box::new(move || {
        streams.close_all();
        kill.kill()?;
        if state.publish(ProcessState::Destroyed) {
            info!("subprocess destroyed");
        }
        Ok(())
    })
}

/// Owns a launched process until its exit has been observed
struct Release {
    process: Option<Box<dyn ProcessHandle>>,
    streams: StreamSet,
    state: StateSignal,
    destroy: DestroyChannel,
}

impl Release {
    async fn release(&mut self) -> Result<()> {
        self.streams.close_all();

        let Some(process) = self.process.as_mut() else {
            return Ok(());
        };
        let status = process.wait().await;
        self.process = None;

        finish(status.map(|s| s.exit_code()), &self.state, &self.destroy)
    }
}

impl Drop for Release {
    fn drop(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };

        // The run future was dropped before the exit was observed.
        self.streams.close_all();
        let state = self.state.clone();
        let destroy = self.destroy.clone();
        debug!(pid = ?process.pid(), "waiting for abandoned subprocess in the background");

        let spawned = std::thread::Builder::new()
            .name("process-streams-reaper".to_string())
            .spawn(move || {
                let status = futures::executor::block_on(process.wait());
                let _ = finish(status.map(|s| s.exit_code()), &state, &destroy);
            });

        if let Err(e) = spawned {
            warn!(error = %e, "failed to start reaper thread");
            self.destroy.close();
            self.state.close();
        }
    }
}

fn finish(code: Result<i32>, state: &StateSignal, destroy: &DestroyChannel) -> Result<()> {
    destroy.close();
    match code {
        Ok(code) => {
            if state.publish(ProcessState::Exited(code)) {
                info!(code, "subprocess exited");
            }
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "failed to wait for subprocess");
            state.close();
            Err(e)
        }
    }
}
