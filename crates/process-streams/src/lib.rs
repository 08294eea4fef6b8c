//! Subprocess lifecycle control with streaming stdio
//!
//! This crate launches external programs and exposes their stdin, stdout and
//! stderr as `futures` sinks and streams, while tracking each process through
//! an explicit [`ProcessState`] machine. Cleanup is deterministic: however the
//! caller stops consuming, the process's pipes are closed and its exit is
//! observed, and a [`DestroyChannel`] can force-kill it at any time.
//!
//! The crate is runtime-agnostic; any executor able to drive `async-io`
//! futures will do.
//!
//! ```no_run
//! use futures::TryStreamExt;
//! use process_streams::{LaunchArgs, ProcessState, spawn};
//!
//! # async fn example() -> process_streams::Result<()> {
//! let args = LaunchArgs::new(["printf", "Hello World\\n"])?;
//! let subprocess = spawn(args);
//! let state = subprocess.state();
//!
//! let chunks: Vec<Vec<u8>> = subprocess
//!     .run(|mut handle| async move { handle.stdout().try_collect().await })
//!     .await?;
//!
//! assert_eq!(chunks.concat(), b"Hello World\n");
//! assert_eq!(state.get(), ProcessState::Exited(0));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod args;
pub mod backends;
pub mod bridge;
pub mod controller;
pub mod destroy;
pub mod error;
pub mod handle;
pub mod launcher;
pub mod lines;
pub mod process;
pub mod state;

pub use args::{LaunchArgs, LaunchArgsBuilder};
pub use backends::LocalLauncher;
pub use bridge::{CHUNK_SIZE, ReadPolicy, read_source, write_sink};
pub use controller::{Controller, ControllerConfig, Output, Subprocess, spawn};
pub use destroy::DestroyChannel;
pub use error::{Error, Result};
pub use handle::{Exchange, InputSink, OutputStream, SubprocessHandle, Tagged};
pub use launcher::Launcher;
pub use lines::lines;
pub use process::{ExitStatus, KillSwitch, ProcessHandle, RawReader, RawWriter};
pub use state::{ProcessState, StateSignal, StateStream, StateTransition};
