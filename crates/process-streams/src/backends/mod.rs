//! Launcher implementations
//!
//! The built-in [`LocalLauncher`] spawns processes on the local host through
//! `async-process`. Other launchers can be plugged into a
//! [`Controller`](crate::Controller) by implementing the
//! [`Launcher`](crate::launcher::Launcher) trait.
//!
//! # Example: Custom Launcher
//!
//! ```ignore
//! use process_streams::{LaunchArgs, Launcher, ProcessHandle, Result};
//! use async_trait::async_trait;
//!
//! struct RecordingLauncher {
//!     // launcher-specific fields
//! }
//!
//! #[async_trait]
//! impl Launcher for RecordingLauncher {
//!     async fn launch(&self, args: &LaunchArgs) -> Result<Box<dyn ProcessHandle>> {
//!         // Custom implementation
//!     }
//! }
//! ```

pub mod local;
pub use local::{LocalLauncher, LocalProcessHandle};
