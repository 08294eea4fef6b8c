//! Launcher trait for creating native processes

use crate::args::LaunchArgs;
use crate::error::Result;
use crate::process::ProcessHandle;
use async_trait::async_trait;

/// Something that can turn [`LaunchArgs`] into a running native process
///
/// Implementations must fail with [`Error::Launch`](crate::Error::Launch)
/// when the program cannot be found or started, and must honor the
/// environment-replacement and stream-merging semantics of [`LaunchArgs`].
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
    /// Launch a process, returning its control handle with all stdio piped
    async fn launch(&self, args: &LaunchArgs) -> Result<Box<dyn ProcessHandle>>;
}
