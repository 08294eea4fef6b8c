//! Error types for subprocess control

use thiserror::Error;

/// Unified error type for subprocess control
#[derive(Error, Debug)]
pub enum Error {
    /// The native process could not be created
    #[error("failed to launch {program}: {reason}")]
    Launch {
        /// The program that was being launched
        program: String,
        /// The reason for the launch failure
        reason: String,
    },

    /// Launch arguments were rejected before anything was spawned
    #[error("invalid launch arguments: {reason}")]
    InvalidArgs {
        /// Why the arguments are invalid
        reason: String,
    },

    /// Writing or flushing the process's input failed
    #[error("failed to write to process input: {source}")]
    Write {
        /// The underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Waiting for the process's exit status failed
    #[error("failed to wait for process exit: {reason}")]
    ExitWait {
        /// The reason the wait failed
        reason: String,
    },

    /// Failed to deliver the kill signal
    #[error("failed to kill process {pid}: {reason}")]
    Kill {
        /// The process that could not be killed
        pid: u32,
        /// The reason for the failure
        reason: String,
    },

    /// I/O error while reading process output
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a launch failed error
    pub fn launch_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Launch {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid arguments error
    pub fn invalid_args(reason: impl Into<String>) -> Self {
        Self::InvalidArgs {
            reason: reason.into(),
        }
    }

    /// Create a write error from the underlying I/O failure
    pub fn write_failed(source: std::io::Error) -> Self {
        Self::Write { source }
    }

    /// Create an exit wait error
    pub fn exit_wait_failed(reason: impl Into<String>) -> Self {
        Self::ExitWait {
            reason: reason.into(),
        }
    }

    /// Create a kill failed error
    pub fn kill_failed(pid: u32, reason: impl Into<String>) -> Self {
        Self::Kill {
            pid,
            reason: reason.into(),
        }
    }

    /// Returns true if this is a broken pipe on the process's input
    pub fn is_broken_pipe(&self) -> bool {
        matches!(
            self,
            Error::Write { source } if source.kind() == std::io::ErrorKind::BrokenPipe
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_error_message() {
        let err = Error::launch_failed("nope", "No such file or directory");
        assert_eq!(
            err.to_string(),
            "failed to launch nope: No such file or directory"
        );
    }

    #[test]
    fn test_broken_pipe_detection() {
        let err = Error::write_failed(std::io::ErrorKind::BrokenPipe.into());
        assert!(err.is_broken_pipe());

        let err = Error::write_failed(std::io::ErrorKind::WriteZero.into());
        assert!(!err.is_broken_pipe());
        assert!(!Error::exit_wait_failed("gone").is_broken_pipe());
    }
}
