//! Error types for imxflash-core

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported to the operator by flash operations
#[derive(Debug, Error)]
pub enum FlashError {
    /// A flash was requested without choosing an image
    #[error("No image selected. Choose a disk image before flashing")]
    ImageNotSelected,

    /// A flash was requested while another job is still running
    #[error("A flashing job is already running")]
    AlreadyRunning,

    /// The operating system could not start the flashing script
    #[error("Failed to start {}: {source}", .script.display())]
    Spawn {
        /// Script that was being started
        script: PathBuf,
        /// Error reported by the operating system
        #[source]
        source: std::io::Error,
    },

    /// The flashing script ran and exited with a non-zero code
    #[error("Flashing script exited with code {code}{}", stderr_suffix(.stderr))]
    ProcessExit {
        /// Exit code of the script
        code: i32,
        /// Diagnostic text the script wrote to standard error
        stderr: String,
    },

    /// The job's worker thread went away without reporting an outcome
    #[error("Flashing worker terminated unexpectedly")]
    WorkerLost,

    /// I/O error outside of the script itself
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

/// Failure to query the host machine type
///
/// Never surfaced to the operator: detection falls back to an unknown
/// architecture instead.
#[derive(Debug, Error)]
pub enum DetectError {
    /// `uname` could not be run
    #[error("Failed to run uname: {0}")]
    Query(#[from] std::io::Error),

    /// `uname` ran but reported failure
    #[error("uname exited with {0}")]
    Status(std::process::ExitStatus),

    /// `uname` printed nothing usable
    #[error("uname returned an empty machine type")]
    Empty,
}

/// Result type for flash operations
pub type Result<T> = std::result::Result<T, FlashError>;
