//! Error types for the console

use imxflash_core::FlashError;
use thiserror::Error;

/// Errors that can occur in the console
#[derive(Error, Debug)]
pub enum ShellError {
    /// I/O error (reading/writing stdin/stdout)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Line editor failure
    #[error("Line editor error: {0}")]
    Readline(#[from] rustyline::error::ReadlineError),

    /// Flash operation error
    #[error("{0}")]
    Flash(#[from] FlashError),

    /// Input that is not a console command
    #[error("Unknown command '{0}'. Type 'help' for the list of commands")]
    UnknownCommand(String),

    /// Invalid argument to a command
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
