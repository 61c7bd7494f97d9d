//! imxflash-core - Flash job construction and script supervision
//!
//! This crate contains everything below the user interface of imxflash:
//!
//! - [`arch`] - host architecture detection and the labels passed to the
//!   flashing script
//! - [`job`] - the immutable description of one flash request
//! - [`command`] - turning a job into an argument vector (never a shell line)
//! - [`sink`] - where script output and the final outcome are delivered
//! - [`supervisor`] - running the script on a worker thread, streaming its
//!   output and cancelling it on request
//!
//! # Example
//!
//! ```no_run
//! use imxflash_core::{arch, FlashJob, LogSink, Supervisor, DEFAULT_DRAM_CONFIG};
//!
//! let job = FlashJob::new(
//!     Some("balena.img".into()),
//!     arch::detect(),
//!     DEFAULT_DRAM_CONFIG,
//! )?;
//!
//! let supervisor = Supervisor::new("./run_container.sh");
//! let handle = supervisor.start(job, LogSink)?;
//! let outcome = handle.wait()?;
//! println!("{}", outcome);
//! # Ok::<(), imxflash_core::FlashError>(())
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod arch;
pub mod command;
pub mod error;
pub mod job;
pub mod sink;
pub mod supervisor;

pub use arch::ArchLabel;
pub use command::FlashCommand;
pub use error::{DetectError, FlashError, Result};
pub use job::{default_script_path, FlashJob, DEFAULT_DRAM_CONFIG, SCRIPT_NAME};
pub use sink::{ChannelSink, LogSink, OutputSink, SinkEvent};
pub use supervisor::{CancelStatus, JobHandle, JobState, RunOutcome, Supervisor};
