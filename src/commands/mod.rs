//! CLI command implementations
//!
//! - `arch` - show what the detector makes of this host
//! - `flash` - one-shot flash with output streamed to the terminal
//! - `shell` - interactive console around the same supervisor

pub mod arch;
pub mod flash;
pub mod shell;

use crate::cli::JobArgs;
use imxflash_core::{arch as detector, default_script_path, ArchLabel};
use std::path::PathBuf;

/// Resolve the script path and architecture label for a job
///
/// An explicit `--arch` wins over detection; `--no-arch` suppresses the
/// label altogether.
pub fn resolve_job_args(args: &JobArgs) -> (PathBuf, ArchLabel) {
    let script = args.script.clone().unwrap_or_else(default_script_path);

    let arch = if args.no_arch {
        ArchLabel::Unknown(String::new())
    } else if let Some(label) = &args.arch {
        label.clone()
    } else {
        detector::detect()
    };

    log::debug!("Using script {} with architecture {}", script.display(), arch);
    (script, arch)
}
