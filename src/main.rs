//! imxflash - Front-end for the IMX8 board flashing script
//!
//! Picks a disk image, works out which architecture label the flashing
//! script needs for this host, then runs `run_container.sh` and streams its
//! output while the operator can cancel at any time.
//!
//! # Architecture
//!
//! - `imxflash-core` builds the script invocation (always an argument
//!   vector, never a shell line) and supervises the running script on a
//!   worker thread
//! - `imxflash-shell` is an interactive console around the supervisor
//! - this binary provides one-shot subcommands on top of both

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use imxflash_core::{FlashError, RunOutcome};
use std::error::Error;

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let result = match cli.command {
        Commands::Arch => commands::arch::run_arch(),
        Commands::Flash {
            image,
            dry_run,
            job,
        } => match commands::flash::run_flash(image, dry_run, &job) {
            // Interrupted by the operator, like a shell reports SIGINT
            Ok(RunOutcome::Cancelled) => std::process::exit(130),
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        },
        Commands::Shell { image, job } => commands::shell::cmd_shell(image, &job),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(exit_status(e.as_ref()));
    }
}

/// Exit status for a failed command; a failed script passes its own code on
fn exit_status(err: &(dyn Error + 'static)) -> i32 {
    match err.downcast_ref::<FlashError>() {
        Some(FlashError::ProcessExit { code, .. }) if (1..=255).contains(code) => *code,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status() {
        let failed = FlashError::ProcessExit {
            code: 3,
            stderr: "no device".into(),
        };
        assert_eq!(exit_status(&failed), 3);

        let killed = FlashError::ProcessExit {
            code: -1,
            stderr: String::new(),
        };
        assert_eq!(exit_status(&killed), 1);
        assert_eq!(exit_status(&FlashError::ImageNotSelected), 1);

        let other: Box<dyn Error> = "bad input".into();
        assert_eq!(exit_status(other.as_ref()), 1);
    }
}
