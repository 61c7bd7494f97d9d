//! CLI argument parsing

use clap::{Parser, Subcommand};
use imxflash_core::{ArchLabel, DEFAULT_DRAM_CONFIG};
use std::path::PathBuf;

/// Parse an architecture override
fn parse_arch(s: &str) -> Result<ArchLabel, String> {
    s.parse()
}

#[derive(Parser)]
#[command(name = "imxflash")]
#[command(author, version, about = "IMX8 board flasher", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Script and job options shared across commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct JobArgs {
    /// Flashing script to run
    /// Defaults to run_container.sh next to this executable, then ./run_container.sh
    #[arg(long, env = "IMXFLASH_SCRIPT")]
    pub script: Option<PathBuf>,

    /// DRAM configuration token passed to the script
    #[arg(long, env = "IMXFLASH_DRAM_CONFIG", default_value = DEFAULT_DRAM_CONFIG)]
    pub dram_config: String,

    /// Architecture label to pass instead of the detected one
    /// (armv7, armv8, aarch64, x86 or unknown)
    #[arg(short, long, value_parser = parse_arch, conflicts_with = "no_arch")]
    pub arch: Option<ArchLabel>,

    /// Don't pass an architecture to the script
    #[arg(long)]
    pub no_arch: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the detected host architecture
    Arch,

    /// Flash a disk image to the board
    Flash {
        /// Disk image to write
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Print the script invocation without running it
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        job: JobArgs,
    },

    /// Interactive console: select an image, start and cancel flashes
    Shell {
        /// Image to preselect
        #[arg(short, long)]
        image: Option<PathBuf>,

        #[command(flatten)]
        job: JobArgs,
    },
}
