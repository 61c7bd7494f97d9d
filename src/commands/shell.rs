//! Shell command implementation

use crate::cli::JobArgs;
use imxflash_shell::ShellConfig;
use std::path::PathBuf;

/// Run the interactive console
pub fn cmd_shell(image: Option<PathBuf>, args: &JobArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (script, arch) = super::resolve_job_args(args);

    imxflash_shell::run_shell(ShellConfig {
        script,
        dram_config: args.dram_config.clone(),
        arch,
        image,
    })?;

    Ok(())
}
