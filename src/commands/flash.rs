//! Flash command implementation

use crate::cli::JobArgs;
use imxflash_core::{CancelStatus, FlashCommand, FlashJob, OutputSink, RunOutcome, Supervisor};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Create a standard spinner style
fn create_spinner_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?)
}

/// Prints script output above a spinner
struct SpinnerSink {
    pb: ProgressBar,
}

impl OutputSink for SpinnerSink {
    fn on_line(&mut self, line: &str) {
        // A hidden bar (output is not a terminal) swallows println
        if self.pb.is_hidden() {
            println!("{}", line);
        } else {
            self.pb.println(line);
        }
    }

    fn on_outcome(&mut self, outcome: &RunOutcome) {
        match outcome {
            RunOutcome::Success => self.pb.finish_with_message(outcome.to_string()),
            _ => self.pb.abandon_with_message(outcome.to_string()),
        }
    }
}

/// Run the flashing script for one image
///
/// Ctrl-C cancels the script; a second Ctrl-C stops waiting for it.
pub fn run_flash(
    image: Option<PathBuf>,
    dry_run: bool,
    args: &JobArgs,
) -> Result<RunOutcome, Box<dyn std::error::Error>> {
    let (script, arch) = super::resolve_job_args(args);
    let job = FlashJob::new(image, arch, args.dram_config.clone())?;

    if dry_run {
        println!("{}", FlashCommand::build(&job, &script));
        return Ok(RunOutcome::Success);
    }

    println!("Image:        {}", job.image().display());
    if job.arch().is_known() {
        println!("Architecture: {}", job.arch());
    } else {
        println!("Architecture: not passed to the script");
    }
    println!("Script:       {}", script.display());

    let supervisor = Supervisor::new(script);
    install_cancel_handler(supervisor.clone())?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(create_spinner_style()?);
    pb.set_message(format!("Flashing {}...", job.image().display()));
    pb.enable_steady_tick(Duration::from_millis(100));

    let handle = supervisor.start(job, SpinnerSink { pb: pb.clone() });
    let handle = match handle {
        Ok(handle) => handle,
        Err(e) => {
            pb.finish_and_clear();
            return Err(e.into());
        }
    };

    let outcome = handle.wait()?;
    if pb.is_hidden() {
        println!("{}", outcome);
    }

    Ok(outcome.into_result()?)
}

fn install_cancel_handler(supervisor: Supervisor) -> Result<(), ctrlc::Error> {
    let interrupted = AtomicBool::new(false);
    ctrlc::set_handler(move || {
        if interrupted.swap(true, Ordering::SeqCst) {
            log::warn!("Interrupted again, leaving the flashing script running");
            std::process::exit(130);
        }
        match supervisor.cancel() {
            CancelStatus::Signalled => {
                eprintln!("\nCancelling flashing process (Ctrl-C again to stop waiting)")
            }
            CancelStatus::NothingToCancel => std::process::exit(130),
        }
    })
}
