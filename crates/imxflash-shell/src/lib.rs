//! Interactive console for flashing boards
//!
//! The console is the operator's control surface: pick an image, check the
//! detected architecture, start a flash and cancel it while it runs. The
//! flashing script runs on the supervisor's worker thread and its output is
//! printed above the prompt, so the prompt stays usable the whole time.
//!
//! # Example Session
//!
//! ```text
//! imxflash > image /home/op/images/balena-imx8.img
//! Image: /home/op/images/balena-imx8.img
//! imxflash > start
//! Flashing started (job 1)
//! [container] pulling flasher image...
//! imxflash > cancel
//! Cancelling flashing process
//! ! Flashing process cancelled
//! imxflash > quit
//! ```

mod command;
mod error;
pub mod helper;

pub use command::{parse_command, ShellCommand, COMMAND_NAMES};
pub use error::ShellError;

use crate::helper::ShellHelper;
use colored::Colorize;
use directories::ProjectDirs;
use imxflash_core::{
    ArchLabel, CancelStatus, FlashJob, JobHandle, OutputSink, RunOutcome, Supervisor,
};
use rustyline::error::ReadlineError;
use rustyline::history::FileHistory;
use rustyline::{Editor, ExternalPrinter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Settings the console starts with
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Flashing script to run
    pub script: PathBuf,
    /// DRAM configuration token
    pub dram_config: String,
    /// Architecture label (detected or overridden)
    pub arch: ArchLabel,
    /// Image preselected on the command line
    pub image: Option<PathBuf>,
}

/// Get the ASCII art banner
fn get_banner() -> String {
    format!(
        r#"
   _                 __ _           _
  (_)_ __ __ __  __ / _| |__ _ _____| |_
  | | '  \\ \ / / |  _| / _` (_-< ' \    Version {}
  |_|_|_|_/_\_\  |_| |_\__,_/__/_||_|    help for commands
"#,
        VERSION
    )
    .bright_yellow()
    .bold()
    .to_string()
}

/// Get the history file path
fn get_history_path() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "imxflash") {
        let mut path = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&path).ok();
        path.push("shell_history");
        path
    } else {
        PathBuf::from(".imxflash_history")
    }
}

type SharedPrinter = Arc<Mutex<Box<dyn ExternalPrinter + Send>>>;

/// Prints script output above the prompt
struct ConsoleSink {
    printer: Option<SharedPrinter>,
}

impl ConsoleSink {
    fn print(&self, message: String) {
        match &self.printer {
            Some(printer) => {
                let mut printer = printer.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = printer.print(message) {
                    log::debug!("External printer failed: {}", e);
                }
            }
            None => println!("{}", message),
        }
    }
}

impl OutputSink for ConsoleSink {
    fn on_line(&mut self, line: &str) {
        self.print(line.to_string());
    }

    fn on_outcome(&mut self, outcome: &RunOutcome) {
        self.print(format_outcome(outcome));
    }
}

fn format_outcome(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Success => format!("{} {}", "✓".bright_green().bold(), outcome),
        RunOutcome::Failure { stderr, .. } if !stderr.is_empty() => {
            format!("{} {}\n{}", "✗".bright_red().bold(), outcome, stderr)
        }
        RunOutcome::Failure { .. } => format!("{} {}", "✗".bright_red().bold(), outcome),
        RunOutcome::Cancelled => format!("{} {}", "!".bright_yellow().bold(), outcome),
    }
}

/// Console state between commands
struct Session {
    supervisor: Supervisor,
    dram_config: String,
    arch: ArchLabel,
    image: Option<PathBuf>,
    printer: Option<SharedPrinter>,
    job: Option<JobHandle>,
}

impl Session {
    /// Run one command; returns `false` when the console should exit
    fn execute(&mut self, command: ShellCommand) -> Result<bool, ShellError> {
        match command {
            ShellCommand::Empty => {}
            ShellCommand::Image(None) => match &self.image {
                Some(image) => println!("Image: {}", image.display()),
                None => println!("No image selected"),
            },
            ShellCommand::Image(Some(path)) => self.select_image(path)?,
            ShellCommand::Arch(None) => self.print_arch(),
            ShellCommand::Arch(Some(label)) => {
                self.arch = label;
                self.print_arch();
            }
            ShellCommand::Start => self.start()?,
            ShellCommand::Cancel => self.cancel(),
            ShellCommand::Status => self.print_status(),
            ShellCommand::Help => print_help(),
            ShellCommand::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn select_image(&mut self, path: PathBuf) -> Result<(), ShellError> {
        if !path.is_file() {
            return Err(ShellError::InvalidArgument(format!(
                "{} is not a file",
                path.display()
            )));
        }
        if !has_img_extension(&path) {
            println!(
                "{}: {} does not look like a disk image (*.img)",
                "Warning".bright_yellow(),
                path.display()
            );
        }
        println!("Image: {}", path.display());
        self.image = Some(path);
        Ok(())
    }

    fn start(&mut self) -> Result<(), ShellError> {
        self.reap_finished();

        let job = FlashJob::new(
            self.image.clone(),
            self.arch.clone(),
            self.dram_config.clone(),
        )?;
        let sink = ConsoleSink {
            printer: self.printer.clone(),
        };
        let handle = self.supervisor.start(job, sink)?;
        println!("Flashing started (job {})", handle.id());
        self.job = Some(handle);
        Ok(())
    }

    fn cancel(&self) {
        let status = self.supervisor.cancel();
        match status {
            CancelStatus::Signalled => println!("{}", status),
            CancelStatus::NothingToCancel => println!("{}", status.to_string().dimmed()),
        }
    }

    /// Collect the worker of a job that has already delivered its outcome
    fn reap_finished(&mut self) {
        if self.job.as_ref().is_some_and(JobHandle::is_finished) {
            if let Some(handle) = self.job.take() {
                if let Err(e) = handle.wait() {
                    log::warn!("Previous flash job ended abnormally: {}", e);
                }
            }
        }
    }

    /// Cancel anything still running and wait for its outcome
    fn shutdown(&mut self) {
        let Some(handle) = self.job.take() else {
            return;
        };
        if !handle.is_finished() && handle.cancel() == CancelStatus::Signalled {
            println!("Waiting for the flashing script to exit...");
        }
        if let Err(e) = handle.wait() {
            log::warn!("Flash job ended abnormally: {}", e);
        }
    }

    fn print_arch(&self) {
        if self.arch.is_known() {
            println!("Architecture: {}", self.arch.to_string().bright_cyan());
        } else {
            println!(
                "Architecture: {} (not passed to the script)",
                self.arch.to_string().dimmed()
            );
        }
    }

    fn print_status(&self) {
        println!("State:        {}", self.supervisor.state());
        match &self.image {
            Some(image) => println!("Image:        {}", image.display()),
            None => println!("Image:        (none)"),
        }
        println!("Architecture: {}", self.arch);
        println!("DRAM config:  {}", self.dram_config);
        println!("Script:       {}", self.supervisor.script().display());
    }
}

fn has_img_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("img"))
}

/// Run the interactive console
pub fn run_shell(config: ShellConfig) -> Result<(), ShellError> {
    let mut rl = Editor::<ShellHelper, FileHistory>::new()?;
    rl.set_helper(Some(ShellHelper::new()));

    // Load history
    let history_path = get_history_path();
    if rl.load_history(&history_path).is_err() {
        // History file doesn't exist yet, that's fine
    }

    let printer = match rl.create_external_printer() {
        Ok(printer) => {
            let printer: Box<dyn ExternalPrinter + Send> = Box::new(printer);
            Some(Arc::new(Mutex::new(printer)))
        }
        Err(e) => {
            log::debug!("No external printer, writing output directly: {}", e);
            None
        }
    };

    let mut session = Session {
        supervisor: Supervisor::new(config.script),
        dram_config: config.dram_config,
        arch: config.arch,
        image: None,
        printer,
        job: None,
    };
    if let Some(image) = config.image {
        if let Err(e) = session.select_image(image) {
            eprintln!("{}: {}", "Error".bright_red().bold(), e);
        }
    }

    // Print banner
    println!("{}", get_banner());
    session.print_arch();
    println!(
        "Type {} for available commands, {} to exit.",
        "help".bright_cyan(),
        "quit".bright_cyan()
    );
    println!();

    let prompt = format!("{} ", "imxflash >".bright_green().bold());

    loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = rl.add_history_entry(line.as_str());
                }

                match parse_command(&line).and_then(|cmd| session.execute(cmd)) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => eprintln!("{}: {}", "Error".bright_red().bold(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                if session.supervisor.is_running() {
                    session.cancel();
                } else {
                    println!("^C");
                }
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("{}: {:?}", "Error".bright_red().bold(), err);
                break;
            }
        }
    }

    session.shutdown();
    println!("Goodbye!");

    // Save history
    if let Err(e) = rl.save_history(&history_path) {
        eprintln!(
            "{}: Failed to save history: {}",
            "Warning".bright_yellow(),
            e
        );
    }

    Ok(())
}

/// Print help message
fn print_help() {
    println!(
        "
    {}   -- select the disk image to flash (tab completes paths)
    {}          -- show the selected image
    {}    -- override the architecture label (armv7, armv8, aarch64, x86, unknown)
    {}           -- show the architecture passed to the script
    {}          -- start flashing
    {}         -- send the running flash a termination signal (also Ctrl-C)
    {}         -- show current state and settings
    {}   -- leave the console, cancelling any running flash
    ",
        "image <path>".bright_cyan(),
        "image".bright_cyan(),
        "arch <label>".bright_cyan(),
        "arch".bright_cyan(),
        "start".bright_cyan(),
        "cancel".bright_cyan(),
        "status".bright_cyan(),
        "quit | exit".bright_cyan(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_img_extension() {
        assert!(has_img_extension(Path::new("/images/balena.img")));
        assert!(has_img_extension(Path::new("BOARD.IMG")));
        assert!(!has_img_extension(Path::new("balena.img.gz")));
        assert!(!has_img_extension(Path::new("balena")));
    }

    #[test]
    fn test_format_outcome_includes_stderr() {
        colored::control::set_override(false);
        let text = format_outcome(&RunOutcome::Failure {
            code: 2,
            stderr: "disk full".into(),
        });
        assert_eq!(text, "✗ Failed to flash the board (exit code 2)\ndisk full");
        assert_eq!(
            format_outcome(&RunOutcome::Success),
            "✓ Board flashed successfully"
        );
    }

    #[test]
    fn test_session_rejects_start_without_image() {
        let mut session = Session {
            supervisor: Supervisor::new("/nonexistent/run_container.sh"),
            dram_config: "d2d4".into(),
            arch: ArchLabel::X86,
            image: None,
            printer: None,
            job: None,
        };
        let err = session.execute(ShellCommand::Start).unwrap_err();
        assert!(matches!(
            err,
            ShellError::Flash(imxflash_core::FlashError::ImageNotSelected)
        ));
        assert!(session.job.is_none());

        assert!(session.execute(ShellCommand::Cancel).unwrap());
        assert!(!session.execute(ShellCommand::Quit).unwrap());
    }
}
