//! Flashing script invocation
//!
//! The script is always started directly with a discrete argument vector.
//! The image path is a single argument no matter what characters it
//! contains, so there is no shell to inject into and no word splitting.
//!
//! ```text
//! run_container.sh -d <dram config> -i <image> [-a <arch>]
//! ```

use crate::job::FlashJob;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Flag carrying the DRAM configuration token
pub const DRAM_CONFIG_FLAG: &str = "-d";
/// Flag carrying the image path
pub const IMAGE_FLAG: &str = "-i";
/// Flag carrying the architecture label
pub const ARCH_FLAG: &str = "-a";

/// A fully resolved script invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashCommand {
    program: PathBuf,
    args: Vec<OsString>,
    working_dir: PathBuf,
}

impl FlashCommand {
    /// Build the invocation of `script` for `job`
    ///
    /// The architecture pair is only added when the label is known.
    pub fn build(job: &FlashJob, script: &Path) -> Self {
        // Resolved before the working directory changes under it
        let program = std::path::absolute(script).unwrap_or_else(|_| script.to_path_buf());
        let working_dir = match program.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut args: Vec<OsString> = vec![
            DRAM_CONFIG_FLAG.into(),
            job.dram_config().into(),
            IMAGE_FLAG.into(),
            job.image().as_os_str().to_owned(),
        ];
        if job.arch().is_known() {
            args.push(ARCH_FLAG.into());
            args.push(job.arch().as_str().into());
        }

        Self {
            program,
            args,
            working_dir,
        }
    }

    /// Script that will be executed
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments following the program
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Program followed by its arguments
    pub fn argv(&self) -> Vec<OsString> {
        std::iter::once(self.program.as_os_str().to_owned())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Directory the script runs in (the one containing it)
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Prepare a process builder for this invocation
    ///
    /// Stdout and stderr are piped, stdin is closed, and the script leads
    /// a new process group so a termination signal reaches everything it
    /// started.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        cmd
    }
}

/// Shell-style rendering for logs and dry runs
impl fmt::Display for FlashCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(self.program.as_os_str()))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

fn quote(arg: &OsStr) -> String {
    let s = arg.to_string_lossy();
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if plain {
        s.into_owned()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
