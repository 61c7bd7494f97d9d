//! Flash job description

use crate::arch::ArchLabel;
use crate::error::{FlashError, Result};
use std::path::{Path, PathBuf};

/// DRAM configuration token understood by the flashing script
pub const DEFAULT_DRAM_CONFIG: &str = "d2d4";

/// File name of the flashing script
pub const SCRIPT_NAME: &str = "run_container.sh";

/// One flash request
///
/// Built when the operator asks for a flash and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashJob {
    image: PathBuf,
    arch: ArchLabel,
    dram_config: String,
}

impl FlashJob {
    /// Create a job for the selected image
    ///
    /// Fails with [`FlashError::ImageNotSelected`] if no image (or an empty
    /// path) was chosen.
    pub fn new(
        image: Option<PathBuf>,
        arch: ArchLabel,
        dram_config: impl Into<String>,
    ) -> Result<Self> {
        let image = image
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(FlashError::ImageNotSelected)?;

        Ok(Self {
            image,
            arch,
            dram_config: dram_config.into(),
        })
    }

    /// Path of the disk image to write
    pub fn image(&self) -> &Path {
        &self.image
    }

    /// Architecture label (may be unknown)
    pub fn arch(&self) -> &ArchLabel {
        &self.arch
    }

    /// DRAM configuration token
    pub fn dram_config(&self) -> &str {
        &self.dram_config
    }
}

/// Location of the flashing script when none is configured
///
/// Prefers the script next to the running executable and falls back to
/// `./run_container.sh` in the working directory.
pub fn default_script_path() -> PathBuf {
    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(SCRIPT_NAME)));

    match beside_exe {
        Some(path) if path.is_file() => path,
        _ => Path::new(".").join(SCRIPT_NAME),
    }
}
