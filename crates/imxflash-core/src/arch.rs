//! Host architecture detection
//!
//! The flashing script picks a matching binary payload from an architecture
//! label. The label is derived from the kernel's machine type (`uname -m`).
//!
//! Mapping, first match wins:
//!
//! | machine type                              | label    |
//! |-------------------------------------------|----------|
//! | contains `armv7`, or `arm*` containing `v7` | `armv7`  |
//! | any other `arm*`, `aarch64*`              | `armv8`  |
//! | `x86*`                                    | `x86`    |
//! | anything else                             | unknown  |
//!
//! `aarch64` is folded into `armv8`. The [`ArchLabel::Aarch64`] label can
//! only be chosen explicitly by the operator.

use crate::error::DetectError;
use std::fmt;
use std::process::Command;
use std::str::FromStr;

/// Architecture label passed to the flashing script
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArchLabel {
    /// 32-bit ARMv7
    Armv7,
    /// 64-bit ARM (and any ARM that is not v7)
    Armv8,
    /// Explicit aarch64 payload, only selectable by override
    Aarch64,
    /// x86 family
    X86,
    /// Unrecognised machine type, carrying the raw identifier
    Unknown(String),
}

impl ArchLabel {
    /// Whether the label is passed on to the flashing script
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    /// Label as given to the script's `-a` flag
    pub fn as_str(&self) -> &str {
        match self {
            Self::Armv7 => "armv7",
            Self::Armv8 => "armv8",
            Self::Aarch64 => "aarch64",
            Self::X86 => "x86",
            Self::Unknown(raw) if raw.is_empty() => "unknown",
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for ArchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "armv7" => Ok(Self::Armv7),
            "armv8" => Ok(Self::Armv8),
            "aarch64" => Ok(Self::Aarch64),
            "x86" => Ok(Self::X86),
            "unknown" => Ok(Self::Unknown(String::new())),
            other => Err(format!(
                "Unknown architecture '{}' (expected armv7, armv8, aarch64, x86 or unknown)",
                other
            )),
        }
    }
}

/// Map a raw machine type to a label
pub fn classify(machine: &str) -> ArchLabel {
    let machine = machine.trim();

    if machine.contains("armv7") || (machine.starts_with("arm") && machine.contains("v7")) {
        ArchLabel::Armv7
    } else if machine.starts_with("arm") || machine.starts_with("aarch64") {
        ArchLabel::Armv8
    } else if machine.starts_with("x86") {
        ArchLabel::X86
    } else {
        ArchLabel::Unknown(machine.to_string())
    }
}

/// Ask the operating system for its machine type
pub fn query_machine() -> Result<String, DetectError> {
    let output = Command::new("uname").arg("-m").output()?;
    if !output.status.success() {
        return Err(DetectError::Status(output.status));
    }

    let machine = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if machine.is_empty() {
        return Err(DetectError::Empty);
    }
    Ok(machine)
}

/// Detect the host architecture
///
/// Never fails; see [`detect_with`].
pub fn detect() -> ArchLabel {
    detect_with(query_machine)
}

/// Detect the architecture using the given machine type query
///
/// A failing query is logged and reported as an unknown architecture so
/// that startup is never blocked by detection.
pub fn detect_with<F>(query: F) -> ArchLabel
where
    F: FnOnce() -> Result<String, DetectError>,
{
    match query() {
        Ok(machine) => {
            let label = classify(&machine);
            log::debug!("Machine type '{}' detected as {}", machine, label);
            label
        }
        Err(e) => {
            log::warn!("Could not determine architecture: {}", e);
            ArchLabel::Unknown(String::new())
        }
    }
}
