//! Console command parsing

use crate::error::ShellError;
use imxflash_core::ArchLabel;
use std::path::PathBuf;

/// Names accepted as the first word of a console line
pub const COMMAND_NAMES: &[&str] = &[
    "image", "arch", "start", "cancel", "status", "help", "quit", "exit",
];

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// Show (`None`) or select the image to flash
    Image(Option<PathBuf>),
    /// Show (`None`) or override the architecture label
    Arch(Option<ArchLabel>),
    /// Start flashing the selected image
    Start,
    /// Cancel the running flash
    Cancel,
    /// Show supervisor state and current selections
    Status,
    /// Show the command list
    Help,
    /// Leave the console
    Quit,
    /// Blank line
    Empty,
}

/// Parse one console line
///
/// The image path is everything after `image`, so paths with spaces need
/// no quoting; a single pair of surrounding quotes is removed.
pub fn parse_command(line: &str) -> Result<ShellCommand, ShellError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ShellCommand::Empty);
    }

    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };

    let no_args = |cmd: ShellCommand| {
        if rest.is_empty() {
            Ok(cmd)
        } else {
            Err(ShellError::InvalidArgument(format!(
                "'{}' takes no arguments",
                name
            )))
        }
    };

    match name.to_ascii_lowercase().as_str() {
        "image" | "img" => {
            let path = unquote(rest);
            Ok(ShellCommand::Image(
                (!path.is_empty()).then(|| PathBuf::from(path)),
            ))
        }
        "arch" => {
            if rest.is_empty() {
                Ok(ShellCommand::Arch(None))
            } else {
                rest.parse()
                    .map(|label| ShellCommand::Arch(Some(label)))
                    .map_err(ShellError::InvalidArgument)
            }
        }
        "start" | "flash" => no_args(ShellCommand::Start),
        "cancel" | "stop" => no_args(ShellCommand::Cancel),
        "status" => no_args(ShellCommand::Status),
        "help" | ":?" | ":help" => Ok(ShellCommand::Help),
        "quit" | "exit" | ":q" | ":quit" => no_args(ShellCommand::Quit),
        other => Err(ShellError::UnknownCommand(other.to_string())),
    }
}

fn unquote(s: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = s
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image() {
        assert_eq!(parse_command("image").unwrap(), ShellCommand::Image(None));
        assert_eq!(
            parse_command("image /tmp/My Images/balena.img").unwrap(),
            ShellCommand::Image(Some(PathBuf::from("/tmp/My Images/balena.img")))
        );
        assert_eq!(
            parse_command("  image   \"/tmp/a b.img\"  ").unwrap(),
            ShellCommand::Image(Some(PathBuf::from("/tmp/a b.img")))
        );
    }

    #[test]
    fn test_parse_arch() {
        assert_eq!(parse_command("arch").unwrap(), ShellCommand::Arch(None));
        assert_eq!(
            parse_command("arch armv7").unwrap(),
            ShellCommand::Arch(Some(ArchLabel::Armv7))
        );
        assert!(matches!(
            parse_command("arch sparc"),
            Err(ShellError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_command("").unwrap(), ShellCommand::Empty);
        assert_eq!(parse_command("start").unwrap(), ShellCommand::Start);
        assert_eq!(parse_command("CANCEL").unwrap(), ShellCommand::Cancel);
        assert_eq!(parse_command("status").unwrap(), ShellCommand::Status);
        assert_eq!(parse_command(":?").unwrap(), ShellCommand::Help);
        assert_eq!(parse_command("exit").unwrap(), ShellCommand::Quit);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_command("start now"),
            Err(ShellError::InvalidArgument(_))
        ));
        assert!(matches!(
            parse_command("erase"),
            Err(ShellError::UnknownCommand(name)) if name == "erase"
        ));
    }
}
