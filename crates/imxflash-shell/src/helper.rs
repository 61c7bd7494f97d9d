//! Line editor helper for the console
//!
//! Completes command names and, after `image`, filesystem paths. Known
//! command names are highlighted.

use crate::command::COMMAND_NAMES;
use colored::Colorize;
use rustyline::completion::{Completer, FilenameCompleter, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};
use std::borrow::Cow;

/// Helper struct for rustyline that provides completion and highlighting
#[derive(Helper)]
pub struct ShellHelper {
    filenames: FilenameCompleter,
}

impl ShellHelper {
    /// Create a new helper
    pub fn new() -> Self {
        Self {
            filenames: FilenameCompleter::new(),
        }
    }
}

impl Default for ShellHelper {
    fn default() -> Self {
        Self::new()
    }
}

/// Start of the command word and whether the cursor is still inside it
fn command_word(line: &str, pos: usize) -> (usize, &str, bool) {
    let start = line.len() - line.trim_start().len();
    let end = line[start..]
        .find(char::is_whitespace)
        .map_or(line.len(), |i| start + i);
    (start, &line[start..end], pos <= end)
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Self::Candidate>)> {
        let (start, word, in_word) = command_word(line, pos);

        if in_word {
            let typed = &word[..pos.saturating_sub(start).min(word.len())];
            let completions = COMMAND_NAMES
                .iter()
                .filter(|name| name.starts_with(typed))
                .map(|name| Pair {
                    display: name.to_string(),
                    replacement: format!("{} ", name),
                })
                .collect();
            return Ok((start.min(pos), completions));
        }

        if word.eq_ignore_ascii_case("image") || word.eq_ignore_ascii_case("img") {
            return self.filenames.complete_path(line, pos);
        }

        Ok((pos, Vec::new()))
    }
}

impl Validator for ShellHelper {}

impl Hinter for ShellHelper {
    type Hint = String;

    fn hint(&self, _line: &str, _pos: usize, _context: &Context<'_>) -> Option<String> {
        None
    }
}

impl Highlighter for ShellHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        let (start, word, _) = command_word(line, 0);
        let known = COMMAND_NAMES
            .iter()
            .any(|name| name.eq_ignore_ascii_case(word));
        if word.is_empty() || !known {
            return Cow::Borrowed(line);
        }

        let end = start + word.len();
        Cow::Owned(format!(
            "{}{}{}",
            &line[..start],
            word.bright_cyan(),
            &line[end..]
        ))
    }

    fn highlight_char(&self, line: &str, _pos: usize, _forced: bool) -> bool {
        !line.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_word() {
        assert_eq!(command_word("sta", 3), (0, "sta", true));
        assert_eq!(command_word("  image /tmp", 10), (2, "image", false));
        assert_eq!(command_word("", 0), (0, "", true));
    }
}
