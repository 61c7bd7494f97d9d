//! Man page generator for imxflash
//!
//! Writes `imxflash.1` plus one `imxflash-<command>.1` page per subcommand.
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]

use clap::{Command, CommandFactory};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[path = "../cli.rs"]
mod cli;

fn render(cmd: Command, title: &str, output_dir: &Path) -> io::Result<PathBuf> {
    let mut buffer = Vec::new();
    clap_mangen::Man::new(cmd)
        .title(title.to_uppercase())
        .section("1")
        .render(&mut buffer)?;

    let path = output_dir.join(format!("{}.1", title));
    fs::write(&path, buffer)?;
    Ok(path)
}

/// Write the top-level page first, then one page per subcommand
fn write_pages(output_dir: &Path) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)?;

    let cmd = cli::Cli::command();
    let mut pages = Vec::new();
    for sub in cmd.get_subcommands() {
        let title = format!("imxflash-{}", sub.get_name());
        let sub = sub.clone().bin_name(format!("imxflash {}", sub.get_name()));
        pages.push(render(sub, &title, output_dir)?);
    }
    pages.insert(0, render(cmd, "imxflash", output_dir)?);
    Ok(pages)
}

fn main() -> io::Result<()> {
    let output_dir = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from("man"), PathBuf::from);

    let pages = write_pages(&output_dir)?;
    for page in &pages {
        println!("Wrote {}", page.display());
    }
    if let Some(main_page) = pages.first() {
        println!("View with: man -l {}", main_page.display());
    }

    Ok(())
}
