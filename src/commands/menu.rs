use anyhow::{Context as _, Result};
use dialoguer::Select;

use crate::Context;
use crate::cli::Command;
use crate::ui;

const ENTRIES: [(&str, Option<Command>); 8] = [
    ("Deploy (full run)", Some(Command::Deploy)),
    ("Plan (preview changes)", Some(Command::Plan)),
    ("Configure only (ansible-only)", Some(Command::Configure)),
    ("Status", Some(Command::Status)),
    ("Preflight check", Some(Command::Check)),
    ("Validate project file", Some(Command::Validate)),
    ("Destroy", Some(Command::Destroy)),
    ("Quit", None),
];

/// Interactive menu shown when no subcommand is given
pub fn run(ctx: &Context) -> Result<()> {
    ui::banner();
    let project = ctx.open_project()?;
    ui::kv("Project", &format!("{} ({})", project.name(), project.path.display()));
    println!();

    let labels: Vec<&str> = ENTRIES.iter().map(|(label, _)| *label).collect();
    let choice = Select::new()
        .with_prompt("What do you want to do?")
        .items(&labels)
        .default(0)
        .interact()
        .context("Failed to read menu selection")?;

    match ENTRIES[choice].1 {
        Some(command) => crate::dispatch(ctx, command),
        None => Ok(()),
    }
}
