use anyhow::{Context as _, Result};
use colored::Colorize;
use dialoguer::Confirm;

use crate::Context;
use crate::phases::RunKind;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let project = ctx.open_project()?;

    if !ctx.yes {
        if !ctx.interactive {
            anyhow::bail!("Refusing to destroy {} without --yes in non-interactive mode", project.name());
        }
        println!();
        println!(
            "  {} This removes every resource managed in {}",
            "WARNING:".red().bold(),
            project.provision_dir().display()
        );
        println!();

        if !Confirm::new()
            .with_prompt(format!("Destroy {}?", project.name()))
            .default(false)
            .interact()
            .context("Failed to read user input")?
        {
            ui::info("Aborted. No changes made.");
            return Ok(());
        }
    }

    super::execute(ctx, RunKind::Destroy)
}
