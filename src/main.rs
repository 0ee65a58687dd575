mod cli;
mod commands;
mod config;
mod context;
mod engine;
mod logfile;
mod paths;
mod permissions;
mod phases;
mod progress;
mod runner;
mod schema;
mod secrets;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::Project;
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Explicit project file or directory from `--project`
    pub project: Option<PathBuf>,
    /// Prompts allowed; false under `--non-interactive` or without a terminal
    pub interactive: bool,
    pub yes: bool,
}

impl Context {
    pub fn open_project(&self) -> Result<Project> {
        Project::open(self.project.as_deref())
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        project: cli.project,
        interactive: !cli.non_interactive && console::user_attended(),
        yes: cli.yes,
    };

    let result = match cli.command {
        Some(command) => dispatch(&ctx, command),
        None if ctx.interactive => commands::menu::run(&ctx),
        None => Cli::command().print_help().map_err(Into::into),
    };

    if let Err(e) = result {
        if let Some(failed) = e.downcast_ref::<commands::RunFailed>() {
            log::debug!("{failed}");
            std::process::exit(failed.code);
        }
        ui::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

pub fn dispatch(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Deploy => commands::deploy(ctx),
        Command::Plan => commands::plan(ctx),
        Command::Destroy => commands::destroy::run(ctx),
        Command::Status => commands::status::run(ctx),
        Command::Configure => commands::configure(ctx),
        Command::Check => commands::check::run(ctx),
        Command::Validate => commands::validate::run(ctx),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "proxdeploy", &mut io::stdout());
            Ok(())
        }
    }
}
