//! Command implementations
//!
//! Every command that changes infrastructure goes through [`execute`]: open
//! the project, start the run log, gate on preflight, run the phases and
//! report. Failures surface as [`RunFailed`] carrying the exit code.

pub mod check;
pub mod destroy;
pub mod menu;
pub mod status;
pub mod validate;

use anyhow::Result;
use chrono::Local;
use colored::Colorize;
use pipeline::{PhaseStatus, Report, RunReport, Tee};
use std::path::PathBuf;
use thiserror::Error;

use crate::Context;
use crate::config::Project;
use crate::context::DeployContext;
use crate::logfile::RunLog;
use crate::paths;
use crate::phases::{self, RunKind};
use crate::progress::ConsoleObserver;
use crate::ui;

/// A run that failed after its diagnostic was printed
#[derive(Debug, Error)]
#[error("{command} failed (exit code {code})")]
pub struct RunFailed {
    pub command: &'static str,
    pub code: i32,
}

pub fn deploy(ctx: &Context) -> Result<()> {
    execute(ctx, RunKind::Deploy)
}

pub fn plan(ctx: &Context) -> Result<()> {
    execute(ctx, RunKind::Plan)
}

pub fn configure(ctx: &Context) -> Result<()> {
    let project = ctx.open_project()?;
    if project.config.configure.is_none() {
        anyhow::bail!("{} has no [configure] section", project.path.display());
    }
    execute_project(ctx, project, RunKind::Configure)
}

/// Run the phases of `kind` for the selected project
pub fn execute(ctx: &Context, kind: RunKind) -> Result<()> {
    let project = ctx.open_project()?;
    execute_project(ctx, project, kind)
}

fn execute_project(ctx: &Context, project: Project, kind: RunKind) -> Result<()> {
    if !ctx.quiet {
        ui::header(&format!("{} {}", kind.label(), project.name()));
    }

    let log = open_run_log(project.name(), kind.label());
    log.event(&format!(
        "proxdeploy {} {} {} ({})",
        env!("CARGO_PKG_VERSION"),
        kind.label(),
        project.name(),
        project.path.display()
    ));

    let reports = phases::preflight(kind, &project);
    if !ctx.quiet {
        print_reports(&reports, false);
    }

    let mut runner = phases::build(kind, &project.config);
    let mut run = DeployContext::new(project, log.clone(), ctx.quiet, ctx.interactive);

    let mut console = ConsoleObserver::new(ctx.quiet);
    let mut file = log.clone();
    let report = {
        let mut observer = Tee::new(&mut console, &mut file);
        runner.run_checked(&reports, &mut run, &mut observer)
    };

    if matches!(kind, RunKind::Plan | RunKind::Destroy) {
        run.release();
    }

    finish(ctx, kind, &report, log.path())
}

fn open_run_log(project: &str, command: &str) -> RunLog {
    let name = paths::run_log_name(project, command, Local::now());
    match paths::log_dir().and_then(|dir| RunLog::create(&dir, &name)) {
        Ok(log) => log,
        Err(e) => {
            ui::warn(&format!("Run log disabled: {e:#}"));
            RunLog::disabled()
        }
    }
}

fn finish(ctx: &Context, kind: RunKind, report: &RunReport, log_path: Option<PathBuf>) -> Result<()> {
    println!();
    if report.is_success() {
        if !ctx.quiet {
            let warned = report
                .phases
                .iter()
                .filter(|p| p.status == PhaseStatus::Failed)
                .count();
            let suffix = if warned > 0 {
                format!(", {warned} best-effort phase(s) failed")
            } else {
                String::new()
            };
            ui::success(&format!(
                "{} finished in {}{suffix}",
                kind.label(),
                ui::format_duration(report.duration)
            ));
            if let Some(path) = &log_path {
                ui::dim(&format!("Log: {}", path.display()));
            }
        }
        return Ok(());
    }

    print_failure(report, log_path.as_deref());
    Err(RunFailed {
        command: kind.label(),
        code: report.exit_code(),
    }
    .into())
}

/// Coloured diagnostic for an aborted run
fn print_failure(report: &RunReport, log_path: Option<&std::path::Path>) {
    let phase = report
        .failed_phase()
        .map_or("preflight", |p| p.name.as_str());
    if let Some(err) = report.error() {
        eprintln!(
            "{} {} {}",
            "✗".red(),
            format!("[{phase}]").red().bold(),
            err.message
        );
        eprintln!("  {} {}", "kind:".dimmed(), err.kind);
        if let Some(code) = err.exit_code {
            eprintln!("  {} {code}", "exit code:".dimmed());
        }
        ui::hint(err.remediation());
    }
    if let Some(path) = log_path {
        eprintln!("  {} {}", "Log:".dimmed(), path.display());
    }
}

/// Print preflight reports; passing items only when `verbose`
pub fn print_reports(reports: &[Report], verbose: bool) {
    for report in reports {
        let failed = report.failures().count();
        if failed == 0 && !verbose {
            continue;
        }
        ui::section(&report.title);
        for item in &report.items {
            if item.passed {
                let detail = item.detail.as_deref().unwrap_or_default();
                println!("  {} {} {}", "✓".green(), item.name, detail.dimmed());
            } else {
                println!("  {} {}", "✗".red(), item.name.bold());
                if let Some(fix) = &item.remediation {
                    println!("      {} {}", "Fix:".cyan(), fix);
                }
            }
        }
    }
}
