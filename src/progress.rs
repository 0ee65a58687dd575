//! Spinners and console reporting of phase transitions

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use pipeline::{PhaseError, PhaseObserver, PhaseReport, PhaseStatus, RunReport};
use std::time::Duration;

use crate::ui;

/// Spinner for a blocking wait; hidden when quiet or not attached to a terminal
pub fn spinner(msg: &str, quiet: bool) -> ProgressBar {
    if quiet || !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("  {spinner:.cyan} {msg} {elapsed:.dim}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn finish_clear(pb: &ProgressBar) {
    pb.finish_and_clear();
}

/// Terminal UI for a run
pub struct ConsoleObserver {
    quiet: bool,
}

impl ConsoleObserver {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl PhaseObserver for ConsoleObserver {
    fn on_phase_start(&mut self, index: usize, total: usize, name: &str) {
        if !self.quiet {
            ui::step(index + 1, total, name);
        }
    }

    fn on_retry(&mut self, name: &str, attempt: u32, max: u32, error: &PhaseError, delay: Duration) {
        ui::warn(&format!(
            "{name}: attempt {attempt}/{max} failed ({}), retrying in {}",
            error.message,
            ui::format_duration(delay)
        ));
    }

    fn on_phase_finish(&mut self, report: &PhaseReport) {
        let elapsed = ui::format_duration(report.duration);
        match (report.status, &report.error) {
            (PhaseStatus::Succeeded, _) => {
                if !self.quiet {
                    ui::success(&format!("{} ({elapsed})", report.name));
                }
            }
            (PhaseStatus::Failed, Some(err)) if report.best_effort => {
                ui::warn(&format!("{} failed, continuing: {}", report.name, err.message));
            }
            (PhaseStatus::Failed, Some(err)) => {
                ui::error(&format!("{} failed after {elapsed}: {err}", report.name));
            }
            _ => {}
        }
    }

    fn on_run_finish(&mut self, report: &RunReport) {
        if self.quiet {
            return;
        }
        let skipped: Vec<&str> = report
            .phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Aborted)
            .map(|p| p.name.as_str())
            .collect();
        if !skipped.is_empty() {
            println!("  {} {}", "not run:".dimmed(), skipped.join(", ").dimmed());
        }
    }
}
