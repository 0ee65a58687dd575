//! Observer trait for phase transitions
//!
//! Lets the runner report progress without depending on a particular
//! terminal UI or log sink.

use crate::error::PhaseError;
use crate::phase::PhaseReport;
use crate::runner::RunReport;
use std::time::Duration;

/// Receives phase lifecycle events from the runner.
pub trait PhaseObserver {
    /// Called once before the first phase starts
    fn on_run_start(&mut self, _total: usize) {}

    /// Called when a phase enters `Running`
    fn on_phase_start(&mut self, index: usize, total: usize, name: &str);

    /// Called after a retryable failure, before the runner sleeps
    fn on_retry(&mut self, _name: &str, _attempt: u32, _max: u32, _error: &PhaseError, _delay: Duration) {
    }

    /// Called when a phase reaches a terminal state
    fn on_phase_finish(&mut self, report: &PhaseReport);

    /// Called once with the final report
    fn on_run_finish(&mut self, _report: &RunReport) {}
}

/// No-op observer
pub struct NoObserver;

impl PhaseObserver for NoObserver {
    fn on_phase_start(&mut self, _index: usize, _total: usize, _name: &str) {}
    fn on_phase_finish(&mut self, _report: &PhaseReport) {}
}

/// Forwards every event to two observers, in order.
pub struct Tee<'a> {
    first: &'a mut dyn PhaseObserver,
    second: &'a mut dyn PhaseObserver,
}

impl<'a> Tee<'a> {
    pub fn new(first: &'a mut dyn PhaseObserver, second: &'a mut dyn PhaseObserver) -> Self {
        Self { first, second }
    }
}

impl PhaseObserver for Tee<'_> {
    fn on_run_start(&mut self, total: usize) {
        self.first.on_run_start(total);
        self.second.on_run_start(total);
    }

    fn on_phase_start(&mut self, index: usize, total: usize, name: &str) {
        self.first.on_phase_start(index, total, name);
        self.second.on_phase_start(index, total, name);
    }

    fn on_retry(&mut self, name: &str, attempt: u32, max: u32, error: &PhaseError, delay: Duration) {
        self.first.on_retry(name, attempt, max, error, delay);
        self.second.on_retry(name, attempt, max, error, delay);
    }

    fn on_phase_finish(&mut self, report: &PhaseReport) {
        self.first.on_phase_finish(report);
        self.second.on_phase_finish(report);
    }

    fn on_run_finish(&mut self, report: &RunReport) {
        self.first.on_run_finish(report);
        self.second.on_run_finish(report);
    }
}
