//! Phase runner - executes phases strictly in order with fail-fast semantics

use crate::error::PhaseError;
use crate::observer::PhaseObserver;
use crate::phase::{Phase, PhaseReport, PhaseStatus};
use crate::preflight::{self, Report};
use crate::retry::{RetryCallback, RetryPolicy, with_retry};
use std::time::{Duration, Instant};

/// Terminal status of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every required phase succeeded
    Succeeded,
    /// A required phase failed, or preflight blocked the run
    Aborted,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Succeeded => "succeeded",
            Self::Aborted => "aborted",
        })
    }
}

/// Summary of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub phases: Vec<PhaseReport>,
    /// Error that blocked the run before the first phase
    pub blocked_by: Option<PhaseError>,
    pub duration: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// The required phase whose failure aborted the run.
    pub fn failed_phase(&self) -> Option<&PhaseReport> {
        self.phases
            .iter()
            .find(|p| p.status == PhaseStatus::Failed && !p.best_effort)
    }

    /// The error that ended the run, if any.
    pub fn error(&self) -> Option<&PhaseError> {
        self.blocked_by
            .as_ref()
            .or_else(|| self.failed_phase().and_then(|p| p.error.as_ref()))
    }

    /// Process exit code: 0 on success, else the failing collaborator's
    /// code when known, else 1.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            return 0;
        }
        self.error()
            .and_then(|e| e.exit_code)
            .filter(|code| *code != 0)
            .unwrap_or(1)
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.name == name)
    }
}

/// Ordered list of phases executed against a shared context.
pub struct PhaseRunner<C> {
    phases: Vec<Phase<C>>,
}

impl<C> Default for PhaseRunner<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> PhaseRunner<C> {
    pub fn new() -> Self {
        Self { phases: Vec::new() }
    }

    /// Append a phase (builder style).
    pub fn phase(mut self, phase: Phase<C>) -> Self {
        self.phases.push(phase);
        self
    }

    pub fn push(&mut self, phase: Phase<C>) {
        self.phases.push(phase);
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.phases.iter().map(Phase::name).collect()
    }

    /// Run every phase after the preflight reports pass.
    ///
    /// Any failing report blocks the run: no phase is invoked and every
    /// phase is reported as `Aborted`.
    pub fn run_checked(
        &mut self,
        preflight: &[Report],
        ctx: &mut C,
        observer: &mut dyn PhaseObserver,
    ) -> RunReport {
        match preflight::gate(preflight) {
            Ok(()) => self.run(ctx, observer),
            Err(err) => {
                log::error!("preflight failed: {err}");
                let report = RunReport {
                    status: RunStatus::Aborted,
                    phases: self
                        .phases
                        .iter()
                        .map(|p| {
                            let mut r = PhaseReport::pending(p.name(), p.is_best_effort());
                            r.status = PhaseStatus::Aborted;
                            r
                        })
                        .collect(),
                    blocked_by: Some(err),
                    duration: Duration::ZERO,
                };
                observer.on_run_finish(&report);
                report
            }
        }
    }

    /// Run every phase in declared order.
    pub fn run(&mut self, ctx: &mut C, observer: &mut dyn PhaseObserver) -> RunReport {
        let started = Instant::now();
        let total = self.phases.len();
        let mut reports: Vec<PhaseReport> = self
            .phases
            .iter()
            .map(|p| PhaseReport::pending(p.name(), p.is_best_effort()))
            .collect();
        let mut aborted = false;

        observer.on_run_start(total);

        for (index, phase) in self.phases.iter_mut().enumerate() {
            let report = &mut reports[index];

            if aborted {
                report.status = PhaseStatus::Aborted;
                continue;
            }

            report.status = PhaseStatus::Running;
            observer.on_phase_start(index, total, phase.name());
            log::info!("phase '{}' started", phase.name());

            let policy = phase.retry_policy().copied().unwrap_or_else(RetryPolicy::once);
            let name = phase.name().to_string();
            let phase_started = Instant::now();

            let attempted = {
                let mut bridge = RetryBridge {
                    name: &name,
                    observer: &mut *observer,
                };
                with_retry(&policy, &mut bridge, || phase.invoke(ctx))
            };

            report.attempts = attempted.attempts;
            report.duration = phase_started.elapsed();

            match attempted.result {
                Ok(()) => {
                    report.status = PhaseStatus::Succeeded;
                    log::info!(
                        "phase '{}' succeeded in {:.1?} ({} attempt(s))",
                        name,
                        report.duration,
                        report.attempts
                    );
                }
                Err(err) => {
                    report.status = PhaseStatus::Failed;
                    if phase.is_best_effort() {
                        log::warn!("best-effort phase '{name}' failed: {err}");
                    } else {
                        log::error!(
                            "phase '{}' failed after {} attempt(s) in {:.1?}: {}",
                            name,
                            report.attempts,
                            report.duration,
                            err
                        );
                        aborted = true;
                    }
                    report.error = Some(err);
                }
            }

            observer.on_phase_finish(report);
        }

        let report = RunReport {
            status: if aborted {
                RunStatus::Aborted
            } else {
                RunStatus::Succeeded
            },
            phases: reports,
            blocked_by: None,
            duration: started.elapsed(),
        };
        observer.on_run_finish(&report);
        report
    }
}

/// Adapts phase observers to the retry callback interface.
struct RetryBridge<'a> {
    name: &'a str,
    observer: &'a mut dyn PhaseObserver,
}

impl RetryCallback for RetryBridge<'_> {
    fn on_retry(&mut self, attempt: u32, max_attempts: u32, error: &PhaseError, delay: Duration) {
        self.observer
            .on_retry(self.name, attempt, max_attempts, error, delay);
    }
}
