//! Phase definitions and per-phase reports

use crate::error::{PhaseError, PhaseResult};
use crate::retry::RetryPolicy;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// The action a phase performs against the shared run context.
pub type PhaseAction<C> = Box<dyn FnMut(&mut C) -> PhaseResult>;

/// One named step of a deployment run.
pub struct Phase<C> {
    name: String,
    action: PhaseAction<C>,
    retry: Option<RetryPolicy>,
    best_effort: bool,
}

impl<C> Phase<C> {
    /// Create a required phase with no retry policy.
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: FnMut(&mut C) -> PhaseResult + 'static,
    {
        Self {
            name: name.into(),
            action: Box::new(action),
            retry: None,
            best_effort: false,
        }
    }

    /// Retry retryable failures according to `policy`.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// A failure of this phase is reported but does not abort the run.
    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn is_best_effort(&self) -> bool {
        self.best_effort
    }

    pub(crate) fn invoke(&mut self, ctx: &mut C) -> PhaseResult {
        (self.action)(ctx)
    }
}

impl<C> fmt::Debug for Phase<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("retry", &self.retry)
            .field("best_effort", &self.best_effort)
            .finish_non_exhaustive()
    }
}

/// Lifecycle state of a phase within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Never started because an earlier phase failed
    Aborted,
}

impl PhaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// What happened to one phase.
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub name: String,
    pub status: PhaseStatus,
    pub attempts: u32,
    pub duration: Duration,
    pub best_effort: bool,
    pub error: Option<PhaseError>,
}

impl PhaseReport {
    pub(crate) fn pending(name: &str, best_effort: bool) -> Self {
        Self {
            name: name.to_string(),
            status: PhaseStatus::Pending,
            attempts: 0,
            duration: Duration::ZERO,
            best_effort,
            error: None,
        }
    }
}
