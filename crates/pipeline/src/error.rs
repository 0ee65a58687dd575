//! Error taxonomy for deployment phases.
//!
//! Errors are categorized so the runner can decide between retrying and
//! aborting. Only connectivity failures are ever retried; everything else
//! surfaces immediately with the phase name and a remediation hint.

use thiserror::Error;

/// Categories of phase failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No configured source produced a value for a credential
    CredentialUnavailable,
    /// Secrets store or provider authentication failed
    AuthenticationFailed,
    /// A required binary or file is missing
    PreflightFailed,
    /// Network or reachability failure (transient, retryable)
    Connectivity,
    /// The provisioning engine reported a failure
    ProvisioningEngine,
    /// The configuration engine reported a failure
    ConfigurationEngine,
    /// Data volume ownership could not be fixed
    PermissionRepair,
    /// Invalid input or project configuration
    Validation,
    /// Local IO failure
    Io,
}

impl ErrorKind {
    /// Whether failures of this kind are transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity)
    }

    /// Short label used in diagnostics and the run log.
    pub fn label(&self) -> &'static str {
        match self {
            Self::CredentialUnavailable => "credential unavailable",
            Self::AuthenticationFailed => "authentication failed",
            Self::PreflightFailed => "preflight failed",
            Self::Connectivity => "connectivity failure",
            Self::ProvisioningEngine => "provisioning engine error",
            Self::ConfigurationEngine => "configuration engine error",
            Self::PermissionRepair => "permission repair error",
            Self::Validation => "validation error",
            Self::Io => "io error",
        }
    }

    /// Default advice when the failing action did not supply its own hint.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::CredentialUnavailable => {
                "Export the variable, store it in the secrets store, or run interactively"
            }
            Self::AuthenticationFailed => "Check the secrets store address and your login",
            Self::PreflightFailed => "Install the missing tools or create the missing files",
            Self::Connectivity => "Check that the host is up and the network path is open",
            Self::ProvisioningEngine => "Inspect the provisioning output in the run log",
            Self::ConfigurationEngine => "Inspect the playbook output in the run log",
            Self::PermissionRepair => "Fix ownership of the data directory on the host",
            Self::Validation => "Fix the project file and re-run",
            Self::Io => "Check file permissions and free disk space",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A failure raised by a phase action.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct PhaseError {
    /// Failure category
    pub kind: ErrorKind,
    /// What went wrong
    pub message: String,
    /// Remediation hint shown to the operator
    pub hint: Option<String>,
    /// Exit code of the failing collaborator, when one was involved
    pub exit_code: Option<i32>,
}

impl PhaseError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            hint: None,
            exit_code: None,
        }
    }

    pub fn credential_unavailable(key: &str) -> Self {
        Self::new(
            ErrorKind::CredentialUnavailable,
            format!("no source produced a value for '{key}'"),
        )
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connectivity, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach the exit code of a failed external process.
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// The hint to show: the explicit one, or the category advice.
    pub fn remediation(&self) -> &str {
        self.hint.as_deref().unwrap_or_else(|| self.kind.advice())
    }
}

impl From<std::io::Error> for PhaseError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, err.to_string())
    }
}

/// Result type for phase actions.
pub type PhaseResult<T = ()> = std::result::Result<T, PhaseError>;
