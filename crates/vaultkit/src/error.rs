//! Error types for secrets-store operations.
//!
//! Errors are categorized so callers can tell a missing secret apart from an
//! unauthenticated session: the former is final, the latter warrants one
//! re-authentication and retry.

use thiserror::Error;

/// Categories of secrets-store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Store unreachable, timeout, DNS (transient, retryable)
    Network,
    /// Login rejected or token invalid
    Auth,
    /// Session token lacks permission or has been revoked
    PermissionDenied,
    /// Path or field does not exist
    NotFound,
    /// Dynamic credential could not be issued
    Issue,
    /// Malformed address or response
    Other,
}

impl ErrorCategory {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network)
    }

    /// Whether re-authenticating could make the same call succeed.
    pub fn needs_reauth(&self) -> bool {
        matches!(self, Self::PermissionDenied)
    }

    pub fn advice(&self) -> &'static str {
        match self {
            Self::Network => "Check VAULT_ADDR and that the secrets store is reachable",
            Self::Auth => "Check VAULT_USERNAME/password or export a valid VAULT_TOKEN",
            Self::PermissionDenied => "Your token's policy does not allow this path",
            Self::NotFound => "Store the secret at the configured path and field",
            Self::Issue => "Check the dynamic secrets role name (VAULT_DYNAMIC_ROLE)",
            Self::Other => "Check the error details for more information",
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure talking to the store
    #[error("secrets store unreachable: {message}")]
    Unreachable { message: String },

    /// Login failed or supplied token is not valid
    #[error("authentication failed: {message}")]
    AuthFailed { message: String },

    /// 403 from the store: unauthenticated, expired or insufficient policy
    #[error("permission denied reading {path}")]
    PermissionDenied { path: String },

    /// Session was used after invalidation without re-authenticating
    #[error("session is not authenticated")]
    NotAuthenticated,

    #[error("secret not found: {path}")]
    NotFound { path: String },

    #[error("field '{field}' not present in {path}")]
    FieldMissing { path: String, field: String },

    #[error("could not issue credentials for role '{role}': {message}")]
    Issue { role: String, message: String },

    #[error("unexpected response ({status}) from {path}: {message}")]
    Http {
        status: u16,
        path: String,
        message: String,
    },

    #[error("invalid response from {path}: {message}")]
    InvalidResponse { path: String, message: String },

    #[error("invalid address: {0}")]
    Address(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Unreachable { .. } => ErrorCategory::Network,
            Error::Http { status, .. } if *status >= 500 => ErrorCategory::Network,
            Error::AuthFailed { .. } | Error::NotAuthenticated => ErrorCategory::Auth,
            Error::PermissionDenied { .. } => ErrorCategory::PermissionDenied,
            Error::NotFound { .. } | Error::FieldMissing { .. } => ErrorCategory::NotFound,
            Error::Issue { .. } => ErrorCategory::Issue,
            _ => ErrorCategory::Other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    pub fn needs_reauth(&self) -> bool {
        self.category().needs_reauth()
    }

    /// Absent secret, as opposed to a broken session.
    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        Error::Unreachable {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_and_denied_are_distinct() {
        let missing = Error::NotFound {
            path: "secret/data/netbox".into(),
        };
        let denied = Error::PermissionDenied {
            path: "secret/data/netbox".into(),
        };

        assert!(missing.is_not_found());
        assert!(!missing.needs_reauth());
        assert!(denied.needs_reauth());
        assert!(!denied.is_not_found());
    }

    #[test]
    fn test_server_errors_are_retryable() {
        let sealed = Error::Http {
            status: 503,
            path: "sys/health".into(),
            message: "Vault is sealed".into(),
        };
        assert!(sealed.is_retryable());

        let bad_request = Error::Http {
            status: 400,
            path: "x".into(),
            message: "bad".into(),
        };
        assert!(!bad_request.is_retryable());
    }
}
