//! Error types for credential resolution.

use crate::types::CredentialSource;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No source in the chain produced a non-empty value
    #[error("credential unavailable: {key} (tried {})", display_sources(.tried))]
    Unavailable {
        key: String,
        tried: Vec<CredentialSource>,
        /// Non-fatal lookup failures encountered on the way
        notes: Vec<String>,
    },

    /// A source was listed without the declaration it needs
    #[error("invalid secret spec '{key}': {message}")]
    InvalidSpec { key: String, message: String },

    #[error("could not read {}: {message}", path.display())]
    File { path: PathBuf, message: String },
}

impl Error {
    pub fn key(&self) -> Option<&str> {
        match self {
            Error::Unavailable { key, .. } | Error::InvalidSpec { key, .. } => Some(key),
            Error::File { .. } => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Unavailable { .. })
    }
}

fn display_sources(sources: &[CredentialSource]) -> String {
    if sources.is_empty() {
        return "no sources".to_string();
    }
    sources
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, Error>;
