//! Core types: credential sources, resolved credentials and secret specs.

use crate::error::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Where a credential value can come from.
///
/// The declaration order is the priority order: a value found in the
/// environment always beats one in the secrets store, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    Environment,
    SecretsStoreKv,
    LocalFile,
    InteractivePrompt,
    DynamicLease,
}

impl CredentialSource {
    pub const ALL: [CredentialSource; 5] = [
        CredentialSource::Environment,
        CredentialSource::SecretsStoreKv,
        CredentialSource::LocalFile,
        CredentialSource::InteractivePrompt,
        CredentialSource::DynamicLease,
    ];
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Environment => "environment",
            Self::SecretsStoreKv => "secrets store",
            Self::LocalFile => "local file",
            Self::InteractivePrompt => "prompt",
            Self::DynamicLease => "dynamic lease",
        };
        f.write_str(s)
    }
}

/// A resolved credential. The value is zeroized on drop and never printed.
pub struct Credential {
    key: String,
    value: SecretString,
    source: CredentialSource,
    persisted: bool,
}

impl Credential {
    pub fn new(key: impl Into<String>, value: SecretString, source: CredentialSource, persisted: bool) -> Self {
        Self {
            key: key.into(),
            value,
            source,
            persisted,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &SecretString {
        &self.value
    }

    /// Borrow the plaintext. Keep the borrow as short as possible.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    /// Whether the value may be written to durable state.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn is_ephemeral(&self) -> bool {
        !self.persisted
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("key", &self.key)
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("persisted", &self.persisted)
            .finish()
    }
}

/// A field inside a secrets-store KV entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvRef {
    pub path: String,
    pub field: String,
}

/// A field inside a local file (`.json`, `.toml`, or `key = value` lines).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub path: PathBuf,
    pub field: String,
}

/// A field of a dynamically issued credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicRef {
    /// Role to request; falls back to the run's default role when absent
    #[serde(default)]
    pub role: Option<String>,
    pub field: String,
}

fn default_secret() -> bool {
    true
}

/// Declared description of one credential: its key, where to look, and
/// in which order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSpec {
    pub key: String,

    /// Source chain; priority always follows [`CredentialSource`] order
    pub sources: Vec<CredentialSource>,

    /// Environment variables to read, first non-empty wins.
    /// Defaults to the upper-cased key.
    #[serde(default)]
    pub env: Vec<String>,

    #[serde(default)]
    pub kv: Option<KvRef>,

    #[serde(default)]
    pub file: Option<FileRef>,

    /// Prompt label; defaults to the key
    #[serde(default)]
    pub prompt: Option<String>,

    #[serde(default)]
    pub dynamic: Option<DynamicRef>,

    /// Suppress echo when prompting
    #[serde(default = "default_secret")]
    pub secret: bool,

    /// May be written to durable state (plain identifiers like usernames)
    #[serde(default)]
    pub persisted: bool,
}

impl SecretSpec {
    pub fn new(key: impl Into<String>, sources: &[CredentialSource]) -> Self {
        Self {
            key: key.into(),
            sources: sources.to_vec(),
            env: Vec::new(),
            kv: None,
            file: None,
            prompt: None,
            dynamic: None,
            secret: true,
            persisted: false,
        }
    }

    pub fn with_env(mut self, name: impl Into<String>) -> Self {
        self.env.push(name.into());
        self
    }

    pub fn with_kv(mut self, path: impl Into<String>, field: impl Into<String>) -> Self {
        self.kv = Some(KvRef {
            path: path.into(),
            field: field.into(),
        });
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, field: impl Into<String>) -> Self {
        self.file = Some(FileRef {
            path: path.into(),
            field: field.into(),
        });
        self
    }

    pub fn with_dynamic(mut self, role: Option<&str>, field: impl Into<String>) -> Self {
        self.dynamic = Some(DynamicRef {
            role: role.map(str::to_string),
            field: field.into(),
        });
        self
    }

    pub fn with_prompt(mut self, label: impl Into<String>) -> Self {
        self.prompt = Some(label.into());
        self
    }

    pub fn not_secret(mut self) -> Self {
        self.secret = false;
        self
    }

    pub fn persisted(mut self) -> Self {
        self.persisted = true;
        self
    }

    /// Sources in priority order, deduplicated.
    pub fn ordered_sources(&self) -> Vec<CredentialSource> {
        let mut sources = self.sources.clone();
        sources.sort();
        sources.dedup();
        sources
    }

    /// Environment variable names to consult.
    pub fn env_names(&self) -> Vec<String> {
        if self.env.is_empty() {
            vec![self.key.to_uppercase()]
        } else {
            self.env.clone()
        }
    }

    pub fn prompt_label(&self) -> &str {
        self.prompt.as_deref().unwrap_or(&self.key)
    }

    /// Check every listed source has what it needs.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Error::InvalidSpec {
            key: self.key.clone(),
            message: message.to_string(),
        };

        if self.key.trim().is_empty() {
            return Err(invalid("key must not be empty"));
        }
        if self.sources.is_empty() {
            return Err(invalid("at least one source is required"));
        }
        for source in &self.sources {
            match source {
                CredentialSource::SecretsStoreKv if self.kv.is_none() => {
                    return Err(invalid("secrets_store_kv source needs a `kv` entry"));
                }
                CredentialSource::LocalFile if self.file.is_none() => {
                    return Err(invalid("local_file source needs a `file` entry"));
                }
                CredentialSource::DynamicLease if self.dynamic.is_none() => {
                    return Err(invalid("dynamic_lease source needs a `dynamic` entry"));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn uses(&self, source: CredentialSource) -> bool {
        self.sources.contains(&source)
    }
}
