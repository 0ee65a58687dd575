//! Pluggable lookups behind each credential source.
//!
//! The resolver never talks to the process environment, the secrets store or
//! the terminal directly. Callers hand it a [`Sources`] bundle so tests can
//! substitute in-memory implementations.

use secrecy::SecretString;
use std::collections::HashMap;
use std::path::PathBuf;

/// A lookup that failed for a reason other than "no value".
///
/// Failures are recorded and the next source in the chain is tried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct LookupFailure {
    pub message: String,
}

impl LookupFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type Lookup = std::result::Result<Option<SecretString>, LookupFailure>;

/// Reads environment variables.
pub trait EnvLookup {
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvLookup for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Reads a field of a static secret from the secrets store.
pub trait KvLookup {
    /// `Ok(None)` when the path or field does not exist.
    fn read(&mut self, path: &str, field: &str) -> Lookup;
}

/// Asks the operator for a value.
pub trait Prompter {
    /// `secret` suppresses echo. `Ok(None)` when the operator gave nothing.
    fn prompt(&mut self, label: &str, secret: bool) -> Lookup;
}

/// Issues a dynamically leased credential and returns one of its fields.
pub trait DynamicLookup {
    fn issue(&mut self, role: Option<&str>, field: &str) -> Lookup;
}

/// Everything a resolution may consult.
pub struct Sources<'a> {
    pub env: &'a dyn EnvLookup,
    pub kv: Option<&'a mut dyn KvLookup>,
    pub prompter: Option<&'a mut dyn Prompter>,
    pub dynamic: Option<&'a mut dyn DynamicLookup>,
    /// Relative `LocalFile` paths are resolved against this directory
    pub base_dir: PathBuf,
}

impl<'a> Sources<'a> {
    pub fn new(env: &'a dyn EnvLookup, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            env,
            kv: None,
            prompter: None,
            dynamic: None,
            base_dir: base_dir.into(),
        }
    }

    pub fn with_kv(mut self, kv: &'a mut dyn KvLookup) -> Self {
        self.kv = Some(kv);
        self
    }

    pub fn with_prompter(mut self, prompter: &'a mut dyn Prompter) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub fn with_dynamic(mut self, dynamic: &'a mut dyn DynamicLookup) -> Self {
        self.dynamic = Some(dynamic);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_env_lookup() {
        let mut env = HashMap::new();
        env.insert("A".to_string(), "1".to_string());
        assert_eq!(env.var("A").as_deref(), Some("1"));
        assert_eq!(env.var("B"), None);
    }

    #[test]
    fn test_failure_display() {
        assert_eq!(LookupFailure::new("store unreachable").to_string(), "store unreachable");
    }
}
