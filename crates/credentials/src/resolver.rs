//! Ordered, cached credential resolution.

use crate::error::{Error, Result};
use crate::file;
use crate::lookup::{Lookup, Sources};
use crate::types::{Credential, CredentialSource, SecretSpec};
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;

/// Resolves credentials once per run and caches the result.
///
/// For each key the spec's sources are tried in [`CredentialSource`] order.
/// The first non-empty value wins and lower-priority sources are never
/// consulted. An empty string counts as unset.
#[derive(Debug)]
pub struct Resolver {
    cache: BTreeMap<String, Credential>,
    allow_prompt: bool,
}

impl Resolver {
    pub fn new(allow_prompt: bool) -> Self {
        Self {
            cache: BTreeMap::new(),
            allow_prompt,
        }
    }

    pub fn allows_prompt(&self) -> bool {
        self.allow_prompt
    }

    /// Resolve `spec`, returning the cached credential if the key was
    /// resolved before.
    pub fn resolve(&mut self, spec: &SecretSpec, sources: &mut Sources<'_>) -> Result<&Credential> {
        if self.cache.contains_key(&spec.key) {
            log::debug!("{} already resolved", spec.key);
            return Ok(&self.cache[&spec.key]);
        }

        spec.validate()?;
        let credential = self.lookup(spec, sources)?;
        log::info!("resolved {} from {}", spec.key, credential.source());
        Ok(self.cache.entry(spec.key.clone()).or_insert(credential))
    }

    /// Resolve every spec, stopping at the first unavailable key.
    pub fn resolve_all(&mut self, specs: &[SecretSpec], sources: &mut Sources<'_>) -> Result<()> {
        for spec in specs {
            self.resolve(spec, sources)?;
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Credential> {
        self.cache.get(key)
    }

    pub fn expose(&self, key: &str) -> Option<&str> {
        self.cache.get(key).map(Credential::expose)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.cache.values()
    }

    /// Values that must be scrubbed from logs and captured output.
    pub fn redactions(&self) -> Vec<&str> {
        self.cache
            .values()
            .filter(|c| c.is_ephemeral())
            .map(Credential::expose)
            .filter(|v| !v.is_empty())
            .collect()
    }

    /// Drop a cached credential so the next `resolve` looks it up again.
    pub fn forget(&mut self, key: &str) -> bool {
        self.cache.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    fn lookup(&self, spec: &SecretSpec, sources: &mut Sources<'_>) -> Result<Credential> {
        let mut tried = Vec::new();
        let mut notes = Vec::new();

        for source in spec.ordered_sources() {
            let outcome = match source {
                CredentialSource::Environment => Ok(from_env(spec, sources)),
                CredentialSource::SecretsStoreKv => match (spec.kv.as_ref(), sources.kv.as_deref_mut()) {
                    (Some(kv), Some(lookup)) => lookup.read(&kv.path, &kv.field),
                    (_, None) => {
                        log::debug!("{}: no secrets store session, skipping", spec.key);
                        continue;
                    }
                    (None, _) => continue,
                },
                CredentialSource::LocalFile => match spec.file.as_ref() {
                    Some(file_ref) => {
                        let path = if file_ref.path.is_absolute() {
                            file_ref.path.clone()
                        } else {
                            sources.base_dir.join(&file_ref.path)
                        };
                        file::read_field(&path, &file_ref.field)
                            .map_err(|e| crate::lookup::LookupFailure::new(e.to_string()))
                    }
                    None => continue,
                },
                CredentialSource::InteractivePrompt => {
                    if !self.allow_prompt {
                        log::debug!("{}: prompting disabled, skipping", spec.key);
                        continue;
                    }
                    match sources.prompter.as_deref_mut() {
                        Some(prompter) => prompter.prompt(spec.prompt_label(), spec.secret),
                        None => continue,
                    }
                }
                CredentialSource::DynamicLease => match (spec.dynamic.as_ref(), sources.dynamic.as_deref_mut()) {
                    (Some(dynamic), Some(lookup)) => lookup.issue(dynamic.role.as_deref(), &dynamic.field),
                    _ => continue,
                },
            };

            tried.push(source);
            match non_empty(outcome) {
                Ok(Some(value)) => {
                    return Ok(Credential::new(spec.key.clone(), value, source, spec.persisted));
                }
                Ok(None) => {}
                Err(failure) => {
                    log::warn!("{}: {source} lookup failed: {failure}", spec.key);
                    notes.push(format!("{source}: {failure}"));
                }
            }
        }

        Err(Error::Unavailable {
            key: spec.key.clone(),
            tried,
            notes,
        })
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(false)
    }
}

fn from_env(spec: &SecretSpec, sources: &Sources<'_>) -> Option<SecretString> {
    spec.env_names()
        .iter()
        .filter_map(|name| sources.env.var(name))
        .find(|v| !v.is_empty())
        .map(SecretString::from)
}

fn non_empty(outcome: Lookup) -> Lookup {
    outcome.map(|v| v.filter(|s| !s.expose_secret().is_empty()))
}
