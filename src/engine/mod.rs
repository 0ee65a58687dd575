//! External engines driven by a deployment run
//!
//! 1. Provisioning - declarative infrastructure (`terraform` / `tofu`)
//! 2. Configuration - playbooks against the provisioned host (`ansible`)
//!
//! Both sit behind traits so the phase pipeline can be exercised without the
//! real binaries.

pub mod ansible;
pub mod terraform;

use anyhow::{Context, Result};
use pipeline::{PhaseError, PhaseResult};
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

use crate::runner;
use crate::schema::ConfigureConfig;

pub use ansible::Ansible;
pub use terraform::Terraform;

/// Named outputs read back from the provisioning engine
pub type Outputs = BTreeMap<String, String>;

/// Variables handed to an engine
///
/// Secret values only ever reach the engine through a transient `0600` file.
#[derive(Default)]
pub struct EngineVars {
    secret: BTreeMap<String, SecretString>,
    plain: BTreeMap<String, String>,
}

impl EngineVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn secret(&mut self, name: impl Into<String>, value: SecretString) {
        self.secret.insert(name.into(), value);
    }

    pub fn plain(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.plain.insert(name.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.secret.is_empty() && self.plain.is_empty()
    }

    pub fn len(&self) -> usize {
        self.secret.len() + self.plain.len()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .secret
            .keys()
            .chain(self.plain.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }

    /// Serialize every variable as one flat JSON object
    pub fn to_json(&self) -> Result<Zeroizing<String>> {
        let mut map = serde_json::Map::new();
        for (name, value) in &self.plain {
            map.insert(name.clone(), serde_json::Value::String(value.clone()));
        }
        for (name, value) in &self.secret {
            map.insert(
                name.clone(),
                serde_json::Value::String(value.expose_secret().to_string()),
            );
        }
        let json = serde_json::to_string(&serde_json::Value::Object(map))
            .context("Could not serialize engine variables")?;
        Ok(Zeroizing::new(json))
    }

    /// Write the variables to a transient JSON file
    pub fn write_file(&self) -> Result<NamedTempFile> {
        let json = self.to_json()?;
        runner::secret_file(".json", json.as_bytes())
    }
}

/// Provisioning engine contract
pub trait ProvisioningEngine {
    fn name(&self) -> &str;
    fn init(&mut self) -> PhaseResult;
    fn validate(&mut self) -> PhaseResult;
    fn plan(&mut self, vars: &EngineVars) -> PhaseResult;
    /// Apply and return the resulting outputs
    fn apply(&mut self, vars: &EngineVars) -> PhaseResult<Outputs>;
    fn destroy(&mut self, vars: &EngineVars) -> PhaseResult;
    /// Outputs of the current state, without changing anything
    fn outputs(&mut self) -> PhaseResult<Outputs>;
}

/// Configuration engine contract
pub trait ConfigurationEngine {
    fn name(&self) -> &str;
    fn test_connectivity(&mut self, inventory: &Inventory) -> PhaseResult;
    fn run(&mut self, inventory: &Inventory, playbook: &Path, vars: &EngineVars) -> PhaseResult;
}

// ============================================================================
// Inventory
// ============================================================================

/// The single host a run configures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    pub group: String,
    pub hostname: String,
    pub address: String,
    pub ssh_user: String,
    pub ssh_key: Option<PathBuf>,
}

impl Inventory {
    /// Build the inventory from provisioning outputs
    ///
    /// `ssh_key` is already resolved against the project directory.
    pub fn from_outputs(
        outputs: &Outputs,
        configure: &ConfigureConfig,
        ssh_key: Option<PathBuf>,
        fallback_hostname: &str,
    ) -> PhaseResult<Self> {
        let host_output = configure.host_output.as_str();
        let raw = outputs.get(host_output).ok_or_else(|| {
            PhaseError::validation(format!("provisioning output '{host_output}' is missing"))
                .with_hint(format!(
                    "Add `output \"{host_output}\"` to the resource definitions or set configure.host_output"
                ))
        })?;
        let address = host_address(raw).ok_or_else(|| {
            PhaseError::validation(format!("provisioning output '{host_output}' holds no address"))
        })?;

        let hostname = configure
            .hostname_output
            .as_deref()
            .and_then(|name| outputs.get(name))
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| fallback_hostname.to_string());

        Ok(Self {
            group: configure.group.clone(),
            hostname,
            address,
            ssh_user: configure.ssh_user.clone(),
            ssh_key,
        })
    }

    /// INI inventory understood by the configuration engine
    pub fn to_ini(&self) -> String {
        let mut line = format!(
            "{} ansible_host={} ansible_user={}",
            self.hostname, self.address, self.ssh_user
        );
        if let Some(key) = &self.ssh_key {
            line.push_str(&format!(" ansible_ssh_private_key_file={}", key.display()));
        }
        format!(
            "[{group}]\n{line}\n\n[{group}:vars]\nansible_ssh_common_args='-o StrictHostKeyChecking=accept-new'\n",
            group = self.group
        )
    }

    pub fn write_file(&self) -> Result<NamedTempFile> {
        runner::secret_file(".ini", self.to_ini().as_bytes())
    }
}

/// First address in an output value: strips CIDR suffixes and list syntax
///
/// `10.0.0.5/24`, `["10.0.0.5"]` and `10.0.0.5,10.0.0.6` all yield `10.0.0.5`.
pub fn host_address(raw: &str) -> Option<String> {
    let first = raw
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .next()?
        .trim()
        .trim_matches('"');
    let address = first.split('/').next()?.trim();
    if address.is_empty() || address.eq_ignore_ascii_case("dhcp") {
        None
    } else {
        Some(address.to_string())
    }
}

/// Map a non-zero exit status into a phase error of `kind`
pub(crate) fn exit_error(
    kind: pipeline::ErrorKind,
    what: &str,
    status: std::process::ExitStatus,
    log_path: Option<PathBuf>,
) -> PhaseError {
    let err = PhaseError::new(kind, format!("{what} exited with {}", runner::status_label(status)))
        .with_exit_code(status.code());
    match log_path {
        Some(path) => err.with_hint(format!("See the run log: {}", path.display())),
        None => err,
    }
}
