use anyhow::{Context, Result};
use credentials::{CredentialSource, SecretSpec};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

// ============================================================================
// Project File Schema
// ============================================================================

/// One deployable project (`deploy.toml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    pub project: ProjectMeta,

    /// Secrets store connection, required when any KV or dynamic source is used
    #[serde(default)]
    pub vault: Option<VaultConfig>,

    /// Credentials the run needs
    #[serde(default)]
    pub secrets: Vec<SecretEntry>,

    #[serde(default)]
    pub provision: ProvisionConfig,

    /// Configuration step; omitted for provision-only projects
    #[serde(default)]
    pub configure: Option<ConfigureConfig>,

    #[serde(default)]
    pub reachability: ReachabilityConfig,

    /// Data volume ownership repairs, applied before configuration
    #[serde(default)]
    pub permissions: Vec<PermissionEntry>,

    #[serde(default)]
    pub preflight: PreflightConfig,

    #[serde(default)]
    pub verify: Option<VerifyConfig>,
}

impl DeployConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.project.name.trim().is_empty() {
            anyhow::bail!("project.name cannot be empty");
        }

        let mut keys = HashSet::new();
        let mut tf_vars = HashSet::new();
        for entry in &self.secrets {
            entry
                .spec
                .validate()
                .with_context(|| format!("Invalid secret '{}'", entry.spec.key))?;
            if !keys.insert(entry.spec.key.as_str()) {
                anyhow::bail!("Duplicate secret key '{}'", entry.spec.key);
            }
            if let Some(var) = &entry.tf_var {
                if !tf_vars.insert(var.as_str()) {
                    anyhow::bail!("Duplicate tf_var '{}'", var);
                }
            }
        }

        if self.vault.is_none() && self.needs_vault() {
            anyhow::bail!("A [vault] section is required when secrets use secrets_store_kv or dynamic_lease");
        }

        self.provision.validate()?;

        if let Some(configure) = &self.configure {
            configure.validate()?;
        }

        self.reachability
            .validate()
            .context("Invalid [reachability] section")?;

        if self.configure.is_none() && self.reachability.host.is_none() && self.reachability.enabled {
            anyhow::bail!("reachability needs either reachability.host or a [configure] host_output");
        }

        for entry in &self.permissions {
            entry
                .validate()
                .with_context(|| format!("Invalid permission repair for '{}'", entry.path))?;
        }

        Ok(())
    }

    /// Whether any secret is read from the secrets store
    pub fn needs_vault(&self) -> bool {
        self.secrets.iter().any(|s| {
            s.spec.uses(CredentialSource::SecretsStoreKv) || s.spec.uses(CredentialSource::DynamicLease)
        })
    }

    pub fn uses_dynamic_leases(&self) -> bool {
        self.secrets
            .iter()
            .any(|s| s.spec.uses(CredentialSource::DynamicLease))
    }

    pub fn secret_specs(&self) -> Vec<SecretSpec> {
        self.secrets.iter().map(|s| s.spec.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMeta {
    pub name: String,

    #[serde(default)]
    pub description: String,
}

// ============================================================================
// Secrets Store
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Store address; `VAULT_ADDR` takes precedence
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default = "default_kv_mount")]
    pub kv_mount: String,

    /// KV engine version (1 or 2)
    #[serde(default = "default_kv_version")]
    pub kv_version: u8,

    /// Login name; `VAULT_USERNAME` takes precedence
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default = "default_userpass_mount")]
    pub userpass_mount: String,

    #[serde(default = "default_dynamic_mount")]
    pub dynamic_mount: String,

    /// Default role for dynamic leases; `VAULT_DYNAMIC_ROLE` takes precedence
    #[serde(default)]
    pub dynamic_role: Option<String>,

    /// Seconds dependent systems need before accepting a fresh lease
    #[serde(default = "default_propagation_delay")]
    pub propagation_delay_secs: u64,
}

impl VaultConfig {
    pub fn propagation_delay(&self) -> Duration {
        Duration::from_secs(self.propagation_delay_secs)
    }
}

fn default_kv_mount() -> String {
    "secret".to_string()
}

fn default_kv_version() -> u8 {
    2
}

fn default_userpass_mount() -> String {
    "userpass".to_string()
}

fn default_dynamic_mount() -> String {
    "aws".to_string()
}

fn default_propagation_delay() -> u64 {
    10
}

// ============================================================================
// Secrets
// ============================================================================

/// A credential declaration plus where the value is handed to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretEntry {
    #[serde(flatten)]
    pub spec: SecretSpec,

    /// Variable name passed to the provisioning engine
    #[serde(default)]
    pub tf_var: Option<String>,

    /// Extra-var name passed to the configuration engine
    #[serde(default)]
    pub ansible_var: Option<String>,
}

// ============================================================================
// Provisioning
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Terraform,
    Tofu,
}

impl EngineKind {
    pub fn binary(self) -> &'static str {
        match self {
            EngineKind::Terraform => "terraform",
            EngineKind::Tofu => "tofu",
        }
    }

    pub fn install_hint(self) -> &'static str {
        match self {
            EngineKind::Terraform => "Install Terraform: https://developer.hashicorp.com/terraform/install",
            EngineKind::Tofu => "Install OpenTofu: https://opentofu.org/docs/intro/install/",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    #[serde(default)]
    pub engine: EngineKind,

    /// Directory holding the resource definitions, relative to the project file
    #[serde(default = "default_provision_dir")]
    pub dir: String,

    /// Extra non-secret var files (e.g. `terraform.tfvars`)
    #[serde(default)]
    pub var_files: Vec<String>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            dir: default_provision_dir(),
            var_files: Vec::new(),
        }
    }
}

impl ProvisionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dir.trim().is_empty() {
            anyhow::bail!("provision.dir cannot be empty");
        }
        Ok(())
    }
}

fn default_provision_dir() -> String {
    "terraform".to_string()
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureConfig {
    /// Playbook path, relative to the project file
    pub playbook: String,

    /// Inventory group the host is placed in
    #[serde(default = "default_group")]
    pub group: String,

    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    #[serde(default)]
    pub ssh_key: Option<String>,

    /// Provisioning output holding the target address
    #[serde(default = "default_host_output")]
    pub host_output: String,

    /// Provisioning output holding the inventory hostname
    #[serde(default)]
    pub hostname_output: Option<String>,

    /// Non-secret extra vars
    #[serde(default)]
    pub extra_vars: BTreeMap<String, String>,

    /// Ping the host through the configuration engine before running the playbook
    #[serde(default = "default_true")]
    pub check_connectivity: bool,
}

impl ConfigureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.playbook.trim().is_empty() {
            anyhow::bail!("configure.playbook cannot be empty");
        }
        if self.host_output.trim().is_empty() {
            anyhow::bail!("configure.host_output cannot be empty");
        }
        if self.ssh_user.trim().is_empty() {
            anyhow::bail!("configure.ssh_user cannot be empty");
        }
        Ok(())
    }
}

fn default_group() -> String {
    "targets".to_string()
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_host_output() -> String {
    "ip_address".to_string()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Reachability
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReachabilityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fixed host; otherwise the configure host output is used
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default = "default_reach_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: None,
            port: default_ssh_port(),
            timeout_secs: default_reach_timeout(),
            interval_secs: default_interval(),
            retry: RetryConfig::default(),
        }
    }
}

impl ReachabilityConfig {
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be between 1 and 65535");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be at least 1");
        }
        if self.interval_secs == 0 {
            anyhow::bail!("interval_secs must be at least 1");
        }
        self.retry.validate()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_attempts(),
            delay_secs: default_retry_delay(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn policy(&self) -> pipeline::RetryPolicy {
        pipeline::RetryPolicy::new(self.max_attempts, Duration::from_secs(self.delay_secs))
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_reach_timeout() -> u64 {
    180
}

fn default_interval() -> u64 {
    2
}

fn default_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    10
}

// ============================================================================
// Permissions
// ============================================================================

/// Ownership fix for a bind-mounted data volume of an unprivileged container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionEntry {
    /// Host-side path of the volume
    pub path: String,

    pub inside_uid: u32,
    pub inside_gid: u32,

    #[serde(default = "default_namespace_offset")]
    pub namespace_offset: u32,

    /// `user@host` of the Proxmox node; local when absent
    #[serde(default)]
    pub remote: Option<String>,
}

impl PermissionEntry {
    pub fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') && !self.path.starts_with('~') && !self.path.starts_with('$') {
            anyhow::bail!("path must be absolute");
        }
        if self.namespace_offset.checked_add(self.inside_uid).is_none()
            || self.namespace_offset.checked_add(self.inside_gid).is_none()
        {
            anyhow::bail!("namespace_offset + inside id overflows");
        }
        if let Some(remote) = &self.remote {
            if remote.trim().is_empty() || remote.starts_with('-') {
                anyhow::bail!("remote must be a `user@host` ssh target");
            }
        }
        Ok(())
    }
}

pub const DEFAULT_NAMESPACE_OFFSET: u32 = 100_000;

fn default_namespace_offset() -> u32 {
    DEFAULT_NAMESPACE_OFFSET
}

// ============================================================================
// Preflight / Verify
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PreflightConfig {
    #[serde(default)]
    pub binaries: Vec<BinaryEntry>,

    #[serde(default)]
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryEntry {
    pub name: String,
    #[serde(default)]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    #[serde(default)]
    pub hint: Option<String>,
}

/// Post-configuration probe of the service port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyConfig {
    pub port: u16,

    #[serde(default = "default_verify_timeout")]
    pub timeout_secs: u64,
}

fn default_verify_timeout() -> u64 {
    30
}

// ============================================================================
// Tests
// ============================================================================
