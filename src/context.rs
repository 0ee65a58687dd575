use credentials::{EnvLookup, ProcessEnv, Prompter, Resolver};
use std::path::PathBuf;

use crate::config::Project;
use crate::engine::{Ansible, ConfigurationEngine, Inventory, Outputs, ProvisioningEngine, Terraform};
use crate::logfile::RunLog;
use crate::permissions::OwnershipOps;
use crate::secrets::{SecretsStore, TerminalPrompter};

/// Everything one deployment run shares between its phases
///
/// Owned by the run and passed `&mut` to every phase. Credentials live in
/// the resolver and are dropped with it at the end of the run.
pub struct DeployContext {
    pub project: Project,
    pub log: RunLog,
    pub quiet: bool,

    pub env: Box<dyn EnvLookup>,
    pub resolver: Resolver,
    pub prompter: Option<Box<dyn Prompter>>,
    /// Opened on first use by the credentials phase
    pub store: Option<SecretsStore>,

    pub provisioner: Box<dyn ProvisioningEngine>,
    pub configurator: Box<dyn ConfigurationEngine>,
    /// Replaces local/ssh ownership operations for every repair task
    pub ownership: Option<Box<dyn OwnershipOps>>,

    /// Outputs of the last apply (or of the existing state)
    pub outputs: Outputs,
    pub inventory: Option<Inventory>,
}

impl DeployContext {
    /// Context with the real engines, process environment and terminal
    pub fn new(project: Project, log: RunLog, quiet: bool, allow_prompt: bool) -> Self {
        let config = &project.config;
        let var_files: Vec<PathBuf> = config
            .provision
            .var_files
            .iter()
            .map(|f| project.resolve(f))
            .collect();
        let provisioner = Terraform::new(config.provision.engine, project.provision_dir(), log.clone(), quiet)
            .with_var_files(var_files);
        let configurator = Ansible::new(log.clone(), quiet);
        let prompter: Option<Box<dyn Prompter>> = allow_prompt.then(|| Box::new(TerminalPrompter) as Box<dyn Prompter>);

        Self {
            project,
            log,
            quiet,
            env: Box::new(ProcessEnv),
            resolver: Resolver::new(allow_prompt),
            prompter,
            store: None,
            provisioner: Box::new(provisioner),
            configurator: Box::new(configurator),
            ownership: None,
            outputs: Outputs::new(),
            inventory: None,
        }
    }

    /// Address the reachability and verify probes target
    pub fn target_host(&self) -> Option<String> {
        self.project
            .config
            .reachability
            .host
            .clone()
            .or_else(|| self.inventory.as_ref().map(|i| i.address.clone()))
    }

    /// Revoke leases issued during this run
    pub fn release(&mut self) {
        if let Some(store) = self.store.as_mut() {
            let revoked = store.revoke_all();
            if revoked > 0 {
                self.log.event(&format!("revoked {revoked} dynamic lease(s)"));
            }
        }
    }
}

/// Test seams replacing the process environment and external tools
#[cfg(test)]
impl DeployContext {
    pub fn with_env(mut self, env: impl EnvLookup + 'static) -> Self {
        self.env = Box::new(env);
        self
    }

    pub fn with_engines(
        mut self,
        provisioner: impl ProvisioningEngine + 'static,
        configurator: impl ConfigurationEngine + 'static,
    ) -> Self {
        self.provisioner = Box::new(provisioner);
        self.configurator = Box::new(configurator);
        self
    }

    pub fn with_ownership(mut self, ops: impl OwnershipOps + 'static) -> Self {
        self.ownership = Some(Box::new(ops));
        self
    }
}
