//! Ansible CLI adapter

use pipeline::{ErrorKind, PhaseError, PhaseResult};
use std::path::Path;
use std::process::Command;

use super::{ConfigurationEngine, EngineVars, Inventory, exit_error};
use crate::logfile::RunLog;
use crate::runner;

const PING_PROGRAM: &str = "ansible";

pub struct Ansible {
    log: RunLog,
    quiet: bool,
    ping_program: String,
}

impl Ansible {
    pub fn new(log: RunLog, quiet: bool) -> Self {
        Self {
            log,
            quiet,
            ping_program: PING_PROGRAM.to_string(),
        }
    }

    fn command(program: &str, inventory: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg("-i")
            .arg(inventory)
            .env("ANSIBLE_HOST_KEY_CHECKING", "False")
            .env("ANSIBLE_NOCOLOR", "1");
        cmd
    }
}

impl ConfigurationEngine for Ansible {
    fn name(&self) -> &str {
        "ansible"
    }

    /// Ping the host; failures are connectivity errors so the phase can retry
    fn test_connectivity(&mut self, inventory: &Inventory) -> PhaseResult {
        let file = inventory.write_file().map_err(|e| engine_error(&e))?;
        let mut cmd = Self::command(&self.ping_program, file.path());
        cmd.args([inventory.group.as_str(), "-m", "ping"]);

        let status = runner::run_logged(&mut cmd, &self.log, true).map_err(|e| engine_error(&e))?;
        if status.success() {
            Ok(())
        } else {
            Err(PhaseError::connectivity(format!(
                "{}@{} did not answer an ansible ping",
                inventory.ssh_user, inventory.address
            ))
            .with_exit_code(status.code())
            .with_hint("Check the SSH key and that the host finished booting"))
        }
    }

    fn run(&mut self, inventory: &Inventory, playbook: &Path, vars: &EngineVars) -> PhaseResult {
        let file = inventory.write_file().map_err(|e| engine_error(&e))?;
        let mut cmd = Self::command("ansible-playbook", file.path());
        cmd.arg(playbook);

        let _vars = if vars.is_empty() {
            None
        } else {
            let vars_file = vars.write_file().map_err(|e| engine_error(&e))?;
            cmd.arg("-e").arg(format!("@{}", vars_file.path().display()));
            Some(vars_file)
        };

        let status = runner::run_logged(&mut cmd, &self.log, self.quiet).map_err(|e| engine_error(&e))?;
        if status.success() {
            Ok(())
        } else {
            Err(exit_error(
                ErrorKind::ConfigurationEngine,
                "ansible-playbook",
                status,
                self.log.path(),
            ))
        }
    }
}

fn engine_error(err: &anyhow::Error) -> PhaseError {
    PhaseError::new(ErrorKind::ConfigurationEngine, format!("{err:#}"))
}

#[cfg(test)]
impl Ansible {
    fn with_ping_program(mut self, program: &str) -> Self {
        self.ping_program = program.to_string();
        self
    }
}
