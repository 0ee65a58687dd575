use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "proxdeploy")]
#[command(version)]
#[command(about = "Phased deployments of services onto Proxmox", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Project file, or a directory holding deploy.toml
    #[arg(short, long, global = true, env = "PROXDEPLOY_PROJECT")]
    pub project: Option<PathBuf>,

    /// Never prompt; missing credentials fail the run
    #[arg(long, global = true, env = "PROXDEPLOY_NONINTERACTIVE")]
    pub non_interactive: bool,

    /// Assume yes for confirmations
    #[arg(short, long, global = true)]
    pub yes: bool,

    /// Interactive menu when omitted
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Full run: credentials, permissions, provision, wait, configure, verify
    Deploy,

    /// Show what the provisioning engine would change
    Plan,

    /// Tear down the provisioned infrastructure
    Destroy,

    /// Show provisioning outputs and whether the target answers
    Status,

    /// Re-run configuration against existing infrastructure
    #[command(alias = "ansible-only")]
    Configure,

    /// Run preflight checks only
    Check,

    /// Validate the project file
    Validate,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_ansible_only_alias() {
        let cli = Cli::try_parse_from(["proxdeploy", "ansible-only", "-p", "projects/vault"]).unwrap();
        assert_eq!(cli.command, Some(Command::Configure));
        assert_eq!(cli.project, Some(PathBuf::from("projects/vault")));
    }

    #[test]
    fn test_no_subcommand_is_menu() {
        let cli = Cli::try_parse_from(["proxdeploy", "-vv"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.verbose, 2);
    }
}
