use anyhow::Result;
use colored::Colorize;
use credentials::{CredentialSource, EnvLookup, ProcessEnv};

use crate::Context;
use crate::config::Project;
use crate::paths;
use crate::phases::{self, RunKind};
use crate::secrets;
use crate::ui;

struct Issue {
    category: &'static str,
    summary: String,
    detail: Option<String>,
    fix: Option<String>,
}

/// Preflight for a full deploy, without touching anything
pub fn run(ctx: &Context) -> Result<()> {
    let project = ctx.open_project()?;
    ui::header(&format!("Preflight: {}", project.name()));

    let reports = phases::preflight(RunKind::Deploy, &project);
    super::print_reports(&reports, !ctx.quiet);

    let mut issues: Vec<Issue> = reports
        .iter()
        .flat_map(|report| {
            report.failures().map(|item| Issue {
                category: "preflight",
                summary: format!("{} is missing", item.name),
                detail: None,
                fix: item.remediation.clone(),
            })
        })
        .collect();

    check_secrets_store(&project, &ProcessEnv, &mut issues);
    check_prompts(ctx, &project, &ProcessEnv, &mut issues);
    check_state_dir(&mut issues);

    println!();
    if issues.is_empty() {
        ui::success("Ready to deploy");
        return Ok(());
    }
    print_issue_summary(&issues);
    Err(super::RunFailed {
        command: "check",
        code: 1,
    }
    .into())
}

fn check_secrets_store(project: &Project, env: &dyn EnvLookup, issues: &mut Vec<Issue>) {
    let Some(vault) = &project.config.vault else {
        return;
    };
    if env.var(secrets::ENV_ADDR).is_none() && vault.address.is_none() {
        issues.push(Issue {
            category: "secrets store",
            summary: "No secrets store address".to_string(),
            detail: None,
            fix: Some(format!("Export {} or set vault.address", secrets::ENV_ADDR)),
        });
    }

    let has_token = env.var(secrets::ENV_TOKEN).is_some_and(|t| !t.is_empty())
        || vaultkit::token_helper_file().and_then(|p| vaultkit::read_token_file(&p)).is_some();
    let has_user = env.var(secrets::ENV_USERNAME).is_some() || vault.username.is_some();
    if !has_token && !has_user {
        issues.push(Issue {
            category: "secrets store",
            summary: "No way to log in to the secrets store".to_string(),
            detail: Some("Neither a token nor a userpass username is available".to_string()),
            fix: Some(format!("Export {} or {}", secrets::ENV_TOKEN, secrets::ENV_USERNAME)),
        });
    }
}

/// Secrets that can only come from a prompt fail when prompting is off
fn check_prompts(ctx: &Context, project: &Project, env: &dyn EnvLookup, issues: &mut Vec<Issue>) {
    if ctx.interactive {
        return;
    }
    for entry in &project.config.secrets {
        let spec = &entry.spec;
        let only_prompt = spec
            .ordered_sources()
            .iter()
            .all(|s| *s == CredentialSource::InteractivePrompt || *s == CredentialSource::Environment);
        let in_env = spec
            .env_names()
            .iter()
            .any(|n| env.var(n).is_some_and(|v| !v.is_empty()));
        if only_prompt && !in_env {
            issues.push(Issue {
                category: "credentials",
                summary: format!("'{}' needs a prompt but the run is non-interactive", spec.key),
                detail: None,
                fix: Some(format!("Export {}", spec.env_names().join(" or "))),
            });
        }
    }
}

fn check_state_dir(issues: &mut Vec<Issue>) {
    match paths::log_dir() {
        Ok(dir) => {
            if let Err(e) = std::fs::create_dir_all(&dir) {
                issues.push(Issue {
                    category: "state",
                    summary: format!("Cannot create log directory {}", dir.display()),
                    detail: Some(e.to_string()),
                    fix: Some(format!("Set {} to a writable directory", paths::ENV_STATE_DIR)),
                });
            }
        }
        Err(e) => issues.push(Issue {
            category: "state",
            summary: "Cannot determine the log directory".to_string(),
            detail: Some(format!("{e:#}")),
            fix: Some(format!("Set {}", paths::ENV_STATE_DIR)),
        }),
    }
}

fn print_issue_summary(issues: &[Issue]) {
    let count = issues.len();
    let label = if count == 1 { "Issue" } else { "Issues" };
    ui::header(&format!("{count} {label} Found"));

    for (i, issue) in issues.iter().enumerate() {
        let num = i + 1;
        println!(
            "  {}  {} {}",
            format!("{num}.").bold(),
            issue.summary,
            format!("[{}]", issue.category).dimmed()
        );
        if let Some(detail) = &issue.detail {
            for line in detail.lines() {
                println!("      {}", line.dimmed());
            }
        }
        if let Some(fix) = &issue.fix {
            println!("      {} {}", "Fix:".cyan(), fix);
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn project(toml: &str) -> Project {
        Project {
            path: PathBuf::from("deploy.toml"),
            root: PathBuf::from("."),
            config: toml::from_str(toml).unwrap(),
        }
    }

    fn ctx(interactive: bool) -> Context {
        Context {
            verbose: 0,
            quiet: true,
            project: None,
            interactive,
            yes: false,
        }
    }

    const PROMPT_ONLY: &str = r#"
        [project]
        name = "pbs"

        [[secrets]]
        key = "root_password"
        sources = ["environment", "interactive_prompt"]
    "#;

    #[test]
    fn test_prompt_only_secret_flagged_when_unattended() {
        let project = project(PROMPT_ONLY);
        let env: HashMap<String, String> = HashMap::new();

        let mut issues = Vec::new();
        check_prompts(&ctx(false), &project, &env, &mut issues);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].summary.contains("root_password"));

        let mut issues = Vec::new();
        check_prompts(&ctx(true), &project, &env, &mut issues);
        assert!(issues.is_empty());

        let env = HashMap::from([("ROOT_PASSWORD".to_string(), "x".to_string())]);
        let mut issues = Vec::new();
        check_prompts(&ctx(false), &project, &env, &mut issues);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_store_without_address_flagged() {
        let project = project(
            r#"
            [project]
            name = "loki"

            [vault]
            username = "deployer"
            "#,
        );
        let env: HashMap<String, String> = HashMap::new();
        let mut issues = Vec::new();
        check_secrets_store(&project, &env, &mut issues);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category, "secrets store");
    }
}
