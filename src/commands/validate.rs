use anyhow::Result;
use colored::Colorize;

use crate::Context;
use crate::phases::{self, RunKind};
use crate::ui;

/// Parse and validate the project file, then show what a deploy would run
pub fn run(ctx: &Context) -> Result<()> {
    let project = ctx.open_project()?;
    let config = &project.config;

    ui::success(&format!("{} is valid", project.path.display()));
    if ctx.quiet {
        return Ok(());
    }

    ui::section("Project");
    ui::kv("Name", project.name());
    if !config.project.description.is_empty() {
        ui::kv("Description", &config.project.description);
    }
    ui::kv("Engine", config.provision.engine.binary());
    ui::kv("Resources", &project.provision_dir().display().to_string());
    if let Some(configure) = &config.configure {
        ui::kv("Playbook", &project.resolve(&configure.playbook).display().to_string());
    }

    if !config.secrets.is_empty() {
        ui::section("Credentials");
        for entry in &config.secrets {
            let sources: Vec<String> = entry
                .spec
                .ordered_sources()
                .iter()
                .map(ToString::to_string)
                .collect();
            let targets: Vec<String> = [
                entry.tf_var.as_ref().map(|v| format!("tf:{v}")),
                entry.ansible_var.as_ref().map(|v| format!("ansible:{v}")),
            ]
            .into_iter()
            .flatten()
            .collect();
            println!(
                "  {} {} {}",
                entry.spec.key.bold(),
                sources.join(" → ").dimmed(),
                if targets.is_empty() {
                    String::new()
                } else {
                    format!("[{}]", targets.join(", "))
                }
            );
        }
    }

    if config.uses_dynamic_leases() {
        let role = config
            .vault
            .as_ref()
            .and_then(|v| v.dynamic_role.as_deref())
            .unwrap_or("per secret");
        ui::kv("Dynamic role", role);
    }

    if !config.permissions.is_empty() {
        ui::section("Permission repairs");
        for entry in &config.permissions {
            let target = entry.remote.as_deref().unwrap_or("local");
            ui::kv(
                &entry.path,
                &format!(
                    "{}:{} (+{}) on {target}",
                    entry.inside_uid, entry.inside_gid, entry.namespace_offset
                ),
            );
        }
    }

    ui::section("Deploy phases");
    let runner = phases::build(RunKind::Deploy, config);
    for (i, name) in runner.names().iter().enumerate() {
        ui::step(i + 1, runner.len(), name);
    }
    println!();
    Ok(())
}
