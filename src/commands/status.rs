use anyhow::Result;
use colored::Colorize;
use std::time::Duration;

use crate::Context;
use crate::engine::{Inventory, ProvisioningEngine, Terraform, host_address};
use crate::logfile::RunLog;
use crate::ui;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub fn run(ctx: &Context) -> Result<()> {
    let project = ctx.open_project()?;
    let config = &project.config;

    ui::header(&format!("Status: {}", project.name()));
    if !config.project.description.is_empty() {
        ui::dim(&config.project.description);
    }

    // Sensitive outputs are registered with this log and masked on display
    let log = RunLog::disabled();
    let mut engine = Terraform::new(config.provision.engine, project.provision_dir(), log.clone(), true);

    ui::section("Provisioning outputs");
    let outputs = match engine.outputs() {
        Ok(outputs) if outputs.is_empty() => {
            ui::kv("State", &"Not deployed".yellow().to_string());
            return Ok(());
        }
        Ok(outputs) => outputs,
        Err(err) => {
            ui::warn(&format!("Could not read outputs: {}", err.message));
            ui::dim(&format!("Run: {} -chdir={} init", config.provision.engine.binary(), config.provision.dir));
            return Ok(());
        }
    };
    for (name, value) in &outputs {
        ui::kv(name, &log.scrub(value));
    }

    let host = config.reachability.host.clone().or_else(|| match &config.configure {
        Some(configure) => Inventory::from_outputs(&outputs, configure, None, project.name())
            .ok()
            .map(|i| i.address),
        None => outputs.values().find_map(|v| host_address(v)),
    });
    let Some(host) = host else {
        ui::warn("No target address in the outputs");
        return Ok(());
    };

    ui::section("Reachability");
    let mut ports = vec![("reachability", config.reachability.port)];
    if let Some(verify) = &config.verify {
        ports.push(("service", verify.port));
    }
    for (label, port) in ports {
        let state = if pipeline::probe(&host, port, PROBE_TIMEOUT) {
            format!("{} open", "✓".green())
        } else {
            format!("{} closed", "✗".red())
        };
        ui::kv(&format!("{label} {host}:{port}"), &state);
    }

    println!();
    Ok(())
}
