//! Terraform / OpenTofu CLI adapter

use anyhow::{Context, Result};
use pipeline::{ErrorKind, PhaseError, PhaseResult};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use tempfile::NamedTempFile;

use super::{EngineVars, Outputs, ProvisioningEngine, exit_error};
use crate::logfile::RunLog;
use crate::runner;
use crate::schema::EngineKind;

pub struct Terraform {
    kind: EngineKind,
    dir: PathBuf,
    var_files: Vec<PathBuf>,
    log: RunLog,
    quiet: bool,
}

impl Terraform {
    pub fn new(kind: EngineKind, dir: PathBuf, log: RunLog, quiet: bool) -> Self {
        Self {
            kind,
            dir,
            var_files: Vec::new(),
            log,
            quiet,
        }
    }

    /// Extra non-secret var files passed to every plan/apply/destroy
    pub fn with_var_files(mut self, files: Vec<PathBuf>) -> Self {
        self.var_files = files;
        self
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new(self.kind.binary());
        cmd.arg(format!("-chdir={}", self.dir.display()))
            .arg(subcommand)
            .env("TF_IN_AUTOMATION", "1");
        cmd
    }

    /// Attach var files; the returned handle must outlive the command
    fn attach_vars(&self, cmd: &mut Command, vars: &EngineVars) -> PhaseResult<Option<NamedTempFile>> {
        for file in &self.var_files {
            cmd.arg(format!("-var-file={}", file.display()));
        }
        if vars.is_empty() {
            return Ok(None);
        }
        let file = vars.write_file().map_err(engine_error)?;
        cmd.arg(format!("-var-file={}", file.path().display()));
        log::debug!("passing {} variables via var file", vars.len());
        Ok(Some(file))
    }

    fn exec(&self, mut cmd: Command, what: &str) -> PhaseResult {
        let status = runner::run_logged(&mut cmd, &self.log, self.quiet).map_err(engine_error)?;
        if status.success() {
            Ok(())
        } else {
            Err(exit_error(
                ErrorKind::ProvisioningEngine,
                &format!("{} {what}", self.kind.binary()),
                status,
                self.log.path(),
            ))
        }
    }
}

impl ProvisioningEngine for Terraform {
    fn name(&self) -> &str {
        self.kind.binary()
    }

    fn init(&mut self) -> PhaseResult {
        let mut cmd = self.command("init");
        cmd.args(["-input=false", "-no-color"]);
        self.exec(cmd, "init")
    }

    fn validate(&mut self) -> PhaseResult {
        let mut cmd = self.command("validate");
        cmd.arg("-no-color");
        self.exec(cmd, "validate")
    }

    fn plan(&mut self, vars: &EngineVars) -> PhaseResult {
        let mut cmd = self.command("plan");
        cmd.args(["-input=false", "-no-color"]);
        let _vars = self.attach_vars(&mut cmd, vars)?;
        self.exec(cmd, "plan")
    }

    fn apply(&mut self, vars: &EngineVars) -> PhaseResult<Outputs> {
        let mut cmd = self.command("apply");
        cmd.args(["-input=false", "-no-color", "-auto-approve"]);
        let vars_file = self.attach_vars(&mut cmd, vars)?;
        self.exec(cmd, "apply")?;
        drop(vars_file);
        self.outputs()
    }

    fn destroy(&mut self, vars: &EngineVars) -> PhaseResult {
        let mut cmd = self.command("destroy");
        cmd.args(["-input=false", "-no-color", "-auto-approve"]);
        let _vars = self.attach_vars(&mut cmd, vars)?;
        self.exec(cmd, "destroy")
    }

    fn outputs(&mut self) -> PhaseResult<Outputs> {
        let mut cmd = self.command("output");
        cmd.args(["-json", "-no-color"]);
        let json = runner::run_capture(&mut cmd).map_err(engine_error)?;
        let parsed = parse_outputs(&json).map_err(engine_error)?;

        for (name, output) in &parsed {
            if output.sensitive {
                self.log.redact(&output.value);
            }
            self.log.line(
                "outputs",
                &format!("{name} ({})", if output.sensitive { "sensitive" } else { "plain" }),
            );
        }
        Ok(parsed.into_iter().map(|(k, v)| (k, v.value)).collect())
    }
}

fn engine_error(err: anyhow::Error) -> PhaseError {
    PhaseError::new(ErrorKind::ProvisioningEngine, format!("{err:#}"))
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    #[serde(default)]
    sensitive: bool,
    value: Value,
}

/// A flattened output value
#[derive(Debug, PartialEq, Eq)]
pub struct OutputValue {
    pub value: String,
    pub sensitive: bool,
}

/// Parse `output -json`
///
/// Scalars become strings, lists of scalars are joined with `,`, anything
/// else is kept as compact JSON. Null outputs are skipped.
pub fn parse_outputs(json: &str) -> Result<BTreeMap<String, OutputValue>> {
    if json.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let raw: BTreeMap<String, RawOutput> =
        serde_json::from_str(json).context("Invalid JSON from output -json")?;

    Ok(raw
        .into_iter()
        .filter_map(|(name, output)| {
            flatten(&output.value).map(|value| {
                (
                    name,
                    OutputValue {
                        value,
                        sensitive: output.sensitive,
                    },
                )
            })
        })
        .collect())
}

fn flatten(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) if items.iter().all(|v| !v.is_array() && !v.is_object()) => Some(
            items
                .iter()
                .filter_map(flatten)
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => Some(other.to_string()),
    }
}
