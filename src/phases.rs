//! The deployment pipeline: which phases a command runs and what each does
//!
//! Order is fixed: credentials, permissions, provision, wait, configure,
//! verify. Commands run a subset of it.

use credentials::{CredentialSource, EnvLookup, SecretSpec, Sources};
use pipeline::{
    BinaryRequirement, CheckItem, ErrorKind, FileRequirement, Phase, PhaseError, PhaseResult, PhaseRunner,
    Report, WaitOptions,
};
use secrecy::SecretString;
use std::path::Path;
use std::time::Duration;

use crate::config::Project;
use crate::context::DeployContext;
use crate::engine::{EngineVars, Inventory};
use crate::permissions::{self, LocalOps, OwnershipOps, RepairTask, SshOps};
use crate::progress;
use crate::schema::{DeployConfig, SecretEntry};
use crate::secrets::{SecretsStore, StoreKv, StoreLeases};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// Full pipeline
    Deploy,
    /// Credentials and a provisioning plan
    Plan,
    /// Credentials and teardown
    Destroy,
    /// Re-run configuration against existing infrastructure
    Configure,
}

impl RunKind {
    pub fn label(self) -> &'static str {
        match self {
            RunKind::Deploy => "deploy",
            RunKind::Plan => "plan",
            RunKind::Destroy => "destroy",
            RunKind::Configure => "configure",
        }
    }

    fn provisions(self) -> bool {
        !matches!(self, RunKind::Configure)
    }

    fn configures(self) -> bool {
        matches!(self, RunKind::Deploy | RunKind::Configure)
    }
}

/// Assemble the phases `kind` runs for this project
pub fn build(kind: RunKind, config: &DeployConfig) -> PhaseRunner<DeployContext> {
    let mut runner = PhaseRunner::new().phase(Phase::new("credentials", resolve_credentials));

    match kind {
        RunKind::Plan => return runner.phase(Phase::new("plan", plan)),
        RunKind::Destroy => return runner.phase(Phase::new("destroy", destroy)),
        RunKind::Deploy | RunKind::Configure => {}
    }

    if !config.permissions.is_empty() {
        runner.push(Phase::new("permissions", repair_permissions));
    }

    runner.push(match kind {
        RunKind::Configure => Phase::new("outputs", read_outputs),
        _ => Phase::new("provision", provision),
    });

    if config.reachability.enabled {
        runner.push(Phase::new("wait", wait).with_retry(config.reachability.retry.policy()));
    }
    if config.configure.is_some() {
        runner.push(Phase::new("configure", configure));
    }
    if config.verify.is_some() {
        runner.push(Phase::new("verify", verify).best_effort());
    }
    runner
}

// ============================================================================
// Preflight
// ============================================================================

/// Read-only checks that gate every phase of `kind`
pub fn preflight(kind: RunKind, project: &Project) -> Vec<Report> {
    let config = &project.config;
    let mut binaries: Vec<BinaryRequirement> = Vec::new();
    let mut add = |req: BinaryRequirement| {
        if !binaries.iter().any(|b| b.name == req.name) {
            binaries.push(req);
        }
    };

    if kind.provisions() || config.configure.is_some() {
        let engine = config.provision.engine;
        add(BinaryRequirement::new(engine.binary()).with_hint(engine.install_hint()));
    }
    if kind.configures() && config.configure.is_some() {
        for name in ["ansible", "ansible-playbook"] {
            add(BinaryRequirement::new(name).with_hint("Install Ansible: pipx install --include-deps ansible"));
        }
    }
    if kind.configures() && config.permissions.iter().any(|p| p.remote.is_some()) {
        add(BinaryRequirement::new("ssh").with_hint("Install an OpenSSH client"));
    }
    for entry in &config.preflight.binaries {
        let req = BinaryRequirement::new(&entry.name);
        add(match &entry.hint {
            Some(hint) => req.with_hint(hint),
            None => req,
        });
    }

    let mut files: Vec<FileRequirement> = Vec::new();
    for var_file in &config.provision.var_files {
        files.push(
            FileRequirement::new(project.resolve(var_file))
                .with_hint(format!("Create {var_file} (see the matching .example file)")),
        );
    }
    if kind.configures() {
        if let Some(configure) = &config.configure {
            files.push(
                FileRequirement::new(project.resolve(&configure.playbook))
                    .with_hint("Check configure.playbook in the project file"),
            );
        }
    }
    for entry in &config.preflight.files {
        let req = FileRequirement::new(project.resolve(&entry.path));
        files.push(match &entry.hint {
            Some(hint) => req.with_hint(hint),
            None => req,
        });
    }

    let mut file_report = pipeline::check_files(&project.root, &files);
    file_report.items.insert(
        0,
        directory_item(
            &config.provision.dir,
            &project.provision_dir(),
            "Check provision.dir in the project file",
        ),
    );

    vec![pipeline::check_binaries(&binaries), file_report]
}

fn directory_item(name: &str, path: &Path, hint: &str) -> CheckItem {
    let passed = path.is_dir();
    CheckItem {
        name: format!("{name}/"),
        passed,
        detail: passed.then(|| path.display().to_string()),
        remediation: (!passed).then(|| hint.to_string()),
    }
}

// ============================================================================
// Credentials
// ============================================================================

fn resolve_credentials(ctx: &mut DeployContext) -> PhaseResult {
    let specs = ctx.project.config.secret_specs();

    if ctx.store.is_none() && store_required(&specs, &*ctx.env) {
        if let Some(vault) = &ctx.project.config.vault {
            let store = SecretsStore::open(vault, &*ctx.env, ctx.prompter.as_deref_mut())?;
            ctx.log.event("secrets store session opened");
            ctx.store = Some(store);
        }
    }

    let DeployContext {
        project,
        log,
        quiet,
        env,
        resolver,
        prompter,
        store,
        ..
    } = ctx;

    {
        let mut lookups: Option<(StoreKv<'_>, StoreLeases<'_>)> = store.as_mut().map(SecretsStore::lookups);
        let mut sources = Sources::new(&**env, project.credential_base_dir());
        if let Some((kv, leases)) = lookups.as_mut() {
            sources = sources.with_kv(kv).with_dynamic(leases);
        }
        if let Some(prompter) = prompter.as_deref_mut() {
            sources = sources.with_prompter(prompter);
        }
        resolver
            .resolve_all(&specs, &mut sources)
            .map_err(credential_error)?;
    }

    for value in resolver.redactions() {
        log.redact(value);
    }
    log.line("credentials", &format!("{} value(s) masked", log.redaction_count()));
    for credential in resolver.iter() {
        log.line("credentials", &format!("{} from {}", credential.key(), credential.source()));
    }

    if let Some(store) = store.as_ref() {
        if store.lease_count() > 0 {
            let pb = progress::spinner("waiting for dynamic credentials to propagate", *quiet);
            let waited = store.wait_for_leases();
            progress::finish_clear(&pb);
            log.line("credentials", &format!("lease propagation wait {waited:.1?}"));
        }
    }
    Ok(())
}

/// A store session is needed when some store-backed secret is not already
/// satisfied by the environment
fn store_required(specs: &[SecretSpec], env: &dyn EnvLookup) -> bool {
    specs.iter().any(|spec| {
        let store_backed =
            spec.uses(CredentialSource::SecretsStoreKv) || spec.uses(CredentialSource::DynamicLease);
        let from_env = spec.uses(CredentialSource::Environment)
            && spec
                .env_names()
                .iter()
                .any(|name| env.var(name).is_some_and(|v| !v.is_empty()));
        store_backed && !from_env
    })
}

fn credential_error(err: credentials::Error) -> PhaseError {
    match err {
        credentials::Error::Unavailable { key, notes, .. } => {
            let err = PhaseError::credential_unavailable(&key);
            if notes.is_empty() {
                err
            } else {
                err.with_hint(format!("{} ({})", ErrorKind::CredentialUnavailable.advice(), notes.join("; ")))
            }
        }
        credentials::Error::InvalidSpec { .. } => PhaseError::validation(err.to_string()),
        other => PhaseError::new(ErrorKind::CredentialUnavailable, other.to_string()),
    }
}

/// Hand resolved credentials to an engine under the names `pick` selects
fn engine_vars(ctx: &DeployContext, pick: impl Fn(&SecretEntry) -> Option<&str>) -> PhaseResult<EngineVars> {
    let mut vars = EngineVars::new();
    for entry in &ctx.project.config.secrets {
        let Some(name) = pick(entry) else {
            continue;
        };
        let credential = ctx
            .resolver
            .get(&entry.spec.key)
            .ok_or_else(|| PhaseError::credential_unavailable(&entry.spec.key))?;
        if entry.spec.secret {
            vars.secret(name, SecretString::from(credential.expose().to_string()));
        } else {
            vars.plain(name, credential.expose());
        }
    }
    Ok(vars)
}

/// Record which variable names an engine receives. Values never reach the log.
fn log_engine_call(ctx: &DeployContext, tag: &str, engine: &str, action: &str, vars: &EngineVars) {
    let names = if vars.is_empty() {
        "no variables".to_string()
    } else {
        vars.names().join(", ")
    };
    ctx.log.line(tag, &format!("{engine} {action} with {names}"));
}

// ============================================================================
// Permissions
// ============================================================================

fn repair_permissions(ctx: &mut DeployContext) -> PhaseResult {
    for entry in &ctx.project.config.permissions {
        let task = RepairTask::from_entry(entry);
        let mut fallback: Box<dyn OwnershipOps> = match &entry.remote {
            Some(target) => Box::new(SshOps::new(target, ctx.log.clone())),
            None => Box::new(LocalOps),
        };
        let ops: &mut dyn OwnershipOps = match ctx.ownership.as_deref_mut() {
            Some(ops) => ops,
            None => fallback.as_mut(),
        };

        let outcome = permissions::repair(&task, ops)?;
        let (uid, gid) = task.host_ids()?;
        ctx.log.line(
            "permissions",
            &format!("{} -> {uid}:{gid}: {outcome}", task.host_path.display()),
        );
    }
    Ok(())
}

// ============================================================================
// Provisioning
// ============================================================================

fn provision(ctx: &mut DeployContext) -> PhaseResult {
    let vars = engine_vars(ctx, |e| e.tf_var.as_deref())?;
    ctx.provisioner.init()?;
    ctx.provisioner.validate()?;
    log_engine_call(ctx, "provision", ctx.provisioner.name(), "apply", &vars);
    ctx.outputs = ctx.provisioner.apply(&vars)?;
    ctx.log.line("provision", &format!("{} output(s)", ctx.outputs.len()));
    build_inventory(ctx)
}

fn plan(ctx: &mut DeployContext) -> PhaseResult {
    let vars = engine_vars(ctx, |e| e.tf_var.as_deref())?;
    ctx.provisioner.init()?;
    ctx.provisioner.validate()?;
    log_engine_call(ctx, "plan", ctx.provisioner.name(), "plan", &vars);
    ctx.provisioner.plan(&vars)
}

fn destroy(ctx: &mut DeployContext) -> PhaseResult {
    let vars = engine_vars(ctx, |e| e.tf_var.as_deref())?;
    ctx.provisioner.init()?;
    log_engine_call(ctx, "destroy", ctx.provisioner.name(), "destroy", &vars);
    ctx.provisioner.destroy(&vars)
}

/// Outputs of infrastructure provisioned by an earlier run
fn read_outputs(ctx: &mut DeployContext) -> PhaseResult {
    ctx.outputs = ctx.provisioner.outputs()?;
    if ctx.outputs.is_empty() {
        return Err(PhaseError::validation("no provisioning outputs found")
            .with_hint("Run `proxdeploy deploy` first to create the infrastructure"));
    }
    build_inventory(ctx)
}

fn build_inventory(ctx: &mut DeployContext) -> PhaseResult {
    let Some(configure) = &ctx.project.config.configure else {
        return Ok(());
    };
    let ssh_key = configure.ssh_key.as_deref().map(|key| ctx.project.resolve(key));
    let inventory = Inventory::from_outputs(&ctx.outputs, configure, ssh_key, ctx.project.name())?;
    ctx.log.line(
        "inventory",
        &format!("{} ({}@{})", inventory.hostname, inventory.ssh_user, inventory.address),
    );
    ctx.inventory = Some(inventory);
    Ok(())
}

// ============================================================================
// Reachability, configuration, verification
// ============================================================================

fn wait(ctx: &mut DeployContext) -> PhaseResult {
    let host = ctx.target_host().ok_or_else(|| {
        PhaseError::validation("no address to wait for")
            .with_hint("Set reachability.host or configure.host_output in the project file")
    })?;
    let reachability = &ctx.project.config.reachability;
    let options = WaitOptions::new(reachability.timeout()).with_interval(reachability.interval());

    let pb = progress::spinner(&format!("waiting for {host}:{}", reachability.port), ctx.quiet);
    let result = pipeline::wait_for_port(&host, reachability.port, options);
    progress::finish_clear(&pb);
    let ready = result?;
    ctx.log.line(
        "wait",
        &format!("{} reachable after {} attempt(s) in {:.1?}", ready.addr, ready.attempts, ready.elapsed),
    );

    let check = ctx
        .project
        .config
        .configure
        .as_ref()
        .is_some_and(|c| c.check_connectivity);
    if let (true, Some(inventory)) = (check, ctx.inventory.as_ref()) {
        ctx.log.line("wait", &format!("{} connectivity check", ctx.configurator.name()));
        ctx.configurator.test_connectivity(inventory)?;
    }
    Ok(())
}

fn configure(ctx: &mut DeployContext) -> PhaseResult {
    let Some(config) = &ctx.project.config.configure else {
        return Ok(());
    };
    let inventory = ctx.inventory.as_ref().ok_or_else(|| {
        PhaseError::validation("no inventory for the configuration engine")
            .with_hint(format!("Make sure the provisioning output '{}' exists", config.host_output))
    })?;

    let mut vars = engine_vars(ctx, |e| e.ansible_var.as_deref())?;
    for (name, value) in &config.extra_vars {
        vars.plain(name, value);
    }
    let playbook = ctx.project.resolve(&config.playbook);
    log_engine_call(ctx, "configure", ctx.configurator.name(), &playbook.display().to_string(), &vars);
    ctx.configurator.run(inventory, &playbook, &vars)
}

fn verify(ctx: &mut DeployContext) -> PhaseResult {
    let (Some(verify), Some(host)) = (ctx.project.config.verify.as_ref(), ctx.target_host()) else {
        return Ok(());
    };
    let timeout = Duration::from_secs(verify.timeout_secs);
    let options = WaitOptions::new(timeout).with_interval(Duration::from_secs(1));
    let ready = pipeline::wait_for_port(&host, verify.port, options)?;
    ctx.log.line("verify", &format!("service answering on {}", ready.addr));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ConfigurationEngine, Outputs, ProvisioningEngine};
    use crate::logfile::RunLog;
    use crate::permissions::RepairError;
    use pipeline::{NoObserver, PhaseStatus, RunStatus};
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::net::TcpListener;
    use std::path::PathBuf;
    use std::rc::Rc;

    #[derive(Default, Clone)]
    struct Calls(Rc<RefCell<Vec<String>>>);

    impl Calls {
        fn push(&self, call: impl Into<String>) {
            self.0.borrow_mut().push(call.into());
        }

        fn list(&self) -> Vec<String> {
            self.0.borrow().clone()
        }
    }

    struct MockProvisioner {
        calls: Calls,
        outputs: Outputs,
    }

    impl ProvisioningEngine for MockProvisioner {
        fn name(&self) -> &str {
            "mock"
        }

        fn init(&mut self) -> PhaseResult {
            self.calls.push("init");
            Ok(())
        }

        fn validate(&mut self) -> PhaseResult {
            self.calls.push("validate");
            Ok(())
        }

        fn plan(&mut self, vars: &EngineVars) -> PhaseResult {
            self.calls.push(format!("plan {}", vars.names().join(",")));
            Ok(())
        }

        fn apply(&mut self, vars: &EngineVars) -> PhaseResult<Outputs> {
            self.calls.push(format!("apply {}", vars.names().join(",")));
            Ok(self.outputs.clone())
        }

        fn destroy(&mut self, _vars: &EngineVars) -> PhaseResult {
            self.calls.push("destroy");
            Ok(())
        }

        fn outputs(&mut self) -> PhaseResult<Outputs> {
            self.calls.push("outputs");
            Ok(self.outputs.clone())
        }
    }

    struct MockConfigurator {
        calls: Calls,
        pings: Rc<Cell<u32>>,
        reachable: bool,
    }

    impl ConfigurationEngine for MockConfigurator {
        fn name(&self) -> &str {
            "mock"
        }

        fn test_connectivity(&mut self, _inventory: &Inventory) -> PhaseResult {
            self.pings.set(self.pings.get() + 1);
            if self.reachable {
                Ok(())
            } else {
                Err(PhaseError::connectivity("ping failed"))
            }
        }

        fn run(&mut self, inventory: &Inventory, playbook: &Path, vars: &EngineVars) -> PhaseResult {
            self.calls.push(format!(
                "run {} {} {}",
                inventory.address,
                playbook.file_name().unwrap_or_default().to_string_lossy(),
                vars.names().join(",")
            ));
            Ok(())
        }
    }

    struct CountingOps(Rc<Cell<u32>>);

    impl OwnershipOps for CountingOps {
        fn exists(&mut self, _path: &Path) -> Result<bool, RepairError> {
            Ok(true)
        }

        fn mismatched(&mut self, _path: &Path, _uid: u32, _gid: u32) -> Result<usize, RepairError> {
            Ok(usize::from(self.0.get() == 0))
        }

        fn chown_recursive(&mut self, _path: &Path, _uid: u32, _gid: u32) -> Result<(), RepairError> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    fn project(extra: &str, port: u16) -> Project {
        let toml = format!(
            r#"
            [project]
            name = "netbox"

            [[secrets]]
            key = "proxmox_password"
            sources = ["environment", "interactive_prompt"]
            tf_var = "proxmox_password"

            [[secrets]]
            key = "db_password"
            sources = ["environment"]
            ansible_var = "netbox_db_password"

            [configure]
            playbook = "ansible/site.yml"
            host_output = "container_ip"

            [reachability]
            port = {port}
            timeout_secs = 5
            interval_secs = 1
            retry = {{ max_attempts = 3, delay_secs = 0 }}

            [[permissions]]
            path = "/rpool/data/netbox"
            inside_uid = 100
            inside_gid = 100
            {extra}
            "#
        );
        let config: DeployConfig = toml::from_str(&toml).unwrap();
        config.validate().unwrap();
        Project {
            path: PathBuf::from("/srv/netbox/deploy.toml"),
            root: PathBuf::from("/srv/netbox"),
            config,
        }
    }

    fn env() -> HashMap<String, String> {
        HashMap::from([
            ("PROXMOX_PASSWORD".to_string(), "pve-secret".to_string()),
            ("DB_PASSWORD".to_string(), "db-secret".to_string()),
        ])
    }

    struct Harness {
        ctx: DeployContext,
        provisioner: Calls,
        configurator: Calls,
        pings: Rc<Cell<u32>>,
        chowns: Rc<Cell<u32>>,
    }

    fn harness(project: Project, env: HashMap<String, String>, reachable: bool) -> Harness {
        let provisioner = Calls::default();
        let configurator = Calls::default();
        let pings = Rc::new(Cell::new(0));
        let chowns = Rc::new(Cell::new(0));
        let outputs = Outputs::from([("container_ip".to_string(), "127.0.0.1/24".to_string())]);

        let ctx = DeployContext::new(project, RunLog::disabled(), true, false)
            .with_env(env)
            .with_engines(
                MockProvisioner {
                    calls: provisioner.clone(),
                    outputs,
                },
                MockConfigurator {
                    calls: configurator.clone(),
                    pings: pings.clone(),
                    reachable,
                },
            )
            .with_ownership(CountingOps(chowns.clone()));

        Harness {
            ctx,
            provisioner,
            configurator,
            pings,
            chowns,
        }
    }

    #[test]
    fn test_phase_order_per_command() {
        let config = project("", 22).config;
        assert_eq!(
            build(RunKind::Deploy, &config).names(),
            vec!["credentials", "permissions", "provision", "wait", "configure"]
        );
        assert_eq!(
            build(RunKind::Configure, &config).names(),
            vec!["credentials", "permissions", "outputs", "wait", "configure"]
        );
        assert_eq!(build(RunKind::Plan, &config).names(), vec!["credentials", "plan"]);
        assert_eq!(build(RunKind::Destroy, &config).names(), vec!["credentials", "destroy"]);
    }

    #[test]
    fn test_deploy_runs_every_phase() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let project = project(&format!("[verify]\nport = {port}\ntimeout_secs = 2"), port);
        let mut h = harness(project.clone(), env(), true);

        let report = build(RunKind::Deploy, &project.config).run(&mut h.ctx, &mut NoObserver);

        assert!(report.is_success(), "{:?}", report.error());
        assert_eq!(h.provisioner.list(), vec!["init", "validate", "apply proxmox_password"]);
        assert_eq!(h.configurator.list(), vec!["run 127.0.0.1 site.yml netbox_db_password"]);
        assert_eq!(h.pings.get(), 1);
        assert_eq!(h.chowns.get(), 1);
        assert_eq!(h.ctx.inventory.as_ref().unwrap().hostname, "netbox");
    }

    #[test]
    fn test_run_log_names_engines_without_values() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let project = project("", port);
        let dir = tempfile::TempDir::new().unwrap();
        let mut h = harness(project.clone(), env(), true);
        h.ctx.log = RunLog::create(dir.path(), "deploy.log").unwrap();

        let report = build(RunKind::Deploy, &project.config).run(&mut h.ctx, &mut NoObserver);
        assert!(report.is_success(), "{:?}", report.error());

        let content = std::fs::read_to_string(dir.path().join("deploy.log")).unwrap();
        assert!(content.contains("[credentials] 2 value(s) masked"));
        assert!(content.contains("[provision] mock apply with proxmox_password"));
        assert!(content.contains("[wait] mock connectivity check"));
        assert!(content.contains("site.yml with netbox_db_password"));
        assert!(!content.contains("pve-secret"));
        assert!(!content.contains("db-secret"));
    }

    #[test]
    fn test_unreachable_host_retries_then_aborts() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let project = project("", port);
        let mut h = harness(project.clone(), env(), false);

        let report = build(RunKind::Deploy, &project.config).run(&mut h.ctx, &mut NoObserver);

        assert_eq!(report.status, RunStatus::Aborted);
        let wait = report.phase("wait").unwrap();
        assert_eq!(wait.status, PhaseStatus::Failed);
        assert_eq!(wait.attempts, 3);
        assert_eq!(h.pings.get(), 3);
        assert_eq!(report.phase("configure").unwrap().status, PhaseStatus::Aborted);
        assert!(h.configurator.list().is_empty());
    }

    #[test]
    fn test_missing_credential_stops_before_provisioning() {
        let project = project("", 22);
        let mut env = env();
        env.remove("DB_PASSWORD");
        let mut h = harness(project.clone(), env, true);

        let report = build(RunKind::Deploy, &project.config).run(&mut h.ctx, &mut NoObserver);

        let err = report.error().unwrap();
        assert_eq!(err.kind, ErrorKind::CredentialUnavailable);
        assert!(err.message.contains("db_password"));
        assert_eq!(report.failed_phase().unwrap().name, "credentials");
        assert!(h.provisioner.list().is_empty());
        assert_eq!(h.chowns.get(), 0);
    }

    #[test]
    fn test_preflight_failure_blocks_every_phase() {
        let project = project(
            r#"
            [preflight]
            binaries = [{ name = "sh" }, { name = "proxdeploy-missing-tool", hint = "apt install missing-tool" }]
            "#,
            22,
        );
        let mut h = harness(project.clone(), env(), true);

        let reports = preflight(RunKind::Deploy, &project);
        let binaries = &reports[0];
        assert!(binaries.item("sh").unwrap().passed);
        let missing = binaries.item("proxdeploy-missing-tool").unwrap();
        assert!(!missing.passed);
        assert_eq!(missing.remediation.as_deref(), Some("apt install missing-tool"));

        let report = build(RunKind::Deploy, &project.config).run_checked(&reports, &mut h.ctx, &mut NoObserver);
        assert_eq!(report.status, RunStatus::Aborted);
        assert!(report.phases.iter().all(|p| p.status == PhaseStatus::Aborted));
        assert_eq!(report.blocked_by.unwrap().kind, ErrorKind::PreflightFailed);
        assert!(h.provisioner.list().is_empty());
    }

    #[test]
    fn test_preflight_checks_provision_dir_and_playbook() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("terraform")).unwrap();
        let mut project = project("", 22);
        project.root = dir.path().to_path_buf();

        let reports = preflight(RunKind::Deploy, &project);
        let files = &reports[1];
        assert!(files.item("terraform/").unwrap().passed);
        assert!(!files.items.iter().find(|i| i.name.ends_with("site.yml")).unwrap().passed);

        let names: Vec<&str> = reports[0].items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["terraform", "ansible", "ansible-playbook"]);
    }

    #[test]
    fn test_plan_passes_only_engine_vars() {
        let project = project("", 22);
        let mut h = harness(project.clone(), env(), true);

        let report = build(RunKind::Plan, &project.config).run(&mut h.ctx, &mut NoObserver);
        assert!(report.is_success());
        assert_eq!(h.provisioner.list(), vec!["init", "validate", "plan proxmox_password"]);
    }

    #[test]
    fn test_store_only_needed_when_env_lacks_value() {
        let spec = SecretSpec::new(
            "api_token",
            &[CredentialSource::Environment, CredentialSource::SecretsStoreKv],
        )
        .with_kv("proxmox/api", "token");
        let specs = vec![spec];

        let empty: HashMap<String, String> = HashMap::new();
        assert!(store_required(&specs, &empty));

        let set = HashMap::from([("API_TOKEN".to_string(), "t".to_string())]);
        assert!(!store_required(&specs, &set));
    }
}
