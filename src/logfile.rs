//! Per-run log file with secret redaction.
//!
//! Every phase transition and every line of engine output goes through
//! [`RunLog`]. Values registered with [`RunLog::redact`] are replaced before
//! anything reaches the disk.

use anyhow::{Context, Result};
use chrono::Local;
use pipeline::{PhaseError, PhaseObserver, PhaseReport, PhaseStatus, RunReport};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

const MASK: &str = "********";

/// `password=...`, `token: ...` style assignments that slipped through
static ASSIGNMENT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?i)((?:password|passwd|secret|token|api_key|access_key|secret_key)["']?\s*[=:]\s*["']?)([^\s"',}]+)"#)
        .ok()
});

/// Replaces registered secret values and obvious assignments.
#[derive(Default)]
pub struct Redactor {
    secrets: Vec<SecretString>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value to scrub. Empty values are ignored.
    pub fn add(&mut self, value: &str) {
        if value.is_empty() || self.secrets.iter().any(|s| s.expose_secret() == value) {
            return;
        }
        self.secrets.push(SecretString::from(value.to_string()));
        // Longest first so a secret containing another is masked whole
        self.secrets
            .sort_by_key(|s| std::cmp::Reverse(s.expose_secret().len()));
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn apply(&self, line: &str) -> String {
        let mut out = line.to_string();
        for secret in &self.secrets {
            let value = secret.expose_secret();
            if out.contains(value) {
                out = out.replace(value, MASK);
            }
        }
        if let Some(re) = ASSIGNMENT.as_ref() {
            out = re.replace_all(&out, format!("${{1}}{MASK}")).into_owned();
        }
        out
    }
}

struct Inner {
    file: Option<File>,
    path: Option<PathBuf>,
    redactor: Redactor,
}

/// Shared handle to the run log. Clones write to the same file.
#[derive(Clone)]
pub struct RunLog {
    inner: Arc<Mutex<Inner>>,
}

impl RunLog {
    /// Create `dir/name`, readable by the owner only.
    pub fn create(dir: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("Could not create {}", dir.display()))?;
        let path = dir.join(name);

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options
            .open(&path)
            .with_context(|| format!("Could not open run log {}", path.display()))?;

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                file: Some(file),
                path: Some(path),
                redactor: Redactor::new(),
            })),
        })
    }

    /// A log that discards everything (used by read-only commands and tests).
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                file: None,
                path: None,
                redactor: Redactor::new(),
            })),
        }
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.inner.lock().ok().and_then(|inner| inner.path.clone())
    }

    /// Never write `value` to the log.
    pub fn redact(&self, value: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.redactor.add(value);
        }
    }

    /// Number of distinct values being masked.
    pub fn redaction_count(&self) -> usize {
        self.inner.lock().map_or(0, |inner| inner.redactor.len())
    }

    /// Scrub a line the same way the file writer does.
    pub fn scrub(&self, line: &str) -> String {
        match self.inner.lock() {
            Ok(inner) => inner.redactor.apply(line),
            Err(_) => MASK.to_string(),
        }
    }

    /// Append a timestamped line.
    pub fn line(&self, tag: &str, message: &str) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let scrubbed = inner.redactor.apply(message);
        if let Some(file) = inner.file.as_mut() {
            let stamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f");
            if let Err(e) = writeln!(file, "{stamp} [{tag}] {scrubbed}") {
                log::debug!("run log write failed: {e}");
            }
        }
    }

    pub fn event(&self, message: &str) {
        self.line("run", message);
    }

    /// Record one line of child process output.
    pub fn output(&self, stream: &str, line: &str) {
        self.line(stream, line);
    }

    fn phase_error(&self, name: &str, err: &PhaseError) {
        self.line(name, &format!("error: {err}"));
        self.line(name, &format!("hint: {}", err.remediation()));
        if let Some(code) = err.exit_code {
            self.line(name, &format!("exit code: {code}"));
        }
    }
}

impl PhaseObserver for RunLog {
    fn on_run_start(&mut self, total: usize) {
        self.event(&format!("starting {total} phases"));
    }

    fn on_phase_start(&mut self, index: usize, total: usize, name: &str) {
        self.line(name, &format!("phase {}/{total} running", index + 1));
    }

    fn on_retry(&mut self, name: &str, attempt: u32, max: u32, error: &PhaseError, delay: Duration) {
        self.line(
            name,
            &format!("attempt {attempt}/{max} failed ({error}), retrying in {delay:?}"),
        );
    }

    fn on_phase_finish(&mut self, report: &PhaseReport) {
        let outcome = match report.status {
            PhaseStatus::Failed if report.best_effort => "failed (best effort)".to_string(),
            status => status.to_string(),
        };
        self.line(
            &report.name,
            &format!(
                "{outcome} after {} attempt(s) in {:.3}s",
                report.attempts,
                report.duration.as_secs_f64()
            ),
        );
        if let Some(err) = &report.error {
            self.phase_error(&report.name, err);
        }
    }

    fn on_run_finish(&mut self, report: &RunReport) {
        if let Some(err) = &report.blocked_by {
            self.phase_error("preflight", err);
        }
        self.event(&format!(
            "run {} in {:.3}s (exit {})",
            report.status,
            report.duration.as_secs_f64(),
            report.exit_code()
        ));
    }
}
