//! Preflight checks: required binaries and files
//!
//! Both checks are read-only and complete in bounded time. A failing
//! report blocks the whole run before the first phase starts.

use crate::error::{ErrorKind, PhaseError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A binary that must be found in `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryRequirement {
    pub name: String,
    /// Install command or other remediation
    #[serde(default)]
    pub hint: Option<String>,
}

impl BinaryRequirement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// A file that must exist before deploying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRequirement {
    pub path: PathBuf,
    #[serde(default)]
    pub hint: Option<String>,
}

impl FileRequirement {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Result of checking one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckItem {
    pub name: String,
    pub passed: bool,
    /// Resolved location when the item passed
    pub detail: Option<String>,
    /// Remediation when the item failed
    pub remediation: Option<String>,
}

/// A titled list of check results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub title: String,
    pub items: Vec<CheckItem>,
}

impl Report {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            items: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.items.iter().all(|i| i.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckItem> {
        self.items.iter().filter(|i| !i.passed)
    }

    pub fn item(&self, name: &str) -> Option<&CheckItem> {
        self.items.iter().find(|i| i.name == name)
    }
}

/// Check that every binary resolves in `PATH`.
pub fn check_binaries(requirements: &[BinaryRequirement]) -> Report {
    let mut report = Report::new("Required binaries");
    for req in requirements {
        let item = match which::which(&req.name) {
            Ok(path) => CheckItem {
                name: req.name.clone(),
                passed: true,
                detail: Some(path.display().to_string()),
                remediation: None,
            },
            Err(_) => CheckItem {
                name: req.name.clone(),
                passed: false,
                detail: None,
                remediation: Some(
                    req.hint
                        .clone()
                        .unwrap_or_else(|| format!("Install '{}' and make sure it is in PATH", req.name)),
                ),
            },
        };
        report.items.push(item);
    }
    report
}

/// Check that every file exists, resolving relative paths against `base`.
pub fn check_files(base: &Path, requirements: &[FileRequirement]) -> Report {
    let mut report = Report::new("Required files");
    for req in requirements {
        let path = if req.path.is_absolute() {
            req.path.clone()
        } else {
            base.join(&req.path)
        };
        let passed = path.is_file();
        report.items.push(CheckItem {
            name: req.path.display().to_string(),
            passed,
            detail: passed.then(|| path.display().to_string()),
            remediation: (!passed).then(|| {
                req.hint
                    .clone()
                    .unwrap_or_else(|| format!("Create {}", path.display()))
            }),
        });
    }
    report
}

/// Collapse a set of reports into a single blocking error, if any failed.
pub fn gate(reports: &[Report]) -> Result<(), PhaseError> {
    let failed: Vec<&CheckItem> = reports.iter().flat_map(Report::failures).collect();
    if failed.is_empty() {
        return Ok(());
    }

    let names: Vec<&str> = failed.iter().map(|i| i.name.as_str()).collect();
    let hints: Vec<&str> = failed
        .iter()
        .filter_map(|i| i.remediation.as_deref())
        .collect();

    Err(
        PhaseError::new(ErrorKind::PreflightFailed, format!("missing: {}", names.join(", ")))
            .with_hint(hints.join("; ")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_binary_fails_with_hint() {
        let report = check_binaries(&[
            BinaryRequirement::new("sh"),
            BinaryRequirement::new("proxdeploy-surely-missing-binary").with_hint("apt install b"),
        ]);

        assert!(!report.is_ok());
        assert!(report.item("sh").unwrap().passed);

        let missing = report.item("proxdeploy-surely-missing-binary").unwrap();
        assert!(!missing.passed);
        assert_eq!(missing.remediation.as_deref(), Some("apt install b"));
    }

    #[test]
    fn test_missing_binary_default_hint() {
        let report = check_binaries(&[BinaryRequirement::new("proxdeploy-nope")]);
        let item = report.item("proxdeploy-nope").unwrap();
        assert!(item.remediation.as_deref().unwrap().contains("proxdeploy-nope"));
    }

    #[test]
    fn test_check_files_relative_to_base() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("terraform.tfvars"), "x = 1").unwrap();

        let report = check_files(
            dir.path(),
            &[
                FileRequirement::new("terraform.tfvars"),
                FileRequirement::new("missing.yml").with_hint("copy missing.yml.example"),
            ],
        );

        assert!(report.item("terraform.tfvars").unwrap().passed);
        let missing = report.item("missing.yml").unwrap();
        assert!(!missing.passed);
        assert_eq!(missing.remediation.as_deref(), Some("copy missing.yml.example"));
    }

    #[test]
    fn test_directory_is_not_a_file() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("ansible")).unwrap();
        let report = check_files(dir.path(), &[FileRequirement::new("ansible")]);
        assert!(!report.is_ok());
    }

    #[test]
    fn test_gate() {
        let ok = check_binaries(&[BinaryRequirement::new("sh")]);
        assert!(gate(std::slice::from_ref(&ok)).is_ok());

        let bad = check_binaries(&[BinaryRequirement::new("proxdeploy-nope").with_hint("get it")]);
        let err = gate(&[ok, bad]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PreflightFailed);
        assert!(err.message.contains("proxdeploy-nope"));
        assert_eq!(err.remediation(), "get it");
    }
}
