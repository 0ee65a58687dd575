//! Path resolution for proxdeploy
//!
//! # Environment Variables
//!
//! - `PROXDEPLOY_PROJECT` - Project file (or directory holding `deploy.toml`)
//! - `PROXDEPLOY_STATE_DIR` - Override state directory (run logs live below it)
//!
//! # Path Resolution Priority
//!
//! For state_dir():
//! 1. `PROXDEPLOY_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/proxdeploy` (if set)
//! 3. `~/.local/state/proxdeploy`

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Environment variable naming the project file
pub const ENV_PROJECT: &str = "PROXDEPLOY_PROJECT";

/// Overrides the state directory; run logs live below it
pub const ENV_STATE_DIR: &str = "PROXDEPLOY_STATE_DIR";

/// Get the proxdeploy state directory path
pub fn state_dir() -> Result<PathBuf> {
    let path = pick_state_dir(
        std::env::var(ENV_STATE_DIR).ok(),
        std::env::var("XDG_STATE_HOME").ok(),
        dirs::home_dir(),
    )
    .context("Could not determine home directory")?;
    log::debug!("Using state dir: {}", path.display());
    Ok(path)
}

fn pick_state_dir(explicit: Option<String>, xdg_state: Option<String>, home: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(dir) = explicit.filter(|d| !d.is_empty()) {
        return Some(expand(&dir));
    }
    if let Some(xdg) = xdg_state.filter(|d| !d.is_empty()) {
        return Some(PathBuf::from(xdg).join("proxdeploy"));
    }
    home.map(|h| h.join(".local").join("state").join("proxdeploy"))
}

/// Directory holding per-run logs
pub fn log_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("logs"))
}

/// Log file name for one run: `<project>-<command>-<timestamp>.log`
pub fn run_log_name(project: &str, command: &str, at: DateTime<Local>) -> String {
    let project: String = project
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}-{}-{}.log", project, command, at.format("%Y%m%d-%H%M%S"))
}

/// Expand `~` and `$VARS`; unknown variables are kept verbatim
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Expand `path` and anchor it at `base` when relative.
pub fn resolve(base: &Path, path: &str) -> PathBuf {
    let expanded = expand(path);
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_state_dir_priority() {
        let home = Some(PathBuf::from("/home/ops"));
        assert_eq!(
            pick_state_dir(Some("/custom/state".into()), Some("/xdg".into()), home.clone()),
            Some(PathBuf::from("/custom/state"))
        );
        assert_eq!(
            pick_state_dir(None, Some("/xdg".into()), home.clone()),
            Some(PathBuf::from("/xdg/proxdeploy"))
        );
        assert_eq!(
            pick_state_dir(Some(String::new()), None, home),
            Some(PathBuf::from("/home/ops/.local/state/proxdeploy"))
        );
        assert_eq!(pick_state_dir(None, None, None), None);
    }

    #[test]
    fn test_run_log_name() {
        let at = Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        assert_eq!(
            run_log_name("nginx proxy/manager", "deploy", at),
            "nginx_proxy_manager-deploy-20260314-092653.log"
        );
    }

    #[test]
    fn test_expand_with_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand("~/.ssh/id_ed25519"), home.join(".ssh").join("id_ed25519"));
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let base = Path::new("/srv/projects/vault");
        assert_eq!(resolve(base, "terraform"), PathBuf::from("/srv/projects/vault/terraform"));
        assert_eq!(resolve(base, "/etc/pve"), PathBuf::from("/etc/pve"));
    }

    #[test]
    fn test_unknown_variable_left_alone() {
        assert_eq!(
            expand("/rpool/$PROXDEPLOY_TEST_UNSET_VAR/data"),
            PathBuf::from("/rpool/$PROXDEPLOY_TEST_UNSET_VAR/data")
        );
    }
}
