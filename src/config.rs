use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths;
use crate::schema::DeployConfig;

/// File names searched when a directory is given
pub const PROJECT_FILE_NAMES: [&str; 2] = ["deploy.toml", "deploy.json"];

/// Supported project file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Detect the format from a file extension (TOML when unknown)
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }

    pub fn parse(self, content: &str) -> Result<DeployConfig> {
        match self {
            ConfigFormat::Toml => toml::from_str(content).context("Invalid TOML in project file"),
            ConfigFormat::Json => serde_json::from_str(content).context("Invalid JSON in project file"),
        }
    }
}

/// A loaded, validated project file
#[derive(Debug, Clone)]
pub struct Project {
    /// The project file itself
    pub path: PathBuf,
    /// Directory relative paths are anchored at
    pub root: PathBuf,
    pub config: DeployConfig,
}

impl Project {
    /// Find the project file.
    ///
    /// `explicit` may name a file or a directory. Without it the current
    /// directory is searched.
    pub fn locate(explicit: Option<&Path>) -> Result<PathBuf> {
        let start = match explicit {
            Some(path) if path.is_file() => return Ok(path.to_path_buf()),
            Some(path) if path.is_dir() => path.to_path_buf(),
            Some(path) => anyhow::bail!("Project file not found: {}", path.display()),
            None => std::env::current_dir().context("Could not determine current directory")?,
        };

        PROJECT_FILE_NAMES
            .iter()
            .map(|name| start.join(name))
            .find(|candidate| candidate.is_file())
            .with_context(|| {
                format!(
                    "No {} in {} (use --project or {})",
                    PROJECT_FILE_NAMES.join(" or "),
                    start.display(),
                    paths::ENV_PROJECT
                )
            })
    }

    /// Load and validate a project file
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
        let config = ConfigFormat::from_path(path)
            .parse(&content)
            .with_context(|| format!("Could not parse {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid project file {}", path.display()))?;

        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        Ok(Self {
            path: path.to_path_buf(),
            root,
            config,
        })
    }

    /// Locate then load
    pub fn open(explicit: Option<&Path>) -> Result<Self> {
        let path = Self::locate(explicit)?;
        log::debug!("Using project file {}", path.display());
        Self::load(&path)
    }

    pub fn name(&self) -> &str {
        &self.config.project.name
    }

    /// Resolve a path from the project file against its directory
    pub fn resolve(&self, path: &str) -> PathBuf {
        paths::resolve(&self.root, path)
    }

    pub fn provision_dir(&self) -> PathBuf {
        self.resolve(&self.config.provision.dir)
    }

    /// Relative credential files are anchored next to the project file
    pub fn credential_base_dir(&self) -> PathBuf {
        self.root.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
        [project]
        name = "influxdb"

        [provision]
        engine = "tofu"
        dir = "infra"

        [configure]
        playbook = "ansible/site.yml"
    "#;

    #[test]
    fn test_locate_in_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("deploy.toml"), SAMPLE).unwrap();

        let found = Project::locate(Some(dir.path())).unwrap();
        assert_eq!(found, dir.path().join("deploy.toml"));
    }

    #[test]
    fn test_locate_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        assert!(Project::locate(Some(dir.path())).is_err());
        assert!(Project::locate(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.toml");
        fs::write(&path, SAMPLE).unwrap();

        let project = Project::load(&path).unwrap();
        assert_eq!(project.name(), "influxdb");
        assert_eq!(project.provision_dir(), dir.path().join("infra"));
        assert_eq!(project.resolve("ansible/site.yml"), dir.path().join("ansible/site.yml"));
    }

    #[test]
    fn test_load_json_project() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.json");
        fs::write(
            &path,
            r#"{"project": {"name": "pbs"}, "reachability": {"host": "10.0.0.20", "port": 8007}}"#,
        )
        .unwrap();

        let project = Project::load(&path).unwrap();
        assert_eq!(project.config.reachability.port, 8007);
        assert!(project.config.configure.is_none());
    }

    #[test]
    fn test_load_rejects_invalid_project() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.toml");
        fs::write(&path, "[project]\nname = \"\"\n").unwrap();
        assert!(Project::load(&path).is_err());
    }

    #[test]
    fn test_bundled_projects_are_valid() {
        let projects = Path::new(env!("CARGO_MANIFEST_DIR")).join("projects");
        let mut count = 0;
        for entry in fs::read_dir(&projects).unwrap() {
            let dir = entry.unwrap().path();
            if !dir.is_dir() {
                continue;
            }
            let path = Project::locate(Some(&dir)).unwrap();
            let project = Project::load(&path)
                .unwrap_or_else(|e| panic!("{}: {e:#}", path.display()));
            assert!(!project.name().is_empty());
            count += 1;
        }
        assert!(count >= 6, "expected bundled projects, found {count}");
    }
}
