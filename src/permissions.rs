//! Ownership repair for bind-mounted data volumes
//!
//! An unprivileged container sees its files owned by `inside_uid`, while the
//! host stores them as `namespace_offset + inside_uid`. A data directory
//! created on the host with the wrong owner leaves the service unable to
//! write, so the run fixes ownership before the service is configured.

use pipeline::{ErrorKind, PhaseError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use crate::logfile::RunLog;
use crate::runner;
use crate::schema::PermissionEntry;

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("{} does not exist", path.display())]
    Missing { path: PathBuf },

    #[error("namespace offset {offset} + id {id} overflows")]
    Overflow { offset: u32, id: u32 },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{target}: {message}")]
    Remote { target: String, message: String },
}

impl From<RepairError> for PhaseError {
    fn from(err: RepairError) -> Self {
        let hint = match &err {
            RepairError::Missing { .. } => "Create the data directory on the Proxmox host first",
            RepairError::Overflow { .. } => "Check namespace_offset and the inside ids in the project file",
            RepairError::Io { .. } => "Run as root on the Proxmox host, or set `remote` to reach it over ssh",
            RepairError::Remote { .. } => "Check ssh access to the Proxmox node as root",
        };
        PhaseError::new(ErrorKind::PermissionRepair, err.to_string()).with_hint(hint)
    }
}

/// One volume to fix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairTask {
    pub host_path: PathBuf,
    pub inside_uid: u32,
    pub inside_gid: u32,
    pub namespace_offset: u32,
}

impl RepairTask {
    pub fn from_entry(entry: &PermissionEntry) -> Self {
        Self {
            host_path: crate::paths::expand(&entry.path),
            inside_uid: entry.inside_uid,
            inside_gid: entry.inside_gid,
            namespace_offset: entry.namespace_offset,
        }
    }

    /// Host-side (uid, gid)
    pub fn host_ids(&self) -> Result<(u32, u32), RepairError> {
        let shift = |id: u32| {
            self.namespace_offset
                .checked_add(id)
                .ok_or(RepairError::Overflow {
                    offset: self.namespace_offset,
                    id,
                })
        };
        Ok((shift(self.inside_uid)?, shift(self.inside_gid)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Ownership was changed on this many entries
    Applied { changed: usize },
    /// Everything already matched
    NoChange,
}

impl fmt::Display for RepairOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairOutcome::Applied { changed } => write!(f, "fixed {changed} entries"),
            RepairOutcome::NoChange => f.write_str("already correct"),
        }
    }
}

/// Filesystem operations the repair needs
pub trait OwnershipOps {
    fn exists(&mut self, path: &Path) -> Result<bool, RepairError>;
    /// Number of entries under `path` (inclusive) not owned by `uid:gid`
    fn mismatched(&mut self, path: &Path, uid: u32, gid: u32) -> Result<usize, RepairError>;
    fn chown_recursive(&mut self, path: &Path, uid: u32, gid: u32) -> Result<(), RepairError>;
}

/// Fix ownership of `task.host_path`, touching nothing when it already matches
pub fn repair(task: &RepairTask, ops: &mut dyn OwnershipOps) -> Result<RepairOutcome, RepairError> {
    let (uid, gid) = task.host_ids()?;
    let path = task.host_path.as_path();

    if !ops.exists(path)? {
        return Err(RepairError::Missing {
            path: path.to_path_buf(),
        });
    }

    let changed = ops.mismatched(path, uid, gid)?;
    if changed == 0 {
        log::debug!("{} already owned by {uid}:{gid}", path.display());
        return Ok(RepairOutcome::NoChange);
    }

    log::info!(
        "changing ownership of {} ({changed} entries) to {uid}:{gid}",
        path.display()
    );
    ops.chown_recursive(path, uid, gid)?;
    Ok(RepairOutcome::Applied { changed })
}

// ============================================================================
// Local
// ============================================================================

/// Operations on the local filesystem (orchestrator runs on the Proxmox host)
#[derive(Debug, Default)]
pub struct LocalOps;

#[cfg(unix)]
impl OwnershipOps for LocalOps {
    fn exists(&mut self, path: &Path) -> Result<bool, RepairError> {
        Ok(path.symlink_metadata().is_ok())
    }

    fn mismatched(&mut self, path: &Path, uid: u32, gid: u32) -> Result<usize, RepairError> {
        use std::os::unix::fs::MetadataExt;

        let mut count = 0;
        for entry in walkdir::WalkDir::new(path).follow_links(false) {
            let entry = entry.map_err(|e| walk_error(path, e))?;
            let meta = entry.metadata().map_err(|e| walk_error(entry.path(), e))?;
            if meta.uid() != uid || meta.gid() != gid {
                count += 1;
            }
        }
        Ok(count)
    }

    fn chown_recursive(&mut self, path: &Path, uid: u32, gid: u32) -> Result<(), RepairError> {
        use std::os::unix::fs::MetadataExt;

        for entry in walkdir::WalkDir::new(path).follow_links(false) {
            let entry = entry.map_err(|e| walk_error(path, e))?;
            let meta = entry.metadata().map_err(|e| walk_error(entry.path(), e))?;
            if meta.uid() == uid && meta.gid() == gid {
                continue;
            }
            std::os::unix::fs::lchown(entry.path(), Some(uid), Some(gid)).map_err(|source| {
                RepairError::Io {
                    path: entry.path().to_path_buf(),
                    source,
                }
            })?;
        }
        Ok(())
    }
}

fn walk_error(path: &Path, err: walkdir::Error) -> RepairError {
    RepairError::Io {
        path: err.path().unwrap_or(path).to_path_buf(),
        source: err
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
    }
}

// ============================================================================
// Remote (ssh)
// ============================================================================

/// Operations on a Proxmox node reached over ssh
pub struct SshOps {
    target: String,
    log: RunLog,
}

impl SshOps {
    pub fn new(target: impl Into<String>, log: RunLog) -> Self {
        Self {
            target: target.into(),
            log,
        }
    }

    fn ssh(&self, script: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(["-o", "BatchMode=yes", "-o", "ConnectTimeout=10", "--"])
            .arg(&self.target)
            .arg(script);
        cmd
    }

    fn remote_error(&self, message: impl Into<String>) -> RepairError {
        RepairError::Remote {
            target: self.target.clone(),
            message: message.into(),
        }
    }
}

impl OwnershipOps for SshOps {
    fn exists(&mut self, path: &Path) -> Result<bool, RepairError> {
        let script = format!("test -e {}", shell_quote(path));
        let status = runner::run_status(&mut self.ssh(&script))
            .map_err(|e| self.remote_error(format!("{e:#}")))?;
        // ssh itself exits 255 on connection or auth failure
        match status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(self.remote_error(format!("ssh exited with {}", runner::status_label(status)))),
        }
    }

    fn mismatched(&mut self, path: &Path, uid: u32, gid: u32) -> Result<usize, RepairError> {
        let script = mismatch_script(path, uid, gid);
        let out = runner::run_capture(&mut self.ssh(&script)).map_err(|e| self.remote_error(format!("{e:#}")))?;
        out.trim()
            .parse()
            .map_err(|_| self.remote_error(format!("unexpected output from find: {out:?}")))
    }

    fn chown_recursive(&mut self, path: &Path, uid: u32, gid: u32) -> Result<(), RepairError> {
        let script = format!("chown -R -h {uid}:{gid} {}", shell_quote(path));
        let status = runner::run_logged(&mut self.ssh(&script), &self.log, true)
            .map_err(|e| self.remote_error(format!("{e:#}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(self.remote_error(format!("chown exited with {}", runner::status_label(status))))
        }
    }
}

/// Count entries not owned by `uid:gid`
fn mismatch_script(path: &Path, uid: u32, gid: u32) -> String {
    format!(
        "find {} \\( ! -uid {uid} -o ! -gid {gid} \\) -print | wc -l",
        shell_quote(path)
    )
}

/// Single-quote a path for a POSIX shell
fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::rc::Rc;

    /// In-memory tree: path -> (uid, gid)
    struct MemoryOps {
        owners: HashMap<PathBuf, (u32, u32)>,
        chowns: Rc<Cell<u32>>,
    }

    impl MemoryOps {
        fn new(entries: &[(&str, u32, u32)], chowns: Rc<Cell<u32>>) -> Self {
            Self {
                owners: entries
                    .iter()
                    .map(|(p, u, g)| (PathBuf::from(p), (*u, *g)))
                    .collect(),
                chowns,
            }
        }
    }

    impl OwnershipOps for MemoryOps {
        fn exists(&mut self, path: &Path) -> Result<bool, RepairError> {
            Ok(self.owners.contains_key(path))
        }

        fn mismatched(&mut self, path: &Path, uid: u32, gid: u32) -> Result<usize, RepairError> {
            Ok(self
                .owners
                .iter()
                .filter(|(p, _)| p.starts_with(path))
                .filter(|(_, ids)| **ids != (uid, gid))
                .count())
        }

        fn chown_recursive(&mut self, path: &Path, uid: u32, gid: u32) -> Result<(), RepairError> {
            self.chowns.set(self.chowns.get() + 1);
            for (p, ids) in &mut self.owners {
                if p.starts_with(path) {
                    *ids = (uid, gid);
                }
            }
            Ok(())
        }
    }

    fn task() -> RepairTask {
        RepairTask {
            host_path: PathBuf::from("/rpool/data/vault"),
            inside_uid: 100,
            inside_gid: 1000,
            namespace_offset: 100_000,
        }
    }

    #[test]
    fn test_host_ids_add_offset() {
        assert_eq!(task().host_ids().unwrap(), (100_100, 101_000));

        let overflow = RepairTask {
            namespace_offset: u32::MAX,
            ..task()
        };
        assert!(matches!(overflow.host_ids(), Err(RepairError::Overflow { .. })));
    }

    #[test]
    fn test_repair_twice_is_no_change() {
        let chowns = Rc::new(Cell::new(0));
        let mut ops = MemoryOps::new(
            &[
                ("/rpool/data/vault", 0, 0),
                ("/rpool/data/vault/raft.db", 0, 0),
                ("/rpool/data/vault/ok", 100_100, 101_000),
            ],
            chowns.clone(),
        );

        let first = repair(&task(), &mut ops).unwrap();
        assert_eq!(first, RepairOutcome::Applied { changed: 2 });
        assert_eq!(chowns.get(), 1);

        let second = repair(&task(), &mut ops).unwrap();
        assert_eq!(second, RepairOutcome::NoChange);
        assert_eq!(chowns.get(), 1);
    }

    #[test]
    fn test_missing_path_is_error() {
        let chowns = Rc::new(Cell::new(0));
        let mut ops = MemoryOps::new(&[], chowns.clone());
        let err = repair(&task(), &mut ops).unwrap_err();
        assert!(matches!(err, RepairError::Missing { .. }));

        let phase: PhaseError = err.into();
        assert_eq!(phase.kind, ErrorKind::PermissionRepair);
        assert!(phase.hint.is_some());
        assert_eq!(chowns.get(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_local_ops_already_owned() {
        use std::os::unix::fs::MetadataExt;
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("file"), "x").unwrap();
        let meta = std::fs::metadata(dir.path()).unwrap();

        let task = RepairTask {
            host_path: dir.path().to_path_buf(),
            inside_uid: meta.uid(),
            inside_gid: meta.gid(),
            namespace_offset: 0,
        };
        assert_eq!(repair(&task, &mut LocalOps).unwrap(), RepairOutcome::NoChange);
    }

    #[cfg(unix)]
    #[test]
    fn test_local_ops_counts_mismatches() {
        use std::os::unix::fs::MetadataExt;
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/file"), "x").unwrap();
        let meta = std::fs::metadata(dir.path()).unwrap();

        let count = LocalOps
            .mismatched(dir.path(), meta.uid().wrapping_add(1), meta.gid())
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_unreachable_node_is_remote_error() {
        let mut ops = SshOps::new("root@pve-node.invalid", RunLog::disabled());
        let task = RepairTask {
            host_path: PathBuf::from("/"),
            ..task()
        };

        let err = repair(&task, &mut ops).unwrap_err();
        assert!(matches!(err, RepairError::Remote { .. }), "{err}");

        let phase: PhaseError = err.into();
        assert_eq!(phase.hint.as_deref(), Some("Check ssh access to the Proxmox node as root"));
    }

    #[test]
    fn test_remote_scripts_quote_paths() {
        assert_eq!(shell_quote(Path::new("/data/it's")), r"'/data/it'\''s'");
        assert_eq!(
            mismatch_script(Path::new("/rpool/data"), 100_100, 101_000),
            r"find '/rpool/data' \( ! -uid 100100 -o ! -gid 101000 \) -print | wc -l"
        );
    }
}
