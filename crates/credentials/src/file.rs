//! Field extraction from local credential files.
//!
//! Supported layouts, chosen by extension:
//!
//! - `.json`: dotted path into the document (`proxmox.token`)
//! - `.toml`: dotted path into the document
//! - anything else: `key = value` lines (`terraform.tfvars`, `.env`, `KEY=value`)

use crate::error::{Error, Result};
use regex::Regex;
use secrecy::SecretString;
use std::path::Path;
use std::sync::LazyLock;
use zeroize::Zeroizing;

static ASSIGNMENT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:export\s+)?([A-Za-z_][A-Za-z0-9_.\-]*)\s*=\s*(.*?)\s*$").ok()
});

/// Read `field` from the file at `path`.
///
/// A missing file or field is `Ok(None)`. An unreadable or malformed file is
/// an error.
pub fn read_field(path: &Path, field: &str) -> Result<Option<SecretString>> {
    if !path.is_file() {
        log::debug!("credential file {} does not exist", path.display());
        return Ok(None);
    }

    warn_if_insecure(path);

    let contents = std::fs::read_to_string(path)
        .map(Zeroizing::new)
        .map_err(|e| Error::File {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let value = match extension {
        "json" => from_json(&contents, field).map_err(|message| Error::File {
            path: path.to_path_buf(),
            message,
        })?,
        "toml" => from_toml(&contents, field).map_err(|message| Error::File {
            path: path.to_path_buf(),
            message,
        })?,
        _ => from_assignments(&contents, field),
    };

    Ok(value
        .filter(|v| !v.is_empty())
        .map(SecretString::from))
}

fn from_json(contents: &str, field: &str) -> std::result::Result<Option<String>, String> {
    let doc: serde_json::Value = serde_json::from_str(contents).map_err(|e| e.to_string())?;
    let mut node = &doc;
    for part in field.split('.') {
        match node.get(part) {
            Some(next) => node = next,
            None => return Ok(None),
        }
    }
    Ok(match node {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn from_toml(contents: &str, field: &str) -> std::result::Result<Option<String>, String> {
    let doc: toml::Table = toml::from_str(contents).map_err(|e| e.to_string())?;
    let mut parts = field.split('.');
    let Some(first) = parts.next() else {
        return Ok(None);
    };
    let mut node = match doc.get(first) {
        Some(v) => v,
        None => return Ok(None),
    };
    for part in parts {
        match node.get(part) {
            Some(next) => node = next,
            None => return Ok(None),
        }
    }
    Ok(match node {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    })
}

/// `key = "value"` / `KEY=value` lines. Comments start with `#` or `//`.
/// The last assignment wins.
fn from_assignments(contents: &str, field: &str) -> Option<String> {
    let re = ASSIGNMENT.as_ref()?;
    let mut found = None;
    for line in contents.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') || trimmed.starts_with("//") {
            continue;
        }
        let Some(caps) = re.captures(line) else {
            continue;
        };
        if &caps[1] == field {
            found = Some(unquote(&caps[2]).to_string());
        }
    }
    found
}

fn unquote(raw: &str) -> &str {
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return &raw[1..raw.len() - 1];
        }
    }
    raw
}

/// Whether group or other can read the file.
#[cfg(unix)]
pub fn is_insecure(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o077 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_insecure(_path: &Path) -> bool {
    false
}

fn warn_if_insecure(path: &Path) {
    if is_insecure(path) {
        log::warn!(
            "{} is readable by other users; run: chmod 600 {}",
            path.display(),
            path.display()
        );
    }
}
