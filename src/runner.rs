use anyhow::{Context, Result};
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use tempfile::NamedTempFile;

use crate::logfile::RunLog;

/// Render a command line for display and the run log
pub fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|arg| {
            let arg = arg.to_string_lossy();
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("'{arg}'")
            } else {
                arg.into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a command, streaming its output to the console and the run log
///
/// Output lines are scrubbed before they are shown or written. With `quiet`
/// the console stays silent and only the log receives output.
pub fn run_logged(cmd: &mut Command, log: &RunLog, quiet: bool) -> Result<ExitStatus> {
    let line = describe(cmd);
    log.line("exec", &format!("$ {line}"));
    log::debug!("exec: {line}");

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to execute: {line}"))?;

    let stdout = child.stdout.take().context("child stdout was not captured")?;
    let stderr = child.stderr.take().context("child stderr was not captured")?;

    std::thread::scope(|s| {
        s.spawn(|| pump(stderr, log, "stderr", quiet));
        pump(stdout, log, "stdout", quiet);
    });

    let status = child
        .wait()
        .with_context(|| format!("Failed to wait for: {line}"))?;
    log.line("exec", &format!("exit status: {}", status_label(status)));
    Ok(status)
}

fn pump(stream: impl Read, log: &RunLog, tag: &str, quiet: bool) {
    for line in BufReader::new(stream).lines() {
        let Ok(line) = line else {
            break;
        };
        log.output(tag, &line);
        if !quiet {
            let shown = log.scrub(&line);
            if tag == "stderr" {
                eprintln!("  {shown}");
            } else {
                println!("  {shown}");
            }
        }
    }
}

/// Run a command and capture stdout
///
/// Nothing is written to the run log; callers use this for output that may
/// hold secrets (e.g. engine outputs).
pub fn run_capture(cmd: &mut Command) -> Result<String> {
    let line = describe(cmd);
    log::debug!("capture: {line}");
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to execute: {line}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("Command failed ({}): {}", status_label(output.status), stderr.trim())
    }
}

/// Run a command silently and hand back its exit status
pub fn run_status(cmd: &mut Command) -> Result<ExitStatus> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .with_context(|| format!("Failed to run {}", describe(cmd)))
}

pub fn status_label(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => code.to_string(),
        None => "terminated by signal".to_string(),
    }
}

/// Write secret material to a transient file only the owner can read
///
/// The file is deleted when the returned handle is dropped.
pub fn secret_file(suffix: &str, contents: &[u8]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("proxdeploy-")
        .suffix(suffix)
        .tempfile()
        .context("Could not create temporary file")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))
            .context("Could not restrict temporary file permissions")?;
    }

    file.write_all(contents)
        .and_then(|()| file.flush())
        .context("Could not write temporary file")?;
    Ok(file)
}
