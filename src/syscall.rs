// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External program invocation.
//!
//! Some work is left to external programs: `ssh`, `ssh-keygen`, `git merge`,
//! and `cargo install`. These helpers run them either attached to the user's
//! terminal, or detached with their output captured.

use std::{
    ffi::OsStr,
    io,
    path::Path,
    process::{Command, ExitStatus},
};
use tracing::debug;

/// Run program attached to current terminal, and wait for it to finish.
///
/// # Errors
///
/// - Return [`SyscallError`] if program cannot be spawned or exits with
///   failure.
pub fn syscall_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<()> {
    debug!("run {:?} interactively", cmd.as_ref());
    let status = Command::new(cmd.as_ref())
        .args(args)
        .spawn()
        .map_err(|err| SyscallError::spawn(cmd.as_ref(), err))?
        .wait()
        .map_err(|err| SyscallError::spawn(cmd.as_ref(), err))?;

    if !status.success() {
        return Err(SyscallError::Failed {
            command: cmd.as_ref().to_string_lossy().into_owned(),
            message: format!("exited with {status}"),
        });
    }

    Ok(())
}

/// Run program with output captured, and fail if it exits with failure.
///
/// Returns the combined stdout and stderr of the program.
///
/// # Errors
///
/// - Return [`SyscallError`] if program cannot be spawned or exits with
///   failure.
pub fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<String> {
    let (status, message) = syscall_output(cmd.as_ref(), args, None)?;
    if !status.success() {
        return Err(SyscallError::Failed {
            command: cmd.as_ref().to_string_lossy().into_owned(),
            message,
        });
    }

    Ok(message)
}

/// Run program with output captured regardless of its exit status.
///
/// Some programs, e.g., `ssh -T`, report useful information through a
/// failing exit status.
///
/// # Errors
///
/// - Return [`SyscallError::Spawn`] if program cannot be spawned.
pub fn syscall_output(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    cwd: Option<&Path>,
) -> Result<(ExitStatus, String)> {
    let mut command = Command::new(cmd.as_ref());
    command.args(args);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    debug!("run {command:?}");
    let output = command
        .output()
        .map_err(|err| SyscallError::spawn(cmd.as_ref(), err))?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
    let mut message = String::new();

    if !stdout.is_empty() {
        message.push_str(stdout.as_str());
    }

    if !stderr.is_empty() {
        message.push_str(stderr.as_str());
    }

    // INVARIANT: Chomp trailing newlines.
    let message = message.trim_end_matches(['\r', '\n']).to_string();
    debug!("{message}");

    Ok((output.status, message))
}

/// External program error types.
#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    /// Program cannot be spawned, usually because it is not installed.
    #[error("failed to run {command:?}")]
    Spawn {
        #[source]
        source: io::Error,
        command: String,
    },

    /// Program exits with failure.
    #[error("command {command:?} failed:\n{message}")]
    Failed { command: String, message: String },
}

impl SyscallError {
    fn spawn(cmd: &OsStr, source: io::Error) -> Self {
        Self::Spawn {
            source,
            command: cmd.to_string_lossy().into_owned(),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = SyscallError> = std::result::Result<T, E>;

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn captures_output_of_failing_program() -> anyhow::Result<()> {
        let (status, message) = syscall_output("sh", ["-c", "echo out; echo err >&2; exit 1"], None)?;
        assert!(!status.success());
        assert_eq!(message, "out\nerr");

        Ok(())
    }

    #[test]
    fn non_interactive_reports_failure() {
        let result = syscall_non_interactive("sh", ["-c", "echo nope >&2; exit 3"]);
        assert!(matches!(
            result,
            Err(SyscallError::Failed { ref message, .. }) if message == "nope"
        ));
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let result = syscall_non_interactive("updot-no-such-program", ["--version"]);
        assert!(matches!(result, Err(SyscallError::Spawn { .. })));
    }
}
