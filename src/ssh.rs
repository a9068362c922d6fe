// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! SSH access to the hosting service.
//!
//! Pushing and pulling go through SSH, so the user needs a key pair that the
//! hosting service knows about. Access is probed with `ssh -T`, which always
//! exits with failure against GitHub, so its output is what decides.

use crate::{
    hosting::{Credentials, HostingClient, HostingError},
    syscall::{syscall_interactive, syscall_non_interactive, syscall_output, SyscallError},
};

use std::{
    env, fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Result of probing SSH access to a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshAccess {
    /// Host accepted our key.
    Granted,

    /// Host refused our key.
    Denied,

    /// Anything else, e.g., host unreachable.
    Unknown(String),
}

impl SshAccess {
    /// Classify output of `ssh -T`.
    pub fn from_output(output: &str) -> Self {
        if output.contains("successfully authenticated") {
            Self::Granted
        } else if output.contains("Permission denied") || output.contains("denied") {
            Self::Denied
        } else {
            Self::Unknown(output.to_string())
        }
    }
}

/// Probe SSH access to `git@host`.
///
/// Batch mode stops `ssh` from asking for passwords, and new host keys are
/// accepted on first contact.
///
/// # Errors
///
/// - Return [`SshError::Syscall`] if `ssh` cannot be run.
#[instrument(level = "debug")]
pub fn probe_access(host: &str) -> Result<SshAccess> {
    info!("checking ssh access to {host}...");
    let destination = format!("git@{host}");
    let (_, output) = syscall_output(
        "ssh",
        [
            "-T",
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=accept-new",
            destination.as_str(),
        ],
        None,
    )?;

    let access = SshAccess::from_output(&output);
    debug!("ssh access: {access:?}");
    Ok(access)
}

/// Find an existing public key in an SSH directory.
///
/// Prefers ed25519 over RSA.
pub fn find_public_key(ssh_dir: impl AsRef<Path>) -> Option<PathBuf> {
    ["id_ed25519.pub", "id_rsa.pub"]
        .into_iter()
        .map(|name| ssh_dir.as_ref().join(name))
        .find(|path| path.is_file())
}

/// Make sure a key pair exists, generating an ed25519 one if needed.
///
/// Returns path to public key. Key generation is interactive so the user can
/// pick a passphrase.
///
/// # Errors
///
/// - Return [`SshError::Syscall`] if `ssh-keygen` fails.
/// - Return [`SshError::MissingKey`] if no public key exists afterwards.
#[instrument(level = "debug")]
pub fn ensure_key(public_key: &Path, email: &str) -> Result<PathBuf> {
    if public_key.is_file() {
        debug!("found public key {}", public_key.display());
        add_to_agent(&public_key.with_extension(""));
        return Ok(public_key.to_path_buf());
    }

    if let Some(found) = public_key.parent().and_then(find_public_key) {
        info!("using existing public key {}", found.display());
        add_to_agent(&found.with_extension(""));
        return Ok(found);
    }

    info!("generating new ssh key...");
    let private_key = public_key.with_extension("");
    if let Some(parent) = private_key.parent() {
        mkdirp::mkdirp(parent).map_err(|err| SshError::CreateDir {
            source: err,
            path: parent.to_path_buf(),
        })?;
    }

    let private_key_arg = private_key.to_string_lossy().into_owned();
    syscall_interactive(
        "ssh-keygen",
        ["-t", "ed25519", "-C", email, "-f", private_key_arg.as_str()],
    )?;

    if !public_key.is_file() {
        return Err(SshError::MissingKey {
            path: public_key.to_path_buf(),
        });
    }

    add_to_agent(&private_key);
    Ok(public_key.to_path_buf())
}

/// Add private key to running SSH agent.
///
/// Failure only warrants a warning, since the key still works without an
/// agent.
pub fn add_to_agent(private_key: &Path) {
    match syscall_non_interactive("ssh-add", [private_key]) {
        Ok(_) => info!("added {} to ssh agent", private_key.display()),
        Err(error) => warn!("could not add key to ssh agent: {error}"),
    }
}

/// Read public key contents.
///
/// # Errors
///
/// - Return [`SshError::ReadKey`] if key cannot be read.
pub fn read_public_key(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|key| key.trim().to_string())
        .map_err(|err| SshError::ReadKey {
            source: err,
            path: path.to_path_buf(),
        })
}

/// Upload public key to hosting service under [`key_title`].
///
/// # Errors
///
/// - Return [`SshError::ReadKey`] if key cannot be read.
/// - Return [`SshError::Hosting`] if upload fails.
pub async fn register_key(
    client: &HostingClient,
    credentials: Credentials,
    public_key: &Path,
) -> Result<()> {
    let key = read_public_key(public_key)?;
    let title = key_title();
    client.add_ssh_key(credentials, &title, &key).await?;
    info!("registered {} as {title}", public_key.display());

    Ok(())
}

/// Title to register key under, as `user@hostname`.
///
/// Only the first label of a fully qualified hostname is kept.
pub fn key_title() -> String {
    let user = env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| "updot".into());
    let host = env::var("HOSTNAME")
        .ok()
        .or_else(|| fs::read_to_string("/etc/hostname").ok())
        .and_then(|host| host.trim().split('.').next().map(str::to_string))
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| "localhost".into());

    format!("{user}@{host}")
}

/// SSH error types.
#[derive(Debug, thiserror::Error)]
pub enum SshError {
    /// SSH directory cannot be created.
    #[error("failed to create ssh directory {path:?}")]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Public key cannot be read.
    #[error("failed to read public key {path:?}")]
    ReadKey {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Key generation finished without producing a key.
    #[error("no public key at {path:?} after key generation")]
    MissingKey { path: PathBuf },

    /// External program fails.
    #[error(transparent)]
    Syscall(#[from] SyscallError),

    /// Hosting service refuses key.
    #[error(transparent)]
    Hosting(#[from] HostingError),
}

/// Friendly result alias :3
pub type Result<T, E = SshError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    #[test_case(
        "Hi jdoe! You've successfully authenticated, but GitHub does not provide shell access.",
        SshAccess::Granted;
        "granted"
    )]
    #[test_case("git@github.com: Permission denied (publickey).", SshAccess::Denied; "denied")]
    #[test_case(
        "ssh: Could not resolve hostname github.com",
        SshAccess::Unknown("ssh: Could not resolve hostname github.com".into());
        "unreachable"
    )]
    #[test]
    fn classify_ssh_output(output: &str, expect: SshAccess) {
        pretty_assertions::assert_eq!(SshAccess::from_output(output), expect);
    }

    #[sealed_test]
    fn prefer_ed25519_key() -> anyhow::Result<()> {
        fs::create_dir("ssh")?;
        assert_eq!(find_public_key("ssh"), None);

        fs::write("ssh/id_rsa.pub", "ssh-rsa AAAA jdoe@box")?;
        assert_eq!(find_public_key("ssh"), Some(PathBuf::from("ssh/id_rsa.pub")));

        fs::write("ssh/id_ed25519.pub", "ssh-ed25519 AAAA jdoe@box")?;
        assert_eq!(
            find_public_key("ssh"),
            Some(PathBuf::from("ssh/id_ed25519.pub"))
        );

        Ok(())
    }

    #[sealed_test]
    fn existing_key_is_not_regenerated() -> anyhow::Result<()> {
        fs::create_dir("ssh")?;
        fs::write("ssh/id_rsa.pub", "ssh-rsa AAAA jdoe@box\n")?;

        let key = ensure_key(Path::new("ssh/id_ed25519.pub"), "john@doe.com")?;
        assert_eq!(key, PathBuf::from("ssh/id_rsa.pub"));
        assert_eq!(read_public_key(&key)?, "ssh-rsa AAAA jdoe@box");

        Ok(())
    }

    #[cfg(unix)]
    #[sealed_test]
    fn existing_key_is_added_to_agent() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        fs::create_dir("bin")?;
        fs::write("bin/ssh-add", "#!/bin/sh\necho \"$1\" > added\n")?;
        fs::set_permissions("bin/ssh-add", fs::Permissions::from_mode(0o755))?;
        env::set_var("PATH", env::current_dir()?.join("bin"));

        fs::create_dir("ssh")?;
        fs::write("ssh/id_rsa.pub", "ssh-rsa AAAA jdoe@box\n")?;
        ensure_key(Path::new("ssh/id_ed25519.pub"), "john@doe.com")?;
        assert_eq!(fs::read_to_string("added")?, "ssh/id_rsa\n");

        fs::write("ssh/id_ed25519.pub", "ssh-ed25519 AAAA jdoe@box\n")?;
        ensure_key(Path::new("ssh/id_ed25519.pub"), "john@doe.com")?;
        assert_eq!(fs::read_to_string("added")?, "ssh/id_ed25519\n");

        Ok(())
    }

    #[sealed_test(env = [("USER", "jdoe"), ("HOSTNAME", "box")])]
    fn key_title_from_environment() {
        assert_eq!(key_title(), "jdoe@box");
    }

    #[sealed_test(env = [("USER", "jdoe"), ("HOSTNAME", "box.example.com")])]
    fn key_title_drops_domain() {
        assert_eq!(key_title(), "jdoe@box");
    }
}
