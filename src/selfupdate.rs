// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Reinstall updot from its git source.

use crate::syscall::{syscall_interactive, SyscallError};

use tracing::{info, instrument};

/// Arguments handed to `cargo` to reinstall from `source`.
pub fn install_args(source: &str) -> Vec<String> {
    ["install", "--locked", "--force", "--git", source]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Reinstall updot with `cargo install`.
///
/// # Errors
///
/// - Return [`SelfUpdateError::NoCargo`] if `cargo` is not on `PATH`.
/// - Return [`SelfUpdateError::Syscall`] if installation fails.
#[instrument(level = "debug")]
pub fn self_update(source: &str) -> Result<()> {
    let cargo = which::which("cargo").map_err(SelfUpdateError::NoCargo)?;
    info!("updating updot from {source}...");
    syscall_interactive(cargo, install_args(source))?;
    info!("update complete");

    Ok(())
}

/// Self-update error types.
#[derive(Debug, thiserror::Error)]
pub enum SelfUpdateError {
    /// Cargo is needed to rebuild updot.
    #[error("cargo is required to update updot")]
    NoCargo(#[source] which::Error),

    #[error(transparent)]
    Syscall(#[from] SyscallError),
}

/// Friendly result alias :3
pub type Result<T, E = SelfUpdateError> = std::result::Result<T, E>;
