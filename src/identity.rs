// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Local git identity.
//!
//! Commits need an author name and email, and the hosting service needs to
//! know which account the dotfiles repository belongs to. All three live in
//! git configuration. Missing values are asked for once, then persisted so
//! the user is never asked again.

use crate::prompt::PromptError;

use git2::Config;
use tracing::{info, instrument};

/// Git configuration key holding hosting service user name.
pub const HOST_USER_KEY: &str = "github.user";

/// Who the user is, locally and on the hosting service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Author name for commits.
    pub name: String,

    /// Author email for commits.
    pub email: String,

    /// Hosting service account name.
    pub host_user: String,
}

/// Look up a non-empty string value in git configuration.
pub fn lookup(config: &Config, key: &str) -> Option<String> {
    config
        .get_string(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Read identity from git configuration, asking for anything missing.
///
/// A hosting user from updot's own settings takes precedence over the one in
/// git configuration, and is not persisted.
///
/// # Errors
///
/// - Return [`IdentityError::Prompt`] if asking the user fails.
/// - Return [`IdentityError::Git2`] if configuration cannot be written.
#[instrument(skip(config, ask), level = "debug")]
pub fn ensure_identity<F>(
    config: &mut Config,
    preferred_user: Option<&str>,
    mut ask: F,
) -> Result<Identity>
where
    F: FnMut(&str) -> Result<String, PromptError>,
{
    info!("inspecting local git configuration...");
    let name = ensure_value(
        config,
        "user.name",
        "Name to associate with your commits:",
        &mut ask,
    )?;
    let email = ensure_value(
        config,
        "user.email",
        "Email to associate with your commits:",
        &mut ask,
    )?;
    let host_user = match preferred_user {
        Some(user) => user.to_string(),
        None => ensure_value(config, HOST_USER_KEY, "GitHub username:", &mut ask)?,
    };
    info!("hosting user: {host_user}");

    Ok(Identity {
        name,
        email,
        host_user,
    })
}

fn ensure_value<F>(config: &mut Config, key: &str, question: &str, ask: &mut F) -> Result<String>
where
    F: FnMut(&str) -> Result<String, PromptError>,
{
    if let Some(value) = lookup(config, key) {
        info!("gitconfig {key} - okay");
        return Ok(value);
    }

    info!("{key} not found in git config");
    let value = ask(question)?;
    config.set_str(key, &value)?;
    info!("{key} stored in git config");

    Ok(value)
}

/// Identity error types.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Asking user fails.
    #[error(transparent)]
    Prompt(#[from] PromptError),

    /// Reading or writing git configuration fails.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = IdentityError> = std::result::Result<T, E>;
