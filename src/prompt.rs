// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Interactive user prompts.
//!
//! Missing local configuration and hosting credentials are recovered by
//! asking the user directly. Every prompt goes through this module so that
//! progress bars can be suspended while the user types.

use auth_git2::Prompter;
use indicatif::ProgressBar;
use inquire::{Confirm, InquireError, Password, Text};
use std::path::Path;
use tracing::{info, instrument};

/// Ask user for a line of text.
///
/// # Errors
///
/// - Return [`PromptError`] if prompt cannot be displayed or is cancelled.
pub fn ask_text(message: &str) -> Result<String> {
    Ok(Text::new(message).prompt()?)
}

/// Ask user for a secret without echoing it.
///
/// # Errors
///
/// - Return [`PromptError`] if prompt cannot be displayed or is cancelled.
pub fn ask_secret(message: &str) -> Result<String> {
    Ok(Password::new(message).without_confirmation().prompt()?)
}

/// Ask user a yes or no question.
///
/// # Errors
///
/// - Return [`PromptError`] if prompt cannot be displayed or is cancelled.
pub fn confirm(message: &str, default: bool) -> Result<bool> {
    Ok(Confirm::new(message).with_default(default).prompt()?)
}

/// Git2 authentication prompter for progress bar.
///
/// Suspends the progress bar of a running fetch or push while asking the
/// user for credentials.
#[derive(Debug, Clone)]
pub struct IndicatifPrompter {
    pub(crate) bar: ProgressBar,
}

impl IndicatifPrompter {
    /// Construct new progress bar authenticator.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for IndicatifPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = ask_text("username").ok()?;
            let password = ask_secret("password").ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| ask_secret("password").ok())
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| ask_secret("passphrase").ok())
    }
}

/// Prompt failure.
#[derive(Debug, thiserror::Error)]
#[error("failed to prompt user")]
pub struct PromptError(#[from] InquireError);

/// Friendly result alias :3
pub type Result<T, E = PromptError> = std::result::Result<T, E>;
