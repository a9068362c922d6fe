// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Non-mutating diagnostics.
//!
//! Reports whether everything a synchronization run depends on is in place,
//! without changing anything.

use crate::{
    config::Settings,
    hosting::{check_connectivity, CONNECTIVITY_TIMEOUT},
    identity::{lookup, HOST_USER_KEY},
    manifest::Manifest,
    reconcile::{LinkState, Reconciler},
    repo::DotfilesRepo,
};

use git2::Config;
use std::fmt::{Display, Formatter, Result as FmtResult};
use tracing::{debug, instrument};

/// Programs updot shells out to.
pub const REQUIRED_PROGRAMS: [&str; 3] = ["git", "ssh", "ssh-keygen"];

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    Warn,
    Fail,
}

impl Display for CheckStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let label = match self {
            Self::Ok => "ok",
            Self::Warn => "warn",
            Self::Fail => "fail",
        };
        fmt.pad(label)
    }
}

/// A single diagnostic check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl Check {
    fn new(name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            detail: detail.into(),
        }
    }
}

/// Every check performed in one diagnosis.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    checks: Vec<Check>,
}

impl Diagnosis {
    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    /// No check failed. Warnings are tolerated.
    pub fn is_healthy(&self) -> bool {
        self.checks
            .iter()
            .all(|check| check.status != CheckStatus::Fail)
    }
}

impl Display for Diagnosis {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let width = self
            .checks
            .iter()
            .map(|check| check.name.len())
            .max()
            .unwrap_or(0);

        for check in &self.checks {
            writeln!(
                fmt,
                "[{:<4}] {:<width$}  {}",
                check.status, check.name, check.detail
            )?;
        }

        Ok(())
    }
}

/// Run every check, including network connectivity.
#[instrument(skip(settings), level = "debug")]
pub async fn diagnose(settings: &Settings) -> Diagnosis {
    let git_config = Config::open_default();
    let mut checks = match &git_config {
        Ok(config) => local_checks(settings, config),
        Err(error) => {
            let mut checks = program_checks();
            checks.push(Check::new(
                "git config",
                CheckStatus::Fail,
                error.message().to_string(),
            ));
            checks.extend(repository_checks(settings));
            checks.extend(manifest_checks(settings));
            checks
        }
    };

    let connectivity = match check_connectivity(&settings.remote.api_url, CONNECTIVITY_TIMEOUT).await
    {
        Ok(()) => Check::new("connectivity", CheckStatus::Ok, settings.remote.api_url.clone()),
        Err(error) => Check::new("connectivity", CheckStatus::Fail, error.to_string()),
    };
    checks.insert(REQUIRED_PROGRAMS.len(), connectivity);

    Diagnosis { checks }
}

/// Run every check that does not need the network.
pub fn local_checks(settings: &Settings, git_config: &Config) -> Vec<Check> {
    let mut checks = program_checks();
    checks.extend(identity_checks(settings, git_config));
    checks.extend(repository_checks(settings));
    checks.extend(manifest_checks(settings));
    checks
}

fn program_checks() -> Vec<Check> {
    REQUIRED_PROGRAMS
        .iter()
        .map(|program| match which::which(program) {
            Ok(path) => Check::new(*program, CheckStatus::Ok, path.display().to_string()),
            Err(error) => Check::new(*program, CheckStatus::Fail, error.to_string()),
        })
        .collect()
}

fn identity_checks(settings: &Settings, git_config: &Config) -> Vec<Check> {
    let mut checks: Vec<Check> = ["user.name", "user.email"]
        .into_iter()
        .map(|key| config_check(git_config, key))
        .collect();

    match &settings.remote.user {
        Some(user) => checks.push(Check::new(
            HOST_USER_KEY,
            CheckStatus::Ok,
            format!("{user} (from settings)"),
        )),
        None => checks.push(config_check(git_config, HOST_USER_KEY)),
    }

    checks
}

fn config_check(git_config: &Config, key: &str) -> Check {
    match lookup(git_config, key) {
        Some(value) => Check::new(key, CheckStatus::Ok, value),
        None => Check::new(key, CheckStatus::Warn, "not set, will be asked for"),
    }
}

fn repository_checks(settings: &Settings) -> Vec<Check> {
    let repo_root = &settings.layout.repo_root;
    let repo = match DotfilesRepo::open(repo_root) {
        Ok(repo) => repo,
        Err(error) => {
            debug!("cannot open repository: {error}");
            return vec![Check::new(
                "repository",
                CheckStatus::Warn,
                format!("no git repository at {}", repo_root.display()),
            )];
        }
    };

    let remote = &settings.remote.name;
    vec![
        Check::new(
            "repository",
            CheckStatus::Ok,
            repo_root.display().to_string(),
        ),
        match repo.remote_url(remote) {
            Some(url) => Check::new("remote", CheckStatus::Ok, format!("{remote} -> {url}")),
            None => Check::new(
                "remote",
                CheckStatus::Warn,
                format!("remote {remote:?} not configured"),
            ),
        },
    ]
}

fn manifest_checks(settings: &Settings) -> Vec<Check> {
    let layout = &settings.layout;
    if !layout.manifest.exists() {
        return vec![Check::new(
            "manifest",
            CheckStatus::Warn,
            format!("no manifest at {}", layout.manifest.display()),
        )];
    }

    let manifest = match Manifest::load(&layout.manifest, &layout.target_root) {
        Ok(manifest) => manifest,
        Err(error) => return vec![Check::new("manifest", CheckStatus::Fail, error.to_string())],
    };

    let mut checks = vec![Check::new(
        "manifest",
        CheckStatus::Ok,
        format!("{} entries", manifest.entries().len()),
    )];

    let summary = Reconciler::new(layout).plan(manifest.entries());
    checks.extend(summary.reports().iter().map(|report| {
        let status = match report.state {
            LinkState::Okay => CheckStatus::Ok,
            _ => CheckStatus::Warn,
        };
        let detail = match report.state {
            LinkState::Okay => "linked".to_string(),
            LinkState::Missing => "no copy in target or repository".to_string(),
            state => format!("pending: {state}"),
        };
        Check::new(format!("link {}", report.name), status, detail)
    }));

    checks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Layout, SettingsFile};
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{fs, path::Path};

    fn settings() -> anyhow::Result<Settings> {
        let cwd = std::env::current_dir()?;
        let mut settings = Settings::resolve(SettingsFile::default())?;
        settings.layout = Layout::new(cwd.join("home"), cwd.join("dotfiles"), cwd.join("backup"));
        Ok(settings)
    }

    fn status_of<'a>(checks: &'a [Check], name: &str) -> Option<&'a Check> {
        checks.iter().find(|check| check.name == name)
    }

    #[sealed_test(env = [("HOME", ".")])]
    fn fresh_machine_only_warns() -> anyhow::Result<()> {
        fs::write("gitconfig", "")?;
        let config = Config::open(Path::new("gitconfig"))?;
        let checks = local_checks(&settings()?, &config);

        for name in ["user.name", "user.email", HOST_USER_KEY, "repository", "manifest"] {
            assert_eq!(
                status_of(&checks, name).map(|check| check.status),
                Some(CheckStatus::Warn),
                "check {name}"
            );
        }

        Ok(())
    }

    #[sealed_test(env = [("HOME", ".")])]
    fn reports_planned_links() -> anyhow::Result<()> {
        fs::write(
            "gitconfig",
            "[user]\n\tname = John Doe\n\temail = john@doe.com\n[github]\n\tuser = jdoe\n",
        )?;
        fs::create_dir_all("home")?;
        fs::create_dir_all("dotfiles")?;
        git2::Repository::init("dotfiles")?;
        fs::write("dotfiles/dotfiles.manifest", "# header\n.vimrc\n.bashrc\n")?;
        fs::write("dotfiles/vimrc", "set nu")?;

        let config = Config::open(Path::new("gitconfig"))?;
        let checks = local_checks(&settings()?, &config);

        assert_eq!(
            status_of(&checks, "user.email").map(|check| check.detail.as_str()),
            Some("john@doe.com")
        );
        assert_eq!(
            status_of(&checks, "repository").map(|check| check.status),
            Some(CheckStatus::Ok)
        );
        assert_eq!(
            status_of(&checks, "remote").map(|check| check.status),
            Some(CheckStatus::Warn)
        );
        assert_eq!(
            status_of(&checks, "manifest").map(|check| check.detail.as_str()),
            Some("2 entries")
        );
        assert_eq!(
            status_of(&checks, "link .vimrc").map(|check| check.detail.as_str()),
            Some("pending: link")
        );
        assert_eq!(
            status_of(&checks, "link .bashrc").map(|check| check.detail.as_str()),
            Some("no copy in target or repository")
        );

        // Diagnostics never mutate.
        assert!(!Path::new("home/.vimrc").exists());

        Ok(())
    }

    #[test]
    fn diagnosis_display() {
        let diagnosis = Diagnosis {
            checks: vec![
                Check::new("git", CheckStatus::Ok, "/usr/bin/git"),
                Check::new("manifest", CheckStatus::Warn, "no manifest"),
            ],
        };

        assert_eq!(
            diagnosis.to_string(),
            "[ok  ] git       /usr/bin/git\n[warn] manifest  no manifest\n"
        );
        assert!(diagnosis.is_healthy());
    }
}
