// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Updot reads an optional settings file at `$XDG_CONFIG_HOME/updot/config.toml`.
//! Every field in that file is optional. Missing fields fall back to the
//! conventional layout rooted at the user's home directory.
//!
//! The resolved [`Settings`] value is constructed once at process start, and
//! handed to every component that needs to know where things live or how
//! the remote is named. Nothing else in updot keeps ambient state.
//!
//! # General Layout
//!
//! ```toml
//! [layout]
//! target_root = "~"
//! repo_root = "~/dotfiles"
//! backup_root = "~/.dotfiles_backup"
//! manifest = "~/dotfiles/dotfiles.manifest"
//!
//! [remote]
//! name = "origin"
//! branch = "master"
//! repository = "dotfiles"
//! description = "My dotfiles repository"
//! host = "github.com"
//! api_url = "https://api.github.com"
//! user = "octocat"
//!
//! [commit]
//! message = "updot update"
//!
//! [update]
//! source = "https://github.com/awkless/updot.git"
//! ```

use crate::path::{default_backup_dir, default_repo_dir, home_dir, NoWayHome};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Name of manifest file inside the repository root.
pub const MANIFEST_FILE_NAME: &str = "dotfiles.manifest";

/// Resolved settings used for a single run.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Settings {
    /// Directories updot reconciles between.
    pub layout: Layout,

    /// Remote repository naming.
    pub remote: RemoteSettings,

    /// Default commit message for synchronization commits.
    pub commit_message: String,

    /// Git URL of updot's own source for self-update.
    pub update_source: String,
}

impl Settings {
    /// Load settings from a settings file.
    ///
    /// A missing file is not an error. Defaults are used instead.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ReadSettings`] if file exists but cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file cannot be parsed.
    /// - Return [`ConfigError::NoWayHome`] if default paths cannot be determined.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = if path.exists() {
            debug!("load settings from {:?}", path.display());
            read_to_string(path)
                .map_err(|err| ConfigError::ReadSettings {
                    source: err,
                    path: path.to_path_buf(),
                })?
                .parse()?
        } else {
            debug!("no settings file at {:?}, using defaults", path.display());
            SettingsFile::default()
        };

        Self::resolve(file)
    }

    /// Resolve parsed settings file into settings by filling in defaults.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NoWayHome`] if default paths cannot be determined.
    pub fn resolve(file: SettingsFile) -> Result<Self> {
        let layout = file.layout.unwrap_or_default();
        let target_root = match layout.target_root {
            Some(path) => path,
            None => home_dir()?,
        };
        let repo_root = match layout.repo_root {
            Some(path) => path,
            None => default_repo_dir()?,
        };
        let backup_root = match layout.backup_root {
            Some(path) => path,
            None => default_backup_dir()?,
        };
        let manifest = layout
            .manifest
            .unwrap_or_else(|| repo_root.join(MANIFEST_FILE_NAME));

        let remote = file.remote.unwrap_or_default();
        let commit = file.commit.unwrap_or_default();
        let update = file.update.unwrap_or_default();

        Ok(Self {
            layout: Layout {
                target_root,
                repo_root,
                backup_root,
                manifest,
            }
            .absolute()?,
            remote: RemoteSettings {
                name: remote.name.unwrap_or_else(|| "origin".into()),
                branch: remote.branch.unwrap_or_else(|| "master".into()),
                repository: remote.repository.unwrap_or_else(|| "dotfiles".into()),
                description: remote
                    .description
                    .unwrap_or_else(|| "My dotfiles repository".into()),
                host: remote.host.unwrap_or_else(|| "github.com".into()),
                api_url: remote
                    .api_url
                    .unwrap_or_else(|| "https://api.github.com".into()),
                user: remote.user,
            },
            commit_message: commit.message.unwrap_or_else(|| "updot update".into()),
            update_source: update
                .source
                .unwrap_or_else(|| "https://github.com/awkless/updot.git".into()),
        })
    }
}

/// Directories that updot reconciles between.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Layout {
    /// Directory tracked files conventionally live under, i.e., home.
    pub target_root: PathBuf,

    /// Dotfiles repository working tree.
    pub repo_root: PathBuf,

    /// Directory that displaced real files are moved into.
    pub backup_root: PathBuf,

    /// Manifest listing tracked paths.
    pub manifest: PathBuf,
}

impl Layout {
    /// Construct layout with manifest placed at its conventional location.
    pub fn new(
        target_root: impl Into<PathBuf>,
        repo_root: impl Into<PathBuf>,
        backup_root: impl Into<PathBuf>,
    ) -> Self {
        let repo_root = repo_root.into();
        Self {
            target_root: target_root.into(),
            manifest: repo_root.join(MANIFEST_FILE_NAME),
            repo_root,
            backup_root: backup_root.into(),
        }
    }

    /// Resolve every relative path against the current directory.
    ///
    /// Symlinks are created with these paths as their targets, so they must
    /// not depend on the directory a link ends up in.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Absolute`] if current directory is unknown.
    pub fn absolute(self) -> Result<Self> {
        Ok(Self {
            target_root: absolute_path(self.target_root)?,
            repo_root: absolute_path(self.repo_root)?,
            backup_root: absolute_path(self.backup_root)?,
            manifest: absolute_path(self.manifest)?,
        })
    }
}

fn absolute_path(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }

    std::path::absolute(&path).map_err(|err| ConfigError::Absolute { source: err, path })
}

/// Remote repository naming.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RemoteSettings {
    /// Local name of remote, e.g., "origin".
    pub name: String,

    /// Branch to pull from and push to.
    pub branch: String,

    /// Repository name on hosting service.
    pub repository: String,

    /// Description used when creating repository on hosting service.
    pub description: String,

    /// Hosting service SSH host.
    pub host: String,

    /// Base URL of hosting service REST API.
    pub api_url: String,

    /// Hosting service user name. Falls back to `github.user` in git config.
    pub user: Option<String>,
}

impl RemoteSettings {
    /// SSH URL of the dotfiles repository for a given user.
    pub fn ssh_url(&self, user: &str) -> String {
        format!("git@{}:{}/{}.git", self.host, user, self.repository)
    }
}

/// On-disk settings file layout.
///
/// Every field is optional. File I/O is left to [`Settings::load`].
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SettingsFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<LayoutSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdateSection>,
}

impl FromStr for SettingsFile {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut file: SettingsFile = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every layout path.
        if let Some(layout) = file.layout.as_mut() {
            for path in [
                &mut layout.target_root,
                &mut layout.repo_root,
                &mut layout.backup_root,
                &mut layout.manifest,
            ]
            .into_iter()
            .flatten()
            {
                *path = expand_path(path.as_path())?;
            }
        }

        Ok(file)
    }
}

impl Display for SettingsFile {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Layout section of settings file.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct LayoutSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
}

/// Remote section of settings file.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct RemoteSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Commit section of settings file.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct CommitSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Self-update section of settings file.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct UpdateSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read settings file.
    #[error("failed to read settings file at {:?}", path.display())]
    ReadSettings {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Relative path cannot be made absolute.
    #[error("failed to make {:?} absolute", path.display())]
    Absolute {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Default locations cannot be determined.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
