// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dotfile manifest handling.
//!
//! The __manifest__ is a plain line-oriented text file that lists every path
//! updot should track, one per line, relative to the target root (usually
//! the user's home directory). Lines whose first character is `#` are
//! comments. Blank lines are ignored. No quoting, escaping, or whitespace
//! trimming is performed beyond removal of the line terminator.
//!
//! ```text
//! # updot Dotfile Manifest
//! .vimrc
//! .config/nvim/init.lua
//! ~/.bashrc
//! ```
//!
//! # Entry Identity
//!
//! Entries are keyed by their full relative path. Listing the same path twice
//! keeps the first occurrence. Two entries that share a final name but live in
//! different directories are distinct, because the repository mirrors the
//! directory portion of every entry. Only entries whose repository-side paths
//! are identical conflict, e.g., `.foo` and `foo` in one directory, in which
//! case the later entry is skipped.

use crate::prompt::{confirm, PromptError};

use std::{
    collections::HashSet,
    env,
    fs::{read_to_string, write},
    path::{Component, Path, PathBuf},
    process::Command,
};
use tracing::{debug, info, instrument, warn};

/// Header written to freshly created manifest files.
pub const MANIFEST_TEMPLATE: &str = "\
# updot Dotfile Manifest
# This file is used to define which dotfiles you want tracked with updot
# Add the path to each dotfile you wish to track below this line

";

/// Single tracked path listed in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManifestEntry {
    path: PathBuf,
    name: String,
}

impl ManifestEntry {
    /// Parse a manifest line into an entry relative to target root.
    ///
    /// Accepts a leading `~/`, and absolute paths that live beneath the
    /// target root. Current directory components are dropped.
    ///
    /// # Errors
    ///
    /// - Return [`ManifestError::EmptyName`] if the path has no final name.
    /// - Return [`ManifestError::OutsideTarget`] if an absolute path is not
    ///   beneath target root.
    /// - Return [`ManifestError::InvalidComponent`] if the path contains `..`
    ///   or other non-normal components.
    pub fn parse(line: &str, target_root: impl AsRef<Path>) -> Result<Self> {
        let target_root = target_root.as_ref();
        let raw = if line == "~" {
            ""
        } else {
            line.strip_prefix("~/").unwrap_or(line)
        };

        let raw = Path::new(raw);
        let relative = if raw.is_absolute() {
            raw.strip_prefix(target_root)
                .map_err(|_| ManifestError::OutsideTarget {
                    line: line.to_string(),
                    target_root: target_root.to_path_buf(),
                })?
        } else {
            raw
        };

        let mut path = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => continue,
                _ => {
                    return Err(ManifestError::InvalidComponent {
                        line: line.to_string(),
                    })
                }
            }
        }

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ManifestError::EmptyName {
                line: line.to_string(),
            })?;

        Ok(Self { path, name })
    }

    /// Final path component, the canonical tracked identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path relative to target root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory portion of the path relative to target root.
    ///
    /// Empty for entries that live directly in the target root.
    pub fn relative_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }

    /// Name the entry is stored under inside the repository.
    ///
    /// Strips exactly one leading `.` so hidden files become visible in the
    /// repository, e.g., `.vimrc` is stored as `vimrc`.
    pub fn stored_name(&self) -> &str {
        self.name.strip_prefix('.').unwrap_or(&self.name)
    }

    /// Path of the entry relative to repository root.
    pub fn repo_path(&self) -> PathBuf {
        self.relative_dir().join(self.stored_name())
    }
}

/// Ordered listing of manifest entries.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Parse manifest content.
    ///
    /// Invalid lines, duplicates, and repository path conflicts are logged
    /// and skipped rather than treated as errors.
    pub fn parse(content: &str, target_root: impl AsRef<Path>) -> Self {
        let target_root = target_root.as_ref();
        let mut entries = Vec::new();
        let mut seen_paths = HashSet::new();
        let mut seen_repo_paths = HashSet::new();

        for (number, line) in content.lines().enumerate() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let entry = match ManifestEntry::parse(line, target_root) {
                Ok(entry) => entry,
                Err(error) => {
                    warn!("manifest line {}: {error}", number + 1);
                    continue;
                }
            };

            if !seen_paths.insert(entry.path.clone()) {
                debug!("manifest line {}: duplicate of {:?}", number + 1, entry.path);
                continue;
            }

            // INVARIANT: No two entries may share a repository path.
            if !seen_repo_paths.insert(entry.repo_path()) {
                warn!(
                    "manifest line {}: {:?} would share repository path {:?} with an earlier entry, skipping",
                    number + 1,
                    entry.path,
                    entry.repo_path()
                );
                continue;
            }

            entries.push(entry);
        }

        Self { entries }
    }

    /// Read manifest file from disk.
    ///
    /// # Errors
    ///
    /// - Return [`ManifestError::Read`] if manifest cannot be read.
    #[instrument(skip(path, target_root), level = "debug")]
    pub fn load(path: impl AsRef<Path>, target_root: impl AsRef<Path>) -> Result<Self> {
        info!("reading manifest file...");
        let content = read_to_string(path.as_ref()).map_err(|err| ManifestError::Read {
            source: err,
            path: path.as_ref().to_path_buf(),
        })?;

        Ok(Self::parse(&content, target_root))
    }

    /// Write manifest template to target path.
    ///
    /// # Errors
    ///
    /// - Return [`ManifestError::Write`] if manifest cannot be written.
    pub fn create_template(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            mkdirp::mkdirp(parent).map_err(|err| ManifestError::Write {
                source: err,
                path: path.to_path_buf(),
            })?;
        }

        write(path, MANIFEST_TEMPLATE).map_err(|err| ManifestError::Write {
            source: err,
            path: path.to_path_buf(),
        })
    }

    /// Listed entries in manifest order.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Check if manifest lists nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Length of longest entry name, used to align status output.
    pub fn longest_name(&self) -> usize {
        longest_name(&self.entries)
    }
}

/// Length of longest entry name in a batch of entries.
pub fn longest_name(entries: &[ManifestEntry]) -> usize {
    entries
        .iter()
        .map(|entry| entry.name().chars().count())
        .max()
        .unwrap_or(0)
}

/// Make sure a manifest exists, then load it.
///
/// Creates the manifest with [`MANIFEST_TEMPLATE`] if it is missing. When
/// `interactive` is set, the user is then asked to populate it through their
/// editor of choice (`$EDITOR`, falling back to `vim`).
///
/// # Errors
///
/// - Return [`ManifestError::Write`] if manifest cannot be created.
/// - Return [`ManifestError::Editor`] if editor cannot be launched.
/// - Return [`ManifestError::Read`] if manifest cannot be read.
#[instrument(skip(path, target_root), level = "debug")]
pub fn ensure_manifest(
    path: impl AsRef<Path>,
    target_root: impl AsRef<Path>,
    interactive: bool,
) -> Result<Manifest> {
    let path = path.as_ref();
    info!("checking for {:?}...", path.display());
    if path.exists() {
        info!("manifest file exists");
        return Manifest::load(path, target_root);
    }

    info!("manifest file not found, creating empty manifest...");
    Manifest::create_template(path)?;

    if interactive && confirm("Open manifest in your editor to add tracked paths?", true)? {
        edit_manifest(path)?;
        info!("manifest updated by user, attempting to continue...");
    }

    Manifest::load(path, target_root)
}

/// Open manifest in user's editor and wait for it to exit.
///
/// # Errors
///
/// - Return [`ManifestError::Editor`] if editor cannot be launched or fails.
pub fn edit_manifest(path: impl AsRef<Path>) -> Result<()> {
    let editor = env::var("EDITOR")
        .ok()
        .filter(|editor| !editor.trim().is_empty())
        .unwrap_or_else(|| {
            info!("default editor unknown, defaulting to vim");
            "vim".into()
        });

    let mut words = editor.split_whitespace();
    let program = words.next().unwrap_or("vim");
    info!("opening manifest in {program} for editing...");
    let status = Command::new(program)
        .args(words)
        .arg(path.as_ref())
        .status()
        .map_err(|err| ManifestError::Editor {
            source: err,
            editor: editor.clone(),
        })?;

    if !status.success() {
        return Err(ManifestError::Editor {
            source: std::io::Error::other(format!("editor exited with {status}")),
            editor,
        });
    }

    Ok(())
}

/// Manifest error types.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Manifest line names nothing.
    #[error("entry {line:?} has no file name")]
    EmptyName { line: String },

    /// Manifest line points outside target root.
    #[error("entry {line:?} is not beneath {:?}", target_root.display())]
    OutsideTarget { line: String, target_root: PathBuf },

    /// Manifest line contains `..` or other unusable components.
    #[error("entry {line:?} must be a plain path relative to the target root")]
    InvalidComponent { line: String },

    /// Manifest cannot be read.
    #[error("failed to read manifest at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Manifest cannot be written.
    #[error("failed to write manifest at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Editor cannot be launched for manifest.
    #[error("failed to edit manifest with {editor:?}, add each dotfile path to the manifest by hand and rerun")]
    Editor {
        #[source]
        source: std::io::Error,
        editor: String,
    },

    /// User prompt fails.
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Friendly result alias :3
pub type Result<T, E = ManifestError> = std::result::Result<T, E>;
