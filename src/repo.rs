// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dotfiles repository management.
//!
//! The __dotfiles repository__ is an ordinary git repository with a working
//! tree, conventionally at `~/dotfiles`. It holds the real content of every
//! tracked dotfile, along with the manifest itself. Updot keeps it in sync
//! with one branch of one remote.
//!
//! # Synchronization
//!
//! A sync run fetches the remote branch and merges it into the local branch
//! before links are reconciled. Afterwards every change in the working tree is
//! staged and committed in one go, and the result is pushed back. Both
//! directions report a [`SyncSummary`] of what changed.
//!
//! Fast-forward merges are handled through libgit2 directly. Diverged
//! histories are handed to the git binary, because a true merge may need the
//! user to resolve conflicts.

use crate::prompt::IndicatifPrompter;
use crate::syscall::{syscall_output, SyscallError};

use auth_git2::GitAuthenticator;
use git2::{
    build::CheckoutBuilder, Commit, Config, Delta, DiffFindOptions, DiffOptions, FetchOptions,
    IndexAddOption, Oid, PushOptions, RemoteCallbacks, Repository, RepositoryInitOptions, Tree,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::write,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tracing::{debug, info, instrument, warn};

/// Content of README created in fresh dotfiles repositories.
pub const README_TEMPLATE: &str = "\
dotfiles
========
My dotfiles repository.

Created and maintained by updot.
";

/// Dotfiles repository with a working tree.
pub struct DotfilesRepo {
    repository: Repository,
    progress: bool,
}

impl DotfilesRepo {
    /// Open existing dotfiles repository.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`] if no repository exists at path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        debug!("open dotfiles repository: {:?}", path.as_ref().display());
        Ok(Self {
            repository: Repository::open(path.as_ref())?,
            progress: true,
        })
    }

    /// Open dotfiles repository, creating it if needed.
    ///
    /// Creates the directory itself if it is missing. A fresh repository has
    /// its initial head pointed at `branch`.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::CreateDir`] if directory cannot be created.
    /// - Return [`RepoError::Git2`] if repository cannot be opened or created.
    #[instrument(skip(path), level = "debug")]
    pub fn open_or_init(path: impl AsRef<Path>, branch: &str) -> Result<Self> {
        let path = path.as_ref();
        info!("checking for {:?} directory...", path.display());
        if !path.exists() {
            info!("dotfiles directory does not exist, creating it...");
            mkdirp::mkdirp(path).map_err(|err| RepoError::CreateDir {
                source: err,
                path: path.to_path_buf(),
            })?;
        }

        info!("verifying dotfiles directory is a git repository...");
        let repository = match Repository::open(path) {
            Ok(repository) => {
                info!("dotfiles directory is a git repository");
                repository
            }
            Err(_) => {
                info!("initializing local repository...");
                let mut opts = RepositoryInitOptions::new();
                opts.initial_head(branch);
                Repository::init_opts(path, &opts)?
            }
        };

        Ok(Self {
            repository,
            progress: true,
        })
    }

    /// Toggle progress bars during fetch and push.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Working tree of repository.
    pub fn workdir(&self) -> Result<&Path> {
        self.repository.workdir().ok_or(RepoError::Bare)
    }

    /// Check if remote is configured.
    pub fn has_remote(&self, name: &str) -> bool {
        self.repository.find_remote(name).is_ok()
    }

    /// Check if a fetch left a remote-tracking branch behind.
    pub fn has_fetched(&self, remote: &str, branch: &str) -> bool {
        self.repository.find_reference(&tracking_ref(remote, branch)).is_ok()
    }

    /// URL of configured remote.
    pub fn remote_url(&self, name: &str) -> Option<String> {
        self.repository
            .find_remote(name)
            .ok()
            .and_then(|remote| remote.url().map(ToString::to_string))
    }

    /// Configure new remote.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`] if remote cannot be added.
    pub fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        info!("adding remote {name} at {url}");
        self.repository.remote(name, url)?;
        Ok(())
    }

    /// Fetch remote branch into its remote-tracking reference.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`] if fetch fails, e.g., remote is
    ///   unreachable or branch does not exist on it.
    #[instrument(skip(self), level = "debug")]
    pub fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        let refspec = format!("+refs/heads/{branch}:{}", tracking_ref(remote, branch));
        let mut handle = self.repository.find_remote(remote)?;
        let bar = self.progress_bar(format!("fetch {remote}/{branch}"))?;
        let authenticator =
            GitAuthenticator::default().set_prompter(IndicatifPrompter::new(bar.clone()));
        let config = self.repository.config()?;

        let mut opts = FetchOptions::new();
        opts.remote_callbacks(remote_callbacks(&bar, &authenticator, &config));
        let result = handle.fetch(&[refspec.as_str()], Some(&mut opts), None);
        bar.finish_and_clear();

        Ok(result?)
    }

    /// Fetch remote branch and merge it into local branch.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError`] if fetch or merge fails.
    pub fn pull(&self, remote: &str, branch: &str) -> Result<SyncSummary> {
        self.fetch(remote, branch)?;
        self.merge_fetched(remote, branch)
    }

    /// Merge already fetched remote branch into local branch.
    ///
    /// Returns summary of changes pulled in.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`] if libgit2 fails, or the fast-forward
    ///   would overwrite local changes.
    /// - Return [`RepoError::Syscall`] if a true merge fails.
    #[instrument(skip(self), level = "debug")]
    pub fn merge_fetched(&self, remote: &str, branch: &str) -> Result<SyncSummary> {
        info!("pulling most recent revisions from remote repository...");
        let fetched = self
            .repository
            .find_reference(&tracking_ref(remote, branch))?;
        let fetched_commit = fetched.peel_to_commit()?;
        let annotated = self.repository.reference_to_annotated_commit(&fetched)?;

        let head_tree = self.head_commit()?.map(|commit| commit.tree()).transpose()?;
        let summary = self.summarize(head_tree.as_ref(), Some(&fetched_commit.tree()?))?;

        let (analysis, _) = self.repository.merge_analysis(&[&annotated])?;
        if analysis.is_up_to_date() {
            debug!("already up to date with {remote}/{branch}");
            return Ok(SyncSummary::default());
        }

        let local_ref = format!("refs/heads/{branch}");
        if analysis.is_unborn() || analysis.is_fast_forward() {
            // INVARIANT: Check out before moving the branch, so local changes
            // that would be overwritten abort the pull.
            let mut checkout = CheckoutBuilder::new();
            checkout.safe();
            self.repository
                .checkout_tree(fetched_commit.as_object(), Some(&mut checkout))?;
            self.repository.reference(
                &local_ref,
                fetched_commit.id(),
                true,
                &format!("updot: fast-forward to {remote}/{branch}"),
            )?;
            self.repository.set_head(&local_ref)?;
            return Ok(summary);
        }

        let workdir = self.workdir()?;
        let (status, output) = syscall_output(
            "git",
            ["merge", "--no-edit", &format!("{remote}/{branch}")],
            Some(workdir),
        )?;
        if !status.success() {
            return Err(RepoError::Syscall(SyscallError::Failed {
                command: "git merge".into(),
                message: output,
            }));
        }

        Ok(summary)
    }

    /// Create README in repository root if it is missing, and stage it.
    ///
    /// Returns whether README was created.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::WriteFile`] if README cannot be written.
    /// - Return [`RepoError::Git2`] if README cannot be staged.
    pub fn ensure_readme(&self) -> Result<bool> {
        let path = self.workdir()?.join("README.md");
        if path.exists() {
            return Ok(false);
        }

        info!("readme not found, creating readme file...");
        write(&path, README_TEMPLATE).map_err(|err| RepoError::WriteFile {
            source: err,
            path: path.clone(),
        })?;

        let mut index = self.repository.index()?;
        index.add_path(Path::new("README.md"))?;
        index.write()?;

        Ok(true)
    }

    /// Stage every change in working tree, and commit it.
    ///
    /// Returns [`None`] if there was nothing to commit.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`] if staging or committing fails.
    #[instrument(skip(self), level = "debug")]
    pub fn commit_all(&self, message: &str) -> Result<Option<Oid>> {
        let mut index = self.repository.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"], None)?;
        index.write()?;
        let tree_oid = index.write_tree()?;

        let parent = self.head_commit()?;
        let unchanged = match &parent {
            Some(parent) => parent.tree_id() == tree_oid,
            None => index.is_empty(),
        };
        if unchanged {
            debug!("nothing to commit");
            return Ok(None);
        }

        let tree = self.repository.find_tree(tree_oid)?;
        let signature = self.repository.signature()?;
        let parents = parent.iter().collect::<Vec<&Commit>>();
        let oid = self.repository.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;
        info!("committed {oid}: {message}");

        Ok(Some(oid))
    }

    /// Push local branch to remote.
    ///
    /// Returns summary of changes pushed out.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`] if push fails.
    /// - Return [`RepoError::Rejected`] if remote rejects the update.
    #[instrument(skip(self), level = "debug")]
    pub fn push(&self, remote: &str, branch: &str) -> Result<SyncSummary> {
        let Some(local) = self.head_commit()? else {
            warn!("nothing to push, {branch} has no commits");
            return Ok(SyncSummary::default());
        };

        let tracking = self
            .repository
            .find_reference(&tracking_ref(remote, branch))
            .ok()
            .and_then(|reference| reference.peel_to_commit().ok());
        if tracking.as_ref().map(Commit::id) == Some(local.id()) {
            debug!("{remote}/{branch} already up to date");
            return Ok(SyncSummary::default());
        }

        let tracking_tree = tracking.map(|commit| commit.tree()).transpose()?;
        let summary = self.summarize(tracking_tree.as_ref(), Some(&local.tree()?))?;

        info!("pushing updates to remote repository...");
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        let mut handle = self.repository.find_remote(remote)?;
        let bar = self.progress_bar(format!("push {remote}/{branch}"))?;
        let authenticator =
            GitAuthenticator::default().set_prompter(IndicatifPrompter::new(bar.clone()));
        let config = self.repository.config()?;
        let mut rejection = None;

        // INVARIANT: Callbacks borrow rejection, so drop them before reading it.
        let result = {
            let mut callbacks = remote_callbacks(&bar, &authenticator, &config);
            callbacks.push_update_reference(|refname, status| {
                if let Some(status) = status {
                    rejection = Some(format!("{refname}: {status}"));
                }
                Ok(())
            });
            let mut opts = PushOptions::new();
            opts.remote_callbacks(callbacks);
            handle.push(&[refspec.as_str()], Some(&mut opts))
        };
        bar.finish_and_clear();
        result?;

        if let Some(reason) = rejection {
            return Err(RepoError::Rejected { reason });
        }

        self.repository.reference(
            &tracking_ref(remote, branch),
            local.id(),
            true,
            "updot: push",
        )?;

        Ok(summary)
    }

    /// Summarize uncommitted changes in working tree.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`] if diff cannot be computed.
    pub fn local_changes(&self) -> Result<SyncSummary> {
        let head_tree = self.head_commit()?.map(|commit| commit.tree()).transpose()?;
        let mut opts = DiffOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let mut diff = self
            .repository
            .diff_tree_to_workdir_with_index(head_tree.as_ref(), Some(&mut opts))?;
        diff.find_similar(Some(DiffFindOptions::new().renames(true).copies(true)))?;

        Ok(SyncSummary::from_diff(&diff))
    }

    fn summarize(&self, old: Option<&Tree<'_>>, new: Option<&Tree<'_>>) -> Result<SyncSummary> {
        let mut diff = self.repository.diff_tree_to_tree(old, new, None)?;
        diff.find_similar(Some(DiffFindOptions::new().renames(true).copies(true)))?;

        Ok(SyncSummary::from_diff(&diff))
    }

    fn head_commit(&self) -> Result<Option<Commit<'_>>> {
        match self.repository.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(err) if err.code() == git2::ErrorCode::UnbornBranch => Ok(None),
            Err(err) if err.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn progress_bar(&self, label: String) -> Result<ProgressBar> {
        let bar = if self.progress {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<30}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.set_message(label);
        bar.enable_steady_tick(Duration::from_millis(100));

        Ok(bar)
    }
}

/// Build remote callbacks with credential prompting and progress reporting.
///
/// If any credentials are required, the user is prompted for them. The
/// progress bar is suspended while waiting on user input.
fn remote_callbacks<'a>(
    bar: &ProgressBar,
    authenticator: &'a GitAuthenticator,
    config: &'a Config,
) -> RemoteCallbacks<'a> {
    let fetch_bar = bar.clone();
    let mut fetch_throttle = Instant::now();
    let push_bar = bar.clone();
    let mut push_throttle = Instant::now();

    let mut rc = RemoteCallbacks::new();
    rc.credentials(authenticator.credentials(config));
    rc.transfer_progress(move |progress| {
        if fetch_throttle.elapsed() > Duration::from_millis(10) {
            fetch_throttle = Instant::now();
            fetch_bar.set_length(progress.total_objects() as u64);
            fetch_bar.set_position(progress.received_objects() as u64);
        }
        true
    });
    rc.push_transfer_progress(move |current, total, _bytes| {
        if push_throttle.elapsed() > Duration::from_millis(10) {
            push_throttle = Instant::now();
            push_bar.set_length(total as u64);
            push_bar.set_position(current as u64);
        }
    });

    rc
}

fn tracking_ref(remote: &str, branch: &str) -> String {
    format!("refs/remotes/{remote}/{branch}")
}

/// Kind of change between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
    Unmerged,
    TypeChanged,
}

impl Display for ChangeKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let label = match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
            Self::Copied => "copied",
            Self::Unmerged => "unmerged",
            Self::TypeChanged => "typechange",
        };
        fmt.pad(label)
    }
}

/// Single changed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    pub path: PathBuf,

    /// Previous path of renamed or copied files.
    pub old_path: Option<PathBuf>,
}

/// Human-readable list of changes between two snapshots.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    changes: Vec<Change>,
}

impl SyncSummary {
    fn from_diff(diff: &git2::Diff<'_>) -> Self {
        let changes = diff
            .deltas()
            .filter_map(|delta| {
                let kind = match delta.status() {
                    Delta::Added | Delta::Untracked => ChangeKind::Added,
                    Delta::Modified => ChangeKind::Modified,
                    Delta::Deleted => ChangeKind::Deleted,
                    Delta::Renamed => ChangeKind::Renamed,
                    Delta::Copied => ChangeKind::Copied,
                    Delta::Conflicted => ChangeKind::Unmerged,
                    Delta::Typechange => ChangeKind::TypeChanged,
                    Delta::Unmodified | Delta::Ignored | Delta::Unreadable => return None,
                };
                let path = delta
                    .new_file()
                    .path()
                    .or_else(|| delta.old_file().path())?
                    .to_path_buf();
                let old_path = match kind {
                    ChangeKind::Renamed | ChangeKind::Copied => {
                        delta.old_file().path().map(Path::to_path_buf)
                    }
                    _ => None,
                };

                Some(Change {
                    kind,
                    path,
                    old_path,
                })
            })
            .collect();

        Self { changes }
    }

    /// Listed changes in diff order.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Check if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Count changes of one kind.
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes
            .iter()
            .filter(|change| change.kind == kind)
            .count()
    }
}

impl Display for SyncSummary {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        if self.changes.is_empty() {
            return write!(fmt, "Already up to date.");
        }

        let mut lines = self.changes.iter().peekable();
        while let Some(change) = lines.next() {
            match &change.old_path {
                Some(old) => write!(
                    fmt,
                    "  {:<10} {} -> {}",
                    change.kind,
                    old.display(),
                    change.path.display()
                )?,
                None => write!(fmt, "  {:<10} {}", change.kind, change.path.display())?,
            }

            if lines.peek().is_some() {
                writeln!(fmt)?;
            }
        }

        Ok(())
    }
}

/// Repository error types.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// Repository directory cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// File in repository cannot be written.
    #[error("failed to write {:?}", path.display())]
    WriteFile {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Repository has no working tree.
    #[error("dotfiles repository has no working tree")]
    Bare,

    /// Remote rejects pushed reference.
    #[error("remote rejected push: {reason}")]
    Rejected { reason: String },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// External git invocation fails.
    #[error(transparent)]
    Syscall(#[from] SyscallError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = RepoError> = std::result::Result<T, E>;
