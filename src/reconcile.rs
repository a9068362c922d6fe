// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Symlink reconciliation.
//!
//! Every manifest entry has two possible homes: the __target__ location under
//! the target root (usually `~`), and the __repository__ location under the
//! dotfiles repository. Reconciliation brings each entry into one of two
//! consistent end states:
//!
//! 1. The target location is a symlink pointing at the repository location,
//!    and the actual content lives only in the repository.
//! 2. Neither location exists, and no dangling link is left behind.
//!
//! # Link States
//!
//! Each entry is classified by three filesystem probes: whether anything
//! exists at the target location (broken links included), whether that thing
//! is a symlink, and whether the repository location exists. The probes map
//! onto six [`LinkState`]s:
//!
//! | target exists | target is link | repo exists | state |
//! |---|---|---|---|
//! | yes | no  | yes | [`LinkState::BackupAndLink`] |
//! | yes | yes | yes | [`LinkState::Okay`] |
//! | no  | -   | yes | [`LinkState::Link`] |
//! | yes | yes | no  | [`LinkState::RemoveDeadLink`] |
//! | yes | no  | no  | [`LinkState::MoveAndLink`] |
//! | no  | -   | no  | [`LinkState::Missing`] |
//!
//! Reconciliation is idempotent. A second pass over an unchanged filesystem
//! only ever yields [`LinkState::Okay`] or [`LinkState::Missing`].
//!
//! # Pitfalls
//!
//! There is no rollback. If the link cannot be created after a real file was
//! backed up or moved, the file stays where it was moved to.

use crate::{
    config::Layout,
    manifest::{longest_name, ManifestEntry},
};

use chrono::{DateTime, Local};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// Timestamp format prefixed onto backup file names.
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// Raw filesystem observations for one entry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    /// Something exists at target location, even a broken symlink.
    pub target_exists: bool,

    /// Target location is a symlink.
    pub target_is_link: bool,

    /// Repository location exists, following symlinks.
    pub repo_exists: bool,
}

impl Probe {
    /// Observe target and repository locations.
    pub fn inspect(target: impl AsRef<Path>, repo: impl AsRef<Path>) -> Self {
        let metadata = fs::symlink_metadata(target.as_ref());
        Self {
            target_exists: metadata.is_ok(),
            target_is_link: metadata
                .map(|meta| meta.file_type().is_symlink())
                .unwrap_or(false),
            repo_exists: repo.as_ref().exists(),
        }
    }
}

/// Classification of a manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Real file at target and a copy in repository. Back up the target, then
    /// link it.
    BackupAndLink,

    /// Target is already a link and repository copy exists.
    Okay,

    /// Only repository copy exists. Link it into target.
    Link,

    /// Target is a link but repository copy is gone.
    RemoveDeadLink,

    /// Only a real file at target. Move it into repository, then link it.
    MoveAndLink,

    /// Listed in manifest, but no copy exists anywhere.
    Missing,
}

impl LinkState {
    /// Check if reaching a consistent state requires touching the filesystem.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Okay | Self::Missing)
    }
}

impl Display for LinkState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let label = match self {
            Self::BackupAndLink => "backup and link",
            Self::Okay => "okay",
            Self::Link => "link",
            Self::RemoveDeadLink => "remove dead link",
            Self::MoveAndLink => "move and link",
            Self::Missing => "missing",
        };
        fmt.pad(label)
    }
}

impl From<Probe> for LinkState {
    fn from(probe: Probe) -> Self {
        match (probe.target_exists, probe.target_is_link, probe.repo_exists) {
            (true, false, true) => Self::BackupAndLink,
            (true, true, true) => Self::Okay,
            (false, _, true) => Self::Link,
            (true, true, false) => Self::RemoveDeadLink,
            (true, false, false) => Self::MoveAndLink,
            (false, _, false) => Self::Missing,
        }
    }
}

/// Outcome of reconciling, or planning to reconcile, one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReport {
    /// Entry name.
    pub name: String,

    /// Directory holding the target location.
    pub target_dir: PathBuf,

    /// State the entry was classified as.
    pub state: LinkState,

    /// Where a displaced real file was moved to, if anywhere.
    pub backup: Option<PathBuf>,
}

impl LinkReport {
    /// Render human-readable status lines aligned to `width` columns.
    pub fn render(&self, width: usize) -> String {
        let name = format!("{:<width$}", self.name);
        let blank = " ".repeat(name.chars().count());
        let dir = self.target_dir.display();

        match self.state {
            LinkState::BackupAndLink => format!(
                "{name} - Removing from target directory: {dir}\n{blank} - Linking into target directory: {dir}"
            ),
            LinkState::Okay => format!("{name} - Okay"),
            LinkState::Link => format!("{name} - Linking into target directory: {dir}"),
            LinkState::RemoveDeadLink => {
                format!("{name} - Removing dead link from target directory: {dir}")
            }
            LinkState::MoveAndLink => format!(
                "{name} - Moving to dotfiles directory...\n{blank} - Linking into target directory: {dir}"
            ),
            LinkState::Missing => format!(
                "{name} - Warning: present in manifest, but no remote or local copy exists!"
            ),
        }
    }
}

/// Batch of link reports.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkSummary {
    width: usize,
    reports: Vec<LinkReport>,
}

impl LinkSummary {
    /// Reports in manifest order.
    pub fn reports(&self) -> &[LinkReport] {
        &self.reports
    }

    /// Number of entries whose filesystem state was changed.
    pub fn mutations(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| report.state.is_mutating())
            .count()
    }
}

impl Display for LinkSummary {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for report in &self.reports {
            writeln!(fmt, "{}", report.render(self.width))?;
        }

        Ok(())
    }
}

/// Reconcile manifest entries between target and repository roots.
#[derive(Debug, Clone)]
pub struct Reconciler<'a> {
    layout: &'a Layout,
    clock: fn() -> DateTime<Local>,
}

impl<'a> Reconciler<'a> {
    /// Construct new reconciler over a directory layout.
    pub fn new(layout: &'a Layout) -> Self {
        Self::with_clock(layout, Local::now)
    }

    /// Construct new reconciler that timestamps backups with custom clock.
    pub fn with_clock(layout: &'a Layout, clock: fn() -> DateTime<Local>) -> Self {
        Self { layout, clock }
    }

    /// Absolute target location of entry.
    pub fn target_path(&self, entry: &ManifestEntry) -> PathBuf {
        self.layout.target_root.join(entry.path())
    }

    /// Absolute repository location of entry.
    pub fn repo_path(&self, entry: &ManifestEntry) -> PathBuf {
        self.layout.repo_root.join(entry.repo_path())
    }

    /// Classify entry against current filesystem state.
    pub fn classify(&self, entry: &ManifestEntry) -> LinkState {
        Probe::inspect(self.target_path(entry), self.repo_path(entry)).into()
    }

    /// Layout root that entry contains or lies inside of, if any.
    ///
    /// Such entries would move the repository or backup directory into
    /// itself, so they are never reconciled.
    pub fn overlapping_root(&self, entry: &ManifestEntry) -> Option<&'a Path> {
        let layout: &'a Layout = self.layout;
        let target = self.target_path(entry);
        [&layout.repo_root, &layout.backup_root]
            .into_iter()
            .find(|root| root.starts_with(&target) || target.starts_with(root))
            .map(PathBuf::as_path)
    }

    /// Classify every entry without touching the filesystem.
    ///
    /// Entries overlapping a layout root are left out.
    pub fn plan(&self, entries: &[ManifestEntry]) -> LinkSummary {
        let reports = entries
            .iter()
            .filter(|entry| self.overlapping_root(entry).is_none())
            .map(|entry| self.report(entry, self.classify(entry), None))
            .collect();

        LinkSummary {
            width: longest_name(entries),
            reports,
        }
    }

    /// Reconcile every entry in manifest order.
    ///
    /// Logs one status line per entry as it goes.
    ///
    /// # Errors
    ///
    /// - Return [`ReconcileError`] on the first filesystem operation that
    ///   fails. Entries before it stay reconciled.
    #[instrument(skip(self, entries), level = "debug")]
    pub fn reconcile(&self, entries: &[ManifestEntry]) -> Result<LinkSummary> {
        info!("checking symlinks...");
        let width = longest_name(entries);
        let mut reports = Vec::with_capacity(entries.len());

        for entry in entries {
            if let Some(root) = self.overlapping_root(entry) {
                warn!(
                    "{:?} overlaps {:?}, skipping",
                    entry.path(),
                    root.display()
                );
                continue;
            }

            let report = self.reconcile_entry(entry)?;
            match report.state {
                LinkState::Missing => warn!("{}", report.render(width)),
                _ => info!("{}", report.render(width)),
            }
            reports.push(report);
        }

        Ok(LinkSummary { width, reports })
    }

    /// Reconcile a single entry.
    ///
    /// # Errors
    ///
    /// - Return [`ReconcileError::Overlap`] if entry contains or lies inside
    ///   the repository or backup root.
    /// - Return [`ReconcileError`] if any filesystem operation fails.
    pub fn reconcile_entry(&self, entry: &ManifestEntry) -> Result<LinkReport> {
        if let Some(root) = self.overlapping_root(entry) {
            return Err(ReconcileError::Overlap {
                path: self.target_path(entry),
                root: root.to_path_buf(),
            });
        }

        let target = self.target_path(entry);
        let repo = self.repo_path(entry);
        let state = LinkState::from(Probe::inspect(&target, &repo));
        debug!("{:?} classified as {state:?}", entry.path());

        let backup = match state {
            LinkState::BackupAndLink => {
                let backup = self.backup(entry, &target)?;
                make_link(&repo, &target)?;
                Some(backup)
            }
            LinkState::Link => {
                if let Some(parent) = target.parent() {
                    make_dirs(parent)?;
                }
                make_link(&repo, &target)?;
                None
            }
            LinkState::RemoveDeadLink => {
                remove_link(&target)?;
                None
            }
            LinkState::MoveAndLink => {
                if let Some(parent) = repo.parent() {
                    make_dirs(parent)?;
                }
                move_path(&target, &repo)?;
                make_link(&repo, &target)?;
                None
            }
            LinkState::Okay | LinkState::Missing => None,
        };

        Ok(self.report(entry, state, backup))
    }

    /// Move real target file into backup root under a timestamped name.
    fn backup(&self, entry: &ManifestEntry, target: &Path) -> Result<PathBuf> {
        make_dirs(&self.layout.backup_root)?;
        let backup = self
            .layout
            .backup_root
            .join(backup_file_name(entry.name(), (self.clock)()));

        // INVARIANT: Never overwrite an existing backup.
        if fs::symlink_metadata(&backup).is_ok() {
            return Err(ReconcileError::BackupExists { path: backup });
        }

        debug!("back up {:?} to {:?}", target.display(), backup.display());
        move_path(target, &backup)?;

        Ok(backup)
    }

    fn report(&self, entry: &ManifestEntry, state: LinkState, backup: Option<PathBuf>) -> LinkReport {
        LinkReport {
            name: entry.name().to_string(),
            target_dir: self.layout.target_root.join(entry.relative_dir()),
            state,
            backup,
        }
    }
}

/// File name a displaced file is backed up under.
pub fn backup_file_name(name: &str, at: DateTime<Local>) -> String {
    format!("[{}]{name}", at.format(BACKUP_TIMESTAMP_FORMAT))
}

fn make_dirs(path: &Path) -> Result<()> {
    mkdirp::mkdirp(path).map_err(|err| ReconcileError::CreateDir {
        source: err,
        path: path.to_path_buf(),
    })?;

    Ok(())
}

fn make_link(original: &Path, link: &Path) -> Result<()> {
    debug!("link {:?} -> {:?}", link.display(), original.display());
    symlink(original, link).map_err(|err| ReconcileError::Link {
        source: err,
        original: original.to_path_buf(),
        link: link.to_path_buf(),
    })
}

fn remove_link(link: &Path) -> Result<()> {
    debug!("remove dead link {:?}", link.display());
    unlink(link).map_err(|err| ReconcileError::RemoveLink {
        source: err,
        path: link.to_path_buf(),
    })
}

/// Move file, directory, or symlink to a new location.
///
/// Falls back to copy and remove only when source and destination live on
/// different filesystems.
fn move_path(from: &Path, to: &Path) -> Result<()> {
    let into_error = |err: io::Error| ReconcileError::Move {
        source: err,
        from: from.to_path_buf(),
        to: to.to_path_buf(),
    };

    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            debug!("{:?} is on another filesystem, copying instead", from.display());
            copy_then_remove(from, to).map_err(into_error)
        }
        Err(err) => Err(into_error(err)),
    }
}

fn copy_then_remove(from: &Path, to: &Path) -> io::Result<()> {
    // INVARIANT: Never copy a directory into its own subtree.
    if to.starts_with(from) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "destination lies inside source",
        ));
    }

    let file_type = fs::symlink_metadata(from)?.file_type();
    if file_type.is_symlink() {
        symlink(&fs::read_link(from)?, to)?;
        return unlink(from);
    }

    if file_type.is_file() {
        fs::copy(from, to)?;
        return fs::remove_file(from);
    }

    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        let dest = to.join(relative);
        let kind = entry.file_type();

        if kind.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if kind.is_symlink() {
            symlink(&fs::read_link(entry.path())?, &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }

    fs::remove_dir_all(from)
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn symlink(original: &Path, link: &Path) -> io::Result<()> {
    if original.is_dir() {
        std::os::windows::fs::symlink_dir(original, link)
    } else {
        std::os::windows::fs::symlink_file(original, link)
    }
}

#[cfg(unix)]
fn unlink(link: &Path) -> io::Result<()> {
    fs::remove_file(link)
}

#[cfg(windows)]
fn unlink(link: &Path) -> io::Result<()> {
    fs::remove_file(link).or_else(|_| fs::remove_dir(link))
}

/// Reconciliation error types.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Missing parent directory cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Symlink cannot be created.
    #[error("failed to link {:?} to {:?}", link.display(), original.display())]
    Link {
        #[source]
        source: io::Error,
        original: PathBuf,
        link: PathBuf,
    },

    /// Dead symlink cannot be removed.
    #[error("failed to remove dead link {:?}", path.display())]
    RemoveLink {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// File cannot be moved.
    #[error("failed to move {:?} to {:?}", from.display(), to.display())]
    Move {
        #[source]
        source: io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Entry would move a layout root into itself.
    #[error("{:?} overlaps {:?}", path.display(), root.display())]
    Overlap { path: PathBuf, root: PathBuf },

    /// Backup with the same timestamp already exists.
    #[error("backup {:?} already exists, refusing to overwrite it", path.display())]
    BackupExists { path: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;
    use std::fs::{read_dir, read_link, read_to_string, write};

    struct Sandbox {
        layout: Layout,
    }

    impl Sandbox {
        fn new() -> anyhow::Result<Self> {
            let root = std::env::current_dir()?;
            let layout = Layout::new(
                root.join("home"),
                root.join("dotfiles"),
                root.join("backup"),
            );
            fs::create_dir_all(&layout.target_root)?;
            fs::create_dir_all(&layout.repo_root)?;

            Ok(Self { layout })
        }

        fn entry(&self, line: &str) -> ManifestEntry {
            ManifestEntry::parse(line, &self.layout.target_root).unwrap()
        }

        fn home(&self, path: &str) -> PathBuf {
            self.layout.target_root.join(path)
        }

        fn repo(&self, path: &str) -> PathBuf {
            self.layout.repo_root.join(path)
        }

        fn backups(&self) -> Vec<PathBuf> {
            match read_dir(&self.layout.backup_root) {
                Ok(dir) => dir.map(|entry| entry.unwrap().path()).collect(),
                Err(_) => Vec::new(),
            }
        }
    }

    fn fixed_clock() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()
    }

    fn is_link(path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false)
    }

    #[test_case(true, false, true, LinkState::BackupAndLink; "real target with repo copy")]
    #[test_case(true, true, true, LinkState::Okay; "linked target with repo copy")]
    #[test_case(false, false, true, LinkState::Link; "only repo copy")]
    #[test_case(false, true, true, LinkState::Link; "only repo copy with stale link flag")]
    #[test_case(true, true, false, LinkState::RemoveDeadLink; "dangling target link")]
    #[test_case(true, false, false, LinkState::MoveAndLink; "only real target")]
    #[test_case(false, false, false, LinkState::Missing; "nothing anywhere")]
    #[test_case(false, true, false, LinkState::Missing; "nothing anywhere with stale link flag")]
    #[test]
    fn classify_probe(target_exists: bool, target_is_link: bool, repo_exists: bool, expect: LinkState) {
        let probe = Probe {
            target_exists,
            target_is_link,
            repo_exists,
        };
        pretty_assertions::assert_eq!(LinkState::from(probe), expect);
    }

    #[sealed_test]
    fn move_and_link_real_target() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        write(sandbox.home(".vimrc"), "set nu")?;

        let entry = sandbox.entry(".vimrc");
        let report = Reconciler::new(&sandbox.layout).reconcile_entry(&entry)?;

        assert_eq!(report.state, LinkState::MoveAndLink);
        assert!(is_link(&sandbox.home(".vimrc")));
        assert_eq!(read_link(sandbox.home(".vimrc"))?, sandbox.repo("vimrc"));
        assert_eq!(read_to_string(sandbox.repo("vimrc"))?, "set nu");
        assert!(sandbox.backups().is_empty());

        Ok(())
    }

    #[sealed_test]
    fn move_and_link_nested_directory() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        fs::create_dir_all(sandbox.home(".config/nvim/lua"))?;
        write(sandbox.home(".config/nvim/lua/init.lua"), "vim.o.number = true")?;

        let entry = sandbox.entry(".config/nvim");
        let report = Reconciler::new(&sandbox.layout).reconcile_entry(&entry)?;

        assert_eq!(report.state, LinkState::MoveAndLink);
        assert_eq!(read_link(sandbox.home(".config/nvim"))?, sandbox.repo(".config/nvim"));
        assert_eq!(
            read_to_string(sandbox.repo(".config/nvim/lua/init.lua"))?,
            "vim.o.number = true"
        );

        Ok(())
    }

    #[sealed_test]
    fn backup_and_link_real_target() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        write(sandbox.home(".bashrc"), "local")?;
        write(sandbox.repo("bashrc"), "tracked")?;

        let entry = sandbox.entry(".bashrc");
        let report = Reconciler::with_clock(&sandbox.layout, fixed_clock).reconcile_entry(&entry)?;

        let backup = sandbox.layout.backup_root.join("[2025-01-02_03:04:05].bashrc");
        assert_eq!(report.state, LinkState::BackupAndLink);
        assert_eq!(report.backup, Some(backup.clone()));
        assert_eq!(read_link(sandbox.home(".bashrc"))?, sandbox.repo("bashrc"));
        assert_eq!(read_to_string(sandbox.home(".bashrc"))?, "tracked");
        assert_eq!(read_to_string(&backup)?, "local");
        assert_eq!(sandbox.backups(), vec![backup]);

        Ok(())
    }

    #[sealed_test]
    fn backup_never_overwrites_existing_backup() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        write(sandbox.home(".bashrc"), "local")?;
        write(sandbox.repo("bashrc"), "tracked")?;
        fs::create_dir_all(&sandbox.layout.backup_root)?;
        let backup = sandbox.layout.backup_root.join("[2025-01-02_03:04:05].bashrc");
        write(&backup, "older backup")?;

        let entry = sandbox.entry(".bashrc");
        let result = Reconciler::with_clock(&sandbox.layout, fixed_clock).reconcile_entry(&entry);

        assert!(matches!(result, Err(ReconcileError::BackupExists { .. })));
        assert_eq!(read_to_string(&backup)?, "older backup");
        assert_eq!(read_to_string(sandbox.home(".bashrc"))?, "local");

        Ok(())
    }

    #[sealed_test]
    fn link_creates_missing_target_directories() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        fs::create_dir_all(sandbox.repo(".config/git"))?;
        write(sandbox.repo(".config/git/config"), "[user]")?;

        let entry = sandbox.entry(".config/git/config");
        let report = Reconciler::new(&sandbox.layout).reconcile_entry(&entry)?;

        assert_eq!(report.state, LinkState::Link);
        assert_eq!(report.target_dir, sandbox.home(".config/git"));
        assert_eq!(
            read_link(sandbox.home(".config/git/config"))?,
            sandbox.repo(".config/git/config")
        );

        Ok(())
    }

    #[sealed_test]
    fn okay_when_already_linked() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        write(sandbox.repo("zshrc"), "setopt autocd")?;
        symlink(&sandbox.repo("zshrc"), &sandbox.home(".zshrc"))?;

        let entry = sandbox.entry(".zshrc");
        let report = Reconciler::new(&sandbox.layout).reconcile_entry(&entry)?;

        assert_eq!(report.state, LinkState::Okay);
        assert_eq!(read_link(sandbox.home(".zshrc"))?, sandbox.repo("zshrc"));
        assert!(sandbox.backups().is_empty());

        Ok(())
    }

    #[sealed_test]
    fn remove_dead_link_only() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        symlink(&sandbox.repo("gone"), &sandbox.home(".gone"))?;

        let entry = sandbox.entry(".gone");
        let report = Reconciler::new(&sandbox.layout).reconcile_entry(&entry)?;

        assert_eq!(report.state, LinkState::RemoveDeadLink);
        assert!(fs::symlink_metadata(sandbox.home(".gone")).is_err());
        assert!(!sandbox.repo("gone").exists());
        assert!(sandbox.backups().is_empty());

        Ok(())
    }

    #[sealed_test]
    fn missing_entry_changes_nothing() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;

        let entry = sandbox.entry(".nowhere");
        let report = Reconciler::new(&sandbox.layout).reconcile_entry(&entry)?;

        assert_eq!(report.state, LinkState::Missing);
        assert!(report.render(0).contains(".nowhere"));
        assert!(report.render(0).contains("Warning"));
        assert_eq!(read_dir(&sandbox.layout.target_root)?.count(), 0);
        assert_eq!(read_dir(&sandbox.layout.repo_root)?.count(), 0);
        assert!(sandbox.backups().is_empty());

        Ok(())
    }

    #[sealed_test]
    fn second_pass_is_idempotent() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        write(sandbox.home(".vimrc"), "set nu")?;
        write(sandbox.home(".bashrc"), "local")?;
        write(sandbox.repo("bashrc"), "tracked")?;
        write(sandbox.repo("inputrc"), "set bell-style none")?;
        symlink(&sandbox.repo("gone"), &sandbox.home(".gone"))?;

        let entries = [".vimrc", ".bashrc", ".inputrc", ".gone", ".nowhere"]
            .into_iter()
            .map(|line| sandbox.entry(line))
            .collect::<Vec<_>>();
        let reconciler = Reconciler::new(&sandbox.layout);

        let first = reconciler.reconcile(&entries)?;
        assert_eq!(first.mutations(), 4);

        let second = reconciler.reconcile(&entries)?;
        let states = second
            .reports()
            .iter()
            .map(|report| report.state)
            .collect::<Vec<_>>();
        assert_eq!(
            states,
            vec![
                LinkState::Okay,
                LinkState::Okay,
                LinkState::Okay,
                LinkState::Missing,
                LinkState::Missing,
            ]
        );
        assert_eq!(second.mutations(), 0);
        assert_eq!(sandbox.backups().len(), 1);

        Ok(())
    }

    #[sealed_test]
    fn plan_does_not_mutate() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        write(sandbox.home(".vimrc"), "set nu")?;

        let entries = vec![sandbox.entry(".vimrc")];
        let summary = Reconciler::new(&sandbox.layout).plan(&entries);

        assert_eq!(summary.reports()[0].state, LinkState::MoveAndLink);
        assert!(!is_link(&sandbox.home(".vimrc")));
        assert!(!sandbox.repo("vimrc").exists());

        Ok(())
    }

    #[test]
    fn summary_aligns_status_lines() {
        let report = |name: &str, state| LinkReport {
            name: name.into(),
            target_dir: PathBuf::from("/home/blah"),
            state,
            backup: None,
        };
        let summary = LinkSummary {
            width: 7,
            reports: vec![
                report(".vimrc", LinkState::Okay),
                report(".bashrc", LinkState::MoveAndLink),
            ],
        };

        let expect = [
            ".vimrc  - Okay",
            ".bashrc - Moving to dotfiles directory...",
            "        - Linking into target directory: /home/blah",
            "",
        ]
        .join("\n");
        assert_eq!(summary.to_string(), expect);
    }

    #[test]
    fn backup_name_is_timestamp_prefixed() {
        assert_eq!(
            backup_file_name(".vimrc", fixed_clock()),
            "[2025-01-02_03:04:05].vimrc"
        );
    }

    #[sealed_test]
    fn entries_overlapping_layout_roots_are_skipped() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        let layout = Layout::new(
            root.join("home"),
            root.join("home/dotfiles"),
            root.join("home/.dotfiles_backup"),
        );
        fs::create_dir_all(&layout.repo_root)?;
        write(layout.repo_root.join("vimrc"), "set nu")?;
        let entries = ["dotfiles", "dotfiles/vimrc", ".dotfiles_backup", "~"]
            .into_iter()
            .filter_map(|line| ManifestEntry::parse(line, &layout.target_root).ok())
            .collect::<Vec<_>>();
        let reconciler = Reconciler::new(&layout);

        assert!(matches!(
            reconciler.reconcile_entry(&entries[0]),
            Err(ReconcileError::Overlap { .. })
        ));
        assert!(reconciler.plan(&entries).reports().is_empty());

        let summary = reconciler.reconcile(&entries)?;
        assert!(summary.reports().is_empty());
        assert!(!is_link(&layout.repo_root));
        assert!(!layout.repo_root.join("dotfiles").exists());
        assert_eq!(read_to_string(layout.repo_root.join("vimrc"))?, "set nu");

        Ok(())
    }

    #[cfg(unix)]
    #[sealed_test]
    fn copy_fallback_moves_directory_tree() -> anyhow::Result<()> {
        fs::create_dir_all("from/nvim/lua")?;
        write("from/nvim/init.lua", "require('plugins')")?;
        write("from/nvim/lua/plugins.lua", "return {}")?;
        std::os::unix::fs::symlink("init.lua", "from/nvim/current.lua")?;

        copy_then_remove(Path::new("from/nvim"), Path::new("to"))?;

        assert!(!Path::new("from/nvim").exists());
        assert_eq!(read_to_string("to/init.lua")?, "require('plugins')");
        assert_eq!(read_to_string("to/lua/plugins.lua")?, "return {}");
        assert_eq!(read_link("to/current.lua")?, PathBuf::from("init.lua"));

        Ok(())
    }

    #[sealed_test]
    fn copy_fallback_refuses_own_subtree() -> anyhow::Result<()> {
        fs::create_dir_all("dotfiles/vim")?;
        write("dotfiles/vim/vimrc", "set nu")?;

        let result = copy_then_remove(Path::new("dotfiles"), Path::new("dotfiles/dotfiles"));
        assert_eq!(
            result.map_err(|err| err.kind()),
            Err(io::ErrorKind::InvalidInput)
        );
        assert!(!Path::new("dotfiles/dotfiles").exists());
        assert_eq!(read_to_string("dotfiles/vim/vimrc")?, "set nu");

        Ok(())
    }
}
