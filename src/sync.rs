// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Synchronization driver.
//!
//! Ties every other component together into the three things updot can be
//! asked to do: a full synchronization run, a relink-only run, and a
//! status-only run that changes nothing.
//!
//! A full run goes through the following steps in order, stopping at the
//! first fatal failure:
//!
//! 1. Check internet connectivity.
//! 2. Make sure git identity and hosting user are known.
//! 3. Make sure SSH access to the hosting service works.
//! 4. Bootstrap repository, remote, and hosted repository.
//! 5. Pull remote changes.
//! 6. Create README and manifest if missing.
//! 7. Reconcile links.
//! 8. Commit and push.

use crate::{
    config::Settings,
    hosting::{check_connectivity, Credentials, HostingClient, HostingError, CONNECTIVITY_TIMEOUT},
    identity::{ensure_identity, Identity, IdentityError},
    manifest::{ensure_manifest, Manifest, ManifestError},
    path::{default_ssh_key, NoWayHome},
    prompt::ask_text,
    reconcile::{LinkSummary, ReconcileError, Reconciler},
    repo::{DotfilesRepo, RepoError, SyncSummary},
    ssh::{ensure_key, probe_access, register_key, SshAccess, SshError},
};

use git2::{Config, Oid};
use tracing::{debug, info, instrument, warn};

/// Message of the very first commit in a fresh repository.
pub const INITIAL_COMMIT_MESSAGE: &str = "Initial commit";

/// Knobs for a synchronization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Commit message overriding the configured default.
    pub message: Option<String>,

    /// Allow opening an editor on a freshly created manifest.
    pub interactive: bool,

    /// Show progress bars during fetch and push.
    pub progress: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            message: None,
            interactive: true,
            progress: true,
        }
    }
}

/// Outcome of a full synchronization run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub pulled: SyncSummary,
    pub links: LinkSummary,
    pub commit: Option<Oid>,
    pub pushed: SyncSummary,
}

/// Outcome of a status-only run.
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// Planned link actions.
    pub links: LinkSummary,

    /// Uncommitted repository changes, if a repository exists.
    pub changes: Option<SyncSummary>,
}

/// State of the remote after bootstrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    /// Remote branch was fetched and can be merged.
    Fetched,

    /// Remote has nothing to pull yet.
    Empty,
}

/// Hosting credentials, resolved at most once per run.
#[derive(Debug)]
struct CredentialCache {
    user: String,
    credentials: Option<Credentials>,
}

impl CredentialCache {
    fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            credentials: None,
        }
    }

    fn get(&mut self) -> Result<Credentials> {
        if let Some(credentials) = &self.credentials {
            return Ok(credentials.clone());
        }

        let credentials = Credentials::resolve(&self.user)?;
        self.credentials = Some(credentials.clone());
        Ok(credentials)
    }
}

/// Run a full synchronization.
///
/// # Errors
///
/// - Return [`SyncError`] from the first step that fails.
#[instrument(skip(settings), level = "debug")]
pub async fn sync(settings: &Settings, opts: &SyncOptions) -> Result<SyncReport> {
    check_connectivity(&settings.remote.api_url, CONNECTIVITY_TIMEOUT).await?;
    info!("internet connection detected");

    let mut git_config = Config::open_default()?;
    let identity = ensure_identity(&mut git_config, settings.remote.user.as_deref(), ask_text)?;

    let client = HostingClient::new(settings.remote.api_url.as_str())?;
    let mut credentials = CredentialCache::new(identity.host_user.as_str());
    ensure_ssh_access(settings, &identity, &client, &mut credentials).await?;

    let repo = DotfilesRepo::open_or_init(&settings.layout.repo_root, &settings.remote.branch)?
        .with_progress(opts.progress);
    let remote_state =
        bootstrap_remote(settings, &identity, &repo, &client, &mut credentials).await?;

    let remote = &settings.remote;
    let pulled = match remote_state {
        RemoteState::Fetched => repo.merge_fetched(&remote.name, &remote.branch)?,
        RemoteState::Empty => SyncSummary::default(),
    };
    info!("pull summary:\n{pulled}");

    repo.ensure_readme()?;
    let manifest = ensure_manifest(
        &settings.layout.manifest,
        &settings.layout.target_root,
        opts.interactive,
    )?;
    if manifest.is_empty() {
        warn!(
            "no dotfiles listed in {}",
            settings.layout.manifest.display()
        );
    }

    let links = Reconciler::new(&settings.layout).reconcile(manifest.entries())?;

    let message = opts
        .message
        .as_deref()
        .unwrap_or(settings.commit_message.as_str());
    let commit = repo.commit_all(message)?;
    let pushed = repo.push(&remote.name, &remote.branch)?;
    info!("push summary:\n{pushed}");

    Ok(SyncReport {
        pulled,
        links,
        commit,
        pushed,
    })
}

/// Make sure the hosting service accepts our SSH key.
///
/// Generates and registers a key when access is denied.
///
/// # Errors
///
/// - Return [`SyncError::Ssh`] if a key cannot be created or registered.
/// - Return [`SyncError::NoWayHome`] if default key path is unknown.
async fn ensure_ssh_access(
    settings: &Settings,
    identity: &Identity,
    client: &HostingClient,
    credentials: &mut CredentialCache,
) -> Result<()> {
    let host = settings.remote.host.as_str();
    match probe_access(host)? {
        SshAccess::Granted => {
            info!("ssh access to {host} - okay");
            return Ok(());
        }
        SshAccess::Unknown(output) => {
            warn!("could not determine ssh access to {host}: {output}");
            return Ok(());
        }
        SshAccess::Denied => info!("ssh key not registered with {host}"),
    }

    let public_key = ensure_key(&default_ssh_key()?, &identity.email)?;
    register_key(client, credentials.get()?, &public_key).await?;

    match probe_access(host)? {
        SshAccess::Granted => info!("ssh access to {host} - okay"),
        access => warn!("ssh access to {host} still not granted: {access:?}"),
    }

    Ok(())
}

/// Make sure local repository has a remote, and the remote exists.
///
/// The remote is fetched first. Hosting API is only consulted when that
/// fetch fails: a missing hosted repository is created, and one that turns
/// out to exist already is fetched again. A fresh local repository paired
/// with an empty remote receives an initial commit.
///
/// # Errors
///
/// - Return [`SyncError::Hosting`] if hosted repository cannot be checked or
///   created.
/// - Return [`SyncError::Repo`] if remote cannot be configured.
async fn bootstrap_remote(
    settings: &Settings,
    identity: &Identity,
    repo: &DotfilesRepo,
    client: &HostingClient,
    credentials: &mut CredentialCache,
) -> Result<RemoteState> {
    let remote = &settings.remote;
    info!("checking for remote {}...", remote.name);
    if !repo.has_remote(&remote.name) {
        info!("adding remote {}", remote.name);
        repo.add_remote(&remote.name, &remote.ssh_url(&identity.host_user))?;
    }

    let state = match try_fetch(repo, &remote.name, &remote.branch) {
        Some(state) => state,
        None => {
            if client
                .repository_exists(&identity.host_user, &remote.repository)
                .await?
            {
                info!("remote repository has no {} branch yet", remote.branch);
                RemoteState::Empty
            } else {
                info!("remote repository does not exist");
                let created = client
                    .create_repository(credentials.get()?, &remote.repository, &remote.description)
                    .await?;
                if created {
                    RemoteState::Empty
                } else {
                    try_fetch(repo, &remote.name, &remote.branch).unwrap_or(RemoteState::Empty)
                }
            }
        }
    };

    if state == RemoteState::Empty {
        repo.ensure_readme()?;
        if let Some(oid) = repo.commit_all(INITIAL_COMMIT_MESSAGE)? {
            debug!("initial commit {oid}");
        }
    }

    Ok(state)
}

/// Fetch remote branch, yielding nothing if the remote cannot be reached.
fn try_fetch(repo: &DotfilesRepo, remote: &str, branch: &str) -> Option<RemoteState> {
    match repo.fetch(remote, branch) {
        Ok(()) if repo.has_fetched(remote, branch) => Some(RemoteState::Fetched),
        Ok(()) => {
            info!("remote repository has no {branch} branch yet");
            Some(RemoteState::Empty)
        }
        Err(error) => {
            debug!("fetch failed: {error}");
            None
        }
    }
}

/// Reconcile links without touching git or the network.
///
/// # Errors
///
/// - Return [`SyncError::Manifest`] if manifest cannot be created or read.
/// - Return [`SyncError::Reconcile`] if reconciling fails.
#[instrument(skip(settings), level = "debug")]
pub fn relink(settings: &Settings, interactive: bool) -> Result<LinkSummary> {
    let layout = &settings.layout;
    let manifest = ensure_manifest(&layout.manifest, &layout.target_root, interactive)?;
    Ok(Reconciler::new(layout).reconcile(manifest.entries())?)
}

/// Report planned link actions and uncommitted changes. Changes nothing.
///
/// # Errors
///
/// - Return [`SyncError::Manifest`] if existing manifest cannot be read.
/// - Return [`SyncError::Repo`] if existing repository cannot be inspected.
#[instrument(skip(settings), level = "debug")]
pub fn status(settings: &Settings) -> Result<StatusReport> {
    let layout = &settings.layout;
    let manifest = if layout.manifest.exists() {
        Manifest::load(&layout.manifest, &layout.target_root)?
    } else {
        warn!("no manifest at {}", layout.manifest.display());
        Manifest::default()
    };
    let links = Reconciler::new(layout).plan(manifest.entries());

    let changes = match DotfilesRepo::open(&layout.repo_root) {
        Ok(repo) => Some(repo.local_changes()?),
        Err(error) => {
            debug!("no repository to inspect: {error}");
            None
        }
    };

    Ok(StatusReport { links, changes })
}

/// Synchronization error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Hosting(#[from] HostingError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// Git configuration cannot be opened.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),
}

/// Friendly result alias :3
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Layout, SettingsFile},
        reconcile::LinkState,
    };
    use git2::{Repository, RepositoryInitOptions};
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{
        fs,
        io::{BufRead, BufReader, Read, Write},
        net::TcpListener,
        path::Path,
        thread::{self, JoinHandle},
    };

    fn settings() -> anyhow::Result<Settings> {
        let cwd = std::env::current_dir()?;
        let mut settings = Settings::resolve(SettingsFile::default())?;
        settings.layout = Layout::new(cwd.join("home"), cwd.join("dotfiles"), cwd.join("backup"));
        Ok(settings)
    }

    fn identity() -> Identity {
        Identity {
            name: "John Doe".into(),
            email: "john@doe.com".into(),
            host_user: "jdoe".into(),
        }
    }

    fn bare_remote(name: &str) -> anyhow::Result<String> {
        let path = std::env::current_dir()?.join(name);
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("master");
        opts.bare(true);
        Repository::init_opts(&path, &opts)?;
        Ok(path.to_string_lossy().into_owned())
    }

    fn machine(name: &str, url: &str) -> anyhow::Result<DotfilesRepo> {
        let path = std::env::current_dir()?.join(name);
        let repo = DotfilesRepo::open_or_init(&path, "master")?.with_progress(false);

        // INVARIANT: Always provide valid name and email.
        let mut config = Repository::open(&path)?.config()?;
        config.set_str("user.name", "John Doe")?;
        config.set_str("user.email", "john@doe.com")?;

        repo.add_remote("origin", url)?;
        Ok(repo)
    }

    fn seed_remote(url: &str) -> anyhow::Result<()> {
        let seed = machine("seed", url)?;
        fs::write("seed/vimrc", "set nu")?;
        seed.commit_all("updot update")?;
        seed.push("origin", "master")?;
        Ok(())
    }

    /// Serve one canned status per request, recording method and path of
    /// each. The hook runs right before the first POST is answered.
    fn serve_api(
        statuses: Vec<u16>,
        before_post: impl FnOnce() -> std::io::Result<()> + Send + 'static,
    ) -> anyhow::Result<(String, JoinHandle<std::io::Result<Vec<String>>>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let url = format!("http://{}", listener.local_addr()?);
        let handle = thread::spawn(move || -> std::io::Result<Vec<String>> {
            let mut before_post = Some(before_post);
            let mut requests = Vec::new();
            for status in statuses {
                let (mut stream, _) = listener.accept()?;
                let mut reader = BufReader::new(stream.try_clone()?);
                let mut line = String::new();
                reader.read_line(&mut line)?;
                let request = line.split_whitespace().take(2).collect::<Vec<_>>().join(" ");

                let mut length = 0;
                loop {
                    let mut header = String::new();
                    reader.read_line(&mut header)?;
                    let header = header.trim_end();
                    if header.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = header.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            length = value.trim().parse().unwrap_or(0);
                        }
                    }
                }
                let mut body = vec![0; length];
                reader.read_exact(&mut body)?;

                if request.starts_with("POST") {
                    if let Some(hook) = before_post.take() {
                        hook()?;
                    }
                }
                write!(
                    stream,
                    "HTTP/1.1 {status} Stub\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{{}}"
                )?;
                requests.push(request);
            }
            Ok(requests)
        });

        Ok((url, handle))
    }

    fn bootstrap(
        settings: &Settings,
        repo: &DotfilesRepo,
        api_url: &str,
    ) -> anyhow::Result<RemoteState> {
        let client = HostingClient::new(api_url)?;
        let mut credentials = CredentialCache::new("jdoe");
        let state = tokio::runtime::Runtime::new()?.block_on(bootstrap_remote(
            settings,
            &identity(),
            repo,
            &client,
            &mut credentials,
        ))?;
        Ok(state)
    }

    #[sealed_test(env = [("HOME", ".")])]
    fn reachable_remote_is_fetched_without_hosting_api() -> anyhow::Result<()> {
        let url = bare_remote("remote.git")?;
        seed_remote(&url)?;
        let laptop = machine("laptop", &url)?;

        // Nothing listens here, so any API call fails the bootstrap.
        let state = bootstrap(&settings()?, &laptop, "http://127.0.0.1:9")?;
        assert_eq!(state, RemoteState::Fetched);
        assert!(Repository::open("laptop")?.head().is_err());

        laptop.merge_fetched("origin", "master")?;
        assert_eq!(fs::read_to_string("laptop/vimrc")?, "set nu");
        fs::write("laptop/bashrc", "alias ll='ls -l'")?;
        laptop.commit_all("updot update")?;
        assert_eq!(laptop.push("origin", "master")?.count(crate::repo::ChangeKind::Added), 1);

        Ok(())
    }

    #[sealed_test(env = [("HOME", "."), ("GITHUB_TOKEN", "secret")])]
    fn existing_repository_is_fetched_again_after_create() -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let staged = bare_remote("staged.git")?;
        seed_remote(&staged)?;
        let url = cwd.join("remote.git");
        let laptop = machine("laptop", &url.to_string_lossy())?;

        // Private repository: invisible to anonymous lookup, yet creating it
        // is refused because it already exists.
        let (api_url, server) = serve_api(vec![404, 422], move || {
            fs::rename(cwd.join("staged.git"), &url)
        })?;

        let state = bootstrap(&settings()?, &laptop, &api_url)?;
        let requests = server.join().map_err(|_| anyhow::anyhow!("stub server panicked"))??;
        assert_eq!(requests, vec!["GET /repos/jdoe/dotfiles", "POST /user/repos"]);
        assert_eq!(state, RemoteState::Fetched);
        assert!(Repository::open("laptop")?.head().is_err());

        Ok(())
    }

    #[sealed_test(env = [("HOME", "."), ("GITHUB_TOKEN", "secret")])]
    fn missing_repository_is_created_and_seeded() -> anyhow::Result<()> {
        let url = std::env::current_dir()?.join("remote.git");
        let laptop = machine("laptop", &url.to_string_lossy())?;
        let (api_url, server) = serve_api(vec![404, 201], || Ok(()))?;

        let state = bootstrap(&settings()?, &laptop, &api_url)?;
        let requests = server.join().map_err(|_| anyhow::anyhow!("stub server panicked"))??;
        assert_eq!(requests, vec!["GET /repos/jdoe/dotfiles", "POST /user/repos"]);
        assert_eq!(state, RemoteState::Empty);

        let repo = Repository::open("laptop")?;
        let head = repo.head()?.peel_to_commit()?;
        assert_eq!(head.message(), Some(INITIAL_COMMIT_MESSAGE));
        assert!(Path::new("laptop/README.md").exists());

        Ok(())
    }

    #[sealed_test(env = [("HOME", ".")])]
    fn status_changes_nothing() -> anyhow::Result<()> {
        let settings = settings()?;
        fs::create_dir_all("home")?;
        fs::create_dir_all("dotfiles")?;
        fs::write("dotfiles/dotfiles.manifest", ".vimrc\n")?;
        fs::write("home/.vimrc", "set nu")?;

        let report = status(&settings)?;
        let states: Vec<LinkState> = report.links.reports().iter().map(|r| r.state).collect();
        assert_eq!(states, vec![LinkState::MoveAndLink]);
        assert!(report.changes.is_none());
        assert!(!Path::new("dotfiles/vimrc").exists());

        Ok(())
    }

    #[sealed_test(env = [("HOME", ".")])]
    fn status_without_manifest_does_not_create_it() -> anyhow::Result<()> {
        let settings = settings()?;

        let report = status(&settings)?;
        assert!(report.links.reports().is_empty());
        assert!(!settings.layout.manifest.exists());

        Ok(())
    }

    #[cfg(unix)]
    #[sealed_test(env = [("HOME", ".")])]
    fn relink_moves_and_links() -> anyhow::Result<()> {
        let settings = settings()?;
        let cwd = std::env::current_dir()?;
        fs::create_dir_all("home")?;
        fs::create_dir_all("dotfiles")?;
        fs::write("dotfiles/dotfiles.manifest", "# tracked\n.vimrc\n.bashrc\n")?;
        fs::write("home/.vimrc", "set nu")?;
        fs::write("dotfiles/bashrc", "alias ll='ls -l'")?;

        let summary = relink(&settings, false)?;
        assert_eq!(summary.mutations(), 2);
        assert_eq!(fs::read_to_string("dotfiles/vimrc")?, "set nu");
        assert_eq!(fs::read_link("home/.vimrc")?, cwd.join("dotfiles/vimrc"));
        assert_eq!(fs::read_link("home/.bashrc")?, cwd.join("dotfiles/bashrc"));

        let summary = relink(&settings, false)?;
        assert_eq!(summary.mutations(), 0);

        Ok(())
    }

    #[sealed_test(env = [("HOME", ".")])]
    fn relink_creates_manifest_template() -> anyhow::Result<()> {
        let settings = settings()?;

        let summary = relink(&settings, false)?;
        assert!(summary.reports().is_empty());
        assert!(settings.layout.manifest.exists());

        Ok(())
    }

    #[test]
    fn sync_options_default_interactive() {
        let opts = SyncOptions::default();
        assert!(opts.interactive);
        assert!(opts.progress);
        assert_eq!(opts.message, None);
    }
}
