//! Async entry point used by the app's screens
//!
//! [`GitFacade`] wraps the blocking primitives in [`crate::git`]. Each call
//! opens the repository at the given path on tokio's blocking pool, runs
//! under a deadline, and returns a typed [`GitError`] on failure. Mutating
//! calls on the same repository are serialized; reads are not.

mod history;
mod lock;

pub use history::{CommitStream, History};
pub use lock::{RepositoryGuard, RepositoryLocks, lock_key};

use crate::config::Config;
use crate::error::{ErrorKind, GitError, GitResult, Origin};
use crate::git::{
    self, Branch, CancelFlag, Commit, CommitLog, Credentials, FileChange, FileStatus, PullOutcome,
    PushPull, Remote, RepositoryInfo, ResetMode, branch, commit, files, remote,
    repository,
};
use crate::identity::{IdentityConfig, Person};
use git2::Repository;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{Instrument, info_span};

/// Settings the facade runs with.
#[derive(Debug, Clone)]
pub struct FacadeOptions {
    /// Deadline for every call, lock waiting included
    pub timeout: Duration,
    pub default_branch: String,
    pub credentials: Credentials,
    /// Total attempts for fetch and clone on network failures
    pub retry_attempts: usize,
}

impl Default for FacadeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECS),
            default_branch: git::DEFAULT_BRANCH.to_string(),
            credentials: Credentials::default(),
            retry_attempts: 3,
        }
    }
}

impl From<&Config> for FacadeOptions {
    fn from(config: &Config) -> Self {
        Self {
            timeout: config.timeout(),
            default_branch: config.default_branch.clone(),
            credentials: config.credentials(),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct Inner {
    options: FacadeOptions,
    locks: RepositoryLocks,
}

/// Cheap to clone; clones share locks and settings.
#[derive(Debug, Clone)]
pub struct GitFacade {
    inner: Arc<Inner>,
}

impl Default for GitFacade {
    fn default() -> Self {
        Self::new(FacadeOptions::default())
    }
}

/// Whether a failed transfer is worth another attempt.
fn is_transient(err: &GitError) -> bool {
    err.kind() == ErrorKind::NetworkError && !err.is_timeout()
}

fn active_identity(identity: &IdentityConfig) -> GitResult<Person> {
    identity
        .active()
        .map_err(|e| GitError::unknown(e.to_string()))
}

impl GitFacade {
    pub fn new(options: FacadeOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                locks: RepositoryLocks::new(),
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(FacadeOptions::from(config))
    }

    pub fn options(&self) -> &FacadeOptions {
        &self.inner.options
    }

    pub fn locks(&self) -> &RepositoryLocks {
        &self.inner.locks
    }

    fn credentials(&self) -> Credentials {
        self.inner.options.credentials.clone()
    }

    /// Runs `work` on the blocking pool under the configured deadline.
    ///
    /// With `exclusive` set the repository lock is taken first and moved into
    /// the blocking task, so it is held until `work` returns even when the
    /// caller has already given up. On timeout `cancel` is raised so a
    /// running transfer can abort.
    async fn run<T, F>(
        &self,
        op: &'static str,
        path: &Path,
        exclusive: bool,
        origin: Origin,
        cancel: Option<CancelFlag>,
        work: F,
    ) -> GitResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> GitResult<T> + Send + 'static,
    {
        let timeout = self.inner.options.timeout;
        let span = info_span!("git_op", op, path = %path.display(), exclusive);
        async move {
            let call = async move {
                let guard = if exclusive {
                    Some(self.inner.locks.acquire(path).await)
                } else {
                    None
                };
                let task = tokio::task::spawn_blocking(move || {
                    let _guard = guard;
                    work()
                });
                match task.await {
                    Ok(result) => result,
                    Err(e) => Err(GitError::unknown(format!("{op} task failed: {e}"))),
                }
            };

            let result = match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => {
                    if let Some(cancel) = cancel {
                        cancel.cancel();
                    }
                    warn!("{op} on {} timed out after {timeout:?}", path.display());
                    Err(GitError::timeout(op, timeout, origin))
                }
            };
            if let Err(e) = &result {
                debug!("{op} on {} failed: {e}", path.display());
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn read<T, F>(&self, op: &'static str, path: &Path, work: F) -> GitResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Repository) -> GitResult<T> + Send + 'static,
    {
        let repo_path = path.to_path_buf();
        self.run(op, path, false, Origin::Local, None, move || {
            let repo = repository::open_repo(&repo_path)?;
            work(&repo)
        })
        .await
    }

    async fn write<T, F>(&self, op: &'static str, path: &Path, work: F) -> GitResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Repository) -> GitResult<T> + Send + 'static,
    {
        let repo_path = path.to_path_buf();
        self.run(op, path, true, Origin::Local, None, move || {
            let repo = repository::open_repo(&repo_path)?;
            work(&repo)
        })
        .await
    }

    /// Mutating call that talks to a remote and can be cancelled.
    async fn transfer<T, F>(&self, op: &'static str, path: &Path, work: F) -> GitResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Repository, &Credentials, &CancelFlag) -> GitResult<T> + Send + 'static,
    {
        let repo_path = path.to_path_buf();
        let credentials = self.credentials();
        let cancel = CancelFlag::new();
        let flag = cancel.clone();
        self.run(op, path, true, Origin::Remote, Some(cancel), move || {
            let repo = repository::open_repo(&repo_path)?;
            work(&repo, &credentials, &flag)
        })
        .await
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> + use<> {
        ExponentialBackoff::from_millis(10)
            .factor(20)
            .max_delay(Duration::from_secs(5))
            .take(self.inner.options.retry_attempts.saturating_sub(1))
    }

    pub async fn is_repository(&self, path: &Path) -> bool {
        let repo_path = path.to_path_buf();
        self.run("is_repository", path, false, Origin::Local, None, move || {
            Ok(repository::is_repository(&repo_path))
        })
        .await
        .unwrap_or(false)
    }

    /// Creates a repository on the configured default branch.
    pub async fn init(&self, path: &Path) -> GitResult<RepositoryInfo> {
        let repo_path = path.to_path_buf();
        let branch = self.inner.options.default_branch.clone();
        self.run("init", path, true, Origin::Local, None, move || {
            let repo = repository::init(&repo_path, &branch)?;
            repository::repository_info(&repo)
        })
        .await
    }

    async fn clone_once(&self, url: &str, dest: &Path) -> GitResult<RepositoryInfo> {
        let url = url.to_string();
        let dest_path = dest.to_path_buf();
        let credentials = self.credentials();
        let cancel = CancelFlag::new();
        let flag = cancel.clone();
        self.run("clone", dest, true, Origin::Remote, Some(cancel), move || {
            let repo = remote::clone(&url, &dest_path, &credentials, &flag)?;
            repository::repository_info(&repo)
        })
        .await
    }

    /// Clones `url` into `dest`, retrying transient network failures.
    ///
    /// Named to stay clear of [`Clone::clone`].
    pub async fn clone_repository(&self, url: &str, dest: &Path) -> GitResult<RepositoryInfo> {
        RetryIf::start(
            self.backoff(),
            || self.clone_once(url, dest),
            |e: &GitError| {
                let retry = is_transient(e);
                if retry {
                    warn!("Clone of {url} failed, retrying: {e}");
                }
                retry
            },
        )
        .await
    }

    pub async fn current_branch(&self, path: &Path) -> GitResult<String> {
        self.read("current_branch", path, repository::current_branch)
            .await
    }

    pub async fn repository_info(&self, path: &Path) -> GitResult<RepositoryInfo> {
        self.read("repository_info", path, repository::repository_info)
            .await
    }

    /// Commits the index as the identity's active user.
    ///
    /// `author` overrides the recorded author; the committer is always the
    /// active user.
    pub async fn commit(
        &self,
        path: &Path,
        message: &str,
        identity: &IdentityConfig,
        author: Option<Person>,
    ) -> GitResult<Commit> {
        let committer = active_identity(identity)?;
        let message = message.to_string();
        self.write("commit", path, move |repo| {
            commit::commit(repo, &message, &committer, author.as_ref())
        })
        .await
    }

    pub async fn read_commit(&self, path: &Path, sha: &str) -> GitResult<Commit> {
        let sha = sha.to_string();
        self.read("read_commit", path, move |repo| commit::read_commit(repo, &sha))
            .await
    }

    pub async fn commit_changes(&self, path: &Path, sha: &str) -> GitResult<Vec<FileChange>> {
        let sha = sha.to_string();
        self.read("commit_changes", path, move |repo| {
            git::history::commit_changes(repo, &sha)
        })
        .await
    }

    pub async fn create_branch(
        &self,
        path: &Path,
        name: &str,
        start_point: Option<&str>,
        checkout: bool,
    ) -> GitResult<Branch> {
        let name = name.to_string();
        let start_point = start_point.map(str::to_string);
        self.write("create_branch", path, move |repo| {
            branch::create_branch(repo, &name, start_point.as_deref(), checkout)
        })
        .await
    }

    pub async fn checkout_branch(&self, path: &Path, name: &str) -> GitResult<Branch> {
        let name = name.to_string();
        self.write("checkout_branch", path, move |repo| {
            branch::checkout_branch(repo, &name)
        })
        .await
    }

    pub async fn delete_local_branch(&self, path: &Path, name: &str) -> GitResult<()> {
        let name = name.to_string();
        self.write("delete_local_branch", path, move |repo| {
            branch::delete_local_branch(repo, &name)
        })
        .await
    }

    pub async fn rename_branch(&self, path: &Path, old: &str, new: &str) -> GitResult<Branch> {
        let old = old.to_string();
        let new = new.to_string();
        self.write("rename_branch", path, move |repo| {
            branch::rename_branch(repo, &old, &new)
        })
        .await
    }

    pub async fn list_branches(&self, path: &Path) -> GitResult<Vec<Branch>> {
        self.read("list_branches", path, branch::list_branches).await
    }

    pub async fn tracked_branch(&self, path: &Path, name: &str) -> GitResult<Option<String>> {
        let name = name.to_string();
        self.read("tracked_branch", path, move |repo| {
            branch::tracked_branch(repo, &name)
        })
        .await
    }

    pub async fn push_pull_counts(&self, path: &Path, name: &str) -> GitResult<Option<PushPull>> {
        let name = name.to_string();
        self.read("push_pull_counts", path, move |repo| {
            branch::push_pull_counts(repo, &name)
        })
        .await
    }

    pub async fn create_remote(&self, path: &Path, name: &str, url: &str) -> GitResult<Remote> {
        let name = name.to_string();
        let url = url.to_string();
        self.write("create_remote", path, move |repo| {
            remote::create_remote(repo, &name, &url)
        })
        .await
    }

    pub async fn list_remotes(&self, path: &Path) -> GitResult<Vec<Remote>> {
        self.read("list_remotes", path, remote::list_remotes).await
    }

    async fn fetch_once(&self, path: &Path, remote_name: &str) -> GitResult<()> {
        let remote_name = remote_name.to_string();
        self.transfer("fetch", path, move |repo, credentials, cancel| {
            remote::fetch(repo, &remote_name, credentials, cancel)
        })
        .await
    }

    /// Fetches `remote_name`, retrying transient network failures.
    pub async fn fetch(&self, path: &Path, remote_name: &str) -> GitResult<()> {
        RetryIf::start(
            self.backoff(),
            || self.fetch_once(path, remote_name),
            |e: &GitError| {
                let retry = is_transient(e);
                if retry {
                    warn!("Fetch of {remote_name} failed, retrying: {e}");
                }
                retry
            },
        )
        .await
    }

    /// Fetches and merges; a merge commit is signed by the active identity.
    ///
    /// Never retried: a failed pull may already have touched the working tree.
    pub async fn pull(
        &self,
        path: &Path,
        remote_name: &str,
        identity: &IdentityConfig,
    ) -> GitResult<PullOutcome> {
        let committer = active_identity(identity)?;
        let remote_name = remote_name.to_string();
        self.transfer("pull", path, move |repo, credentials, cancel| {
            remote::pull(repo, &remote_name, &committer, credentials, cancel)
        })
        .await
    }

    /// Pushes `branch`, or the current branch. Never retried.
    pub async fn push(
        &self,
        path: &Path,
        remote_name: &str,
        branch: Option<&str>,
        set_upstream: bool,
    ) -> GitResult<()> {
        let remote_name = remote_name.to_string();
        let branch = branch.map(str::to_string);
        self.transfer("push", path, move |repo, credentials, cancel| {
            remote::push(
                repo,
                &remote_name,
                branch.as_deref(),
                set_upstream,
                credentials,
                cancel,
            )
        })
        .await
    }

    pub async fn status(&self, path: &Path) -> GitResult<Vec<FileStatus>> {
        self.read("status", path, files::status).await
    }

    pub async fn stage(&self, path: &Path, paths: &[String]) -> GitResult<()> {
        let paths = paths.to_vec();
        self.write("stage", path, move |repo| files::stage(repo, &paths))
            .await
    }

    pub async fn stage_all(&self, path: &Path) -> GitResult<()> {
        self.write("stage_all", path, files::stage_all).await
    }

    pub async fn unstage(&self, path: &Path, paths: &[String]) -> GitResult<()> {
        let paths = paths.to_vec();
        self.write("unstage", path, move |repo| files::unstage(repo, &paths))
            .await
    }

    pub async fn reset_files(&self, path: &Path, paths: &[String]) -> GitResult<()> {
        let paths = paths.to_vec();
        self.write("reset_files", path, move |repo| {
            files::reset_files(repo, &paths)
        })
        .await
    }

    pub async fn reset(&self, path: &Path, revision: &str, mode: ResetMode) -> GitResult<()> {
        let revision = revision.to_string();
        self.write("reset", path, move |repo| files::reset(repo, &revision, mode))
            .await
    }

    /// Lazy history of `range` (HEAD when `None`).
    ///
    /// The range is checked up front. Commits are read on the blocking pool
    /// as the streams of [`History::iter`] are polled.
    pub async fn log(&self, path: &Path, range: Option<&str>) -> GitResult<History> {
        let owned_range = range.map(str::to_string);
        let repo_path = path.to_path_buf();
        self.run("log", path, false, Origin::Local, None, move || {
            let log = CommitLog::new(repository::open_repo(&repo_path)?, owned_range.as_deref());
            log.iter()?;
            Ok(())
        })
        .await?;
        Ok(History::new(
            self.clone(),
            path.to_path_buf(),
            range.map(str::to_string),
        ))
    }

    /// One page of history, newest first.
    pub async fn log_page(
        &self,
        path: &Path,
        range: Option<&str>,
        skip: usize,
        limit: usize,
    ) -> GitResult<Vec<Commit>> {
        let range = range.map(str::to_string);
        let repo_path = path.to_path_buf();
        self.run("log_page", path, false, Origin::Local, None, move || {
            let repo = repository::open_repo(&repo_path)?;
            CommitLog::new(repo, range.as_deref()).page(skip, limit)
        })
        .await
    }

    pub async fn rev_list(&self, path: &Path, range: Option<&str>) -> GitResult<Vec<String>> {
        let range = range.map(str::to_string);
        self.read("rev_list", path, move |repo| {
            git::history::rev_list(repo, range.as_deref())
        })
        .await
    }

    /// Removes the working directory at `path` from disk.
    pub async fn delete_repository(&self, path: &Path) -> GitResult<()> {
        let repo_path: PathBuf = path.to_path_buf();
        self.run("delete_repository", path, true, Origin::Local, None, move || {
            repository::open_repo(&repo_path)?;
            std::fs::remove_dir_all(&repo_path)?;
            debug!("Deleted repository at {}", repo_path.display());
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn facade(timeout: Duration) -> GitFacade {
        GitFacade::new(FacadeOptions {
            timeout,
            ..FacadeOptions::default()
        })
    }

    #[tokio::test]
    async fn test_waiting_for_a_held_lock_times_out() {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        repository::init(dir.path(), git::DEFAULT_BRANCH).expect("init");
        let facade = facade(Duration::from_millis(50));

        let _held = facade.locks().acquire(dir.path()).await;
        let err = facade
            .stage(dir.path(), &["a.txt".to_string()])
            .await
            .expect_err("lock is held");
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(err.is_timeout());

        // Reads do not take the lock.
        assert!(facade.status(dir.path()).await.expect("status").is_empty());
    }

    #[tokio::test]
    async fn test_missing_identity_fails_before_touching_repo() {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let facade = GitFacade::default();
        facade.init(dir.path()).await.expect("init");

        let err = facade
            .commit(dir.path(), "msg", &IdentityConfig::default(), None)
            .await
            .expect_err("no identity");
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_timeouts_are_not_retried() {
        let err = GitError::timeout("fetch", Duration::from_secs(1), Origin::Remote);
        assert!(!is_transient(&err));
        assert!(is_transient(&GitError::network("connection reset")));
        assert!(!is_transient(&GitError::NothingStaged));
    }

    #[test]
    fn test_options_follow_config() {
        let config = Config {
            default_branch: "trunk".to_string(),
            timeout_secs: 7,
            ..Config::default()
        };
        let options = FacadeOptions::from(&config);
        assert_eq!(options.default_branch, "trunk");
        assert_eq!(options.timeout, Duration::from_secs(7));
        assert_eq!(options.retry_attempts, 3);
    }
}
