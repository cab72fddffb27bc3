//! Remotes and network transfers: clone, fetch, pull and push

use crate::error::{GitError, GitResult, Origin};
use crate::git::repository;
use crate::git::types::{PullOutcome, Remote};
use crate::identity::Person;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    AnnotatedCommit, BranchType, Cred, CredentialType, ErrorClass, ErrorCode, FetchOptions,
    PushOptions, RemoteCallbacks, Repository,
};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use url::Url;

/// libgit2 keeps asking for credentials while the remote rejects them.
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

static SCP_LIKE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\w.\-]+@[\w.\-]+:[^\s]+$").unwrap_or_else(|e| panic!("invalid scp regex: {e}"))
});

/// Credentials offered to remotes that ask for them.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    /// Personal access token or password for HTTPS remotes
    pub token: Option<String>,
    /// Private key for SSH remotes; the SSH agent is used when unset
    pub ssh_key: Option<PathBuf>,
    pub ssh_passphrase: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("ssh_key", &self.ssh_key)
            .field("ssh_passphrase", &self.ssh_passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn token(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            token: Some(token.into()),
            ..Self::default()
        }
    }

    fn resolve(
        &self,
        url: &str,
        username_from_url: Option<&str>,
        allowed: CredentialType,
    ) -> Result<Cred, git2::Error> {
        let user = self
            .username
            .as_deref()
            .or(username_from_url)
            .unwrap_or("git");

        if allowed.contains(CredentialType::SSH_KEY) {
            return match &self.ssh_key {
                Some(key) => Cred::ssh_key(user, None, key, self.ssh_passphrase.as_deref()),
                None => Cred::ssh_key_from_agent(user),
            };
        }
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            if let Some(token) = &self.token {
                return Cred::userpass_plaintext(user, token);
            }
            return Err(git2::Error::new(
                ErrorCode::Auth,
                ErrorClass::Http,
                format!("no credentials configured for {url}"),
            ));
        }
        if allowed.contains(CredentialType::USERNAME) {
            return Cred::username(user);
        }
        Cred::default()
    }
}

/// Shared flag that asks an in-flight transfer to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn callbacks<'a>(credentials: &'a Credentials, cancel: &CancelFlag) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    let mut attempts = 0;
    callbacks.credentials(move |url, username_from_url, allowed| {
        attempts += 1;
        if attempts > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::new(
                ErrorCode::Auth,
                ErrorClass::Callback,
                format!("credentials for {url} were rejected"),
            ));
        }
        debug!("Credential request #{attempts} for {url} ({allowed:?})");
        credentials.resolve(url, username_from_url, allowed)
    });

    let transfer_cancel = cancel.clone();
    callbacks.transfer_progress(move |_| !transfer_cancel.is_cancelled());
    let sideband_cancel = cancel.clone();
    callbacks.sideband_progress(move |_| !sideband_cancel.is_cancelled());
    callbacks
}

fn remote_error(err: &git2::Error, cancel: &CancelFlag) -> GitError {
    if cancel.is_cancelled() {
        return GitError::network("transfer cancelled after timeout");
    }
    GitError::from_git2(err, Origin::Remote)
}

/// Accepts URLs, scp-style SSH addresses, and existing local paths.
pub fn validate_url(url: &str) -> GitResult<()> {
    if Url::parse(url).is_ok() || SCP_LIKE_RE.is_match(url) || Path::new(url).exists() {
        return Ok(());
    }
    Err(GitError::network(format!("invalid repository URL: {url}")))
}

pub fn clone(
    url: &str,
    dest: &Path,
    credentials: &Credentials,
    cancel: &CancelFlag,
) -> GitResult<Repository> {
    validate_url(url)?;
    if repository::is_repository(dest) {
        return Err(GitError::AlreadyARepository {
            path: dest.to_path_buf(),
        });
    }
    if dest.read_dir().is_ok_and(|mut entries| entries.next().is_some()) {
        return Err(GitError::unknown(format!(
            "destination {} is not empty",
            dest.display()
        )));
    }

    debug!("Cloning {url} into {}", dest.display());
    let mut fetch = FetchOptions::new();
    fetch.remote_callbacks(callbacks(credentials, cancel));
    let repo = RepoBuilder::new()
        .fetch_options(fetch)
        .clone(url, dest)
        .map_err(|e| remote_error(&e, cancel))?;
    debug!("Cloned {url}");
    Ok(repo)
}

pub fn list_remotes(repo: &Repository) -> GitResult<Vec<Remote>> {
    let names = repo.remotes()?;
    let mut remotes = Vec::with_capacity(names.len());
    for name in names.iter().flatten() {
        let remote = repo.find_remote(name)?;
        remotes.push(Remote {
            name: name.to_string(),
            url: remote.url().unwrap_or_default().to_string(),
        });
    }
    Ok(remotes)
}

pub fn create_remote(repo: &Repository, name: &str, url: &str) -> GitResult<Remote> {
    if repo.find_remote(name).is_ok() {
        return Err(GitError::name_conflict(name));
    }
    if !git2::Remote::is_valid_name(name) {
        return Err(GitError::unknown(format!("invalid remote name: {name}")));
    }
    repo.remote(name, url)?;
    debug!("Created remote {name} -> {url}");
    Ok(Remote {
        name: name.to_string(),
        url: url.to_string(),
    })
}

fn find_remote<'r>(repo: &'r Repository, name: &str) -> GitResult<git2::Remote<'r>> {
    repo.find_remote(name)
        .map_err(|_| GitError::unknown(format!("remote '{name}' does not exist")))
}

/// Fetches every branch of `remote_name` using its configured refspecs.
pub fn fetch(
    repo: &Repository,
    remote_name: &str,
    credentials: &Credentials,
    cancel: &CancelFlag,
) -> GitResult<()> {
    let mut remote = find_remote(repo, remote_name)?;
    let mut opts = FetchOptions::new();
    opts.remote_callbacks(callbacks(credentials, cancel));
    remote
        .fetch(&[] as &[&str], Some(&mut opts), None)
        .map_err(|e| remote_error(&e, cancel))?;
    debug!("Fetched {remote_name}");
    Ok(())
}

/// Branch HEAD points at, failing for detached HEAD.
fn head_branch(repo: &Repository) -> GitResult<String> {
    let head = repo.find_reference("HEAD")?;
    let target = match head.symbolic_target() {
        Some(target) => target.to_string(),
        None => return Err(GitError::unknown("HEAD is detached; check out a branch first")),
    };
    Ok(target.trim_start_matches("refs/heads/").to_string())
}

/// Fetches `remote_name` and merges the current branch's counterpart into it.
///
/// Uses the configured upstream when there is one. A merge that leaves
/// conflicts keeps them in the working tree and is reported as
/// [`GitError::MergeConflict`].
pub fn pull(
    repo: &Repository,
    remote_name: &str,
    committer: &Person,
    credentials: &Credentials,
    cancel: &CancelFlag,
) -> GitResult<PullOutcome> {
    let branch = head_branch(repo)?;
    fetch(repo, remote_name, credentials, cancel)?;

    let upstream_ref = repo
        .find_branch(&branch, BranchType::Local)
        .ok()
        .and_then(|b| b.upstream().ok())
        .and_then(|u| u.get().name().map(str::to_string))
        .unwrap_or_else(|| format!("refs/remotes/{remote_name}/{branch}"));

    let upstream = repo.find_reference(&upstream_ref).map_err(|_| {
        GitError::unknown(format!("{remote_name} has no branch matching '{branch}'"))
    })?;
    let theirs = repo.reference_to_annotated_commit(&upstream)?;
    merge_into_head(repo, &branch, &theirs, remote_name, committer)
}

fn merge_into_head(
    repo: &Repository,
    branch: &str,
    theirs: &AnnotatedCommit<'_>,
    remote_name: &str,
    committer: &Person,
) -> GitResult<PullOutcome> {
    let (analysis, _) = repo.merge_analysis(&[theirs])?;
    let their_id = theirs.id();

    if analysis.is_up_to_date() {
        debug!("{branch} is up to date with {remote_name}");
        return Ok(PullOutcome::UpToDate);
    }

    let refname = format!("refs/heads/{branch}");
    if analysis.is_unborn() || analysis.is_fast_forward() {
        let target = repo.find_object(their_id, None)?;
        repo.checkout_tree(&target, Some(CheckoutBuilder::new().safe()))?;
        match repo.find_reference(&refname) {
            Ok(mut reference) => {
                reference.set_target(their_id, &format!("pull: fast-forward to {their_id}"))?;
            }
            Err(_) => {
                repo.reference(&refname, their_id, true, "pull: initial checkout")?;
            }
        }
        repo.set_head(&refname)?;
        debug!("Fast-forwarded {branch} to {their_id}");
        return Ok(PullOutcome::FastForward {
            to: their_id.to_string(),
        });
    }

    repo.merge(&[theirs], None, Some(CheckoutBuilder::new().safe().allow_conflicts(true)))?;
    let mut index = repo.index()?;
    if index.has_conflicts() {
        let files = conflicted_paths(&index)?;
        warn!("Pull of {remote_name} into {branch} left {} conflicts", files.len());
        return Err(GitError::conflict(
            format!("merging {remote_name}/{branch} produced conflicts"),
            files,
        ));
    }

    let tree = repo.find_tree(index.write_tree()?)?;
    let ours = repo.head()?.peel_to_commit()?;
    let their_commit = repo.find_commit(their_id)?;
    let signature = committer.signature()?;
    let message = format!("Merge branch '{branch}' of {remote_name}");
    let oid = repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        &message,
        &tree,
        &[&ours, &their_commit],
    )?;
    repo.cleanup_state()?;
    debug!("Merged {remote_name}/{branch} as {oid}");
    Ok(PullOutcome::Merged {
        commit: oid.to_string(),
    })
}

pub(crate) fn conflicted_paths(index: &git2::Index) -> GitResult<Vec<String>> {
    let mut files = Vec::new();
    for conflict in index.conflicts()? {
        let conflict = conflict?;
        let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
        if let Some(entry) = entry {
            files.push(String::from_utf8_lossy(&entry.path).into_owned());
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// Pushes `branch` (the current branch by default) to the same name on `remote_name`.
///
/// Not safe to retry blindly: a push that succeeded remotely but timed out
/// locally has already updated the remote.
pub fn push(
    repo: &Repository,
    remote_name: &str,
    branch: Option<&str>,
    set_upstream: bool,
    credentials: &Credentials,
    cancel: &CancelFlag,
) -> GitResult<()> {
    let branch = match branch {
        Some(branch) => branch.to_string(),
        None => head_branch(repo)?,
    };
    if repo.find_branch(&branch, BranchType::Local).is_err() {
        return Err(GitError::unknown(format!(
            "branch '{branch}' has no commits to push"
        )));
    }

    let mut remote = find_remote(repo, remote_name)?;
    let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
    let mut rejections: Vec<(String, String)> = Vec::new();
    {
        let mut cbs = callbacks(credentials, cancel);
        cbs.push_update_reference(|refname, status| {
            if let Some(message) = status {
                rejections.push((refname.to_string(), message.to_string()));
            }
            Ok(())
        });
        let mut opts = PushOptions::new();
        opts.remote_callbacks(cbs);
        remote
            .push(&[refspec.as_str()], Some(&mut opts))
            .map_err(|e| remote_error(&e, cancel))?;
    }

    if let Some((refname, message)) = rejections.into_iter().next() {
        let lower = message.to_lowercase();
        if lower.contains("fast-forward") || lower.contains("fetch first") || lower.contains("non-fast") {
            return Err(GitError::conflict(
                format!("{refname} rejected: {message}"),
                Vec::new(),
            ));
        }
        return Err(GitError::unknown(format!("{refname} rejected: {message}")));
    }

    if set_upstream {
        let mut local = repo.find_branch(&branch, BranchType::Local)?;
        if local.upstream().is_err()
            && local
                .set_upstream(Some(&format!("{remote_name}/{branch}")))
                .is_err()
        {
            // Tracking ref not created yet; record the upstream in config.
            let mut config = repo.config()?;
            config.set_str(&format!("branch.{branch}.remote"), remote_name)?;
            config.set_str(
                &format!("branch.{branch}.merge"),
                &format!("refs/heads/{branch}"),
            )?;
        }
        debug!("Upstream of {branch} is {remote_name}/{branch}");
    }
    debug!("Pushed {branch} to {remote_name}");
    Ok(())
}
