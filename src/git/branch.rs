//! Local and remote-tracking branches

use crate::error::{GitError, GitResult};
use crate::git::repository;
use crate::git::types::{Branch, PushPull};
use git2::{BranchType, Repository, build::CheckoutBuilder};
use log::debug;

fn validate_name(name: &str) -> GitResult<()> {
    if git2::Branch::name_is_valid(name)? {
        Ok(())
    } else {
        Err(GitError::unknown(format!("invalid branch name: {name}")))
    }
}

fn local_exists(repo: &Repository, name: &str) -> bool {
    repo.find_branch(name, BranchType::Local).is_ok()
}

/// Creates `name` at `start_point` (HEAD by default), optionally checking it out.
pub fn create_branch(
    repo: &Repository,
    name: &str,
    start_point: Option<&str>,
    checkout: bool,
) -> GitResult<Branch> {
    if local_exists(repo, name) {
        return Err(GitError::name_conflict(name));
    }
    validate_name(name)?;

    let revision = start_point.unwrap_or("HEAD");
    if start_point.is_none() && repository::is_unborn(repo) {
        return Err(GitError::unknown(
            "cannot create a branch before the first commit",
        ));
    }
    let target = repo
        .revparse_single(revision)
        .and_then(|object| object.peel_to_commit())
        .map_err(|e| GitError::unknown(format!("unknown revision '{revision}': {}", e.message())))?;

    repo.branch(name, &target, false)?;
    debug!("Created branch {name} at {}", target.id());
    if checkout {
        checkout_local(repo, name)?;
    }
    find_branch(repo, name)
}

fn checkout_local(repo: &Repository, name: &str) -> GitResult<()> {
    let refname = format!("refs/heads/{name}");
    let target = repo.revparse_single(&refname)?;
    repo.checkout_tree(&target, Some(CheckoutBuilder::new().safe()))?;
    repo.set_head(&refname)?;
    debug!("Checked out {name}");
    Ok(())
}

/// Checks out a local branch, or creates a tracking branch for `remote/name`.
pub fn checkout_branch(repo: &Repository, name: &str) -> GitResult<Branch> {
    if local_exists(repo, name) {
        checkout_local(repo, name)?;
        return find_branch(repo, name);
    }

    let remote_branch = repo.find_branch(name, BranchType::Remote).map_err(|_| {
        GitError::unknown(format!("branch '{name}' does not exist"))
    })?;
    let Some((_, local_name)) = name.split_once('/') else {
        return Err(GitError::unknown(format!("branch '{name}' does not exist")));
    };
    if local_exists(repo, local_name) {
        return Err(GitError::name_conflict(local_name));
    }

    let commit = remote_branch.get().peel_to_commit()?;
    let mut local = repo.branch(local_name, &commit, false)?;
    local.set_upstream(Some(name))?;
    debug!("Created {local_name} tracking {name}");
    checkout_local(repo, local_name)?;
    find_branch(repo, local_name)
}

/// Deletes a local branch. The checked-out branch cannot be deleted.
pub fn delete_local_branch(repo: &Repository, name: &str) -> GitResult<()> {
    let mut branch = repo
        .find_branch(name, BranchType::Local)
        .map_err(|_| GitError::unknown(format!("branch '{name}' does not exist")))?;
    if branch.is_head() {
        return Err(GitError::name_conflict(name));
    }
    branch.delete()?;
    debug!("Deleted branch {name}");
    Ok(())
}

/// Renames a local branch, including the unborn current branch.
pub fn rename_branch(repo: &Repository, old: &str, new: &str) -> GitResult<Branch> {
    if local_exists(repo, new) {
        return Err(GitError::name_conflict(new));
    }
    validate_name(new)?;

    match repo.find_branch(old, BranchType::Local) {
        Ok(mut branch) => {
            branch.rename(new, false)?;
        }
        Err(_) if repository::is_unborn(repo) && repository::current_branch(repo)? == old => {
            // An unborn branch is nothing but the name HEAD points at.
            repo.set_head(&format!("refs/heads/{new}"))?;
        }
        Err(_) => return Err(GitError::unknown(format!("branch '{old}' does not exist"))),
    }
    debug!("Renamed branch {old} to {new}");
    find_branch(repo, new)
}

fn to_branch(branch: &git2::Branch<'_>, kind: BranchType) -> GitResult<Branch> {
    let full = String::from_utf8_lossy(branch.name_bytes()?).into_owned();
    let (remote, name) = match kind {
        BranchType::Remote => match full.split_once('/') {
            Some((remote, name)) => (Some(remote.to_string()), name.to_string()),
            None => (None, full.clone()),
        },
        BranchType::Local => (None, full.clone()),
    };
    let upstream = match kind {
        BranchType::Local => branch
            .upstream()
            .ok()
            .and_then(|u| u.name().ok().flatten().map(str::to_string)),
        BranchType::Remote => None,
    };
    Ok(Branch {
        name,
        is_remote: kind == BranchType::Remote,
        remote,
        upstream,
        head_sha: branch.get().target().map(|oid| oid.to_string()),
        is_head: branch.is_head(),
    })
}

fn find_branch(repo: &Repository, name: &str) -> GitResult<Branch> {
    match repo.find_branch(name, BranchType::Local) {
        Ok(branch) => to_branch(&branch, BranchType::Local),
        Err(_) if repository::current_branch(repo)? == name => Ok(Branch {
            name: name.to_string(),
            is_remote: false,
            remote: None,
            upstream: None,
            head_sha: None,
            is_head: true,
        }),
        Err(e) => Err(e.into()),
    }
}

/// Local branches followed by remote-tracking branches, each sorted by name.
///
/// An unborn current branch is listed with no head sha.
pub fn list_branches(repo: &Repository) -> GitResult<Vec<Branch>> {
    let mut local = Vec::new();
    let mut remote = Vec::new();
    for entry in repo.branches(None)? {
        let (branch, kind) = entry?;
        let branch = to_branch(&branch, kind)?;
        if branch.is_remote && branch.name == "HEAD" {
            continue;
        }
        match kind {
            BranchType::Local => local.push(branch),
            BranchType::Remote => remote.push(branch),
        }
    }

    if repository::is_unborn(repo) {
        let name = repository::current_branch(repo)?;
        if !local.iter().any(|b| b.name == name) {
            local.push(find_branch(repo, &name)?);
        }
    }

    local.sort_by(|a, b| a.name.cmp(&b.name));
    remote.sort_by(|a, b| a.full_name().cmp(&b.full_name()));
    local.extend(remote);
    Ok(local)
}

/// Upstream of a local branch, such as `origin/main`.
pub fn tracked_branch(repo: &Repository, name: &str) -> GitResult<Option<String>> {
    let branch = repo
        .find_branch(name, BranchType::Local)
        .map_err(|_| GitError::unknown(format!("branch '{name}' does not exist")))?;
    Ok(to_branch(&branch, BranchType::Local)?.upstream)
}

/// Ahead/behind counts against the upstream, `None` when nothing is tracked.
pub fn push_pull_counts(repo: &Repository, name: &str) -> GitResult<Option<PushPull>> {
    let branch = repo
        .find_branch(name, BranchType::Local)
        .map_err(|_| GitError::unknown(format!("branch '{name}' does not exist")))?;
    let Ok(upstream) = branch.upstream() else {
        return Ok(None);
    };
    let (Some(local), Some(remote)) = (branch.get().target(), upstream.get().target()) else {
        return Ok(None);
    };
    let (ahead, behind) = repo.graph_ahead_behind(local, remote)?;
    Ok(Some(PushPull {
        to_push: ahead,
        to_pull: behind,
    }))
}
