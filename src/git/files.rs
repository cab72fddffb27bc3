//! Working tree status, staging and resets

use crate::error::{GitError, GitResult};
use crate::git::types::{ChangeState, FileStatus, ResetMode};
use git2::{IndexAddOption, ObjectType, Repository, Status, StatusOptions, build::CheckoutBuilder};
use log::debug;
use std::path::Path;

fn staged_state(status: Status) -> Option<ChangeState> {
    if status.contains(Status::INDEX_NEW) {
        Some(ChangeState::Added)
    } else if status.contains(Status::INDEX_DELETED) {
        Some(ChangeState::Deleted)
    } else if status.intersects(Status::INDEX_MODIFIED | Status::INDEX_RENAMED | Status::INDEX_TYPECHANGE) {
        Some(ChangeState::Modified)
    } else {
        None
    }
}

fn unstaged_state(status: Status) -> Option<ChangeState> {
    if status.contains(Status::CONFLICTED) {
        Some(ChangeState::Conflicted)
    } else if status.contains(Status::WT_NEW) {
        Some(ChangeState::Untracked)
    } else if status.contains(Status::WT_DELETED) {
        Some(ChangeState::Deleted)
    } else if status.intersects(Status::WT_MODIFIED | Status::WT_RENAMED | Status::WT_TYPECHANGE) {
        Some(ChangeState::Modified)
    } else {
        None
    }
}

/// Per-file staged and unstaged state, sorted by path.
pub fn status(repo: &Repository) -> GitResult<Vec<FileStatus>> {
    let mut opts = StatusOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false)
        .exclude_submodules(true);

    let statuses = repo.statuses(Some(&mut opts))?;
    let mut files: Vec<FileStatus> = statuses
        .iter()
        .filter_map(|entry| {
            let flags = entry.status();
            let staged = if flags.contains(Status::CONFLICTED) {
                None
            } else {
                staged_state(flags)
            };
            let unstaged = unstaged_state(flags);
            if staged.is_none() && unstaged.is_none() {
                return None;
            }
            Some(FileStatus {
                path: String::from_utf8_lossy(entry.path_bytes()).into_owned(),
                staged,
                unstaged,
            })
        })
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));

    debug!("Status found {} changed files", files.len());
    Ok(files)
}

fn workdir(repo: &Repository) -> GitResult<&Path> {
    repo.workdir()
        .ok_or_else(|| GitError::unknown("repository has no working directory"))
}

/// Adds files to the index. Files missing from the working tree are staged as deletions.
///
/// A path found in neither the working tree nor the index is an error, and
/// the index is left untouched.
pub fn stage(repo: &Repository, files: &[String]) -> GitResult<()> {
    if files.is_empty() {
        return Ok(());
    }
    let root = workdir(repo)?.to_path_buf();
    let mut index = repo.index()?;
    for file in files {
        let relative = Path::new(file);
        if root.join(relative).symlink_metadata().is_ok() {
            index.add_path(relative)?;
        } else if (0..=3).any(|stage| index.get_path(relative, stage).is_some()) {
            index.remove_path(relative)?;
        } else {
            return Err(GitError::unknown(format!(
                "pathspec '{file}' did not match any files"
            )));
        }
    }
    index.write()?;
    debug!("Staged {} files", files.len());
    Ok(())
}

/// Stages every change in the working tree, deletions included.
pub fn stage_all(repo: &Repository) -> GitResult<()> {
    let mut index = repo.index()?;
    index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
    index.update_all(["*"], None)?;
    index.write()?;
    Ok(())
}

/// Moves staged changes of `files` back out of the index.
pub fn unstage(repo: &Repository, files: &[String]) -> GitResult<()> {
    if files.is_empty() {
        return Ok(());
    }
    match repo.head() {
        Ok(head) => {
            let target = head.peel(ObjectType::Commit)?;
            repo.reset_default(Some(&target), files.iter().map(String::as_str))?;
        }
        Err(_) if crate::git::repository::is_unborn(repo) => {
            // Nothing to reset to before the first commit.
            let mut index = repo.index()?;
            for file in files {
                index.remove_path(Path::new(file))?;
            }
            index.write()?;
        }
        Err(e) => return Err(e.into()),
    }
    debug!("Unstaged {} files", files.len());
    Ok(())
}

/// Discards working tree changes of `files`, restoring them from the index.
///
/// Untracked files among `files` are removed.
pub fn reset_files(repo: &Repository, files: &[String]) -> GitResult<()> {
    if files.is_empty() {
        return Ok(());
    }
    let mut checkout = CheckoutBuilder::new();
    checkout.force().remove_untracked(true);
    for file in files {
        checkout.path(file.as_str());
    }
    repo.checkout_index(None, Some(&mut checkout))?;
    debug!("Discarded changes in {} files", files.len());
    Ok(())
}

/// Moves the current branch to `revision`.
pub fn reset(repo: &Repository, revision: &str, mode: ResetMode) -> GitResult<()> {
    let target = repo
        .revparse_single(revision)
        .map_err(|e| GitError::unknown(format!("unknown revision '{revision}': {}", e.message())))?
        .peel(ObjectType::Commit)?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    let checkout = if mode == ResetMode::Hard {
        Some(&mut checkout)
    } else {
        None
    };
    repo.reset(&target, mode.into(), checkout)?;
    debug!("Reset to {revision} ({mode:?})");
    Ok(())
}
