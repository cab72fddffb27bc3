//! Opening, detecting and initializing working directories

use crate::error::{GitError, GitResult};
use crate::git::files;
use crate::git::remote;
use crate::git::types::RepositoryInfo;
use git2::{ErrorCode, Repository, RepositoryInitOptions, RepositoryOpenFlags};
use log::debug;
use std::ffi::OsStr;
use std::path::Path;

pub const DEFAULT_BRANCH: &str = "main";
const DETACHED_HEAD: &str = "HEAD detached";

/// Opens the working directory at exactly `path`.
///
/// Parent directories are not searched, and bare repositories are refused:
/// every operation here needs a checked-out tree.
pub fn open_repo(path: &Path) -> GitResult<Repository> {
    match Repository::open_ext(path, RepositoryOpenFlags::NO_SEARCH, &[] as &[&OsStr]) {
        Ok(repo) if repo.is_bare() => {
            debug!("Refusing bare repository at {}", path.display());
            Err(GitError::not_a_repository(path))
        }
        Ok(repo) => Ok(repo),
        Err(e) if e.code() == ErrorCode::NotFound => Err(GitError::not_a_repository(path)),
        Err(e) => {
            debug!("Failed to open {}: {e}", path.display());
            Err(GitError::not_a_repository(path))
        }
    }
}

pub fn is_repository(path: &Path) -> bool {
    open_repo(path).is_ok()
}

/// Creates a new repository whose unborn branch is `initial_branch`.
pub fn init(path: &Path, initial_branch: &str) -> GitResult<Repository> {
    if is_repository(path) || path.join(".git").exists() {
        return Err(GitError::AlreadyARepository {
            path: path.to_path_buf(),
        });
    }

    let mut opts = RepositoryInitOptions::new();
    opts.mkdir(true).mkpath(true).initial_head(initial_branch);
    let repo = Repository::init_opts(path, &opts)?;
    debug!(
        "Initialized repository at {} on branch {initial_branch}",
        path.display()
    );
    Ok(repo)
}

/// Name of the checked-out branch, including an unborn one.
pub fn current_branch(repo: &Repository) -> GitResult<String> {
    match repo.head() {
        Ok(head) if head.is_branch() => {
            Ok(String::from_utf8_lossy(head.shorthand_bytes()).into_owned())
        }
        Ok(_) => Ok(DETACHED_HEAD.to_string()),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
            unborn_branch(repo)
        }
        Err(e) => Err(e.into()),
    }
}

/// Reads the branch HEAD points at before its first commit.
fn unborn_branch(repo: &Repository) -> GitResult<String> {
    let head = repo.find_reference("HEAD")?;
    let target = head
        .symbolic_target()
        .ok_or_else(|| GitError::unknown("HEAD is neither a branch nor a commit"))?;
    Ok(target
        .strip_prefix("refs/heads/")
        .unwrap_or(target)
        .to_string())
}

/// Whether HEAD has no commit yet.
pub fn is_unborn(repo: &Repository) -> bool {
    matches!(repo.head(), Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound))
}

/// Display name of a repository: its working directory's folder name.
pub fn repository_name(repo: &Repository) -> String {
    repo.workdir()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn repository_info(repo: &Repository) -> GitResult<RepositoryInfo> {
    let path = repo
        .workdir()
        .map(Path::to_path_buf)
        .ok_or_else(|| GitError::unknown("repository has no working directory"))?;
    Ok(RepositoryInfo {
        name: repository_name(repo),
        current_branch: current_branch(repo)?,
        remotes: remote::list_remotes(repo)?,
        status: files::status(repo)?,
        path,
    })
}
