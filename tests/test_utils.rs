#![allow(dead_code)]

use anyhow::Result;
use git2::{IndexAddOption, Oid, Repository, RepositoryInitOptions, Signature, Time};
use shark::{FacadeOptions, GitFacade, IdentityConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

pub fn jane() -> IdentityConfig {
    IdentityConfig::manual("Jane Doe", "jane@example.com")
}

pub fn bob() -> IdentityConfig {
    IdentityConfig::manual("Bob Smith", "bob@example.com")
}

/// Facade that gives up on transfers after one attempt.
pub fn facade() -> GitFacade {
    GitFacade::new(FacadeOptions {
        timeout: Duration::from_secs(30),
        retry_attempts: 1,
        ..FacadeOptions::default()
    })
}

pub fn write_file(root: &Path, name: &str, contents: &str) -> Result<()> {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}

/// Stages everything and commits with fixed author and commit times.
pub fn commit_at(root: &Path, message: &str, seconds: i64) -> Result<Oid> {
    let repo = Repository::open(root)?;
    let mut index = repo.index()?;
    index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
    index.write()?;
    let tree = repo.find_tree(index.write_tree()?)?;
    let sig = Signature::new("Test User", "test@example.com", &Time::new(seconds, 0))?;
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    Ok(repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?)
}

/// Empty repository on `main` with `count` commits one minute apart.
pub fn setup_repo_with_commits(count: usize) -> Result<TempDir> {
    let dir = TempDir::new()?;
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    Repository::init_opts(dir.path(), &opts)?;
    for i in 0..count {
        write_file(dir.path(), "notes.txt", &format!("revision {i}\n"))?;
        let seconds = 1_700_000_000 + 60 * i64::try_from(i)?;
        commit_at(dir.path(), &format!("Commit {i}"), seconds)?;
    }
    Ok(dir)
}

/// Bare repository on `main` standing in for a hosted remote.
pub fn bare_remote() -> Result<(TempDir, PathBuf)> {
    let dir = TempDir::new()?;
    let path = dir.path().join("remote.git");
    let mut opts = RepositoryInitOptions::new();
    opts.bare(true).initial_head("main");
    Repository::init_opts(&path, &opts)?;
    Ok((dir, path))
}

pub fn url_of(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub fn head_sha(root: &Path) -> Result<String> {
    let repo = Repository::open(root)?;
    Ok(repo.head()?.peel_to_commit()?.id().to_string())
}
