//! Commit history
//!
//! [`CommitLog`] is a lazy, restartable view of the history reachable from
//! a revision range. Every call to [`CommitLog::iter`] starts a new walk
//! from the refs as they are at that moment, and commits are looked up one
//! at a time as the iterator advances.

use crate::error::{GitError, GitResult};
use crate::git::commit::to_commit;
use crate::git::repository;
use crate::git::types::{ChangeState, Commit, FileChange};
use git2::{Delta, DiffFindOptions, ErrorCode, Oid, Repository, Revwalk, Sort};
use log::debug;
use std::fmt;

pub struct CommitLog {
    repo: Repository,
    range: Option<String>,
}

impl fmt::Debug for CommitLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitLog")
            .field("path", &self.repo.workdir())
            .field("range", &self.range)
            .finish()
    }
}

impl CommitLog {
    /// History of `range`, or of HEAD when `range` is `None`.
    ///
    /// Accepts `a..b`, the symmetric difference `a...b`, and
    /// space-separated revisions where a leading `^` hides a revision, as
    /// `git log` does. An empty side of `...` means HEAD.
    pub fn new(repo: Repository, range: Option<&str>) -> Self {
        Self {
            repo,
            range: range.map(str::to_string),
        }
    }

    pub fn range(&self) -> Option<&str> {
        self.range.as_deref()
    }

    /// Starts a fresh walk in reverse-chronological order.
    pub fn iter(&self) -> GitResult<CommitIter<'_>> {
        let walk = revwalk(&self.repo, self.range.as_deref())?;
        Ok(CommitIter {
            repo: &self.repo,
            walk,
        })
    }

    /// `limit` commits after skipping the newest `skip`.
    pub fn page(&self, skip: usize, limit: usize) -> GitResult<Vec<Commit>> {
        self.iter()?.skip(skip).take(limit).collect()
    }
}

/// Iterator over one walk of a [`CommitLog`].
pub struct CommitIter<'r> {
    repo: &'r Repository,
    walk: Option<Revwalk<'r>>,
}

impl Iterator for CommitIter<'_> {
    type Item = GitResult<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        let oid = match self.walk.as_mut()?.next()? {
            Ok(oid) => oid,
            Err(e) => return Some(Err(e.into())),
        };
        Some(
            self.repo
                .find_commit(oid)
                .map(|commit| to_commit(&commit))
                .map_err(GitError::from),
        )
    }
}

/// A configured walk, or `None` for the empty history of an unborn HEAD.
fn revwalk<'r>(repo: &'r Repository, range: Option<&str>) -> GitResult<Option<Revwalk<'r>>> {
    let mut walk = repo.revwalk()?;
    walk.set_sorting(Sort::TIME)?;

    let range = range.map(str::trim).filter(|r| !r.is_empty());
    match range {
        None => {
            if repository::is_unborn(repo) {
                debug!("No commits yet, log is empty");
                return Ok(None);
            }
            walk.push_head()?;
        }
        Some(range) if range.contains("...") => {
            symmetric_difference(repo, &mut walk, range).map_err(|e| bad_range(range, &e))?;
        }
        Some(range) if range.contains("..") => {
            walk.push_range(range).map_err(|e| bad_range(range, &e))?;
        }
        Some(range) => {
            for token in range.split_whitespace() {
                let (hide, revision) = match token.strip_prefix('^') {
                    Some(revision) => (true, revision),
                    None => (false, token),
                };
                let oid = resolve(repo, revision).map_err(|e| bad_range(range, &e))?;
                if hide {
                    walk.hide(oid)?;
                } else {
                    walk.push(oid)?;
                }
            }
        }
    }
    Ok(Some(walk))
}

/// Commits reachable from either side of `a...b` but not from both.
fn symmetric_difference(
    repo: &Repository,
    walk: &mut Revwalk<'_>,
    range: &str,
) -> Result<(), git2::Error> {
    let (left, right) = range.split_once("...").unwrap_or((range, ""));
    let endpoint = |side: &str| match side.trim() {
        "" => resolve(repo, "HEAD"),
        side => resolve(repo, side),
    };
    let left = endpoint(left)?;
    let right = endpoint(right)?;
    walk.push(left)?;
    walk.push(right)?;
    match repo.merge_bases(left, right) {
        Ok(bases) => {
            for base in bases.iter() {
                walk.hide(*base)?;
            }
        }
        // Unrelated histories share nothing to hide.
        Err(e) if e.code() == ErrorCode::NotFound => {}
        Err(e) => return Err(e),
    }
    Ok(())
}

fn resolve(repo: &Repository, revision: &str) -> Result<Oid, git2::Error> {
    Ok(repo.revparse_single(revision)?.peel_to_commit()?.id())
}

fn bad_range(range: &str, err: &git2::Error) -> GitError {
    GitError::unknown(format!("invalid revision range '{range}': {}", err.message()))
}

/// Shas reachable from `range`, newest first.
pub fn rev_list(repo: &Repository, range: Option<&str>) -> GitResult<Vec<String>> {
    let Some(walk) = revwalk(repo, range)? else {
        return Ok(Vec::new());
    };
    walk.map(|oid| oid.map(|oid| oid.to_string()).map_err(GitError::from))
        .collect()
}

/// Files changed by `revision` relative to its first parent, renames detected.
pub fn commit_changes(repo: &Repository, revision: &str) -> GitResult<Vec<FileChange>> {
    let commit = repo
        .revparse_single(revision)
        .and_then(|object| object.peel_to_commit())
        .map_err(|e| GitError::unknown(format!("cannot read commit '{revision}': {}", e.message())))?;
    let tree = commit.tree()?;
    let parent_tree = match commit.parent_count() {
        0 => None,
        _ => Some(commit.parent(0)?.tree()?),
    };

    let mut diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
    diff.find_similar(Some(DiffFindOptions::new().renames(true)))?;

    let changes = diff
        .deltas()
        .filter_map(|delta| {
            let state = match delta.status() {
                Delta::Added | Delta::Copied => ChangeState::Added,
                Delta::Deleted => ChangeState::Deleted,
                Delta::Modified | Delta::Renamed | Delta::Typechange => ChangeState::Modified,
                Delta::Conflicted => ChangeState::Conflicted,
                _ => return None,
            };
            let new_path = delta.new_file().path().map(|p| p.to_string_lossy().into_owned());
            let old_path = delta.old_file().path().map(|p| p.to_string_lossy().into_owned());
            let path = new_path.clone().or_else(|| old_path.clone())?;
            Some(FileChange {
                old_path: old_path.filter(|old| delta.status() == Delta::Renamed && *old != path),
                path,
                state,
            })
        })
        .collect();
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{commit, files};
    use crate::identity::Person;
    use std::fs;
    use tempfile::TempDir;

    fn commit_file(repo: &Repository, dir: &TempDir, name: &str, body: &str, message: &str) -> Commit {
        fs::write(dir.path().join(name), body).expect("write");
        files::stage_all(repo).expect("stage");
        commit::commit(repo, message, &Person::new("Jane", "jane@example.com"), None)
            .expect("commit")
    }

    #[test]
    fn test_unborn_log_is_empty() {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let repo = repository::init(dir.path(), "main").expect("init");
        let log = CommitLog::new(repo, None);
        assert_eq!(log.iter().expect("iter").count(), 0);
    }

    #[test]
    fn test_log_restarts_and_sees_new_commits() {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let repo = repository::init(dir.path(), "main").expect("init");
        commit_file(&repo, &dir, "a.txt", "one", "first");

        let log = CommitLog::new(repository::open_repo(dir.path()).expect("open"), None);
        assert_eq!(log.iter().expect("iter").count(), 1);

        commit_file(&repo, &dir, "a.txt", "two", "second");
        let titles: Vec<String> = log
            .iter()
            .expect("iter")
            .map(|c| c.expect("commit").title)
            .collect();
        assert_eq!(titles.len(), 2);
    }

    #[test]
    fn test_range_and_hidden_revisions() {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let repo = repository::init(dir.path(), "main").expect("init");
        let first = commit_file(&repo, &dir, "a.txt", "one", "first");
        commit_file(&repo, &dir, "a.txt", "two", "second");
        commit_file(&repo, &dir, "a.txt", "three", "third");

        let range = format!("{}..HEAD", first.sha);
        assert_eq!(rev_list(&repo, Some(&range)).expect("range").len(), 2);

        let hidden = format!("HEAD ^{}", first.sha);
        assert_eq!(rev_list(&repo, Some(&hidden)).expect("hide").len(), 2);

        assert!(rev_list(&repo, Some("nope..HEAD")).is_err());
    }

    #[test]
    fn test_symmetric_difference_range() {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let repo = repository::init(dir.path(), "main").expect("init");
        let first = commit_file(&repo, &dir, "a.txt", "one", "first");
        commit_file(&repo, &dir, "a.txt", "two", "second");
        let third = commit_file(&repo, &dir, "a.txt", "three", "third");

        let linear = format!("{}...{}", first.sha, third.sha);
        assert_eq!(rev_list(&repo, Some(&linear)).expect("linear").len(), 2);

        // A side branch off `first` that HEAD never sees.
        let base = repo
            .find_commit(Oid::from_str(&first.sha).expect("oid"))
            .expect("first");
        let sig = git2::Signature::now("Bob", "bob@example.com").expect("signature");
        let side = repo
            .commit(Some("refs/heads/side"), &sig, &sig, "side", &base.tree().expect("tree"), &[&base])
            .expect("side commit");

        let shas = rev_list(&repo, Some("HEAD...side")).expect("divergent");
        assert_eq!(shas.len(), 3);
        assert!(shas.contains(&side.to_string()));
        assert!(!shas.contains(&first.sha));
        assert_eq!(rev_list(&repo, Some("...side")).expect("implicit HEAD"), shas);

        assert!(rev_list(&repo, Some("nope...HEAD")).is_err());
    }

    #[test]
    fn test_page_skips_newest() {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let repo = repository::init(dir.path(), "main").expect("init");
        let first = commit_file(&repo, &dir, "a.txt", "one", "first");
        commit_file(&repo, &dir, "a.txt", "two", "second");

        let log = CommitLog::new(repository::open_repo(dir.path()).expect("open"), None);
        let page = log.page(1, 10).expect("page");
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].sha, first.sha);
    }

    #[test]
    fn test_commit_changes_detects_each_state() {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let repo = repository::init(dir.path(), "main").expect("init");
        let root = commit_file(&repo, &dir, "a.txt", "one", "first");

        let changes = commit_changes(&repo, &root.sha).expect("changes");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].state, ChangeState::Added);

        fs::write(dir.path().join("a.txt"), "changed").expect("write");
        fs::write(dir.path().join("b.txt"), "new").expect("write");
        let second = commit_file(&repo, &dir, "c.txt", "also new", "second");
        let mut changes = commit_changes(&repo, &second.sha).expect("changes");
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        let states: Vec<ChangeState> = changes.iter().map(|c| c.state).collect();
        assert_eq!(
            states,
            vec![ChangeState::Modified, ChangeState::Added, ChangeState::Added]
        );
    }
}
