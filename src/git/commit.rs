//! Creating and reading commits

use crate::error::{GitError, GitResult};
use crate::git::remote::conflicted_paths;
use crate::git::repository;
use crate::git::types::Commit;
use crate::identity::Person;
use chrono::{DateTime, Utc};
use git2::{Oid, Repository, RepositoryState};
use log::debug;

fn person(signature: &git2::Signature<'_>) -> Person {
    Person::new(
        String::from_utf8_lossy(signature.name_bytes()),
        String::from_utf8_lossy(signature.email_bytes()),
    )
}

fn timestamp(time: git2::Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.seconds(), 0).unwrap_or_default()
}

/// Converts a git2 commit into the record handed to callers.
pub fn to_commit(commit: &git2::Commit<'_>) -> Commit {
    let committer = person(&commit.committer());
    let author = person(&commit.author());
    let message = String::from_utf8_lossy(commit.message_bytes()).into_owned();
    let title = message.lines().next().unwrap_or_default().trim_end().to_string();

    Commit {
        sha: commit.id().to_string(),
        title,
        message,
        author: (author != committer).then_some(author),
        committer,
        author_time: timestamp(commit.author().when()),
        commit_time: timestamp(commit.time()),
        parents: commit.parent_ids().map(|id| id.to_string()).collect(),
    }
}

/// Commits the index on the current branch.
///
/// `author` defaults to the committer. Fails with
/// [`GitError::NothingStaged`] when the index matches HEAD, except while
/// concluding a merge, whose extra parents come from `MERGE_HEAD`.
pub fn commit(
    repo: &Repository,
    message: &str,
    committer: &Person,
    author: Option<&Person>,
) -> GitResult<Commit> {
    if message.trim().is_empty() {
        return Err(GitError::unknown("commit message cannot be empty"));
    }

    let mut index = repo.index()?;
    if index.has_conflicts() {
        return Err(GitError::conflict(
            "resolve conflicts before committing",
            conflicted_paths(&index)?,
        ));
    }

    let tree_id = index.write_tree()?;
    let merging = repo.state() == RepositoryState::Merge;
    let parent = if repository::is_unborn(repo) {
        None
    } else {
        Some(repo.head()?.peel_to_commit()?)
    };

    let unchanged = match &parent {
        Some(parent) => parent.tree_id() == tree_id,
        None => index.is_empty(),
    };
    if unchanged && !merging {
        debug!("Refusing to commit: index matches HEAD");
        return Err(GitError::NothingStaged);
    }

    let mut parents: Vec<git2::Commit<'_>> = parent.into_iter().collect();
    for oid in merge_heads(repo)? {
        parents.push(repo.find_commit(oid)?);
    }
    let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();

    let tree = repo.find_tree(tree_id)?;
    let committer_sig = committer.signature()?;
    let author_sig = match author {
        Some(author) => author.signature()?,
        None => committer_sig.clone(),
    };
    let oid = repo.commit(
        Some("HEAD"),
        &author_sig,
        &committer_sig,
        message,
        &tree,
        &parent_refs,
    )?;
    if merging {
        repo.cleanup_state()?;
    }

    debug!("Created commit {oid} with {} parents", parent_refs.len());
    read_commit(repo, &oid.to_string())
}

/// Commits recorded in `MERGE_HEAD` while a merge is in progress.
fn merge_heads(repo: &Repository) -> GitResult<Vec<Oid>> {
    if repo.state() != RepositoryState::Merge {
        return Ok(Vec::new());
    }
    // mergehead_foreach needs a mutable handle; callers share theirs.
    let mut handle = Repository::open(repo.path())?;
    let mut oids = Vec::new();
    handle.mergehead_foreach(|oid| {
        oids.push(*oid);
        true
    })?;
    Ok(oids)
}

/// Looks up a commit by sha or any revision git understands.
pub fn read_commit(repo: &Repository, revision: &str) -> GitResult<Commit> {
    let commit = repo
        .revparse_single(revision)
        .and_then(|object| object.peel_to_commit())
        .map_err(|e| GitError::unknown(format!("cannot read commit '{revision}': {}", e.message())))?;
    Ok(to_commit(&commit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::git::files;
    use std::fs;
    use tempfile::TempDir;

    fn jane() -> Person {
        Person::new("Jane Doe", "jane@example.com")
    }

    fn setup() -> (TempDir, Repository) {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let repo = repository::init(dir.path(), "main").expect("Failed to init repository");
        (dir, repo)
    }

    #[test]
    fn test_first_commit_has_no_parents() {
        let (dir, repo) = setup();
        fs::write(dir.path().join("README.md"), "# notes").expect("write");
        files::stage(&repo, &["README.md".to_string()]).expect("stage");

        let commit = commit(&repo, "msg", &jane(), None).expect("commit");
        assert_eq!(commit.title, "msg");
        assert!(commit.parents.is_empty());
        assert!(commit.author.is_none());
        assert_eq!(commit.committer, jane());
    }

    #[test]
    fn test_nothing_staged_on_unborn_branch() {
        let (dir, repo) = setup();
        fs::write(dir.path().join("README.md"), "# notes").expect("write");
        let err = commit(&repo, "msg", &jane(), None).expect_err("nothing staged");
        assert_eq!(err.kind(), ErrorKind::NothingStaged);
        assert!(repository::is_unborn(&repo));
    }

    #[test]
    fn test_nothing_staged_keeps_head() {
        let (dir, repo) = setup();
        fs::write(dir.path().join("a.txt"), "one").expect("write");
        files::stage_all(&repo).expect("stage");
        let first = commit(&repo, "first", &jane(), None).expect("commit");

        fs::write(dir.path().join("a.txt"), "unstaged edit").expect("write");
        let err = commit(&repo, "second", &jane(), None).expect_err("nothing staged");
        assert_eq!(err.kind(), ErrorKind::NothingStaged);
        let head = repo.head().expect("head").target().expect("oid");
        assert_eq!(head.to_string(), first.sha);
    }

    #[test]
    fn test_author_override_is_recorded() {
        let (dir, repo) = setup();
        fs::write(dir.path().join("a.txt"), "one").expect("write");
        files::stage_all(&repo).expect("stage");
        let author = Person::new("Bob", "bob@example.com");

        let commit = commit(&repo, "Pair work\n\nWith Bob", &jane(), Some(&author)).expect("commit");
        assert_eq!(commit.author, Some(author));
        assert_eq!(commit.header().body, "With Bob");
        assert!(!commit.has_single_author());
    }

    #[test]
    fn test_empty_message_is_rejected() {
        let (dir, repo) = setup();
        fs::write(dir.path().join("a.txt"), "one").expect("write");
        files::stage_all(&repo).expect("stage");
        let err = commit(&repo, "  \n", &jane(), None).expect_err("empty message");
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_read_commit_by_revision() {
        let (dir, repo) = setup();
        fs::write(dir.path().join("a.txt"), "one").expect("write");
        files::stage_all(&repo).expect("stage");
        let created = commit(&repo, "first", &jane(), None).expect("commit");

        assert_eq!(read_commit(&repo, "HEAD").expect("read"), created);
        assert!(read_commit(&repo, "deadbeef").is_err());
    }
}
