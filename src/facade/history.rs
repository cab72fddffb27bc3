//! Async history
//!
//! [`History`] is what [`GitFacade::log`] hands out. Each [`History::iter`]
//! starts a walk on tokio's blocking pool that feeds a bounded channel, so
//! commits are read from disk only as fast as the [`CommitStream`] is
//! polled and no git2 call runs on the caller's thread.

use super::GitFacade;
use crate::error::{GitError, GitResult, Origin};
use crate::git::{Commit, CommitLog, repository};
use futures::Stream;
use log::debug;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tracing::info_span;

/// Commits the walk may read ahead of the consumer.
const READ_AHEAD: usize = 64;

/// Lazy, restartable history of one repository.
#[derive(Debug, Clone)]
pub struct History {
    facade: GitFacade,
    path: PathBuf,
    range: Option<String>,
}

impl History {
    pub(super) fn new(facade: GitFacade, path: PathBuf, range: Option<String>) -> Self {
        Self {
            facade,
            path,
            range,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn range(&self) -> Option<&str> {
        self.range.as_deref()
    }

    /// Starts a fresh walk from the refs as they are now, newest first.
    ///
    /// Fails if the walk cannot start within the facade's deadline.
    /// Dropping the stream stops the walk.
    pub async fn iter(&self) -> GitResult<CommitStream> {
        let (commits_tx, commits_rx) = mpsc::channel(READ_AHEAD);
        let (ready_tx, ready_rx) = oneshot::channel();
        let path = self.path.clone();
        let range = self.range.clone();
        let span = info_span!("git_op", op = "log", path = %path.display());

        tokio::task::spawn_blocking(move || {
            let _entered = span.entered();
            let log = match repository::open_repo(&path) {
                Ok(repo) => CommitLog::new(repo, range.as_deref()),
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let commits = match log.iter() {
                Ok(commits) => commits,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if ready_tx.send(Ok(())).is_err() {
                return;
            }
            for commit in commits {
                if commits_tx.blocking_send(commit).is_err() {
                    debug!("History of {} dropped before the end", path.display());
                    return;
                }
            }
        });

        let timeout = self.facade.options().timeout;
        match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(started)) => started.map(|()| CommitStream {
                commits: commits_rx,
            }),
            Ok(Err(_)) => Err(GitError::unknown("log walk stopped before starting")),
            Err(_) => Err(GitError::timeout("log", timeout, Origin::Local)),
        }
    }

    /// Every commit of a fresh walk.
    pub async fn collect(&self) -> GitResult<Vec<Commit>> {
        let mut commits = self.iter().await?;
        let mut all = Vec::new();
        while let Some(commit) = commits.next_commit().await {
            all.push(commit?);
        }
        Ok(all)
    }

    /// `limit` commits after skipping the newest `skip`.
    pub async fn page(&self, skip: usize, limit: usize) -> GitResult<Vec<Commit>> {
        self.facade
            .log_page(&self.path, self.range.as_deref(), skip, limit)
            .await
    }
}

/// One walk of a [`History`].
#[derive(Debug)]
pub struct CommitStream {
    commits: mpsc::Receiver<GitResult<Commit>>,
}

impl CommitStream {
    pub async fn next_commit(&mut self) -> Option<GitResult<Commit>> {
        self.commits.recv().await
    }
}

impl Stream for CommitStream {
    type Item = GitResult<Commit>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.commits.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{commit, files};
    use crate::identity::Person;
    use futures::StreamExt;
    use tempfile::TempDir;

    async fn repo_with_commits(facade: &GitFacade, n: usize) -> TempDir {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let repo = repository::init(dir.path(), "main").expect("init");
        let jane = Person::new("Jane", "jane@example.com");
        for i in 0..n {
            std::fs::write(dir.path().join("a.txt"), format!("{i}")).expect("write");
            files::stage_all(&repo).expect("stage");
            commit::commit(&repo, &format!("commit {i}"), &jane, None).expect("commit");
        }
        assert!(facade.is_repository(dir.path()).await);
        dir
    }

    #[tokio::test]
    async fn test_stream_can_stop_early() {
        let facade = GitFacade::default();
        let dir = repo_with_commits(&facade, 3).await;
        let history = facade.log(dir.path(), None).await.expect("log");

        let first: Vec<_> = history.iter().await.expect("iter").take(1).collect().await;
        assert_eq!(first.len(), 1);
        assert_eq!(history.collect().await.expect("collect").len(), 3);
    }

    #[tokio::test]
    async fn test_stream_is_consumable_from_another_task() {
        let facade = GitFacade::default();
        let dir = repo_with_commits(&facade, 2).await;
        let mut commits = facade
            .log(dir.path(), None)
            .await
            .expect("log")
            .iter()
            .await
            .expect("iter");

        let titles = tokio::spawn(async move {
            let mut titles = Vec::new();
            while let Some(commit) = commits.next().await {
                titles.push(commit.expect("commit").title);
            }
            titles
        })
        .await
        .expect("join");
        assert_eq!(titles.len(), 2);
        assert!(titles.contains(&"commit 0".to_string()));
    }

    #[tokio::test]
    async fn test_missing_repository_fails_to_start() {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let facade = GitFacade::default();
        let history = History::new(facade, dir.path().join("nothing"), None);
        let err = history.iter().await.expect_err("no repository");
        assert_eq!(err.kind(), crate::ErrorKind::NotAGitRepository);
    }
}
