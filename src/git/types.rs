//! Records returned by repository operations

use crate::identity::Person;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A commit as shown in history and commit detail screens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    /// First line of the message
    pub title: String,
    /// Full commit message, title included
    pub message: String,
    /// `None` when the author is the committer
    pub author: Option<Person>,
    pub committer: Person,
    pub author_time: DateTime<Utc>,
    pub commit_time: DateTime<Utc>,
    /// Parent shas in commit order
    pub parents: Vec<String>,
}

impl Commit {
    pub fn short_sha(&self) -> &str {
        self.sha.get(..7).unwrap_or(&self.sha)
    }

    /// The author, falling back to the committer.
    pub fn effective_author(&self) -> &Person {
        self.author.as_ref().unwrap_or(&self.committer)
    }

    pub fn header(&self) -> CommitHeader {
        CommitHeader::parse(&self.message)
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Whether the detail header can show a single person.
    pub fn has_single_author(&self) -> bool {
        self.author
            .as_ref()
            .is_none_or(|author| author.email == self.committer.email)
    }
}

/// A commit message split for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitHeader {
    pub title: String,
    pub body: String,
}

impl CommitHeader {
    pub fn parse(message: &str) -> Self {
        let message = message.trim_start_matches(['\n', '\r']);
        let (title, body) = match message.split_once('\n') {
            Some((title, body)) => (title, body),
            None => (message, ""),
        };
        Self {
            title: title.trim_end().to_string(),
            body: body.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Short name (`main`, or `feature` for `origin/feature`)
    pub name: String,
    pub is_remote: bool,
    /// Remote name for remote-tracking branches
    pub remote: Option<String>,
    /// Upstream short name such as `origin/main`
    pub upstream: Option<String>,
    /// `None` for an unborn branch
    pub head_sha: Option<String>,
    pub is_head: bool,
}

impl Branch {
    /// `origin/feature` for remote branches, the plain name otherwise.
    pub fn full_name(&self) -> String {
        match &self.remote {
            Some(remote) if self.is_remote => format!("{remote}/{}", self.name),
            _ => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeState {
    Added,
    Modified,
    Deleted,
    Untracked,
    Conflicted,
}

/// Working tree state of a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatus {
    pub path: String,
    /// Change recorded in the index relative to HEAD
    pub staged: Option<ChangeState>,
    /// Change in the working tree relative to the index
    pub unstaged: Option<ChangeState>,
}

impl FileStatus {
    pub fn is_staged(&self) -> bool {
        self.staged.is_some()
    }
}

/// A file touched by a commit, relative to its first parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub old_path: Option<String>,
    pub state: ChangeState,
}

/// Commits between a local branch and its upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPull {
    pub to_push: usize,
    pub to_pull: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetMode {
    Soft,
    Mixed,
    Hard,
}

impl From<ResetMode> for git2::ResetType {
    fn from(mode: ResetMode) -> Self {
        match mode {
            ResetMode::Soft => Self::Soft,
            ResetMode::Mixed => Self::Mixed,
            ResetMode::Hard => Self::Hard,
        }
    }
}

/// What happened during a pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullOutcome {
    UpToDate,
    FastForward { to: String },
    Merged { commit: String },
}

/// Snapshot of a repository for list and header screens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub path: PathBuf,
    pub name: String,
    pub current_branch: String,
    pub remotes: Vec<Remote>,
    pub status: Vec<FileStatus>,
}
