//! Error taxonomy for repository operations
//!
//! Every facade operation fails with a [`GitError`]. Callers match on
//! [`GitError::kind`] to decide whether a failure is an expected negative
//! signal or something to show the user, and use [`GitError::explain`] to
//! attach a human-readable explanation on top of the raw error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by the Git facade.
#[derive(Debug, Error)]
pub enum GitError {
    /// The path does not contain an initialized working directory.
    #[error("not a git repository: {}", path.display())]
    NotAGitRepository { path: PathBuf },

    /// `init` was called on a path that already holds a repository.
    #[error("a git repository already exists at {}", path.display())]
    AlreadyARepository { path: PathBuf },

    /// A remote or branch with this name already exists, or the name
    /// collides with the checked-out branch.
    #[error("name conflict: {name}")]
    NameConflict { name: String },

    /// The index holds no changes relative to HEAD.
    #[error("nothing staged for commit")]
    NothingStaged,

    /// Transport failure, including timeouts of remote operations.
    #[error("network error: {message}")]
    NetworkError { message: String },

    /// Credentials missing or rejected by the remote.
    #[error("authentication failed: {message}")]
    AuthError { message: String },

    /// Merge left conflicted files, or the remote rejected a non-fast-forward push.
    #[error("merge conflict: {message}")]
    MergeConflict { message: String, files: Vec<String> },

    /// A call ran past its deadline. Reported as a network failure for
    /// remote operations and as an unknown error otherwise.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: String,
        after: Duration,
        origin: Origin,
    },

    #[error("{message}")]
    Unknown { message: String },
}

pub type GitResult<T> = Result<T, GitError>;

/// Fieldless discriminant of [`GitError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotAGitRepository,
    AlreadyARepository,
    NameConflict,
    NothingStaged,
    NetworkError,
    AuthError,
    MergeConflict,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotAGitRepository => "not a git repository",
            Self::AlreadyARepository => "already a git repository",
            Self::NameConflict => "name conflict",
            Self::NothingStaged => "nothing staged",
            Self::NetworkError => "network error",
            Self::AuthError => "authentication error",
            Self::MergeConflict => "merge conflict",
            Self::Unknown => "unknown error",
        };
        f.write_str(name)
    }
}

impl ErrorKind {
    /// Default explanation shown to users for this kind of failure.
    pub fn explanation(&self) -> &'static str {
        match self {
            Self::NotAGitRepository => "This folder is not a Git repository",
            Self::AlreadyARepository => "This folder already contains a Git repository",
            Self::NameConflict => "That name is already in use",
            Self::NothingStaged => "Stage some changes before committing",
            Self::NetworkError => "Could not reach the remote repository",
            Self::AuthError => "The remote rejected your credentials",
            Self::MergeConflict => "Your changes conflict with the remote's; resolve them and try again",
            Self::Unknown => "Something went wrong while running Git",
        }
    }
}

/// Whether a git2 failure happened while talking to a remote.
///
/// Transport classes only map to [`GitError::NetworkError`] for remote
/// operations; locally the same class usually means a broken file URL or
/// misconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

impl GitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAGitRepository { .. } => ErrorKind::NotAGitRepository,
            Self::AlreadyARepository { .. } => ErrorKind::AlreadyARepository,
            Self::NameConflict { .. } => ErrorKind::NameConflict,
            Self::NothingStaged => ErrorKind::NothingStaged,
            Self::NetworkError { .. } => ErrorKind::NetworkError,
            Self::AuthError { .. } => ErrorKind::AuthError,
            Self::MergeConflict { .. } => ErrorKind::MergeConflict,
            Self::Timeout {
                origin: Origin::Remote,
                ..
            } => ErrorKind::NetworkError,
            Self::Timeout { .. } | Self::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    pub fn not_a_repository(path: &Path) -> Self {
        Self::NotAGitRepository {
            path: path.to_path_buf(),
        }
    }

    pub fn name_conflict(name: impl Into<String>) -> Self {
        Self::NameConflict { name: name.into() }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>, files: Vec<String>) -> Self {
        Self::MergeConflict {
            message: message.into(),
            files,
        }
    }

    pub fn timeout(operation: &str, after: Duration, origin: Origin) -> Self {
        Self::Timeout {
            operation: operation.to_string(),
            after,
            origin,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Classifies a git2 error.
    pub fn from_git2(err: &git2::Error, origin: Origin) -> Self {
        use git2::{ErrorClass, ErrorCode};

        let message = err.message().to_string();
        match err.code() {
            ErrorCode::Auth => return Self::AuthError { message },
            ErrorCode::Certificate => return Self::NetworkError { message },
            ErrorCode::Exists => return Self::NameConflict { name: message },
            ErrorCode::Conflict | ErrorCode::MergeConflict | ErrorCode::Unmerged => {
                return Self::MergeConflict {
                    message,
                    files: Vec::new(),
                };
            }
            ErrorCode::NotFastForward => {
                return Self::MergeConflict {
                    message: format!("remote contains work that is not present locally: {message}"),
                    files: Vec::new(),
                };
            }
            _ => {}
        }

        if origin == Origin::Remote {
            match err.class() {
                ErrorClass::Net
                | ErrorClass::Http
                | ErrorClass::Ssl
                | ErrorClass::Os
                | ErrorClass::Callback => return Self::NetworkError { message },
                ErrorClass::Ssh => {
                    if looks_like_auth_failure(&message) {
                        return Self::AuthError { message };
                    }
                    return Self::NetworkError { message };
                }
                _ => {}
            }
            if looks_like_auth_failure(&message) {
                return Self::AuthError { message };
            }
        }

        Self::Unknown { message }
    }

    /// Layers an explanation for the user on top of this error.
    pub fn explain(&self, explain_message: impl Into<String>) -> UserFacingError {
        UserFacingError {
            kind: self.kind(),
            message: self.to_string(),
            explain_message: explain_message.into(),
        }
    }

    /// [`GitError::explain`] with the kind's default explanation.
    pub fn user_facing(&self) -> UserFacingError {
        self.explain(self.kind().explanation())
    }
}

impl From<git2::Error> for GitError {
    fn from(err: git2::Error) -> Self {
        Self::from_git2(&err, Origin::Local)
    }
}

impl From<std::io::Error> for GitError {
    fn from(err: std::io::Error) -> Self {
        Self::unknown(format!("I/O error: {err}"))
    }
}

fn looks_like_auth_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["authentication", "credentials", "401", "403", "permission denied"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// An error ready to be rendered: raw kind and message plus an explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFacingError {
    pub kind: ErrorKind,
    pub message: String,
    pub explain_message: String,
}

impl fmt::Display for UserFacingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.explain_message, self.message)
    }
}
