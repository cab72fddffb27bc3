// Blocking git2 primitives that the facade schedules on the blocking pool

pub mod branch;
pub mod commit;
pub mod files;
pub mod history;
pub mod remote;
pub mod repository;
mod types;

pub use history::{CommitIter, CommitLog};
pub use remote::{CancelFlag, Credentials};
pub use repository::{DEFAULT_BRANCH, is_repository, open_repo};
pub use types::{
    Branch, ChangeState, Commit, CommitHeader, FileChange, FileStatus, PullOutcome, PushPull,
    Remote, RepositoryInfo, ResetMode,
};
