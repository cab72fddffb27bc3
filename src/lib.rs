pub mod config;
pub mod error;
pub mod facade;
pub mod git;
pub mod identity;
pub mod logger;
pub mod registry;

// Re-export the types screens work with
pub use config::Config;
pub use error::{ErrorKind, GitError, GitResult, UserFacingError};
pub use facade::{CommitStream, FacadeOptions, GitFacade, History};
pub use git::{
    Branch, ChangeState, Commit, CommitLog, Credentials, FileChange, FileStatus, PullOutcome,
    PushPull, Remote, RepositoryInfo, ResetMode,
};
pub use identity::{GitHubUser, IdentityConfig, ManualUser, Person};
pub use logger::{init_logger, init_tracing_to_file};
pub use registry::{RegisteredRepository, RepositoryRegistry};
