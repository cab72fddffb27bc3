use anyhow::Result;
use futures::{StreamExt, TryStreamExt};
use pretty_assertions::assert_eq;
use shark::{ChangeState, ErrorKind, Person, ResetMode};
use tempfile::TempDir;

#[path = "test_utils.rs"]
mod test_utils;
use test_utils::{commit_at, facade, head_sha, jane, setup_repo_with_commits, write_file};

#[tokio::test]
async fn test_fresh_repository_reports_default_branch() -> Result<()> {
    let dir = TempDir::new()?;
    let facade = facade();

    let info = facade.init(dir.path()).await?;
    assert_eq!(info.current_branch, "main");
    assert_eq!(facade.current_branch(dir.path()).await?, "main");
    assert!(facade.is_repository(dir.path()).await);

    let err = facade.init(dir.path()).await.expect_err("already a repository");
    assert_eq!(err.kind(), ErrorKind::AlreadyARepository);
    Ok(())
}

#[tokio::test]
async fn test_plain_directory_is_not_a_repository() -> Result<()> {
    let dir = TempDir::new()?;
    let facade = facade();

    assert!(!facade.is_repository(dir.path()).await);
    let err = facade
        .current_branch(dir.path())
        .await
        .expect_err("not initialized");
    assert_eq!(err.kind(), ErrorKind::NotAGitRepository);

    let err = facade.status(dir.path()).await.expect_err("not initialized");
    assert_eq!(err.kind(), ErrorKind::NotAGitRepository);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_remote_leaves_remotes_unchanged() -> Result<()> {
    let dir = TempDir::new()?;
    let facade = facade();
    facade.init(dir.path()).await?;

    facade
        .create_remote(dir.path(), "origin", "https://example.com/notes.git")
        .await?;
    let err = facade
        .create_remote(dir.path(), "origin", "https://example.com/other.git")
        .await
        .expect_err("duplicate remote");
    assert_eq!(err.kind(), ErrorKind::NameConflict);

    let remotes = facade.list_remotes(dir.path()).await?;
    assert_eq!(remotes.len(), 1);
    assert_eq!(remotes[0].url, "https://example.com/notes.git");
    Ok(())
}

#[tokio::test]
async fn test_commit_with_nothing_staged_keeps_head() -> Result<()> {
    let dir = setup_repo_with_commits(1)?;
    let facade = facade();
    let before = head_sha(dir.path())?;

    write_file(dir.path(), "notes.txt", "edited but not staged\n")?;
    let err = facade
        .commit(dir.path(), "should not happen", &jane(), None)
        .await
        .expect_err("nothing staged");
    assert_eq!(err.kind(), ErrorKind::NothingStaged);
    assert_eq!(head_sha(dir.path())?, before);
    Ok(())
}

#[tokio::test]
async fn test_log_is_reverse_chronological_and_repeatable() -> Result<()> {
    let dir = setup_repo_with_commits(5)?;
    let facade = facade();

    let log = facade.log(dir.path(), None).await?;
    let first: Vec<_> = log.iter().await?.try_collect().await?;
    let second = log.collect().await?;

    assert_eq!(first.len(), 5);
    assert!(
        first
            .windows(2)
            .all(|pair| pair[0].commit_time > pair[1].commit_time)
    );
    assert_eq!(serde_json::to_string(&first)?, serde_json::to_string(&second)?);

    let page = facade.log_page(dir.path(), None, 1, 2).await?;
    assert_eq!(page, first[1..3].to_vec());
    assert_eq!(log.page(1, 2).await?, page);

    write_file(dir.path(), "late.txt", "later\n")?;
    let newest = commit_at(dir.path(), "Later", 1_800_000_000)?;
    let restarted = log.collect().await?;
    assert_eq!(restarted.len(), 6);
    assert_eq!(restarted[0].sha, newest.to_string());
    Ok(())
}

#[tokio::test]
async fn test_log_of_unborn_branch_is_empty() -> Result<()> {
    let dir = TempDir::new()?;
    let facade = facade();
    facade.init(dir.path()).await?;

    let log = facade.log(dir.path(), None).await?;
    assert_eq!(log.iter().await?.count().await, 0);
    assert!(facade.rev_list(dir.path(), None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_invalid_log_range_fails_up_front() -> Result<()> {
    let dir = setup_repo_with_commits(1)?;
    let err = facade()
        .log(dir.path(), Some("nope..HEAD"))
        .await
        .expect_err("bad range");
    assert_eq!(err.kind(), ErrorKind::Unknown);
    Ok(())
}

#[tokio::test]
async fn test_three_dot_log_range() -> Result<()> {
    let dir = setup_repo_with_commits(3)?;
    let facade = facade();
    let shas = facade.rev_list(dir.path(), None).await?;

    let range = format!("{}...{}", shas[2], shas[0]);
    let commits = facade.log(dir.path(), Some(&range)).await?.collect().await?;
    let titles: Vec<_> = commits.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["Commit 2", "Commit 1"]);
    Ok(())
}

#[tokio::test]
async fn test_staging_a_mistyped_path_fails() -> Result<()> {
    let dir = setup_repo_with_commits(1)?;
    let facade = facade();

    let err = facade
        .stage(dir.path(), &["no-such-file.txt".to_string()])
        .await
        .expect_err("unknown path");
    assert_eq!(err.kind(), ErrorKind::Unknown);
    assert!(err.to_string().contains("no-such-file.txt"));
    Ok(())
}

#[tokio::test]
async fn test_init_stage_commit_log() -> Result<()> {
    let dir = TempDir::new()?;
    let facade = facade();
    facade.init(dir.path()).await?;

    write_file(dir.path(), "README.md", "# Notes\n")?;
    facade.stage(dir.path(), &["README.md".to_string()]).await?;
    let status = facade.status(dir.path()).await?;
    assert_eq!(status[0].staged, Some(ChangeState::Added));

    let created = facade.commit(dir.path(), "msg", &jane(), None).await?;
    let commits = facade.log(dir.path(), None).await?.collect().await?;

    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].title, "msg");
    assert!(commits[0].parents.is_empty());
    assert_eq!(commits[0], created);
    assert_eq!(commits[0].committer, Person::new("Jane Doe", "jane@example.com"));
    assert!(facade.status(dir.path()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_author_override_and_commit_details() -> Result<()> {
    let dir = setup_repo_with_commits(1)?;
    let facade = facade();

    write_file(dir.path(), "src/lib.rs", "pub fn answer() -> u32 { 42 }\n")?;
    facade.stage_all(dir.path()).await?;
    let author = Person::new("Bob Smith", "bob@example.com");
    let commit = facade
        .commit(
            dir.path(),
            "Add answer\n\nPaired with Bob.",
            &jane(),
            Some(author.clone()),
        )
        .await?;

    let read = facade.read_commit(dir.path(), &commit.sha).await?;
    assert_eq!(read.author, Some(author));
    assert_eq!(read.header().title, "Add answer");
    assert_eq!(read.header().body, "Paired with Bob.");
    assert_eq!(read.parents.len(), 1);

    let changes = facade.commit_changes(dir.path(), &commit.sha).await?;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].path, "src/lib.rs");
    assert_eq!(changes[0].state, ChangeState::Added);
    Ok(())
}

#[tokio::test]
async fn test_unstage_and_discard() -> Result<()> {
    let dir = setup_repo_with_commits(1)?;
    let facade = facade();
    let files = vec!["notes.txt".to_string()];

    write_file(dir.path(), "notes.txt", "scratch\n")?;
    facade.stage(dir.path(), &files).await?;
    facade.unstage(dir.path(), &files).await?;
    let status = facade.status(dir.path()).await?;
    assert_eq!(status[0].staged, None);
    assert_eq!(status[0].unstaged, Some(ChangeState::Modified));

    facade.reset_files(dir.path(), &files).await?;
    assert!(facade.status(dir.path()).await?.is_empty());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("notes.txt"))?,
        "revision 0\n"
    );
    Ok(())
}

#[tokio::test]
async fn test_hard_reset_moves_branch() -> Result<()> {
    let dir = setup_repo_with_commits(3)?;
    let facade = facade();
    let shas = facade.rev_list(dir.path(), None).await?;

    facade.reset(dir.path(), &shas[2], ResetMode::Hard).await?;
    assert_eq!(head_sha(dir.path())?, shas[2]);
    assert_eq!(facade.rev_list(dir.path(), None).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_branch_lifecycle() -> Result<()> {
    let dir = setup_repo_with_commits(1)?;
    let facade = facade();

    facade.create_branch(dir.path(), "feature", None, true).await?;
    assert_eq!(facade.current_branch(dir.path()).await?, "feature");

    let err = facade
        .delete_local_branch(dir.path(), "feature")
        .await
        .expect_err("checked out");
    assert_eq!(err.kind(), ErrorKind::NameConflict);

    let err = facade
        .rename_branch(dir.path(), "feature", "main")
        .await
        .expect_err("name taken");
    assert_eq!(err.kind(), ErrorKind::NameConflict);

    facade.rename_branch(dir.path(), "feature", "topic").await?;
    facade.checkout_branch(dir.path(), "main").await?;
    facade.delete_local_branch(dir.path(), "topic").await?;

    let names: Vec<String> = facade
        .list_branches(dir.path())
        .await?
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(names, vec!["main".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_repository_info_and_delete() -> Result<()> {
    let parent = TempDir::new()?;
    let path = parent.path().join("journal");
    let facade = facade();
    facade.init(&path).await?;
    write_file(&path, "todo.txt", "buy milk\n")?;

    let info = facade.repository_info(&path).await?;
    assert_eq!(info.name, "journal");
    assert_eq!(info.status.len(), 1);
    assert_eq!(info.status[0].unstaged, Some(ChangeState::Untracked));

    facade.delete_repository(&path).await?;
    assert!(!path.exists());

    let err = facade
        .delete_repository(parent.path())
        .await
        .expect_err("not a repository");
    assert_eq!(err.kind(), ErrorKind::NotAGitRepository);
    assert!(parent.path().exists());
    Ok(())
}
