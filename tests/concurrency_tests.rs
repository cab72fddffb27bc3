use anyhow::Result;
use futures::future::join_all;
use shark::{ErrorKind, FacadeOptions, GitFacade};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[path = "test_utils.rs"]
mod test_utils;
use test_utils::{facade, setup_repo_with_commits, write_file};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stages_are_serialized() -> Result<()> {
    let dir = setup_repo_with_commits(1)?;
    let facade = facade();
    let names: Vec<String> = (0..8).map(|i| format!("file_{i}.txt")).collect();
    for name in &names {
        write_file(dir.path(), name, name)?;
    }

    let tasks = names.iter().map(|name| {
        let facade = facade.clone();
        let path = dir.path().to_path_buf();
        let name = name.clone();
        tokio::spawn(async move { facade.stage(&path, &[name]).await })
    });
    for result in join_all(tasks).await {
        result??;
    }

    let status = facade.status(dir.path()).await?;
    assert_eq!(status.len(), 8);
    assert!(status.iter().all(|file| file.is_staged()));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_branch_creation_has_one_winner() -> Result<()> {
    let dir = setup_repo_with_commits(1)?;
    let facade = Arc::new(facade());

    let tasks = (0..6).map(|_| {
        let facade = Arc::clone(&facade);
        let path = dir.path().to_path_buf();
        tokio::spawn(async move { facade.create_branch(&path, "release", None, false).await })
    });
    let results = join_all(tasks).await;

    let mut created = 0;
    for result in results {
        match result? {
            Ok(_) => created += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::NameConflict),
        }
    }
    assert_eq!(created, 1);
    Ok(())
}

#[tokio::test]
async fn test_timed_out_caller_keeps_lock_until_work_ends() -> Result<()> {
    let dir = TempDir::new()?;
    let slow = GitFacade::new(FacadeOptions {
        timeout: Duration::from_millis(20),
        ..FacadeOptions::default()
    });

    if let Err(e) = slow.init(dir.path()).await {
        assert!(e.is_timeout(), "unexpected failure: {e}");
    }
    // The lock frees up only once init has really finished.
    let guard = tokio::time::timeout(Duration::from_secs(10), slow.locks().acquire(dir.path())).await?;
    assert!(facade().is_repository(dir.path()).await);
    drop(guard);
    Ok(())
}
