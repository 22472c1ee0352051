//! Refresh job bodies: change detection, ordering, failure isolation

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use golden_repos::{GoldenRepoError, JobQueue, RefreshStatus, WorkerPool};

use crate::common::{FailingCloner, RecordingQueue, TestEnv, INDEX_STAMP};

#[test]
fn test_first_refresh_publishes_indexed_snapshot() {
    let env = TestEnv::new();
    let record = env.add_remote("repo");

    let outcome = env.context.refresh_repo(&record).unwrap();
    assert_eq!(outcome.status, RefreshStatus::Updated);
    assert_eq!(outcome.revision.as_deref(), Some("rev-1"));

    let target = env.target("repo-global").unwrap();
    assert_eq!(outcome.target_path.as_ref(), Some(&target));
    assert!(env.context.snapshotter.is_snapshot_path(&target));

    // Indexes were built against the master before it was snapshotted
    assert_eq!(env.indexer.calls(), vec![record.master_path.clone()]);
    assert!(target.join(INDEX_STAMP).exists());
    assert_eq!(fs::read_to_string(target.join("REVISION")).unwrap(), "rev-1");

    let alias = env.context.aliases.get_record("repo-global").unwrap().unwrap();
    assert_eq!(alias.revision.as_deref(), Some("rev-1"));
    assert_eq!(alias.repo_name, "repo");
}

#[test]
fn test_unchanged_upstream_only_heartbeats() {
    let env = TestEnv::new();
    let record = env.add_remote("repo");
    env.context.refresh_repo(&record).unwrap();
    let before = env.context.aliases.get_record("repo-global").unwrap().unwrap();

    thread::sleep(Duration::from_millis(5));
    let outcome = env.context.refresh_repo(&record).unwrap();
    assert_eq!(outcome.status, RefreshStatus::Unchanged);

    let after = env.context.aliases.get_record("repo-global").unwrap().unwrap();
    assert_eq!(after.target_path, before.target_path);
    assert!(after.last_refresh > before.last_refresh);
    assert_eq!(env.indexer.call_count(), 1);
    assert_eq!(env.context.snapshotter.list_snapshots("repo").unwrap().len(), 1);
}

#[test]
fn test_upstream_change_swaps_and_marks_previous_snapshot() {
    let env = TestEnv::new();
    let record = env.add_remote("repo");
    env.context.refresh_repo(&record).unwrap();
    let first = env.target("repo-global").unwrap();

    env.upstream.set_revision("rev-2");
    let outcome = env.context.refresh_repo(&record).unwrap();
    assert_eq!(outcome.status, RefreshStatus::Updated);
    assert_eq!(outcome.previous_target.as_ref(), Some(&first));

    let second = env.target("repo-global").unwrap();
    assert_ne!(first, second);
    assert_eq!(fs::read_to_string(second.join("REVISION")).unwrap(), "rev-2");

    // Published snapshots are never edited: the old one still holds rev-1
    assert_eq!(fs::read_to_string(first.join("REVISION")).unwrap(), "rev-1");

    // Old snapshot waits out the grace period instead of vanishing under readers
    let pending: Vec<_> = env
        .context
        .cleanup
        .pending()
        .into_iter()
        .map(|m| m.path)
        .collect();
    assert_eq!(pending, vec![first.clone()]);
    assert!(first.exists());
}

#[test]
fn test_failed_index_build_leaves_alias_and_previous_snapshot_intact() {
    let env = TestEnv::new();
    let record = env.add_remote("repo");
    env.context.refresh_repo(&record).unwrap();
    let published = env.context.aliases.get_record("repo-global").unwrap().unwrap();

    env.upstream.set_revision("rev-2");
    env.indexer.set_fail(true);
    let err = env.context.refresh_repo(&record).unwrap_err();
    assert!(matches!(err, GoldenRepoError::IndexBuildFailure { .. }));

    let after = env.context.aliases.get_record("repo-global").unwrap().unwrap();
    assert_eq!(after.target_path, published.target_path);
    assert_eq!(after.revision.as_deref(), Some("rev-1"));
    assert!(published.target_path.exists());
    assert_eq!(env.context.snapshotter.list_snapshots("repo").unwrap().len(), 1);
    assert!(env.context.cleanup.pending().is_empty());

    // The same upstream change is retried once indexing works again
    env.indexer.set_fail(false);
    let outcome = env.context.refresh_repo(&record).unwrap();
    assert_eq!(outcome.status, RefreshStatus::Updated);
    assert_eq!(outcome.revision.as_deref(), Some("rev-2"));
}

#[test]
fn test_snapshot_failure_leaves_alias_untouched() {
    let env = TestEnv::with_cloner(Box::new(FailingCloner));
    let record = env.add_remote("repo");

    // Seed a published alias pointing at an existing directory
    let published = env.path().join("published");
    fs::create_dir_all(&published).unwrap();
    env.context
        .aliases
        .create_alias("repo-global", &published, "repo")
        .unwrap();

    let err = env.context.refresh_repo(&record).unwrap_err();
    assert!(matches!(err, GoldenRepoError::SnapshotFailure { .. }));
    assert_eq!(env.target("repo-global"), Some(published));

    // No partial snapshot left behind
    let repo_dir = env.context.snapshotter.root().join("repo");
    let leftovers = fs::read_dir(&repo_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[test]
fn test_upstream_failure_fails_only_this_attempt() {
    let env = TestEnv::new();
    let record = env.add_remote("repo");
    env.upstream.set_fail(true);

    let err = env.context.refresh_repo(&record).unwrap_err();
    assert!(err.is_retryable());
    assert!(!env.context.locks.is_locked("repo-global"));
    assert_eq!(env.indexer.call_count(), 0);

    env.upstream.set_fail(false);
    assert_eq!(
        env.context.refresh_repo(&record).unwrap().status,
        RefreshStatus::Updated
    );
}

#[test]
fn test_lock_held_elsewhere_is_lock_busy_not_error() {
    let env = TestEnv::new();
    let record = env.add_remote("repo");
    let _guard = env
        .context
        .locks
        .lock("repo-global", "admin:edit", Duration::ZERO)
        .unwrap();

    let outcome = env.context.refresh_repo(&record).unwrap();
    assert_eq!(outcome.status, RefreshStatus::LockBusy);
    assert!(!outcome.success());
    assert_eq!(env.indexer.call_count(), 0);
    assert!(env.upstream.synced().is_empty());
}

#[test]
fn test_local_refresh_reindexes_live_directory_without_snapshot() {
    let env = TestEnv::new();
    let record = env.add_local("svc", Some("local://svc"));

    let outcome = env.context.refresh_repo(&record).unwrap();
    assert_eq!(outcome.status, RefreshStatus::LocalReindexed);
    assert_eq!(env.target("svc-global"), Some(record.master_path.clone()));
    assert_eq!(env.indexer.calls(), vec![record.master_path.clone()]);
    assert!(env.context.snapshotter.list_snapshots("svc").unwrap().is_empty());
    assert!(env.upstream.synced().is_empty());

    // A second refresh keeps pointing at the live directory
    env.context.refresh_repo(&record).unwrap();
    assert_eq!(env.target("svc-global"), Some(record.master_path));
}

#[test]
fn test_concurrent_refreshes_never_interleave_swaps() {
    let env = TestEnv::new();
    env.add_remote("repo");
    env.upstream.set_advancing(true);
    env.indexer.set_delay(Duration::from_millis(20));

    let pool = Arc::new(WorkerPool::new(4).unwrap());
    let queue: Arc<dyn JobQueue> = pool.clone();
    let scheduler = env.scheduler(Some(queue));

    let ids: Vec<_> = (0..4)
        .map(|_| scheduler.trigger_refresh_for_repo("repo").unwrap().unwrap())
        .collect();
    for id in &ids {
        let status = pool.wait_for(id, Duration::from_secs(30)).unwrap();
        assert!(status.is_finished(), "job {} did not finish: {:?}", id, status);
    }

    // Lock wait is short, so some jobs may have given up; none ran concurrently
    assert_eq!(env.indexer.max_concurrent(), 1);

    let snapshots = env.context.snapshotter.list_snapshots("repo").unwrap();
    assert_eq!(snapshots.len(), env.indexer.call_count());
    let latest = snapshots.last().unwrap();
    assert_eq!(env.target("repo-global"), Some(latest.path.clone()));
    assert!(!env.context.locks.is_locked("repo-global"));
}

#[test]
fn test_queued_refresh_of_unregistered_repo_publishes_nothing() {
    let env = TestEnv::new();
    env.add_remote("repo");
    let queue = RecordingQueue::new();
    let jobs: Arc<dyn JobQueue> = queue.clone();
    let scheduler = env.scheduler(Some(jobs));
    scheduler.run_tick().unwrap();

    // Unregistered while the job waits in the queue
    env.context
        .locks
        .with_write_lock("repo-global", "admin:remove", Duration::ZERO, || {
            env.context.registry.unregister("repo-global")?;
            env.context.aliases.delete_alias("repo-global")
        })
        .unwrap();

    let outcomes = queue.run_pending();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        outcomes[0],
        Err(GoldenRepoError::NotFound { .. })
    ));

    assert!(env.target("repo-global").is_none());
    assert!(env.context.snapshotter.list_snapshots("repo").unwrap().is_empty());
    assert!(env.upstream.synced().is_empty());
    assert_eq!(env.indexer.call_count(), 0);
    assert!(!env.context.locks.is_locked("repo-global"));
}

#[test]
fn test_local_refresh_of_unregistered_repo_fails_not_found() {
    let env = TestEnv::new();
    let record = env.add_local("svc", Some("local://svc"));
    env.context.registry.unregister("svc-global").unwrap();

    let err = env.context.refresh_repo(&record).unwrap_err();
    assert!(matches!(err, GoldenRepoError::NotFound { .. }));
    assert!(env.target("svc-global").is_none());
    assert_eq!(env.indexer.call_count(), 0);
}
