//! Scheduled cycle, explicit triggers and loop lifecycle

use std::sync::Arc;
use std::time::{Duration, Instant};

use golden_repos::{GoldenRepoError, JobQueue, RefreshStatus, WorkerPool, REFRESH_OPERATION};

use crate::common::{wait_until, RecordingQueue, TestEnv};

fn queue_of(queue: &Arc<RecordingQueue>) -> Option<Arc<dyn JobQueue>> {
    let queue: Arc<dyn JobQueue> = queue.clone();
    Some(queue)
}

#[test]
fn test_tick_submits_remote_and_skips_local() {
    let env = TestEnv::new();
    env.add_local("svc", Some("local://svc"));
    env.add_remote("repo");
    let queue = RecordingQueue::new();
    let scheduler = env.scheduler(queue_of(&queue));

    let report = scheduler.run_tick().unwrap();
    assert_eq!(report.submitted_aliases(), vec!["repo-global"]);
    assert_eq!(report.skipped_local, vec!["svc-global".to_string()]);
    assert_eq!(queue.submitted_aliases(), vec!["repo-global".to_string()]);

    let (operation, submitter, is_admin) = queue.metadata(&report.submitted[0].1).unwrap();
    assert_eq!(operation, REFRESH_OPERATION);
    assert_eq!(submitter, "system");
    assert!(is_admin);

    // The local repo got no lock and no change detection
    assert!(!env.context.locks.is_locked("svc-global"));
    assert_eq!(env.indexer.call_count(), 0);
}

#[test]
fn test_every_local_origin_form_is_skipped() {
    let env = TestEnv::new();
    env.add_local("marker", Some("local://marker"));
    env.add_local("bare", Some("/srv/code/bare"));
    env.add_local("empty", Some(""));
    env.add_local("none", None);
    let queue = RecordingQueue::new();
    let scheduler = env.scheduler(queue_of(&queue));

    let report = scheduler.run_tick().unwrap();
    assert!(report.submitted.is_empty());
    assert_eq!(report.skipped_local.len(), 4);
    assert_eq!(queue.len(), 0);
    assert_eq!(scheduler.stats().jobs_submitted, 0);
}

#[test]
fn test_pending_job_is_not_resubmitted() {
    let env = TestEnv::new();
    env.add_remote("repo");
    let queue = RecordingQueue::new();
    let scheduler = env.scheduler(queue_of(&queue));

    scheduler.run_tick().unwrap();
    assert!(scheduler.is_pending("repo-global"));

    let second = scheduler.run_tick().unwrap();
    assert!(second.submitted.is_empty());
    assert_eq!(second.already_pending, vec!["repo-global".to_string()]);

    // Once the job has run the alias is eligible again
    let outcomes = queue.run_pending();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].as_ref().unwrap().status, RefreshStatus::Updated);
    assert!(!scheduler.is_pending("repo-global"));

    let third = scheduler.run_tick().unwrap();
    assert_eq!(third.submitted_aliases(), vec!["repo-global"]);
}

#[test]
fn test_rejected_submission_is_reported_and_not_pending() {
    let env = TestEnv::new();
    env.add_remote("repo");
    let queue = RecordingQueue::new();
    queue.set_reject(true);
    let scheduler = env.scheduler(queue_of(&queue));

    let report = scheduler.run_tick().unwrap();
    assert_eq!(report.submit_failures.len(), 1);
    assert!(report.submit_failures[0].1.contains("queue full"));
    assert!(!scheduler.is_pending("repo-global"));
}

#[test]
fn test_explicit_trigger_refreshes_local_repo() {
    let env = TestEnv::new();
    let svc = env.add_local("svc", Some("local://svc"));
    let queue = RecordingQueue::new();
    let scheduler = env.scheduler(queue_of(&queue));

    let id = scheduler.trigger_refresh_for_repo("svc").unwrap();
    assert!(id.is_some());
    assert_eq!(queue.submitted_aliases(), vec!["svc-global".to_string()]);

    let outcomes = queue.run_pending();
    assert_eq!(
        outcomes[0].as_ref().unwrap().status,
        RefreshStatus::LocalReindexed
    );
    assert_eq!(env.target("svc-global"), Some(svc.master_path));
}

#[test]
fn test_trigger_unknown_repo_fails_synchronously() {
    let env = TestEnv::new();
    env.add_remote("repo");
    let queue = RecordingQueue::new();
    let scheduler = env.scheduler(queue_of(&queue));

    let err = scheduler.trigger_refresh_for_repo("missing").unwrap_err();
    assert!(matches!(err, GoldenRepoError::NotFound { .. }));
    assert!(err.to_string().contains("missing"));
    assert_eq!(queue.len(), 0);
    assert!(!env.context.locks.is_locked("missing"));
}

#[test]
fn test_trigger_without_queue_runs_inline() {
    let env = TestEnv::new();
    env.add_remote("repo");
    let scheduler = env.scheduler(None);

    assert_eq!(scheduler.trigger_refresh_for_repo("repo").unwrap(), None);
    assert!(env.target("repo-global").is_some());

    // Inline errors propagate to the caller
    env.upstream.set_revision("rev-2");
    env.indexer.set_fail(true);
    assert!(matches!(
        scheduler.trigger_refresh_for_repo("repo-global"),
        Err(GoldenRepoError::IndexBuildFailure { .. })
    ));
}

#[test]
fn test_trigger_for_aliases_reports_each_alias() {
    let env = TestEnv::new();
    env.add_remote("repo");
    env.add_remote("lib");
    let queue = RecordingQueue::new();
    let scheduler = env.scheduler(queue_of(&queue));

    let results = scheduler.trigger_refresh_for_aliases(&["repo-global", "ghost-global", "lib"]);
    assert_eq!(results.len(), 3);
    assert!(results[0].1.is_ok());
    assert!(matches!(results[1].1, Err(GoldenRepoError::NotFound { .. })));
    assert!(results[2].1.is_ok());
    assert_eq!(
        queue.submitted_aliases(),
        vec!["repo-global".to_string(), "lib-global".to_string()]
    );
}

#[test]
fn test_tick_without_queue_fails_and_loop_policy_continues() {
    let env = TestEnv::new();
    env.add_remote("repo");
    let scheduler = env.scheduler(None);

    assert!(matches!(
        scheduler.run_tick(),
        Err(GoldenRepoError::JobQueue { .. })
    ));
    assert!(scheduler.drive_tick());
    assert_eq!(scheduler.stats().tick_failures, 1);
    assert_eq!(env.indexer.call_count(), 0);
}

#[test]
fn test_stop_wakes_sleeping_loop_immediately() {
    let env = TestEnv::new();
    env.add_remote("repo");
    let queue = RecordingQueue::new();
    let scheduler = Arc::new(env.scheduler_with_interval(queue_of(&queue), Duration::from_secs(3600)));

    let handle = scheduler.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || scheduler.stats().ticks >= 1));
    assert!(scheduler.is_running());

    // A second start while running is refused
    assert!(scheduler.start().is_err());

    let stopping = Instant::now();
    handle.stop();
    assert!(stopping.elapsed() < Duration::from_secs(5));
    assert!(!scheduler.is_running());
    assert_eq!(scheduler.stats().ticks, 1);
    assert_eq!(queue.submitted_aliases(), vec!["repo-global".to_string()]);
}

#[test]
fn test_scheduler_restarts_after_stop() {
    let env = TestEnv::new();
    env.add_remote("repo");
    let queue = RecordingQueue::new();
    let scheduler = Arc::new(env.scheduler_with_interval(queue_of(&queue), Duration::from_secs(3600)));

    let first = scheduler.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || scheduler.stats().ticks >= 1));
    first.stop();
    assert!(!scheduler.is_running());

    let second = scheduler.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || scheduler.stats().ticks >= 2));
    assert!(scheduler.is_running());

    // stop() on the scheduler reaches the loop started last
    scheduler.stop();
    assert!(wait_until(Duration::from_secs(5), || second.is_finished()));
    second.stop();
    assert!(!scheduler.is_running());
}

#[test]
fn test_unbounded_interval_keeps_loop_alive_until_stopped() {
    let env = TestEnv::new();
    env.add_remote("repo");
    let queue = RecordingQueue::new();
    let scheduler = Arc::new(
        env.scheduler_with_interval(queue_of(&queue), Duration::from_secs(u64::MAX)),
    );

    let handle = scheduler.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || scheduler.stats().ticks >= 1));
    std::thread::sleep(Duration::from_millis(50));
    assert!(!handle.is_finished());
    assert!(scheduler.is_running());

    handle.stop();
    assert!(!scheduler.is_running());
    assert_eq!(scheduler.stats().ticks, 1);
}

#[test]
fn test_loop_with_worker_pool_publishes_remote_repo() {
    let env = TestEnv::new();
    env.add_remote("repo");
    env.add_local("svc", None);
    let pool = Arc::new(WorkerPool::new(2).unwrap());
    let queue: Arc<dyn JobQueue> = pool.clone();
    let scheduler = Arc::new(env.scheduler_with_interval(Some(queue), Duration::from_millis(20)));

    let handle = scheduler.start().unwrap();
    let published = wait_until(Duration::from_secs(10), || {
        env.context
            .aliases
            .get_record("repo-global")
            .ok()
            .flatten()
            .and_then(|r| r.revision)
            .is_some()
    });
    assert!(wait_until(Duration::from_secs(5), || scheduler.stats().ticks >= 3));
    handle.stop();
    pool.shutdown();

    assert!(published);
    // Later ticks found nothing new: still exactly one snapshot
    assert_eq!(env.context.snapshotter.list_snapshots("repo").unwrap().len(), 1);
    assert!(env.context.aliases.get_record("svc-global").unwrap().is_none());
    assert!(scheduler.stats().local_skips >= 3);
}
