//! Recording fakes for the external collaborators
//!
//! Each fake is `Clone` over shared state so a test can keep a handle
//! after boxing one into the `RefreshContext`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use golden_repos::indexer::{IndexBuildReport, IndexBuilder, IndexType};
use golden_repos::{
    CloneBackend, GoldenRepoError, JobFn, JobId, JobQueue, RefreshOutcome, Result,
    UpstreamTracker,
};

/// File the fake indexer writes into every directory it indexes
pub const INDEX_STAMP: &str = ".index-stamp";

#[derive(Default)]
struct IndexerState {
    calls: Mutex<Vec<PathBuf>>,
    fail: AtomicBool,
    delay: Mutex<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// Indexer that stamps the directory and records every call
#[derive(Clone, Default)]
pub struct FakeIndexer {
    state: Arc<IndexerState>,
}

impl FakeIndexer {
    pub fn calls(&self) -> Vec<PathBuf> {
        self.state.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.calls.lock().len()
    }

    pub fn set_fail(&self, fail: bool) {
        self.state.fail.store(fail, Ordering::SeqCst);
    }

    /// Make each build take at least `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock() = delay;
    }

    /// Highest number of builds ever running at the same time
    pub fn max_concurrent(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }
}

impl IndexBuilder for FakeIndexer {
    fn build(&self, path: &Path, _index_types: &[IndexType]) -> Result<IndexBuildReport> {
        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active.fetch_max(active, Ordering::SeqCst);

        let delay = *self.state.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let call = {
            let mut calls = self.state.calls.lock();
            calls.push(path.to_path_buf());
            calls.len()
        };

        let result = if self.state.fail.load(Ordering::SeqCst) {
            Err(GoldenRepoError::IndexBuildFailure {
                index_type: IndexType::Semantic.to_string(),
                message: "embedding service unavailable".to_string(),
            })
        } else {
            fs::write(path.join(INDEX_STAMP), format!("build {}", call))
                .map_err(|e| GoldenRepoError::io(path, e))
                .map(|_| IndexBuildReport::default())
        };

        self.state.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

struct UpstreamState {
    revision: Mutex<String>,
    advance: AtomicBool,
    counter: AtomicUsize,
    fail: AtomicBool,
    synced: Mutex<Vec<(PathBuf, String)>>,
}

/// Upstream whose revision is set by the test
#[derive(Clone)]
pub struct FakeUpstream {
    state: Arc<UpstreamState>,
}

impl FakeUpstream {
    pub fn new(revision: &str) -> Self {
        Self {
            state: Arc::new(UpstreamState {
                revision: Mutex::new(revision.to_string()),
                advance: AtomicBool::new(false),
                counter: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                synced: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn set_revision(&self, revision: &str) {
        *self.state.revision.lock() = revision.to_string();
    }

    /// Report a fresh revision on every query
    pub fn set_advancing(&self, advance: bool) {
        self.state.advance.store(advance, Ordering::SeqCst);
    }

    pub fn set_fail(&self, fail: bool) {
        self.state.fail.store(fail, Ordering::SeqCst);
    }

    pub fn synced(&self) -> Vec<(PathBuf, String)> {
        self.state.synced.lock().clone()
    }
}

impl UpstreamTracker for FakeUpstream {
    fn remote_revision(&self, _master: &Path) -> Result<String> {
        if self.state.fail.load(Ordering::SeqCst) {
            return Err(GoldenRepoError::Upstream {
                message: "could not resolve host".to_string(),
            });
        }
        if self.state.advance.load(Ordering::SeqCst) {
            let n = self.state.counter.fetch_add(1, Ordering::SeqCst);
            return Ok(format!("auto-{:04}", n));
        }
        Ok(self.state.revision.lock().clone())
    }

    fn sync_to(&self, master: &Path, revision: &str) -> Result<()> {
        fs::write(master.join("REVISION"), revision).map_err(|e| GoldenRepoError::io(master, e))?;
        self.state
            .synced
            .lock()
            .push((master.to_path_buf(), revision.to_string()));
        Ok(())
    }
}

/// Clone primitive that always fails after leaving debris behind
#[derive(Clone, Copy, Default)]
pub struct FailingCloner;

impl CloneBackend for FailingCloner {
    fn clone_tree(&self, _source: &Path, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest).map_err(|e| GoldenRepoError::io(dest, e))?;
        Err(GoldenRepoError::io(
            dest,
            std::io::Error::new(std::io::ErrorKind::Other, "reflink not supported"),
        ))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

pub struct RecordedJob {
    pub id: JobId,
    pub operation_type: String,
    pub submitter: String,
    pub is_admin: bool,
    pub repo_alias: Option<String>,
    func: Option<JobFn>,
}

/// Job queue that records submissions and runs them only when asked
#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<RecordedJob>>,
    next_id: AtomicUsize,
    reject: AtomicBool,
}

impl RecordingQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Alias of every job ever submitted, in order
    pub fn submitted_aliases(&self) -> Vec<String> {
        self.jobs
            .lock()
            .iter()
            .filter_map(|j| j.repo_alias.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// (operation, submitter, is_admin) of job `id`
    pub fn metadata(&self, id: &str) -> Option<(String, String, bool)> {
        self.jobs
            .lock()
            .iter()
            .find(|j| j.id == id)
            .map(|j| (j.operation_type.clone(), j.submitter.clone(), j.is_admin))
    }

    /// Run every job not yet run, on the calling thread
    pub fn run_pending(&self) -> Vec<Result<RefreshOutcome>> {
        let funcs: Vec<JobFn> = self
            .jobs
            .lock()
            .iter_mut()
            .filter_map(|j| j.func.take())
            .collect();
        funcs.into_iter().map(|f| f()).collect()
    }
}

impl JobQueue for RecordingQueue {
    fn submit_job(
        &self,
        operation_type: &str,
        func: JobFn,
        submitter: &str,
        is_admin: bool,
        repo_alias: Option<&str>,
    ) -> Result<JobId> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(GoldenRepoError::JobQueue {
                message: "queue full".to_string(),
            });
        }
        let id = format!("job-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.jobs.lock().push(RecordedJob {
            id: id.clone(),
            operation_type: operation_type.to_string(),
            submitter: submitter.to_string(),
            is_admin,
            repo_alias: repo_alias.map(str::to_string),
            func: Some(func),
        });
        Ok(id)
    }
}
