//! Background job queue for refresh work
//!
//! The scheduler only ever submits work through [`JobQueue`]; it never runs
//! a refresh on its own thread. [`WorkerPool`] is the in-process
//! implementation: a fixed set of worker threads draining a FIFO queue and
//! keeping an in-memory status record per job.
//!
//! Job records are not persisted. A panicking job is recorded as failed and
//! the worker keeps going.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};

use crate::error::{GoldenRepoError, Result};
use crate::scheduler::RefreshOutcome;

/// Opaque job identifier
pub type JobId = String;

/// Work item run on a worker thread
pub type JobFn = Box<dyn FnOnce() -> Result<RefreshOutcome> + Send + 'static>;

/// Operation type used for refresh jobs
pub const REFRESH_OPERATION: &str = "refresh_golden_repo";

/// Job submission seam
pub trait JobQueue: Send + Sync {
    fn submit_job(
        &self,
        operation_type: &str,
        func: JobFn,
        submitter: &str,
        is_admin: bool,
        repo_alias: Option<&str>,
    ) -> Result<JobId>;
}

/// Lifecycle of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded { detail: String },
    Failed { error: String },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Succeeded { .. } | JobStatus::Failed { .. })
    }
}

/// Bookkeeping for one submitted job
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub operation_type: String,
    pub submitter: String,
    pub is_admin: bool,
    pub repo_alias: Option<String>,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct QueuedJob {
    id: JobId,
    func: JobFn,
}

#[derive(Default)]
struct PoolShared {
    queue: Mutex<VecDeque<QueuedJob>>,
    available: Condvar,
    records: Mutex<HashMap<JobId, JobRecord>>,
    finished: Condvar,
    shutting_down: AtomicBool,
}

impl PoolShared {
    fn set_status(&self, id: &str, status: JobStatus) {
        let mut records = self.records.lock();
        if let Some(record) = records.get_mut(id) {
            if status.is_finished() {
                record.finished_at = Some(Utc::now());
            }
            record.status = status;
        }
        drop(records);
        self.finished.notify_all();
    }
}

/// Fixed-size thread pool implementing [`JobQueue`]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start a pool with `threads` workers (at least one)
    pub fn new(threads: usize) -> Result<Self> {
        let shared = Arc::new(PoolShared::default());
        let workers = (0..threads.max(1))
            .map(|n| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("golden-repos-worker-{}", n))
                    .spawn(move || worker_loop(shared))
                    .map_err(|e| GoldenRepoError::JobQueue {
                        message: format!("Failed to spawn worker thread: {}", e),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    pub fn job(&self, id: &str) -> Option<JobRecord> {
        self.shared.records.lock().get(id).cloned()
    }

    pub fn jobs(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.shared.records.lock().values().cloned().collect();
        jobs.sort_by_key(|j| j.submitted_at);
        jobs
    }

    /// Number of jobs waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Block until job `id` finishes or `timeout` elapses
    pub fn wait_for(&self, id: &str, timeout: Duration) -> Option<JobStatus> {
        let deadline = Instant::now() + timeout;
        let mut records = self.shared.records.lock();
        loop {
            let status = records.get(id)?.status.clone();
            if status.is_finished() {
                return Some(status);
            }
            if self.shared.finished.wait_until(&mut records, deadline).timed_out() {
                return records.get(id).map(|r| r.status.clone());
            }
        }
    }

    /// Stop accepting jobs, let queued and running jobs finish, join workers
    pub fn shutdown(&self) {
        {
            // Flip the flag under the queue lock so no worker misses the wakeup
            let _queue = self.shared.queue.lock();
            self.shared.shutting_down.store(true, Ordering::SeqCst);
        }
        self.shared.available.notify_all();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!("Worker thread terminated abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl JobQueue for WorkerPool {
    fn submit_job(
        &self,
        operation_type: &str,
        func: JobFn,
        submitter: &str,
        is_admin: bool,
        repo_alias: Option<&str>,
    ) -> Result<JobId> {
        let mut queue = self.shared.queue.lock();
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            return Err(GoldenRepoError::JobQueue {
                message: "worker pool is shutting down".to_string(),
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.shared.records.lock().insert(
            id.clone(),
            JobRecord {
                id: id.clone(),
                operation_type: operation_type.to_string(),
                submitter: submitter.to_string(),
                is_admin,
                repo_alias: repo_alias.map(str::to_string),
                status: JobStatus::Queued,
                submitted_at: Utc::now(),
                finished_at: None,
            },
        );
        queue.push_back(QueuedJob {
            id: id.clone(),
            func,
        });
        drop(queue);
        self.shared.available.notify_one();

        tracing::debug!(
            "Queued {} job {} for {:?} (submitter: {})",
            operation_type,
            id,
            repo_alias,
            submitter
        );
        Ok(id)
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    break Some(job);
                }
                if shared.shutting_down.load(Ordering::SeqCst) {
                    break None;
                }
                shared.available.wait(&mut queue);
            }
        };

        let Some(QueuedJob { id, func }) = job else {
            return;
        };

        shared.set_status(&id, JobStatus::Running);
        let status = match catch_unwind(AssertUnwindSafe(func)) {
            Ok(Ok(outcome)) => JobStatus::Succeeded {
                detail: outcome.detail,
            },
            Ok(Err(e)) => {
                tracing::error!("Job {} failed: {}", id, e);
                JobStatus::Failed {
                    error: e.to_string(),
                }
            }
            Err(_) => {
                tracing::error!("Job {} panicked", id);
                JobStatus::Failed {
                    error: "job panicked".to_string(),
                }
            }
        };
        shared.set_status(&id, status);
    }
}
