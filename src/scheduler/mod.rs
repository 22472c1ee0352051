//! Refresh scheduling for golden repos
//!
//! One long-lived thread wakes on a cancellable [`Ticker`], enumerates the
//! registry and submits a refresh job per remote repo. It never runs a
//! refresh itself: job bodies ([`RefreshContext::refresh_repo`]) execute on
//! the [`JobQueue`]'s workers. Local repos are skipped by the loop and only
//! refreshed through an explicit trigger.
//!
//! # Lifecycle
//!
//! ```text
//! reconcile_golden_repos()   restore missing masters
//! start()                    spawn the loop, tick immediately
//!   run_tick()               one cycle, returns a TickReport
//!   Ticker::wait(interval)   interval re-read every cycle
//! stop()                     cancel, loop wakes and exits
//! ```

mod outcome;
mod reconcile;
mod refresh;
mod ticker;

pub use outcome::{
    ErrorPolicy, ReconcileReport, RefreshOutcome, RefreshStatus, SchedulerStats, StatsSnapshot,
    TickReport,
};
pub use reconcile::RECONCILE_OWNER;
pub use refresh::{RefreshContext, RefreshSettings, REFRESH_OWNER};
pub use ticker::{CancelSignal, Tick, Ticker};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::config::RefreshIntervalSource;
use crate::error::{GoldenRepoError, Result};
use crate::jobs::{JobId, JobQueue, REFRESH_OPERATION};
use crate::registry::GlobalRepoRecord;

/// Submitter recorded on scheduled jobs
pub const SYSTEM_SUBMITTER: &str = "system";

type InFlight = Arc<Mutex<HashMap<String, usize>>>;

/// Counts a job against its alias until the job closure is dropped
struct InFlightGuard {
    in_flight: InFlight,
    alias: String,
}

impl InFlightGuard {
    fn new(in_flight: &InFlight, alias: &str) -> Self {
        *in_flight.lock().entry(alias.to_string()).or_insert(0) += 1;
        Self {
            in_flight: Arc::clone(in_flight),
            alias: alias.to_string(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        if let Some(count) = in_flight.get_mut(&self.alias) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                in_flight.remove(&self.alias);
            }
        }
    }
}

/// Periodic and on-demand refresh of registered golden repos
pub struct RefreshScheduler {
    context: Arc<RefreshContext>,
    queue: Option<Arc<dyn JobQueue>>,
    interval: Arc<dyn RefreshIntervalSource>,
    policy: ErrorPolicy,
    in_flight: InFlight,
    stats: SchedulerStats,
    /// Replaced on every `start`, so a stopped scheduler can run again
    cancel: Mutex<CancelSignal>,
    running: AtomicBool,
}

impl RefreshScheduler {
    /// Without a queue, `run_tick` fails and explicit triggers run inline
    pub fn new(
        context: Arc<RefreshContext>,
        queue: Option<Arc<dyn JobQueue>>,
        interval: Arc<dyn RefreshIntervalSource>,
    ) -> Self {
        Self {
            context,
            queue,
            interval,
            policy: ErrorPolicy::default(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            stats: SchedulerStats::default(),
            cancel: Mutex::new(CancelSignal::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn context(&self) -> &Arc<RefreshContext> {
        &self.context
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether a job for `alias` is queued or running
    pub fn is_pending(&self, alias: &str) -> bool {
        self.in_flight.lock().contains_key(alias)
    }

    fn require_queue(&self) -> Result<&Arc<dyn JobQueue>> {
        self.queue.as_ref().ok_or_else(|| GoldenRepoError::JobQueue {
            message: "no job queue configured".to_string(),
        })
    }

    fn submit(
        &self,
        queue: &Arc<dyn JobQueue>,
        record: GlobalRepoRecord,
        submitter: &str,
        is_admin: bool,
    ) -> Result<JobId> {
        let alias = record.alias.clone();
        let guard = InFlightGuard::new(&self.in_flight, &alias);
        let context = Arc::clone(&self.context);

        // A rejected submission drops the closure, and the guard with it
        let id = queue.submit_job(
            REFRESH_OPERATION,
            Box::new(move || {
                let _guard = guard;
                context.refresh_repo(&record)
            }),
            submitter,
            is_admin,
            Some(alias.as_str()),
        )?;
        self.stats.record_submission();
        Ok(id)
    }

    /// One scheduled cycle: classify every registered repo, submit remote ones
    pub fn run_tick(&self) -> Result<TickReport> {
        let queue = self.require_queue()?;
        let mut report = TickReport::default();

        for record in self.context.registry.list_global_repos()? {
            let alias = record.alias.clone();

            if !record.kind().is_remote() {
                tracing::info!(
                    "Skipping scheduled refresh of local repo {} ({})",
                    alias,
                    record.origin.as_deref().unwrap_or("no origin")
                );
                report.skipped_local.push(alias);
                continue;
            }

            if self.is_pending(&alias) {
                tracing::debug!("Refresh of {} still pending, not resubmitting", alias);
                report.already_pending.push(alias);
                continue;
            }

            match self.submit(queue, record, SYSTEM_SUBMITTER, true) {
                Ok(id) => report.submitted.push((alias, id)),
                Err(e) => {
                    tracing::error!("Failed to submit refresh job for {}: {}", alias, e);
                    report.submit_failures.push((alias, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Run one tick and apply the error policy. Returns whether to keep looping.
    pub fn drive_tick(&self) -> bool {
        let result = self.run_tick();
        match &result {
            Ok(report) => {
                self.stats.record_tick(report);
                tracing::debug!(
                    "Refresh cycle: {} submitted, {} local skipped, {} pending, {} failed",
                    report.submitted.len(),
                    report.skipped_local.len(),
                    report.already_pending.len(),
                    report.submit_failures.len()
                );
            }
            Err(e) => {
                self.stats.record_tick_failure();
                tracing::error!("Refresh cycle failed: {}", e);
            }
        }
        self.policy.should_continue(&result)
    }

    /// Tick, then sleep for the configured interval, until stopped
    pub fn run_loop(&self) {
        let cancel = self.cancel.lock().clone();
        self.run_until(cancel);
    }

    fn run_until(&self, cancel: CancelSignal) {
        let ticker = Ticker::new(cancel.clone());
        while !cancel.is_cancelled() {
            if !self.drive_tick() {
                break;
            }
            let interval = self.interval.global_refresh_interval();
            if ticker.wait(interval) == Tick::Cancelled {
                break;
            }
        }
        tracing::info!("Refresh scheduler stopped");
    }

    /// Spawn the loop on its own thread
    pub fn start(self: &Arc<Self>) -> Result<SchedulerHandle> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(GoldenRepoError::JobQueue {
                message: "refresh scheduler already running".to_string(),
            });
        }

        let cancel = CancelSignal::new();
        *self.cancel.lock() = cancel.clone();

        let scheduler = Arc::clone(self);
        let loop_cancel = cancel.clone();
        let thread = thread::Builder::new()
            .name("golden-repos-scheduler".to_string())
            .spawn(move || {
                scheduler.run_until(loop_cancel);
                scheduler.running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                GoldenRepoError::JobQueue {
                    message: format!("Failed to spawn scheduler thread: {}", e),
                }
            })?;

        tracing::info!(
            "Refresh scheduler started (interval {:?})",
            self.interval.global_refresh_interval()
        );
        Ok(SchedulerHandle {
            cancel,
            thread: Some(thread),
        })
    }

    /// Signal the loop to exit. In-flight jobs run to completion.
    pub fn stop(&self) {
        self.cancel.lock().cancel();
    }

    /// Refresh one repo now on behalf of the system
    pub fn trigger_refresh_for_repo(&self, identifier: &str) -> Result<Option<JobId>> {
        self.trigger_refresh_for_repo_as(identifier, SYSTEM_SUBMITTER, true)
    }

    /// Refresh one repo now.
    ///
    /// Resolves bare or canonical identifiers; an unknown one fails with
    /// `NotFound` before anything is submitted. Returns the job id, or
    /// `None` when no queue is configured and the refresh ran inline.
    /// Local repos are reindexed in place.
    pub fn trigger_refresh_for_repo_as(
        &self,
        identifier: &str,
        submitter: &str,
        is_admin: bool,
    ) -> Result<Option<JobId>> {
        let record = self.context.registry.resolve_global_repo(identifier)?;

        match &self.queue {
            Some(queue) => {
                let id = self.submit(queue, record, submitter, is_admin)?;
                tracing::info!("Submitted refresh job {} for {}", id, identifier);
                Ok(Some(id))
            }
            None => {
                let outcome = self.context.refresh_repo(&record)?;
                tracing::info!("Refreshed {} inline: {}", outcome.alias, outcome.status);
                Ok(None)
            }
        }
    }

    /// Trigger each alias in turn. One failure does not stop the rest.
    pub fn trigger_refresh_for_aliases(
        &self,
        aliases: &[&str],
    ) -> Vec<(String, Result<Option<JobId>>)> {
        aliases
            .iter()
            .map(|alias| (alias.to_string(), self.trigger_refresh_for_repo(alias)))
            .collect()
    }

    pub fn reconcile_golden_repos(&self) -> Result<ReconcileReport> {
        self.context.reconcile_golden_repos()
    }

    /// Bare or canonical identifier to registered alias
    pub fn resolve_global_alias(&self, identifier: &str) -> Result<String> {
        self.context.registry.resolve_global_alias(identifier)
    }
}

/// Handle to a running scheduler loop
pub struct SchedulerHandle {
    cancel: CancelSignal,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Cancel the loop and wait for its thread to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Scheduler thread panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
