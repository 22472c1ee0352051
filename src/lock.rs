//! Per-alias write locks
//!
//! Refresh jobs and any other writer that mutates a golden repo's content
//! (manual edits, re-registration, admin tooling) go through the same
//! [`WriteLockCoordinator`], so a refresh never races another write on the
//! same alias.
//!
//! Uses `parking_lot` (no poisoning). A waiter blocks on a condvar until the
//! alias is released or its timeout elapses.
//!
//! Prefer [`WriteLockCoordinator::lock`], whose guard releases on every exit
//! path including `?` and panics. `acquire`/`release` are the raw pair for
//! callers that cannot hold a guard across their critical section.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};

use crate::error::{GoldenRepoError, Result};

/// Who holds an alias's write lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    /// Free-form owner label (`refresh`, `admin:alice`, ...)
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
}

/// Coordinator handing out per-alias exclusive write locks
#[derive(Default)]
pub struct WriteLockCoordinator {
    held: Mutex<HashMap<String, LockHolder>>,
    released: Condvar,
}

impl WriteLockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock for `alias`, waiting at most `timeout`.
    ///
    /// Returns `false` on timeout. A zero timeout is a single non-blocking attempt.
    pub fn acquire(&self, alias: &str, owner: &str, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut held = self.held.lock();

        while held.contains_key(alias) {
            let Some(deadline) = deadline else {
                self.released.wait(&mut held);
                continue;
            };
            if self.released.wait_until(&mut held, deadline).timed_out() {
                if held.contains_key(alias) {
                    tracing::debug!(
                        "Write lock on {} still held by {:?} after {:?}",
                        alias,
                        held.get(alias).map(|h| h.owner.as_str()),
                        timeout
                    );
                    return false;
                }
                break;
            }
        }

        held.insert(
            alias.to_string(),
            LockHolder {
                owner: owner.to_string(),
                acquired_at: Utc::now(),
            },
        );
        true
    }

    /// Release the lock for `alias`. Returns whether it was held.
    pub fn release(&self, alias: &str) -> bool {
        let was_held = self.held.lock().remove(alias).is_some();
        if was_held {
            self.released.notify_all();
        } else {
            tracing::warn!("Release of write lock on {} which was not held", alias);
        }
        was_held
    }

    /// Take the lock for `alias` and return a guard releasing it on drop.
    pub fn lock(&self, alias: &str, owner: &str, timeout: Duration) -> Result<WriteLockGuard<'_>> {
        if self.acquire(alias, owner, timeout) {
            Ok(WriteLockGuard {
                coordinator: self,
                alias: alias.to_string(),
            })
        } else {
            Err(GoldenRepoError::LockTimeout {
                alias: alias.to_string(),
            })
        }
    }

    /// Run `f` while holding the write lock for `alias`
    pub fn with_write_lock<T>(
        &self,
        alias: &str,
        owner: &str,
        timeout: Duration,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let _guard = self.lock(alias, owner, timeout)?;
        f()
    }

    pub fn is_locked(&self, alias: &str) -> bool {
        self.held.lock().contains_key(alias)
    }

    /// Current holder of `alias`, if any
    pub fn holder(&self, alias: &str) -> Option<LockHolder> {
        self.held.lock().get(alias).cloned()
    }

    /// Aliases currently locked
    pub fn locked_aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.held.lock().keys().cloned().collect();
        aliases.sort();
        aliases
    }
}

/// RAII guard for a held alias write lock
pub struct WriteLockGuard<'a> {
    coordinator: &'a WriteLockCoordinator,
    alias: String,
}

impl WriteLockGuard<'_> {
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

impl Drop for WriteLockGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.release(&self.alias);
    }
}
