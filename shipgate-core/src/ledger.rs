//! Persisted consecutive-failure counter with advisory locking.
//!
//! The counter bounds how long validation failures can block progress: once
//! it reaches the configured maximum the gate approves and resets instead of
//! looping forever. Mutations run under an exclusive lock on a co-located
//! lock file so concurrent hook events observe a consistent
//! read-modify-write sequence.

use crate::config::GateConfig;
use fs4::fs_std::FileExt;
use std::fs::{self, File};
use std::path::PathBuf;
use tracing::warn;

/// Lock-protected retry counter. Absence of the counter file means zero.
pub struct RetryLedger {
    counter_path: PathBuf,
    lock_path: PathBuf,
    max_retries: u32,
}

impl RetryLedger {
    /// Create a ledger for the configured counter location.
    pub fn new(config: &GateConfig) -> Self {
        Self {
            counter_path: config.retry_path(),
            lock_path: config.retry_lock_path(),
            max_retries: config.max_retries,
        }
    }

    /// Raw counter read without locking.
    fn read_count(&self) -> u32 {
        fs::read_to_string(&self.counter_path)
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Run `op` under the exclusive advisory lock. If the lock cannot be
    /// acquired the operation still runs unsynchronized: losing an update
    /// under race is preferable to the gate failing closed.
    fn with_lock<T>(&self, op: impl FnOnce() -> T) -> T {
        if let Some(parent) = self.lock_path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let lock_file = match File::create(&self.lock_path) {
            Ok(file) => file,
            Err(err) => {
                warn!(%err, "retry ledger lock unavailable, running unsynchronized");
                return op();
            }
        };
        match lock_file.lock_exclusive() {
            Ok(()) => {
                let out = op();
                let _ = lock_file.unlock();
                out
            }
            Err(err) => {
                warn!(%err, "retry ledger lock failed, running unsynchronized");
                op()
            }
        }
    }

    /// Current counter value.
    pub fn get(&self) -> u32 {
        self.with_lock(|| self.read_count())
    }

    /// Increment and persist the counter, returning the new value.
    pub fn increment(&self) -> u32 {
        self.with_lock(|| {
            // Re-read inside the lock; a value read before acquisition can
            // be stale and would lose a concurrent update.
            let count = self.read_count() + 1;
            if let Some(parent) = self.counter_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Err(err) = fs::write(&self.counter_path, count.to_string()) {
                warn!(%err, "failed to persist retry count");
            }
            count
        })
    }

    /// Reset the counter by deleting the file.
    pub fn reset(&self) {
        self.with_lock(|| {
            match fs::remove_file(&self.counter_path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(%err, "failed to reset retry count"),
            }
        });
    }

    /// Whether the budget is exhausted, with the observed count.
    ///
    /// Read without the lock: a stale value only risks one extra validation
    /// attempt, which is acceptable.
    pub fn exceeded(&self) -> (bool, u32) {
        let count = self.read_count();
        (count >= self.max_retries, count)
    }
}
