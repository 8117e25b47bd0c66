//! Registry of in-flight source workers.
//!
//! Workers register themselves when they start connecting and are removed
//! when their [`ActiveWorkerGuard`] drops, whatever the outcome. The
//! progress reporter only ever reads snapshots.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use fleet_query_fetch_models::{ActiveWorkerState, ProgressSnapshot, WorkerPhase};

/// Shared map of in-flight workers keyed by worker id.
#[derive(Debug, Default)]
pub struct ActiveWorkers {
    workers: Mutex<BTreeMap<String, ActiveWorkerState>>,
}

impl ActiveWorkers {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Worker id under which `source_id` is tracked.
    #[must_use]
    pub fn worker_id(source_id: &str) -> String {
        format!("Worker-{source_id}")
    }

    /// Registers `source_id` in the [`WorkerPhase::Connecting`] phase.
    ///
    /// The entry lives until the returned guard is dropped.
    #[must_use]
    pub fn register(self: &Arc<Self>, source_id: &str) -> ActiveWorkerGuard {
        let worker_id = Self::worker_id(source_id);
        self.lock().insert(
            worker_id.clone(),
            ActiveWorkerState {
                source_id: source_id.to_string(),
                phase: WorkerPhase::Connecting,
                started_at: Utc::now(),
            },
        );
        ActiveWorkerGuard {
            workers: Arc::clone(self),
            worker_id,
        }
    }

    /// Number of workers currently in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no worker is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copies the current state into a [`ProgressSnapshot`].
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        let threads = self.lock().clone();
        ProgressSnapshot {
            timestamp: Utc::now(),
            active_threads: threads.len(),
            threads,
        }
    }

    // Poisoning is ignored; the map only feeds the progress file.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ActiveWorkerState>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a worker registered in [`ActiveWorkers`] until dropped.
#[derive(Debug)]
pub struct ActiveWorkerGuard {
    workers: Arc<ActiveWorkers>,
    worker_id: String,
}

impl ActiveWorkerGuard {
    /// Moves the worker to `phase`.
    pub fn set_phase(&self, phase: WorkerPhase) {
        if let Some(state) = self.workers.lock().get_mut(&self.worker_id) {
            state.phase = phase;
        }
    }
}

impl Drop for ActiveWorkerGuard {
    fn drop(&mut self) {
        self.workers.lock().remove(&self.worker_id);
    }
}
