//! Background loops driving the enrichment queue.
//!
//! - [`QueueWorker`] leases entries and runs their action plans.
//! - [`MaintenanceRunner`] reclaims expired leases and applies retention.
//!
//! Any number of workers may poll the same store; the store's conditional
//! transitions keep them from stepping on each other.

pub mod maintenance;
pub mod queue_worker;

use std::sync::{Arc, Mutex, mpsc};
use std::thread;

pub use maintenance::{MaintenanceConfig, MaintenanceReport, MaintenanceRunner, MaintenanceStats, run_maintenance};
pub use queue_worker::{BatchReport, Clock, QueueWorker, WorkerConfig, WorkerStats};

/// Handle to control and join a background loop.
#[derive(Debug)]
pub struct WorkerHandle<T> {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<T>>,
}

impl<T: Clone> WorkerHandle<T> {
    pub(crate) fn new(shutdown: mpsc::Sender<()>, join: thread::JoinHandle<()>, stats: Arc<Mutex<T>>) -> Self {
        Self {
            shutdown,
            join: Some(join),
            stats,
        }
    }

    /// Request graceful shutdown and wait for the loop to stop.
    ///
    /// An in-flight batch is finished first.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    /// Snapshot of the loop's counters.
    pub fn stats(&self) -> T {
        self.stats.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}
