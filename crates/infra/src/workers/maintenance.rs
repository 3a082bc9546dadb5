//! Crash-recovery sweep and retention purge.
//!
//! Runs independently of any queue worker, so an entry leased by a worker that
//! died is still returned to PENDING once its visibility timeout passes.

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{error, info};

use super::WorkerHandle;
use crate::queue::types::before;
use crate::queue::{QueueStore, QueueStoreError};

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// How long COMPLETED entries are kept
    pub completed_retention: Duration,
    /// How long DEAD_LETTER/FAILED entries are kept
    pub failed_retention: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            completed_retention: Duration::from_secs(24 * 60 * 60),
            failed_retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub recovered: usize,
    pub purged_completed: usize,
    pub purged_failed: usize,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MaintenanceStats {
    pub runs: u64,
    pub recovered: u64,
    pub purged_completed: u64,
    pub purged_failed: u64,
    pub store_errors: u64,
}

/// One sweep: reclaim expired leases, then purge by retention window.
pub fn run_maintenance<S>(
    store: &S,
    config: &MaintenanceConfig,
    now: DateTime<Utc>,
) -> Result<MaintenanceReport, QueueStoreError>
where
    S: QueueStore + ?Sized,
{
    let recovered = store.recover_expired(now)?;
    if recovered > 0 {
        info!(recovered, "reclaimed expired leases");
    }

    let purged_completed = store.purge_completed(before(now, config.completed_retention))?;
    let purged_failed = store.purge_failed(before(now, config.failed_retention))?;
    if purged_completed > 0 || purged_failed > 0 {
        info!(purged_completed, purged_failed, "purged expired queue entries");
    }

    Ok(MaintenanceReport {
        recovered,
        purged_completed,
        purged_failed,
    })
}

/// Periodic driver for [`run_maintenance`].
pub struct MaintenanceRunner<S> {
    store: S,
    config: MaintenanceConfig,
}

impl<S: QueueStore> MaintenanceRunner<S> {
    pub fn new(store: S, config: MaintenanceConfig) -> Self {
        Self { store, config }
    }

    pub fn run_once(&self, now: DateTime<Utc>) -> Result<MaintenanceReport, QueueStoreError> {
        run_maintenance(&self.store, &self.config, now)
    }
}

impl<S: QueueStore + 'static> MaintenanceRunner<S> {
    /// Sweep immediately, then every `interval` until shut down.
    pub fn spawn(self, name: &str) -> WorkerHandle<MaintenanceStats> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(MaintenanceStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || runner_loop(self, shutdown_rx, stats_clone))
            .expect("failed to spawn maintenance thread");

        WorkerHandle::new(shutdown_tx, join, stats)
    }
}

fn runner_loop<S: QueueStore>(
    runner: MaintenanceRunner<S>,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<MaintenanceStats>>,
) {
    info!(interval_ms = runner.config.interval.as_millis() as u64, "maintenance runner started");
    let mut next_tick = Instant::now();

    loop {
        match runner.run_once(Utc::now()) {
            Ok(report) => {
                let mut s = stats.lock().unwrap_or_else(|p| p.into_inner());
                s.runs += 1;
                s.recovered += report.recovered as u64;
                s.purged_completed += report.purged_completed as u64;
                s.purged_failed += report.purged_failed as u64;
            }
            Err(e) => {
                error!(error = %e, "maintenance sweep failed");
                stats.lock().unwrap_or_else(|p| p.into_inner()).store_errors += 1;
            }
        }

        // Keep a stable cadence even if a sweep ran long.
        let now = Instant::now();
        while next_tick <= now {
            next_tick += runner.config.interval.max(Duration::from_millis(1));
        }

        match shutdown_rx.recv_timeout(next_tick.saturating_duration_since(Instant::now())) {
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            _ => break,
        }
    }

    info!("maintenance runner stopped");
}
