//! Queue worker: lease, execute, report.

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use enrich_ai::{EnrichmentCapabilities, EntityConfigRegistry, execute_plan};
use enrich_core::Strategy;

use super::WorkerHandle;
use crate::queue::{BackoffPolicy, DispatchFilter, FailureKind, FailureOutcome, QueueEntry, QueueStore, QueueStoreError};

/// Queue worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Claimant identity written to `processing_node`
    pub node: String,
    /// Sleep between polls when nothing was claimed
    pub poll_interval: Duration,
    /// Entries leased per poll
    pub batch_size: usize,
    /// Visibility timeout applied on claim
    pub lease_duration: Duration,
    /// Strategy pool this worker serves (`None` = any)
    pub strategy: Option<Strategy>,
    pub backoff: BackoffPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            node: format!("worker-{}", uuid::Uuid::now_v7()),
            poll_interval: Duration::from_millis(500),
            batch_size: 10,
            lease_duration: Duration::from_secs(300),
            strategy: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_lease(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn filter(&self) -> DispatchFilter {
        DispatchFilter {
            strategy: self.strategy,
        }
    }
}

/// Result of one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub failed: usize,
    /// Entries whose lease was reclaimed before we reported
    pub lease_lost: usize,
    /// Entries left unreported because the store rejected the report
    pub store_errors: usize,
}

impl BatchReport {
    pub fn is_empty(&self) -> bool {
        self.claimed == 0
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub batches: u64,
    pub entries_processed: u64,
    pub completed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub failed: u64,
    pub lease_lost: u64,
    pub store_errors: u64,
    pub uptime_secs: u64,
}

impl WorkerStats {
    fn absorb(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.entries_processed += report.claimed as u64;
        self.completed += report.completed as u64;
        self.retried += report.retried as u64;
        self.dead_lettered += report.dead_lettered as u64;
        self.failed += report.failed as u64;
        self.lease_lost += report.lease_lost as u64;
        self.store_errors += report.store_errors as u64;
    }
}

/// Time source used to stamp completion and failure reports.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Leases entries from a [`QueueStore`] and runs their action plans against
/// the capabilities.
///
/// Capability operations must be idempotent: an entry whose lease expires
/// mid-run is handed to another worker.
pub struct QueueWorker<S, C> {
    store: S,
    capabilities: C,
    configs: Arc<EntityConfigRegistry>,
    config: WorkerConfig,
    clock: Clock,
}

impl<S, C> QueueWorker<S, C>
where
    S: QueueStore,
    C: EnrichmentCapabilities,
{
    pub fn new(store: S, capabilities: C, configs: Arc<EntityConfigRegistry>, config: WorkerConfig) -> Self {
        Self {
            store,
            capabilities,
            configs,
            config,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock used for completion and failure timestamps.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Claim one batch at `now` and process it.
    ///
    /// Each completion or failure is stamped when it is reported, never
    /// earlier than `now`, so retry backoff counts from the failed attempt.
    /// A store error on one entry is logged and counted; the rest of the
    /// batch still runs. Only a failed claim is returned as an error.
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<BatchReport, QueueStoreError> {
        let claimed = self.store.claim_batch(
            &self.config.filter(),
            self.config.batch_size,
            &self.config.node,
            self.config.lease_duration,
            now,
        )?;

        let mut report = BatchReport {
            claimed: claimed.len(),
            ..BatchReport::default()
        };

        for entry in &claimed {
            debug!(
                node = %self.config.node,
                entry_id = %entry.id,
                entity_type = %entry.entity_type,
                entity_id = %entry.entity_id,
                "claimed entry"
            );
            self.process(entry, now, &mut report);
        }

        Ok(report)
    }

    fn reported_at(&self, claimed_at: DateTime<Utc>) -> DateTime<Utc> {
        (self.clock)().max(claimed_at)
    }

    fn process(&self, entry: &QueueEntry, claimed_at: DateTime<Utc>, report: &mut BatchReport) {
        let config = self.configs.resolve(&entry.entity_type);
        let node = self.config.node.as_str();

        let error = match execute_plan(&self.capabilities, &entry.document(), &config, &entry.action_plan) {
            Ok(_) => {
                match self.store.complete(entry.id, node, self.reported_at(claimed_at)) {
                    Ok(()) => {
                        debug!(node, entry_id = %entry.id, "entry completed");
                        report.completed += 1;
                    }
                    Err(QueueStoreError::LeaseNotHeld { .. }) => self.lease_lost(entry, report),
                    Err(e) => self.store_error(entry, &e, report),
                }
                return;
            }
            Err(error) => error,
        };

        let kind = if error.is_retryable() {
            FailureKind::Transient {
                backoff: self.config.backoff.delay_for_attempt(entry.retry_count + 1),
            }
        } else {
            FailureKind::Permanent
        };

        match self
            .store
            .fail(entry.id, node, &error.to_string(), kind, self.reported_at(claimed_at))
        {
            Ok(FailureOutcome::Retrying {
                retry_count,
                scheduled_for,
            }) => {
                info!(
                    entry_id = %entry.id,
                    retry_count,
                    scheduled_for = %scheduled_for,
                    error = %error,
                    "enrichment retry scheduled"
                );
                report.retried += 1;
            }
            Ok(FailureOutcome::DeadLettered { retry_count }) => {
                warn!(entry_id = %entry.id, retry_count, error = %error, "entry dead-lettered");
                report.dead_lettered += 1;
            }
            Ok(FailureOutcome::Failed { retry_count }) => {
                warn!(entry_id = %entry.id, retry_count, error = %error, "entry failed permanently");
                report.failed += 1;
            }
            Err(QueueStoreError::LeaseNotHeld { .. }) => self.lease_lost(entry, report),
            Err(e) => self.store_error(entry, &e, report),
        }
    }

    fn store_error(&self, entry: &QueueEntry, error: &QueueStoreError, report: &mut BatchReport) {
        error!(node = %self.config.node, entry_id = %entry.id, error = %error, "failed to report entry");
        report.store_errors += 1;
    }

    fn lease_lost(&self, entry: &QueueEntry, report: &mut BatchReport) {
        warn!(node = %self.config.node, entry_id = %entry.id, "lease lost before report");
        report.lease_lost += 1;
    }
}

impl<S, C> QueueWorker<S, C>
where
    S: QueueStore + 'static,
    C: EnrichmentCapabilities + 'static,
{
    /// Spawn the worker on a background thread named after its node.
    pub fn spawn(self) -> WorkerHandle<WorkerStats> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(self.config.node.clone())
            .spawn(move || worker_loop(self, shutdown_rx, stats_clone))
            .expect("failed to spawn queue worker thread");

        WorkerHandle::new(shutdown_tx, join, stats)
    }
}

fn worker_loop<S, C>(worker: QueueWorker<S, C>, shutdown_rx: mpsc::Receiver<()>, stats: Arc<Mutex<WorkerStats>>)
where
    S: QueueStore,
    C: EnrichmentCapabilities,
{
    let node = worker.config.node.clone();
    info!(node = %node, strategy = ?worker.config.strategy, "queue worker started");
    let start_time = Instant::now();

    loop {
        let idle = match worker.run_once(Utc::now()) {
            Ok(report) => {
                let mut s = stats.lock().unwrap_or_else(|p| p.into_inner());
                s.absorb(&report);
                s.uptime_secs = start_time.elapsed().as_secs();
                report.is_empty()
            }
            Err(e) => {
                error!(node = %node, error = %e, "queue poll failed");
                stats.lock().unwrap_or_else(|p| p.into_inner()).store_errors += 1;
                true
            }
        };

        // Drain without pausing while there is work.
        let wait = if idle { worker.config.poll_interval } else { Duration::ZERO };
        match shutdown_rx.recv_timeout(wait) {
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            _ => break,
        }
    }

    info!(node = %node, "queue worker stopped");
}
