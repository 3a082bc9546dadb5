//! Queue entry model and retry policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use enrich_core::{
    ActionPlan, ConfigError, EntityDocument, Operation, PriorityWeight, QueueEntryId, Strategy, priority_weight,
};

/// Lease state of a queue entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    /// Waiting to be claimed
    Pending,
    /// Leased by a worker
    Processing,
    /// Finished successfully
    Completed,
    /// Permanently failed (non-retryable error)
    Failed,
    /// Retry budget exhausted
    DeadLetter,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "PENDING",
            QueueStatus::Processing => "PROCESSING",
            QueueStatus::Completed => "COMPLETED",
            QueueStatus::Failed => "FAILED",
            QueueStatus::DeadLetter => "DEAD_LETTER",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed | QueueStatus::DeadLetter)
    }

    /// Terminal failure states kept around for inspection.
    pub fn is_dead(&self) -> bool {
        matches!(self, QueueStatus::Failed | QueueStatus::DeadLetter)
    }
}

impl core::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for QueueStatus {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(QueueStatus::Pending),
            "PROCESSING" => Ok(QueueStatus::Processing),
            "COMPLETED" => Ok(QueueStatus::Completed),
            "FAILED" => Ok(QueueStatus::Failed),
            "DEAD_LETTER" => Ok(QueueStatus::DeadLetter),
            _ => Err(ConfigError::invalid("queue status", s)),
        }
    }
}

/// Backoff curve between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every time
    Fixed,
    /// base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// base * attempt
    Linear,
}

/// Delay applied to `scheduled_for` when a failed entry goes back to PENDING.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    /// Upper bound for any computed delay
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Retry immediately.
    pub fn immediate() -> Self {
        Self::fixed(Duration::ZERO)
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Delay before retry number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => base_ms * 2_f64.powi((attempt - 1) as i32),
            BackoffStrategy::Linear => base_ms * attempt as f64,
        }
        .min(max_ms);

        // Deterministic spread so entries failing together don't retry in lockstep.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let spread = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (spread - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).clamp(0.0, max_ms) as u64)
    }
}

/// Kind of failure a worker reports for a leased entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Retry after `backoff` while the retry budget lasts.
    Transient { backoff: Duration },
    /// Never retry.
    Permanent,
}

impl FailureKind {
    pub fn retry_now() -> Self {
        Self::Transient { backoff: Duration::ZERO }
    }
}

/// What a reported failure did to the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to PENDING; dispatchable again from `scheduled_for`.
    Retrying {
        retry_count: u32,
        scheduled_for: DateTime<Utc>,
    },
    /// Retry budget exhausted.
    DeadLettered { retry_count: u32 },
    /// Permanent failure.
    Failed { retry_count: u32 },
}

/// Selects which entries a worker pool is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchFilter {
    /// `None` = any strategy.
    pub strategy: Option<Strategy>,
}

impl DispatchFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn only(strategy: Strategy) -> Self {
        Self {
            strategy: Some(strategy),
        }
    }

    pub fn matches(&self, entry: &QueueEntry) -> bool {
        self.strategy.is_none_or(|s| s == entry.strategy)
    }
}

/// Entry counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead_letter: usize,
}

impl QueueStats {
    pub fn record(&mut self, status: QueueStatus, count: usize) {
        match status {
            QueueStatus::Pending => self.pending += count,
            QueueStatus::Processing => self.processing += count,
            QueueStatus::Completed => self.completed += count,
            QueueStatus::Failed => self.failed += count,
            QueueStatus::DeadLetter => self.dead_letter += count,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed + self.dead_letter
    }
}

/// The durable unit of deferred enrichment work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueEntryId,

    pub entity_type: String,
    pub entity_id: String,
    /// Class/kind tag of the entity
    pub entity_kind: String,
    pub operation: Operation,
    /// Resolved strategy (never `Sync`)
    pub strategy: Strategy,
    pub action_plan: ActionPlan,
    /// Serialized entity snapshot
    pub payload: JsonValue,

    pub requested_at: DateTime<Utc>,
    /// Not dispatched before this instant
    pub scheduled_for: DateTime<Utc>,
    pub priority_weight: PriorityWeight,

    pub status: QueueStatus,
    pub processing_node: Option<String>,
    pub visibility_timeout_until: Option<DateTime<Utc>>,

    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,

    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Build a fresh PENDING entry, dispatchable from `now`.
    pub fn new(
        document: EntityDocument,
        operation: Operation,
        strategy: Strategy,
        action_plan: ActionPlan,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: QueueEntryId::new(),
            entity_type: document.entity_type,
            entity_id: document.entity_id,
            entity_kind: document.kind,
            operation,
            strategy,
            action_plan,
            payload: document.payload,
            requested_at: now,
            scheduled_for: now,
            priority_weight: priority_weight(strategy),
            status: QueueStatus::Pending,
            processing_node: None,
            visibility_timeout_until: None,
            retry_count: 0,
            max_retries,
            last_error: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Delay the first dispatch.
    pub fn not_before(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = at;
        self
    }

    /// Rebuild the document capabilities operate on.
    pub fn document(&self) -> EntityDocument {
        EntityDocument::new(
            self.entity_type.clone(),
            self.entity_id.clone(),
            self.entity_kind.clone(),
            self.payload.clone(),
        )
    }

    pub fn is_dispatchable(&self, filter: &DispatchFilter, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending && self.scheduled_for <= now && filter.matches(self)
    }

    /// Dispatch order: priority first, FIFO within a priority tier.
    pub fn dispatch_key(&self) -> (PriorityWeight, DateTime<Utc>, QueueEntryId) {
        (self.priority_weight, self.requested_at, self.id)
    }

    pub fn is_leased_by(&self, node: &str) -> bool {
        self.status == QueueStatus::Processing && self.processing_node.as_deref() == Some(node)
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Processing && self.visibility_timeout_until.is_some_and(|until| until <= now)
    }

    /// PENDING → PROCESSING.
    pub fn mark_leased(&mut self, node: &str, lease: Duration, now: DateTime<Utc>) {
        self.status = QueueStatus::Processing;
        self.processing_node = Some(node.to_string());
        self.visibility_timeout_until = Some(after(now, lease));
        self.updated_at = now;
    }

    pub fn extend_lease(&mut self, lease: Duration, now: DateTime<Utc>) {
        self.visibility_timeout_until = Some(after(now, lease));
        self.updated_at = now;
    }

    /// PROCESSING → COMPLETED.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = QueueStatus::Completed;
        self.completed_at = Some(now);
        self.clear_lease();
        self.updated_at = now;
    }

    /// PROCESSING → PENDING | DEAD_LETTER | FAILED.
    pub fn mark_failed(&mut self, error: &str, kind: FailureKind, now: DateTime<Utc>) -> FailureOutcome {
        self.retry_count += 1;
        self.last_error = Some(error.to_string());
        self.clear_lease();
        self.updated_at = now;

        match kind {
            FailureKind::Permanent => {
                self.status = QueueStatus::Failed;
                FailureOutcome::Failed {
                    retry_count: self.retry_count,
                }
            }
            FailureKind::Transient { .. } if self.retry_count >= self.max_retries => {
                self.status = QueueStatus::DeadLetter;
                FailureOutcome::DeadLettered {
                    retry_count: self.retry_count,
                }
            }
            FailureKind::Transient { backoff } => {
                self.status = QueueStatus::Pending;
                self.scheduled_for = after(now, backoff);
                FailureOutcome::Retrying {
                    retry_count: self.retry_count,
                    scheduled_for: self.scheduled_for,
                }
            }
        }
    }

    /// Expired lease: PROCESSING → PENDING, counting the lost attempt.
    pub fn release_expired(&mut self, now: DateTime<Utc>) {
        self.status = QueueStatus::Pending;
        self.retry_count += 1;
        self.clear_lease();
        self.updated_at = now;
    }

    /// DEAD_LETTER | FAILED → PENDING with a fresh retry budget.
    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.status = QueueStatus::Pending;
        self.retry_count = 0;
        self.scheduled_for = now;
        self.completed_at = None;
        self.clear_lease();
        self.updated_at = now;
    }

    fn clear_lease(&mut self) {
        self.processing_node = None;
        self.visibility_timeout_until = None;
    }
}

/// Durations past chrono's range saturate instead of wrapping to zero.
fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// `now + d`, clamped to the latest representable instant.
pub(crate) fn after(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    now.checked_add_signed(to_chrono(d)).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `now - d`, clamped to the earliest representable instant.
pub(crate) fn before(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(to_chrono(d)).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
