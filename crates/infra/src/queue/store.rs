//! Queue storage abstraction and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use enrich_core::QueueEntryId;

use super::types::{DispatchFilter, FailureKind, FailureOutcome, QueueEntry, QueueStats, QueueStatus};

/// Durable queue with lease-based dispatch.
///
/// Every time-dependent operation takes `now` explicitly so the protocol can be
/// driven deterministically.
pub trait QueueStore: Send + Sync {
    /// Persist a new entry.
    fn enqueue(&self, entry: QueueEntry) -> Result<QueueEntryId, QueueStoreError>;

    fn get(&self, id: QueueEntryId) -> Result<Option<QueueEntry>, QueueStoreError>;

    /// PENDING entries matching `filter` with `scheduled_for <= now`, in dispatch order.
    fn dispatchable(
        &self,
        filter: &DispatchFilter,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, QueueStoreError>;

    /// Atomically lease one entry. `None` if it is no longer PENDING.
    fn try_claim(
        &self,
        id: QueueEntryId,
        node: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, QueueStoreError>;

    /// Lease up to `limit` dispatchable entries. Losing a race for one entry
    /// simply drops it from the result.
    fn claim_batch(
        &self,
        filter: &DispatchFilter,
        limit: usize,
        node: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, QueueStoreError> {
        let mut claimed = Vec::new();
        for candidate in self.dispatchable(filter, limit, now)? {
            if let Some(entry) = self.try_claim(candidate.id, node, lease, now)? {
                claimed.push(entry);
            }
        }
        Ok(claimed)
    }

    /// PROCESSING → COMPLETED. Requires the caller to hold the lease.
    fn complete(&self, id: QueueEntryId, node: &str, now: DateTime<Utc>) -> Result<(), QueueStoreError>;

    /// Report a failed attempt. Requires the caller to hold the lease.
    fn fail(
        &self,
        id: QueueEntryId,
        node: &str,
        error: &str,
        kind: FailureKind,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, QueueStoreError>;

    /// Push the visibility timeout to `now + lease`. Returns the new deadline.
    fn renew_lease(
        &self,
        id: QueueEntryId,
        node: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, QueueStoreError>;

    /// Return every PROCESSING entry whose lease expired to PENDING.
    fn recover_expired(&self, now: DateTime<Utc>) -> Result<usize, QueueStoreError>;

    /// Delete COMPLETED entries completed before `cutoff`.
    fn purge_completed(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueStoreError>;

    /// Delete DEAD_LETTER and FAILED entries last touched before `cutoff`.
    fn purge_failed(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueStoreError>;

    /// DEAD_LETTER and FAILED entries, most recently failed first.
    fn list_dead_letters(&self, limit: usize) -> Result<Vec<QueueEntry>, QueueStoreError>;

    /// Manually return a dead entry to PENDING with a fresh retry budget.
    fn requeue(&self, id: QueueEntryId, now: DateTime<Utc>) -> Result<QueueEntry, QueueStoreError>;

    fn stats(&self) -> Result<QueueStats, QueueStoreError>;
}

/// Queue store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueStoreError {
    #[error("queue entry not found: {0}")]
    NotFound(QueueEntryId),
    #[error("queue entry already exists: {0}")]
    AlreadyExists(QueueEntryId),
    #[error("lease on {id} is not held by {node}")]
    LeaseNotHeld { id: QueueEntryId, node: String },
    #[error("queue entry {id} is {status}")]
    InvalidState { id: QueueEntryId, status: QueueStatus },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory queue store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    entries: RwLock<HashMap<QueueEntryId, QueueEntry>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<QueueEntryId, QueueEntry>>, QueueStoreError> {
        self.entries
            .read()
            .map_err(|_| QueueStoreError::Storage("queue lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<QueueEntryId, QueueEntry>>, QueueStoreError> {
        self.entries
            .write()
            .map_err(|_| QueueStoreError::Storage("queue lock poisoned".into()))
    }
}

fn leased_entry<'a>(
    entries: &'a mut HashMap<QueueEntryId, QueueEntry>,
    id: QueueEntryId,
    node: &str,
) -> Result<&'a mut QueueEntry, QueueStoreError> {
    let entry = entries.get_mut(&id).ok_or(QueueStoreError::NotFound(id))?;
    if !entry.is_leased_by(node) {
        return Err(QueueStoreError::LeaseNotHeld {
            id,
            node: node.to_string(),
        });
    }
    Ok(entry)
}

fn sorted_dispatchable<'a>(
    entries: impl Iterator<Item = &'a QueueEntry>,
    filter: &DispatchFilter,
    limit: usize,
    now: DateTime<Utc>,
) -> Vec<QueueEntryId> {
    let mut ready: Vec<_> = entries.filter(|e| e.is_dispatchable(filter, now)).collect();
    ready.sort_by_key(|e| e.dispatch_key());
    ready.into_iter().take(limit).map(|e| e.id).collect()
}

impl QueueStore for InMemoryQueueStore {
    fn enqueue(&self, entry: QueueEntry) -> Result<QueueEntryId, QueueStoreError> {
        let mut entries = self.write()?;
        if entries.contains_key(&entry.id) {
            return Err(QueueStoreError::AlreadyExists(entry.id));
        }
        let id = entry.id;
        entries.insert(id, entry);
        Ok(id)
    }

    fn get(&self, id: QueueEntryId) -> Result<Option<QueueEntry>, QueueStoreError> {
        Ok(self.read()?.get(&id).cloned())
    }

    fn dispatchable(
        &self,
        filter: &DispatchFilter,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, QueueStoreError> {
        let entries = self.read()?;
        Ok(sorted_dispatchable(entries.values(), filter, limit, now)
            .into_iter()
            .filter_map(|id| entries.get(&id).cloned())
            .collect())
    }

    fn try_claim(
        &self,
        id: QueueEntryId,
        node: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, QueueStoreError> {
        let mut entries = self.write()?;
        match entries.get_mut(&id) {
            Some(entry) if entry.status == QueueStatus::Pending => {
                entry.mark_leased(node, lease, now);
                Ok(Some(entry.clone()))
            }
            Some(_) => Ok(None),
            None => Err(QueueStoreError::NotFound(id)),
        }
    }

    fn claim_batch(
        &self,
        filter: &DispatchFilter,
        limit: usize,
        node: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, QueueStoreError> {
        // Select and lease under one write lock.
        let mut entries = self.write()?;
        let ids = sorted_dispatchable(entries.values(), filter, limit, now);

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = entries.get_mut(&id) {
                entry.mark_leased(node, lease, now);
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    fn complete(&self, id: QueueEntryId, node: &str, now: DateTime<Utc>) -> Result<(), QueueStoreError> {
        let mut entries = self.write()?;
        leased_entry(&mut entries, id, node)?.mark_completed(now);
        Ok(())
    }

    fn fail(
        &self,
        id: QueueEntryId,
        node: &str,
        error: &str,
        kind: FailureKind,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, QueueStoreError> {
        let mut entries = self.write()?;
        Ok(leased_entry(&mut entries, id, node)?.mark_failed(error, kind, now))
    }

    fn renew_lease(
        &self,
        id: QueueEntryId,
        node: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, QueueStoreError> {
        let mut entries = self.write()?;
        let entry = leased_entry(&mut entries, id, node)?;
        entry.extend_lease(lease, now);
        Ok(entry.visibility_timeout_until.unwrap_or(now))
    }

    fn recover_expired(&self, now: DateTime<Utc>) -> Result<usize, QueueStoreError> {
        let mut entries = self.write()?;
        let mut recovered = 0;
        for entry in entries.values_mut().filter(|e| e.lease_expired(now)) {
            entry.release_expired(now);
            recovered += 1;
        }
        Ok(recovered)
    }

    fn purge_completed(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueStoreError> {
        let mut entries = self.write()?;
        let before = entries.len();
        entries.retain(|_, e| !(e.status == QueueStatus::Completed && e.completed_at.is_some_and(|at| at < cutoff)));
        Ok(before - entries.len())
    }

    fn purge_failed(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueStoreError> {
        let mut entries = self.write()?;
        let before = entries.len();
        entries.retain(|_, e| !(e.status.is_dead() && e.updated_at < cutoff));
        Ok(before - entries.len())
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<QueueEntry>, QueueStoreError> {
        let entries = self.read()?;
        let mut dead: Vec<_> = entries.values().filter(|e| e.status.is_dead()).cloned().collect();
        dead.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        dead.truncate(limit);
        Ok(dead)
    }

    fn requeue(&self, id: QueueEntryId, now: DateTime<Utc>) -> Result<QueueEntry, QueueStoreError> {
        let mut entries = self.write()?;
        let entry = entries.get_mut(&id).ok_or(QueueStoreError::NotFound(id))?;
        if !entry.status.is_dead() {
            return Err(QueueStoreError::InvalidState {
                id,
                status: entry.status,
            });
        }
        entry.requeue(now);
        Ok(entry.clone())
    }

    fn stats(&self) -> Result<QueueStats, QueueStoreError> {
        let entries = self.read()?;
        let mut stats = QueueStats::default();
        for entry in entries.values() {
            stats.record(entry.status, 1);
        }
        Ok(stats)
    }
}

impl<S: QueueStore + ?Sized> QueueStore for Arc<S> {
    fn enqueue(&self, entry: QueueEntry) -> Result<QueueEntryId, QueueStoreError> {
        (**self).enqueue(entry)
    }

    fn get(&self, id: QueueEntryId) -> Result<Option<QueueEntry>, QueueStoreError> {
        (**self).get(id)
    }

    fn dispatchable(
        &self,
        filter: &DispatchFilter,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, QueueStoreError> {
        (**self).dispatchable(filter, limit, now)
    }

    fn try_claim(
        &self,
        id: QueueEntryId,
        node: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, QueueStoreError> {
        (**self).try_claim(id, node, lease, now)
    }

    fn claim_batch(
        &self,
        filter: &DispatchFilter,
        limit: usize,
        node: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, QueueStoreError> {
        (**self).claim_batch(filter, limit, node, lease, now)
    }

    fn complete(&self, id: QueueEntryId, node: &str, now: DateTime<Utc>) -> Result<(), QueueStoreError> {
        (**self).complete(id, node, now)
    }

    fn fail(
        &self,
        id: QueueEntryId,
        node: &str,
        error: &str,
        kind: FailureKind,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, QueueStoreError> {
        (**self).fail(id, node, error, kind, now)
    }

    fn renew_lease(
        &self,
        id: QueueEntryId,
        node: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, QueueStoreError> {
        (**self).renew_lease(id, node, lease, now)
    }

    fn recover_expired(&self, now: DateTime<Utc>) -> Result<usize, QueueStoreError> {
        (**self).recover_expired(now)
    }

    fn purge_completed(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueStoreError> {
        (**self).purge_completed(cutoff)
    }

    fn purge_failed(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueStoreError> {
        (**self).purge_failed(cutoff)
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<QueueEntry>, QueueStoreError> {
        (**self).list_dead_letters(limit)
    }

    fn requeue(&self, id: QueueEntryId, now: DateTime<Utc>) -> Result<QueueEntry, QueueStoreError> {
        (**self).requeue(id, now)
    }

    fn stats(&self) -> Result<QueueStats, QueueStoreError> {
        (**self).stats()
    }
}
