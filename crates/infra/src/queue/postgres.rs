//! Postgres-backed enrichment queue.
//!
//! ## Claiming
//!
//! Batch claims run as a single statement: the candidate sub-select uses
//! `FOR UPDATE SKIP LOCKED`, so concurrent workers skip rows another
//! transaction is already leasing instead of blocking on them, and the outer
//! `UPDATE` only touches rows that are still `PENDING`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | QueueStoreError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` (enqueue only) |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed | N/A | `Storage` |
//! | Other | N/A | `Storage` |
//!
//! Rows whose enum columns can't be parsed surface as `Serialization`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::{Span, instrument};

use enrich_core::{ActionPlan, QueueEntryId};

use super::store::{QueueStore, QueueStoreError};
use super::types::{DispatchFilter, FailureKind, FailureOutcome, QueueEntry, QueueStats, QueueStatus, after};

const ENTRY_COLUMNS: &str = r#"
    id,
    entity_type,
    entity_id,
    entity_kind,
    operation,
    strategy,
    action_plan,
    payload,
    requested_at,
    scheduled_for,
    priority_weight,
    status,
    processing_node,
    visibility_timeout_until,
    retry_count,
    max_retries,
    last_error,
    completed_at,
    updated_at
"#;

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS enrichment_queue (
        id                       UUID PRIMARY KEY,
        entity_type              TEXT NOT NULL,
        entity_id                TEXT NOT NULL,
        entity_kind              TEXT NOT NULL,
        operation                TEXT NOT NULL,
        strategy                 TEXT NOT NULL,
        action_plan              JSONB NOT NULL,
        payload                  JSONB NOT NULL,
        requested_at             TIMESTAMPTZ NOT NULL,
        scheduled_for            TIMESTAMPTZ NOT NULL,
        priority_weight          INTEGER NOT NULL,
        status                   TEXT NOT NULL,
        processing_node          TEXT,
        visibility_timeout_until TIMESTAMPTZ,
        retry_count              INTEGER NOT NULL DEFAULT 0,
        max_retries              INTEGER NOT NULL,
        last_error               TEXT,
        completed_at             TIMESTAMPTZ,
        updated_at               TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS enrichment_queue_dispatch_idx
        ON enrichment_queue (priority_weight, requested_at)
        WHERE status = 'PENDING'
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS enrichment_queue_visibility_idx
        ON enrichment_queue (visibility_timeout_until)
        WHERE status = 'PROCESSING'
    "#,
];

/// Postgres-backed queue store.
///
/// `QueueStore` is synchronous; trait calls run the async inherent methods on
/// the runtime handle captured at construction. Call the trait methods from
/// plain threads (workers), not from inside the runtime's own tasks.
#[derive(Debug, Clone)]
pub struct PostgresQueueStore {
    pool: Arc<PgPool>,
    runtime: tokio::runtime::Handle,
}

impl PostgresQueueStore {
    pub fn new(pool: PgPool, runtime: tokio::runtime::Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    /// Connect using the current tokio runtime.
    pub async fn connect(database_url: &str) -> Result<Self, QueueStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, tokio::runtime::Handle::current()))
    }

    /// Create the queue table and its partial indexes if missing.
    pub async fn ensure_schema(&self) -> Result<(), QueueStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    #[instrument(skip(self, entry), fields(entry_id = %entry.id, entity_type = %entry.entity_type), err)]
    pub async fn enqueue(&self, entry: QueueEntry) -> Result<QueueEntryId, QueueStoreError> {
        let action_plan = serde_json::to_value(entry.action_plan)
            .map_err(|e| QueueStoreError::Serialization(format!("failed to encode action plan: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO enrichment_queue (
                id, entity_type, entity_id, entity_kind, operation, strategy, action_plan, payload,
                requested_at, scheduled_for, priority_weight, status, processing_node,
                visibility_timeout_until, retry_count, max_retries, last_error, completed_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.entity_kind)
        .bind(entry.operation.as_str())
        .bind(entry.strategy.as_str())
        .bind(&action_plan)
        .bind(&entry.payload)
        .bind(entry.requested_at)
        .bind(entry.scheduled_for)
        .bind(entry.priority_weight)
        .bind(entry.status.as_str())
        .bind(&entry.processing_node)
        .bind(entry.visibility_timeout_until)
        .bind(entry.retry_count as i32)
        .bind(entry.max_retries as i32)
        .bind(&entry.last_error)
        .bind(entry.completed_at)
        .bind(entry.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                QueueStoreError::AlreadyExists(entry.id)
            } else {
                map_sqlx_error("enqueue", e)
            }
        })?;

        Ok(entry.id)
    }

    #[instrument(skip(self), fields(entry_id = %id), err)]
    pub async fn get(&self, id: QueueEntryId) -> Result<Option<QueueEntry>, QueueStoreError> {
        let row = sqlx::query(&format!("SELECT {ENTRY_COLUMNS} FROM enrichment_queue WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|r| decode_entry(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn dispatchable(
        &self,
        filter: &DispatchFilter,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, QueueStoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM enrichment_queue
            WHERE status = 'PENDING'
                AND scheduled_for <= $1
                AND ($2::text IS NULL OR strategy = $2)
            ORDER BY priority_weight ASC, requested_at ASC, id ASC
            LIMIT $3
            "#
        ))
        .bind(now)
        .bind(filter.strategy.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("dispatchable", e))?;

        rows.iter().map(decode_entry).collect()
    }

    #[instrument(skip(self), fields(entry_id = %id, node = %node), err)]
    pub async fn try_claim(
        &self,
        id: QueueEntryId,
        node: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, QueueStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE enrichment_queue
            SET status = 'PROCESSING',
                processing_node = $2,
                visibility_timeout_until = $3,
                updated_at = $4
            WHERE id = $1 AND status = 'PENDING'
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(node)
        .bind(after(now, lease))
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("try_claim", e))?;

        match row {
            Some(row) => decode_entry(&row).map(Some),
            None => match self.current_status(id).await? {
                Some(_) => Ok(None),
                None => Err(QueueStoreError::NotFound(id)),
            },
        }
    }

    /// Lease up to `limit` entries in one statement.
    #[instrument(skip(self), fields(node = %node, claimed = tracing::field::Empty), err)]
    pub async fn claim_batch(
        &self,
        filter: &DispatchFilter,
        limit: usize,
        node: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, QueueStoreError> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE enrichment_queue
            SET status = 'PROCESSING',
                processing_node = $1,
                visibility_timeout_until = $2,
                updated_at = $3
            WHERE id IN (
                SELECT id
                FROM enrichment_queue
                WHERE status = 'PENDING'
                    AND scheduled_for <= $3
                    AND ($4::text IS NULL OR strategy = $4)
                ORDER BY priority_weight ASC, requested_at ASC, id ASC
                LIMIT $5
                FOR UPDATE SKIP LOCKED
            )
            AND status = 'PENDING'
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(node)
        .bind(after(now, lease))
        .bind(now)
        .bind(filter.strategy.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_batch", e))?;

        // RETURNING has no defined order.
        let mut claimed = rows.iter().map(decode_entry).collect::<Result<Vec<_>, _>>()?;
        claimed.sort_by_key(|e| e.dispatch_key());

        Span::current().record("claimed", claimed.len());
        Ok(claimed)
    }

    #[instrument(skip(self), fields(entry_id = %id, node = %node), err)]
    pub async fn complete(&self, id: QueueEntryId, node: &str, now: DateTime<Utc>) -> Result<(), QueueStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE enrichment_queue
            SET status = 'COMPLETED',
                completed_at = $3,
                processing_node = NULL,
                visibility_timeout_until = NULL,
                updated_at = $3
            WHERE id = $1 AND status = 'PROCESSING' AND processing_node = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(node)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("complete", e))?;

        if result.rows_affected() == 0 {
            return Err(self.lease_failure(id, node).await);
        }
        Ok(())
    }

    /// Record a failed attempt in one conditional update; every `SET`
    /// expression sees the pre-update row.
    #[instrument(skip(self, error), fields(entry_id = %id, node = %node), err)]
    pub async fn fail(
        &self,
        id: QueueEntryId,
        node: &str,
        error: &str,
        kind: FailureKind,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, QueueStoreError> {
        let (permanent, backoff) = match kind {
            FailureKind::Permanent => (true, Duration::ZERO),
            FailureKind::Transient { backoff } => (false, backoff),
        };

        let row = sqlx::query(
            r#"
            UPDATE enrichment_queue
            SET retry_count = retry_count + 1,
                last_error = $3,
                processing_node = NULL,
                visibility_timeout_until = NULL,
                updated_at = $4,
                status = CASE
                    WHEN $5 THEN 'FAILED'
                    WHEN retry_count + 1 < max_retries THEN 'PENDING'
                    ELSE 'DEAD_LETTER'
                END,
                scheduled_for = CASE
                    WHEN NOT $5 AND retry_count + 1 < max_retries THEN $6
                    ELSE scheduled_for
                END
            WHERE id = $1 AND status = 'PROCESSING' AND processing_node = $2
            RETURNING status, retry_count, scheduled_for
            "#,
        )
        .bind(id.as_uuid())
        .bind(node)
        .bind(error)
        .bind(now)
        .bind(permanent)
        .bind(after(now, backoff))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fail", e))?;

        let Some(row) = row else {
            return Err(self.lease_failure(id, node).await);
        };

        let status: String = row.try_get("status").map_err(|e| map_sqlx_error("fail", e))?;
        let retry_count: i32 = row.try_get("retry_count").map_err(|e| map_sqlx_error("fail", e))?;
        let scheduled_for: DateTime<Utc> = row.try_get("scheduled_for").map_err(|e| map_sqlx_error("fail", e))?;
        let retry_count = retry_count.max(0) as u32;

        Ok(match parse_column::<QueueStatus>("status", &status)? {
            QueueStatus::Pending => FailureOutcome::Retrying {
                retry_count,
                scheduled_for,
            },
            QueueStatus::Failed => FailureOutcome::Failed { retry_count },
            _ => FailureOutcome::DeadLettered { retry_count },
        })
    }

    #[instrument(skip(self), fields(entry_id = %id, node = %node), err)]
    pub async fn renew_lease(
        &self,
        id: QueueEntryId,
        node: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, QueueStoreError> {
        let deadline = after(now, lease);
        let result = sqlx::query(
            r#"
            UPDATE enrichment_queue
            SET visibility_timeout_until = $3,
                updated_at = $4
            WHERE id = $1 AND status = 'PROCESSING' AND processing_node = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(node)
        .bind(deadline)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("renew_lease", e))?;

        if result.rows_affected() == 0 {
            return Err(self.lease_failure(id, node).await);
        }
        Ok(deadline)
    }

    #[instrument(skip(self), fields(recovered = tracing::field::Empty), err)]
    pub async fn recover_expired(&self, now: DateTime<Utc>) -> Result<usize, QueueStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE enrichment_queue
            SET status = 'PENDING',
                retry_count = retry_count + 1,
                processing_node = NULL,
                visibility_timeout_until = NULL,
                updated_at = $1
            WHERE status = 'PROCESSING' AND visibility_timeout_until <= $1
            "#,
        )
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("recover_expired", e))?;

        let recovered = result.rows_affected() as usize;
        Span::current().record("recovered", recovered);
        Ok(recovered)
    }

    #[instrument(skip(self), err)]
    pub async fn purge_completed(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueStoreError> {
        let result = sqlx::query("DELETE FROM enrichment_queue WHERE status = 'COMPLETED' AND completed_at < $1")
            .bind(cutoff)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_completed", e))?;
        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self), err)]
    pub async fn purge_failed(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueStoreError> {
        let result = sqlx::query(
            "DELETE FROM enrichment_queue WHERE status IN ('DEAD_LETTER', 'FAILED') AND updated_at < $1",
        )
        .bind(cutoff)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("purge_failed", e))?;
        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self), err)]
    pub async fn list_dead_letters(&self, limit: usize) -> Result<Vec<QueueEntry>, QueueStoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM enrichment_queue
            WHERE status IN ('DEAD_LETTER', 'FAILED')
            ORDER BY updated_at DESC, id ASC
            LIMIT $1
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_dead_letters", e))?;

        rows.iter().map(decode_entry).collect()
    }

    #[instrument(skip(self), fields(entry_id = %id), err)]
    pub async fn requeue(&self, id: QueueEntryId, now: DateTime<Utc>) -> Result<QueueEntry, QueueStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE enrichment_queue
            SET status = 'PENDING',
                retry_count = 0,
                scheduled_for = $2,
                completed_at = NULL,
                processing_node = NULL,
                visibility_timeout_until = NULL,
                updated_at = $2
            WHERE id = $1 AND status IN ('DEAD_LETTER', 'FAILED')
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("requeue", e))?;

        match row {
            Some(row) => decode_entry(&row),
            None => match self.current_status(id).await? {
                Some(status) => Err(QueueStoreError::InvalidState { id, status }),
                None => Err(QueueStoreError::NotFound(id)),
            },
        }
    }

    #[instrument(skip(self), err)]
    pub async fn stats(&self) -> Result<QueueStats, QueueStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM enrichment_queue GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("stats", e))?;
            let total: i64 = row.try_get("total").map_err(|e| map_sqlx_error("stats", e))?;
            stats.record(parse_column("status", &status)?, total as usize);
        }
        Ok(stats)
    }

    async fn current_status(&self, id: QueueEntryId) -> Result<Option<QueueStatus>, QueueStoreError> {
        let row = sqlx::query("SELECT status FROM enrichment_queue WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("current_status", e))?;

        match row {
            Some(row) => {
                let status: String = row.try_get("status").map_err(|e| map_sqlx_error("current_status", e))?;
                parse_column("status", &status).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Explain why a lease-guarded update touched no row.
    async fn lease_failure(&self, id: QueueEntryId, node: &str) -> QueueStoreError {
        match self.current_status(id).await {
            Ok(Some(_)) => QueueStoreError::LeaseNotHeld {
                id,
                node: node.to_string(),
            },
            Ok(None) => QueueStoreError::NotFound(id),
            Err(e) => e,
        }
    }
}

impl QueueStore for PostgresQueueStore {
    fn enqueue(&self, entry: QueueEntry) -> Result<QueueEntryId, QueueStoreError> {
        self.runtime.block_on(self.enqueue(entry))
    }

    fn get(&self, id: QueueEntryId) -> Result<Option<QueueEntry>, QueueStoreError> {
        self.runtime.block_on(self.get(id))
    }

    fn dispatchable(
        &self,
        filter: &DispatchFilter,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, QueueStoreError> {
        self.runtime.block_on(self.dispatchable(filter, limit, now))
    }

    fn try_claim(
        &self,
        id: QueueEntryId,
        node: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, QueueStoreError> {
        self.runtime.block_on(self.try_claim(id, node, lease, now))
    }

    fn claim_batch(
        &self,
        filter: &DispatchFilter,
        limit: usize,
        node: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, QueueStoreError> {
        self.runtime.block_on(self.claim_batch(filter, limit, node, lease, now))
    }

    fn complete(&self, id: QueueEntryId, node: &str, now: DateTime<Utc>) -> Result<(), QueueStoreError> {
        self.runtime.block_on(self.complete(id, node, now))
    }

    fn fail(
        &self,
        id: QueueEntryId,
        node: &str,
        error: &str,
        kind: FailureKind,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, QueueStoreError> {
        self.runtime.block_on(self.fail(id, node, error, kind, now))
    }

    fn renew_lease(
        &self,
        id: QueueEntryId,
        node: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, QueueStoreError> {
        self.runtime.block_on(self.renew_lease(id, node, lease, now))
    }

    fn recover_expired(&self, now: DateTime<Utc>) -> Result<usize, QueueStoreError> {
        self.runtime.block_on(self.recover_expired(now))
    }

    fn purge_completed(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueStoreError> {
        self.runtime.block_on(self.purge_completed(cutoff))
    }

    fn purge_failed(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueStoreError> {
        self.runtime.block_on(self.purge_failed(cutoff))
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<QueueEntry>, QueueStoreError> {
        self.runtime.block_on(self.list_dead_letters(limit))
    }

    fn requeue(&self, id: QueueEntryId, now: DateTime<Utc>) -> Result<QueueEntry, QueueStoreError> {
        self.runtime.block_on(self.requeue(id, now))
    }

    fn stats(&self) -> Result<QueueStats, QueueStoreError> {
        self.runtime.block_on(self.stats())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> QueueStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            QueueStoreError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => QueueStoreError::Storage(format!("connection pool closed in {}", operation)),
        sqlx::Error::ColumnDecode { index, source } => {
            QueueStoreError::Serialization(format!("failed to decode column {} in {}: {}", index, operation, source))
        }
        _ => QueueStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

fn parse_column<T>(column: &str, value: &str) -> Result<T, QueueStoreError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    value
        .parse()
        .map_err(|e| QueueStoreError::Serialization(format!("bad {column} value '{value}': {e}")))
}

fn decode_entry(row: &sqlx::postgres::PgRow) -> Result<QueueEntry, QueueStoreError> {
    let row = QueueEntryRow::from_row(row).map_err(|e| map_sqlx_error("decode_entry", e))?;
    QueueEntry::try_from(row)
}

// SQLx row types

#[derive(Debug)]
struct QueueEntryRow {
    id: uuid::Uuid,
    entity_type: String,
    entity_id: String,
    entity_kind: String,
    operation: String,
    strategy: String,
    action_plan: serde_json::Value,
    payload: serde_json::Value,
    requested_at: DateTime<Utc>,
    scheduled_for: DateTime<Utc>,
    priority_weight: i32,
    status: String,
    processing_node: Option<String>,
    visibility_timeout_until: Option<DateTime<Utc>>,
    retry_count: i32,
    max_retries: i32,
    last_error: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for QueueEntryRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(QueueEntryRow {
            id: row.try_get("id")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            entity_kind: row.try_get("entity_kind")?,
            operation: row.try_get("operation")?,
            strategy: row.try_get("strategy")?,
            action_plan: row.try_get("action_plan")?,
            payload: row.try_get("payload")?,
            requested_at: row.try_get("requested_at")?,
            scheduled_for: row.try_get("scheduled_for")?,
            priority_weight: row.try_get("priority_weight")?,
            status: row.try_get("status")?,
            processing_node: row.try_get("processing_node")?,
            visibility_timeout_until: row.try_get("visibility_timeout_until")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            last_error: row.try_get("last_error")?,
            completed_at: row.try_get("completed_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<QueueEntryRow> for QueueEntry {
    type Error = QueueStoreError;

    fn try_from(row: QueueEntryRow) -> Result<Self, Self::Error> {
        let action_plan: ActionPlan = serde_json::from_value(row.action_plan)
            .map_err(|e| QueueStoreError::Serialization(format!("bad action_plan for {}: {e}", row.id)))?;

        Ok(QueueEntry {
            id: QueueEntryId::from_uuid(row.id),
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            entity_kind: row.entity_kind,
            operation: parse_column("operation", &row.operation)?,
            strategy: parse_column("strategy", &row.strategy)?,
            action_plan,
            payload: row.payload,
            requested_at: row.requested_at,
            scheduled_for: row.scheduled_for,
            priority_weight: row.priority_weight,
            status: parse_column("status", &row.status)?,
            processing_node: row.processing_node,
            visibility_timeout_until: row.visibility_timeout_until,
            retry_count: row.retry_count.max(0) as u32,
            max_retries: row.max_retries.max(0) as u32,
            last_error: row.last_error,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}
