//! Postgres queue store tests.
//!
//! Run with a disposable database:
//!
//! ```text
//! DATABASE_URL=postgres://localhost/enrich_test cargo test -p enrich-infra --test postgres_queue -- --ignored
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use enrich_core::{ActionPlan, EntityDocument, Operation, Strategy};
use enrich_infra::queue::{
    DispatchFilter, FailureKind, FailureOutcome, PostgresQueueStore, QueueEntry, QueueStatus, QueueStore,
    QueueStoreError,
};

const LEASE: Duration = Duration::from_secs(300);

async fn store() -> PostgresQueueStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres tests");
    let store = PostgresQueueStore::connect(&url).await.expect("connect");
    store.ensure_schema().await.expect("schema");
    store
}

fn entry(max_retries: u32) -> QueueEntry {
    entry_at(Strategy::Async, max_retries, Utc::now())
}

fn entry_at(strategy: Strategy, max_retries: u32, requested_at: DateTime<Utc>) -> QueueEntry {
    let id = uuid::Uuid::now_v7().to_string();
    QueueEntry::new(
        EntityDocument::new("pg_test", id, "Product", json!({"name": "Desk"})),
        Operation::Update,
        strategy,
        ActionPlan::none().with_embedding().with_indexing(),
        max_retries,
        requested_at,
    )
}

/// Start of the fixed window in the past used by dispatch-order tests.
/// Everything else in the table is scheduled at the wall clock, so dispatch
/// at `window + 1s` only sees entries placed in the window.
const WINDOW_START: i64 = 978_307_200; // 2001-01-01
const WINDOW_END: i64 = 1_009_843_200; // 2002-01-01

static WINDOW: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Take exclusive use of the window and clear rows left by earlier runs.
async fn past_window() -> (tokio::sync::MutexGuard<'static, ()>, DateTime<Utc>) {
    let guard = WINDOW.lock().await;
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres tests");
    let pool = sqlx::PgPool::connect(&url).await.expect("connect");
    sqlx::query("DELETE FROM enrichment_queue WHERE scheduled_for < $1")
        .bind(DateTime::from_timestamp(WINDOW_END, 0).unwrap())
        .execute(&pool)
        .await
        .expect("clear window");
    (guard, DateTime::from_timestamp(WINDOW_START, 0).unwrap())
}

fn is_dispatch_ordered(batch: &[QueueEntry]) -> bool {
    batch
        .windows(2)
        .all(|w| (w[0].priority_weight, w[0].requested_at) <= (w[1].priority_weight, w[1].requested_at))
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn lifecycle_round_trip() {
    let store = store().await;
    let e = entry(3);
    let id = store.enqueue(e.clone()).await.unwrap();

    assert!(matches!(store.enqueue(e.clone()).await, Err(QueueStoreError::AlreadyExists(_))));

    let loaded = store.get(id).await.unwrap().unwrap();
    assert_eq!(loaded.status, QueueStatus::Pending);
    assert_eq!(loaded.action_plan, e.action_plan);
    assert_eq!(loaded.payload, e.payload);

    let now = Utc::now();
    let claimed = store.try_claim(id, "pg-w1", LEASE, now).await.unwrap().unwrap();
    assert_eq!(claimed.processing_node.as_deref(), Some("pg-w1"));
    assert!(store.try_claim(id, "pg-w2", LEASE, now).await.unwrap().is_none());

    assert!(matches!(
        store.complete(id, "pg-w2", now).await,
        Err(QueueStoreError::LeaseNotHeld { .. })
    ));
    store.complete(id, "pg-w1", now).await.unwrap();
    assert_eq!(store.get(id).await.unwrap().unwrap().status, QueueStatus::Completed);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn failures_retry_then_dead_letter() {
    let store = store().await;
    let id = store.enqueue(entry(2)).await.unwrap();
    let now = Utc::now();

    store.try_claim(id, "pg-w1", LEASE, now).await.unwrap().unwrap();
    let outcome = store
        .fail(id, "pg-w1", "provider down", FailureKind::retry_now(), now)
        .await
        .unwrap();
    assert!(matches!(outcome, FailureOutcome::Retrying { retry_count: 1, .. }));

    store.try_claim(id, "pg-w1", LEASE, now).await.unwrap().unwrap();
    let outcome = store
        .fail(id, "pg-w1", "provider down", FailureKind::retry_now(), now)
        .await
        .unwrap();
    assert_eq!(outcome, FailureOutcome::DeadLettered { retry_count: 2 });

    let requeued = store.requeue(id, Utc::now()).await.unwrap();
    assert_eq!(requeued.retry_count, 0);
    assert!(matches!(
        store.requeue(id, Utc::now()).await,
        Err(QueueStoreError::InvalidState { .. })
    ));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn expired_lease_is_recovered() {
    let store = store().await;
    let id = store.enqueue(entry(3)).await.unwrap();
    let long_ago = Utc::now() - chrono::Duration::minutes(10);

    store
        .try_claim(id, "pg-crashed", Duration::from_secs(1), long_ago)
        .await
        .unwrap()
        .unwrap();
    assert!(store.recover_expired(Utc::now()).await.unwrap() >= 1);

    let recovered = store.get(id).await.unwrap().unwrap();
    assert_eq!(recovered.status, QueueStatus::Pending);
    assert_eq!(recovered.retry_count, 1);
    assert!(recovered.processing_node.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires DATABASE_URL"]
async fn concurrent_claims_have_one_winner() {
    let store = Arc::new(store().await);
    // `Arc<_>` resolves to the blocking trait; async calls use the inner store.
    let pg: &PostgresQueueStore = &store;
    let id = pg.enqueue(entry(3)).await.unwrap();
    let now = Utc::now();

    // Trait calls block on the runtime, so run them off the async workers.
    let handles: Vec<_> = (0..6)
        .map(|i| {
            let store = store.clone();
            tokio::task::spawn_blocking(move || {
                QueueStore::try_claim(&*store, id, &format!("pg-w{i}"), LEASE, now).unwrap()
            })
        })
        .collect();

    let mut winners = 0;
    for h in handles {
        if h.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn claim_batch_takes_priority_then_fifo() {
    let store = store().await;
    let (_window, base) = past_window().await;
    let ms = chrono::Duration::milliseconds;

    // Batch work requested first, async work after it.
    let mut batch_ids = Vec::new();
    for i in 0..3 {
        batch_ids.push(store.enqueue(entry_at(Strategy::Batch, 3, base + ms(i))).await.unwrap());
    }
    let mut async_ids = Vec::new();
    for i in 0..3 {
        async_ids.push(store.enqueue(entry_at(Strategy::Async, 3, base + ms(10 + i))).await.unwrap());
    }
    let now = base + chrono::Duration::seconds(1);

    let first = store.claim_batch(&DispatchFilter::any(), 4, "pg-w1", LEASE, now).await.unwrap();
    let ids: Vec<_> = first.iter().map(|e| e.id).collect();
    assert_eq!(ids, [async_ids.clone(), vec![batch_ids[0]]].concat());
    assert!(is_dispatch_ordered(&first));

    let batch_only = store
        .claim_batch(&DispatchFilter::only(Strategy::Batch), 10, "pg-w2", LEASE, now)
        .await
        .unwrap();
    let ids: Vec<_> = batch_only.iter().map(|e| e.id).collect();
    assert_eq!(ids, batch_ids[1..].to_vec());

    for e in first.iter().chain(&batch_only) {
        let node = e.processing_node.clone().unwrap();
        store.complete(e.id, &node, now).await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires DATABASE_URL"]
async fn concurrent_claim_batches_are_disjoint() {
    let store = Arc::new(store().await);
    // `Arc<_>` resolves to the blocking trait; async calls use the inner store.
    let pg: &PostgresQueueStore = &store;
    let (_window, base) = past_window().await;

    let mut expected = HashSet::new();
    for i in 0..40 {
        let strategy = if i % 2 == 0 { Strategy::Async } else { Strategy::Batch };
        let e = entry_at(strategy, 3, base + chrono::Duration::milliseconds(i));
        expected.insert(pg.enqueue(e).await.unwrap());
    }
    let now = base + chrono::Duration::seconds(1);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let store = store.clone();
            tokio::task::spawn_blocking(move || {
                let node = format!("pg-batch-{i}");
                let mut claimed = Vec::new();
                loop {
                    let batch =
                        QueueStore::claim_batch(&*store, &DispatchFilter::any(), 5, &node, LEASE, now).unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    assert!(is_dispatch_ordered(&batch));
                    claimed.extend(batch);
                }
                claimed
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for h in handles {
        for e in h.await.unwrap() {
            assert!(seen.insert(e.id), "entry {} claimed twice", e.id);
            let node = e.processing_node.clone().unwrap();
            pg.complete(e.id, &node, now).await.unwrap();
        }
    }
    assert_eq!(seen, expected);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn lease_renewal_requires_the_holder() {
    let store = store().await;
    let id = store.enqueue(entry(3)).await.unwrap();
    let now = Utc::now();

    store.try_claim(id, "pg-w1", Duration::from_secs(5), now).await.unwrap().unwrap();
    let later = now + chrono::Duration::seconds(4);
    let deadline = store.renew_lease(id, "pg-w1", Duration::from_secs(60), later).await.unwrap();
    assert!(deadline > now + chrono::Duration::seconds(60));

    assert!(matches!(
        store.renew_lease(id, "pg-w2", LEASE, later).await,
        Err(QueueStoreError::LeaseNotHeld { .. })
    ));
    store.complete(id, "pg-w1", later).await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn retention_windows_purge_separately() {
    let store = store().await;
    let (_window, base) = past_window().await;
    let now = base + chrono::Duration::seconds(1);

    let done = store.enqueue(entry_at(Strategy::Async, 3, base)).await.unwrap();
    let dead = store.enqueue(entry_at(Strategy::Async, 3, base)).await.unwrap();
    store.try_claim(done, "pg-w1", LEASE, now).await.unwrap().unwrap();
    store.try_claim(dead, "pg-w1", LEASE, now).await.unwrap().unwrap();
    store.complete(done, "pg-w1", now).await.unwrap();
    let outcome = store
        .fail(dead, "pg-w1", "schema mismatch", FailureKind::Permanent, now)
        .await
        .unwrap();
    assert_eq!(outcome, FailureOutcome::Failed { retry_count: 1 });

    let stats = store.stats().await.unwrap();
    assert!(stats.completed >= 1);
    assert!(stats.failed >= 1);
    let listed = store.list_dead_letters(100_000).await.unwrap();
    assert!(listed.iter().any(|e| e.id == dead));
    assert!(listed.windows(2).all(|w| w[0].updated_at >= w[1].updated_at));

    // Completed entries age out while the failed one is still kept.
    let cutoff = now + chrono::Duration::seconds(1);
    assert!(store.purge_completed(cutoff).await.unwrap() >= 1);
    assert!(store.get(done).await.unwrap().is_none());
    assert!(store.get(dead).await.unwrap().is_some());

    assert!(store.purge_failed(cutoff).await.unwrap() >= 1);
    assert!(store.get(dead).await.unwrap().is_none());
}
