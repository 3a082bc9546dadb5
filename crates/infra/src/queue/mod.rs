//! Durable enrichment queue with lease-based dispatch.
//!
//! ## Lease protocol
//!
//! ```text
//!            claim                 complete
//! PENDING ───────────► PROCESSING ───────────► COMPLETED
//!    ▲                  │   │   │
//!    │  fail (budget    │   │   └── fail (budget spent) ──► DEAD_LETTER
//!    │  left) / lease   │   │
//!    └──── expired ─────┘   └────── fail (permanent) ─────► FAILED
//! ```
//!
//! - Claims are atomic conditional transitions: two workers racing for the
//!   same PENDING entry never both win.
//! - `complete`/`fail`/`renew_lease` only apply while the caller still holds
//!   the lease (status PROCESSING and `processing_node` matches).
//! - The recovery sweep returns entries whose visibility timeout passed to
//!   PENDING. Delivery is therefore at-least-once; consumers must be
//!   idempotent.
//! - COMPLETED and DEAD_LETTER/FAILED entries are purged by separate
//!   retention windows.

pub mod postgres;
pub mod store;
pub mod types;

pub use postgres::PostgresQueueStore;
pub use store::{InMemoryQueueStore, QueueStore, QueueStoreError};
pub use types::{
    BackoffPolicy, BackoffStrategy, DispatchFilter, FailureKind, FailureOutcome, QueueEntry, QueueStats,
    QueueStatus,
};
