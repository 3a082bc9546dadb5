//! Infrastructure layer: durable queue, coordination, worker loops, config.

pub mod config;
pub mod coordinator;
pub mod queue;
pub mod workers;

mod integration_tests;

pub use config::{EnrichmentSettings, SettingsError};
pub use coordinator::{Coordinator, CoordinatorError, HandleOutcome};
pub use queue::{
    BackoffPolicy, DispatchFilter, FailureKind, FailureOutcome, InMemoryQueueStore, PostgresQueueStore, QueueEntry,
    QueueStats, QueueStatus, QueueStore, QueueStoreError,
};
pub use workers::{
    BatchReport, MaintenanceConfig, MaintenanceReport, MaintenanceRunner, QueueWorker, WorkerConfig, WorkerHandle,
    WorkerStats, run_maintenance,
};
