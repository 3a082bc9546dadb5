//! Integration tests for the full enrichment pipeline.
//!
//! Tests: Coordinator → QueueStore → QueueWorker → Maintenance
//!
//! Verifies:
//! - Inline and deferred paths produce the expected side effects
//! - Concurrent claims never lease the same entry twice
//! - Expired leases are recovered and retried, exhausted entries dead-letter
//! - Dispatch order is priority first, FIFO within a tier

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    use chrono::Utc;
    use proptest::prelude::{any, prop, prop_assert, proptest};
    use serde::Serialize;
    use serde_json::json;

    use enrich_ai::{CapabilityError, EntityConfig, EntityConfigRegistry, RecordingCapabilities};
    use enrich_core::{
        Action, ActionPlan, EnrichableEntity, EntityDocument, Operation, Strategy, StrategyCatalog,
        StrategyConfiguration,
    };

    use crate::coordinator::{Coordinator, HandleOutcome};
    use crate::queue::{
        BackoffPolicy, DispatchFilter, FailureKind, InMemoryQueueStore, QueueEntry, QueueStatus, QueueStore,
        QueueStoreError,
    };
    use crate::workers::{MaintenanceConfig, QueueWorker, WorkerConfig, run_maintenance};

    const LEASE: Duration = Duration::from_secs(30);

    #[derive(Serialize)]
    struct Product {
        id: u64,
        name: String,
        description: String,
    }

    impl EnrichableEntity for Product {
        fn entity_id(&self) -> Option<String> {
            Some(self.id.to_string())
        }

        fn kind(&self) -> &str {
            "Product"
        }
    }

    fn product(id: u64) -> Product {
        Product {
            id,
            name: format!("Product {id}"),
            description: "Oak desk".into(),
        }
    }

    type Store = Arc<InMemoryQueueStore>;
    type Caps = Arc<RecordingCapabilities>;

    struct Pipeline {
        coordinator: Coordinator<Store, Caps>,
        store: Store,
        caps: Caps,
        configs: Arc<EntityConfigRegistry>,
    }

    impl Pipeline {
        fn new() -> Self {
            let catalog = StrategyCatalog::new()
                .with("product", StrategyConfiguration::new(Strategy::Async).on_update(Strategy::Auto))
                .with("report", StrategyConfiguration::new(Strategy::Batch).max_retries(2))
                .with("price", StrategyConfiguration::new(Strategy::Sync));
            let configs = Arc::new(
                EntityConfigRegistry::new().with(
                    EntityConfig::new("product")
                        .searchable(&["name", "description"])
                        .embeddable(&["description"]),
                ),
            );
            let store = InMemoryQueueStore::arc();
            let caps = Arc::new(RecordingCapabilities::new());
            let coordinator = Coordinator::new(Arc::new(catalog), configs.clone(), store.clone(), caps.clone());
            Self {
                coordinator,
                store,
                caps,
                configs,
            }
        }

        fn worker(&self, node: &str) -> QueueWorker<Store, Caps> {
            QueueWorker::new(
                self.store.clone(),
                self.caps.clone(),
                self.configs.clone(),
                WorkerConfig::default()
                    .with_node(node)
                    .with_lease(LEASE)
                    .with_backoff(BackoffPolicy::immediate()),
            )
        }
    }

    fn entry(id: usize, strategy: Strategy, offset_ms: i64) -> QueueEntry {
        let base = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default();
        QueueEntry::new(
            EntityDocument::new("product", id.to_string(), "Product", json!({"id": id})),
            Operation::Update,
            strategy,
            ActionPlan::default_for(Operation::Update),
            3,
            base + chrono::Duration::milliseconds(offset_ms),
        )
    }

    #[test]
    fn empty_plan_never_reaches_store_or_capabilities() {
        let p = Pipeline::new();

        for strategy in Strategy::ALL {
            let outcome = p
                .coordinator
                .handle(Some(&product(1)), "product", Operation::Update, &ActionPlan::none(), strategy)
                .unwrap();
            assert_eq!(outcome, HandleOutcome::Skipped);
        }

        assert_eq!(p.caps.call_count(), 0);
        assert_eq!(p.store.stats().unwrap().total(), 0);
    }

    #[test]
    fn sync_entity_type_executes_inline_in_fixed_order() {
        let p = Pipeline::new();
        let plan = ActionPlan::none().with_embedding().with_indexing();

        let outcome = p
            .coordinator
            .handle(Some(&product(7)), "price", Operation::Update, &plan, Strategy::Auto)
            .unwrap();

        assert_eq!(outcome, HandleOutcome::ExecutedInline { actions: 2 });
        let calls = p.caps.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].action, Action::GenerateEmbedding);
        assert_eq!(calls[1].action, Action::IndexForSearch);
        assert_eq!(calls[0].entity_id, "7");
        assert_eq!(p.store.stats().unwrap().total(), 0);
    }

    #[test]
    fn deferred_work_is_executed_by_worker() {
        let p = Pipeline::new();

        let HandleOutcome::Enqueued(id) = p
            .coordinator
            .handle_configured(Some(&product(3)), "product", Operation::Delete, Strategy::Auto)
            .unwrap()
        else {
            panic!("expected enqueue");
        };
        assert_eq!(p.caps.call_count(), 0);

        let report = p.worker("w1").run_once(Utc::now()).unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(p.caps.actions(), vec![Action::RemoveFromSearch, Action::CleanupEmbeddings]);
        assert_eq!(p.store.get(id).unwrap().unwrap().status, QueueStatus::Completed);
    }

    #[test]
    fn async_preempts_batch() {
        let p = Pipeline::new();
        let plan = ActionPlan::none().with_analysis();

        p.coordinator
            .handle(Some(&product(1)), "report", Operation::Create, &plan, Strategy::Auto)
            .unwrap();
        p.coordinator
            .handle(Some(&product(2)), "product", Operation::Create, &plan, Strategy::Auto)
            .unwrap();

        let ready = p.store.dispatchable(&DispatchFilter::any(), 10, Utc::now()).unwrap();
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].strategy, Strategy::Async);
        assert_eq!(ready[1].strategy, Strategy::Batch);
    }

    #[test]
    fn exactly_one_concurrent_claim_wins() {
        let store = InMemoryQueueStore::arc();
        let now = Utc::now();
        let id = store.enqueue(entry(1, Strategy::Async, 0)).unwrap();

        let contenders = 8;
        let barrier = Arc::new(Barrier::new(contenders));
        let handles: Vec<_> = (0..contenders)
            .map(|i| {
                let store = store.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    store.try_claim(id, &format!("w{i}"), LEASE, now).unwrap()
                })
            })
            .collect();

        let winners: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(winners.len(), 1);
        let stored = store.get(id).unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Processing);
        assert_eq!(stored.processing_node, winners[0].processing_node);
    }

    #[test]
    fn concurrent_batches_are_disjoint() {
        let store = InMemoryQueueStore::arc();
        let now = chrono::DateTime::from_timestamp(1_700_000_100, 0).unwrap_or_default();
        for i in 0..100 {
            store.enqueue(entry(i, Strategy::Async, i as i64)).unwrap();
        }

        let workers = 4;
        let barrier = Arc::new(Barrier::new(workers));
        let handles: Vec<_> = (0..workers)
            .map(|w| {
                let store = store.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let mut mine = Vec::new();
                    loop {
                        let batch = store
                            .claim_batch(&DispatchFilter::any(), 7, &format!("w{w}"), LEASE, now)
                            .unwrap();
                        if batch.is_empty() {
                            break;
                        }
                        mine.extend(batch.into_iter().map(|e| e.id));
                    }
                    mine
                })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut total = 0;
        for h in handles {
            for id in h.join().unwrap() {
                total += 1;
                assert!(seen.insert(id), "entry {id} claimed twice");
            }
        }
        assert_eq!(total, 100);
        assert_eq!(store.stats().unwrap().processing, 100);
    }

    #[test]
    fn expired_lease_is_recovered_and_redelivered() {
        let p = Pipeline::new();
        let t0 = Utc::now();
        let id = p.store.enqueue(entry(1, Strategy::Async, 0).not_before(t0)).unwrap();

        // Leased by a worker that then dies
        p.store.try_claim(id, "crashed", LEASE, t0).unwrap().unwrap();

        let config = MaintenanceConfig::default();
        let report = run_maintenance(&*p.store, &config, t0 + chrono::Duration::seconds(31)).unwrap();
        assert_eq!(report.recovered, 1);

        let recovered = p.store.get(id).unwrap().unwrap();
        assert_eq!(recovered.status, QueueStatus::Pending);
        assert_eq!(recovered.retry_count, 1);
        assert!(recovered.processing_node.is_none());
        assert!(recovered.visibility_timeout_until.is_none());

        // Another worker picks it up
        let report = p.worker("w2").run_once(t0 + chrono::Duration::seconds(32)).unwrap();
        assert_eq!(report.completed, 1);

        // The crashed claimant can no longer report
        assert!(matches!(
            p.store.complete(id, "crashed", t0 + chrono::Duration::seconds(40)),
            Err(QueueStoreError::LeaseNotHeld { .. })
        ));
    }

    #[test]
    fn exhausted_entry_dead_letters_and_can_be_requeued() {
        let p = Pipeline::new();
        p.caps
            .fail_times(Action::Analyze, CapabilityError::Provider("model offline".into()), 2);

        let HandleOutcome::Enqueued(id) = p
            .coordinator
            .handle(
                Some(&product(11)),
                "report",
                Operation::Update,
                &ActionPlan::none().with_analysis(),
                Strategy::Auto,
            )
            .unwrap()
        else {
            panic!("expected enqueue");
        };

        let worker = QueueWorker::new(
            p.store.clone(),
            p.caps.clone(),
            p.configs.clone(),
            WorkerConfig::default()
                .with_node("batch-1")
                .with_strategy(Strategy::Batch)
                .with_backoff(BackoffPolicy::immediate()),
        );
        // Reports are stamped with the wall clock, so poll at the current time.
        assert_eq!(worker.run_once(Utc::now()).unwrap().retried, 1);
        assert_eq!(worker.run_once(Utc::now()).unwrap().dead_lettered, 1);

        let dead = p.store.get(id).unwrap().unwrap();
        assert_eq!(dead.status, QueueStatus::DeadLetter);
        assert_eq!(dead.retry_count, 2);
        assert!(worker.run_once(Utc::now()).unwrap().is_empty());
        assert!(p.store.dispatchable(&DispatchFilter::any(), 10, Utc::now()).unwrap().is_empty());

        let listed = p.store.list_dead_letters(10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);

        p.store.requeue(id, Utc::now()).unwrap();
        assert_eq!(worker.run_once(Utc::now()).unwrap().completed, 1);
    }

    #[test]
    fn recovered_entry_with_spent_budget_dead_letters_on_next_failure() {
        let store = InMemoryQueueStore::arc();
        let t0 = Utc::now();
        let mut e = entry(1, Strategy::Async, 0).not_before(t0);
        e.max_retries = 1;
        let id = store.enqueue(e).unwrap();

        store.try_claim(id, "crashed", LEASE, t0).unwrap();
        let t1 = t0 + chrono::Duration::seconds(60);
        assert_eq!(store.recover_expired(t1).unwrap(), 1);

        // Still redelivered once
        store.try_claim(id, "w2", LEASE, t1).unwrap().unwrap();
        store.fail(id, "w2", "timeout", FailureKind::retry_now(), t1).unwrap();

        let stored = store.get(id).unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::DeadLetter);
        assert_eq!(stored.retry_count, 2);
    }

    fn strategy_for(i: u8) -> Strategy {
        match i % 3 {
            0 => Strategy::Async,
            1 => Strategy::Batch,
            _ => Strategy::Auto,
        }
    }

    proptest! {
        #[test]
        fn dispatch_order_is_priority_then_fifo(
            cases in prop::collection::vec((any::<u8>(), 0i64..10_000), 1..40),
            limit in 1usize..50,
        ) {
            let store = InMemoryQueueStore::new();
            for (i, (s, offset)) in cases.iter().enumerate() {
                store.enqueue(entry(i, strategy_for(*s), *offset)).unwrap();
            }

            let now = chrono::DateTime::from_timestamp(1_700_000_100, 0).unwrap_or_default();
            let ready = store.dispatchable(&DispatchFilter::any(), limit, now).unwrap();

            prop_assert!(ready.len() == cases.len().min(limit));
            for pair in ready.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                prop_assert!(
                    a.priority_weight < b.priority_weight
                        || (a.priority_weight == b.priority_weight && a.requested_at <= b.requested_at)
                );
            }
        }
    }
}
