//! End-to-end migration runs against in-memory stores

use bridge_rs::clients::{MemorySource, MemoryTarget, SourceRecord, WriteError};
use bridge_rs::config::ThrottleConfig;
use bridge_rs::migration::{BatchExecutor, EntityKind, EntityRun, PhaseRunner, RunRequest};
use bridge_rs::progress::{ProgressEvent, RecordingSink, StreamSummary};
use bridge_rs::storage::MemoryWizardStore;
use bridge_rs::throttle::TargetThrottle;
use bridge_rs::wizard::{CoreDataData, Phase, PhaseStatus, WizardSession};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

fn shop() -> MemorySource {
    let categories = vec![
        SourceRecord::new(10, json!({"id": 10, "name": "Clothing", "parent": 0})),
        SourceRecord::new(11, json!({"id": 11, "name": "Shirts", "parent": 10})),
        SourceRecord::new(12, json!({"id": 12, "name": "Books", "parent": 0})),
    ];
    let products = (1..=4)
        .map(|id| {
            let category = if id <= 2 { 11 } else { 12 };
            SourceRecord::new(
                id,
                json!({
                    "id": id,
                    "name": format!("Product {}", id),
                    "sku": format!("SKU-{}", id),
                    "regular_price": "19.99",
                    "status": "publish",
                    "categories": [{"id": category}],
                }),
            )
        })
        .collect();
    let customers = vec![
        SourceRecord::new(7, json!({"id": 7, "email": "ann@example.com", "first_name": "Ann"})),
        SourceRecord::new(8, json!({"id": 8, "email": "bob@example.com", "first_name": "Bob"})),
    ];
    let orders = vec![
        SourceRecord::new(
            100,
            json!({
                "id": 100,
                "customer_id": 7,
                "status": "completed",
                "line_items": [{"product_id": 1, "quantity": 2, "price": "19.99"}],
            }),
        ),
        SourceRecord::new(
            101,
            json!({
                "id": 101,
                "customer_id": 0,
                "status": "processing",
                "line_items": [{"product_id": 3, "quantity": 1, "price": "19.99"}],
            }),
        ),
    ];

    MemorySource::new()
        .with_records(EntityKind::Categories, categories)
        .with_records(EntityKind::Products, products)
        .with_records(EntityKind::Customers, customers)
        .with_records(EntityKind::Orders, orders)
}

fn fast_throttle() -> TargetThrottle {
    TargetThrottle::new(&ThrottleConfig {
        base_backoff_ms: 1,
        ..ThrottleConfig::default()
    })
}

async fn session() -> Mutex<WizardSession> {
    let store = Arc::new(MemoryWizardStore::new());
    Mutex::new(WizardSession::open(store, "shop", "hash").await.unwrap())
}

#[tokio::test]
async fn test_full_store_migration() {
    let source = shop();
    let target = MemoryTarget::new();
    let throttle = fast_throttle();
    let runner = PhaseRunner::new(BatchExecutor::new(&source, &target, &throttle), 2);
    let session = session().await;
    let cancel = CancellationToken::new();

    // Phase 1
    let report = runner
        .run(&session, EntityKind::Categories, &RunRequest::default(), &RecordingSink::new(), &cancel)
        .await
        .unwrap();
    assert_eq!(report.stats.successful, 3);
    let shirts = target
        .records(EntityKind::Categories)
        .into_iter()
        .find(|r| r.body["name"] == "Shirts")
        .unwrap();
    assert_eq!(shirts.body["parent_id"], json!(report.id_mapping.get(10).unwrap()));

    session
        .lock()
        .await
        .complete_phase(Phase::Foundation, None)
        .await
        .unwrap();

    // Phase 2, one category at a time
    for category in [11, 12] {
        let request = RunRequest {
            scope: Some(category),
            ..Default::default()
        };
        let report = runner
            .run(&session, EntityKind::Products, &request, &RecordingSink::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(report.stats.successful, 2);
        assert!(report.stats.warnings.is_empty());
    }
    runner
        .run(&session, EntityKind::Customers, &RunRequest::default(), &RecordingSink::new(), &cancel)
        .await
        .unwrap();

    {
        let mut session = session.lock().await;
        let data = session.state().payload::<CoreDataData>().unwrap().clone();
        assert_eq!(data.completed_categories.len(), 2);
        assert_eq!(data.products.id_mapping.len(), 4);
        assert_eq!(data.customers.id_mapping.len(), 2);
        session.complete_phase(Phase::CoreData, None).await.unwrap();
        assert_eq!(session.status(Phase::Transactions), PhaseStatus::Pending);
    }

    // Phase 3 uses the stored product and customer mappings
    let sink = RecordingSink::new();
    let report = runner
        .run(&session, EntityKind::Orders, &RunRequest::default(), &sink, &cancel)
        .await
        .unwrap();
    assert_eq!(report.stats.successful, 2);
    match StreamSummary::from_events(&sink.events()) {
        StreamSummary::Completed { stats, migrated_ids, .. } => {
            assert_eq!(stats, report.stats);
            assert_eq!(migrated_ids, vec![100, 101]);
        }
        other => panic!("unexpected summary {:?}", other),
    }

    let orders = target.records(EntityKind::Orders);
    let session = session.lock().await;
    let products = session.state().id_mapping(EntityKind::Products);
    let customers = session.state().id_mapping(EntityKind::Customers);
    let first = orders.iter().find(|o| o.body["external_id"] == "100").unwrap();
    assert_eq!(first.body["customer_id"], json!(customers.get(7).unwrap()));
    assert_eq!(first.body["products"][0]["product_id"], json!(products.get(1).unwrap()));
    let guest = orders.iter().find(|o| o.body["external_id"] == "101").unwrap();
    assert_eq!(guest.body["customer_id"], json!(0));
}

#[tokio::test]
async fn test_interrupted_run_resumes_without_duplicates() {
    let records = (1..=10)
        .map(|id| {
            SourceRecord::new(
                id,
                json!({"id": id, "email": format!("c{}@example.com", id)}),
            )
        })
        .collect();
    let source = MemorySource::new().with_records(EntityKind::Customers, records);
    let target = MemoryTarget::new();
    let throttle = fast_throttle();
    let executor = BatchExecutor::new(&source, &target, &throttle);

    // First attempt stops after four items
    let cancel = CancellationToken::new();
    let sink = RecordingSink::new();
    let stopper = cancel.clone();
    let watcher = bridge_rs::progress::FnSink(move |event: ProgressEvent| {
        if let ProgressEvent::Progress { completed: 4, .. } = event {
            stopper.cancel();
        }
    });
    let tee = bridge_rs::progress::Tee(&sink, &watcher);
    let first = executor
        .run(&EntityRun::new(EntityKind::Customers), &tee, &cancel)
        .await
        .unwrap();
    assert!(first.cancelled);
    assert_eq!(first.migrated_ids.len(), 4);
    assert!(matches!(
        StreamSummary::from_events(&sink.events()),
        StreamSummary::Failed { .. }
    ));

    // Second attempt picks up where the first stopped
    let second = executor
        .run(
            &EntityRun::new(EntityKind::Customers).with_resume(first.migrated_ids.clone()),
            &RecordingSink::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(second.stats.resumed, 4);
    assert_eq!(second.stats.successful, 6);
    assert!(second.stats.is_conserved());
    assert_eq!(target.records(EntityKind::Customers).len(), 10);
    assert_eq!(target.create_calls(), 10);
}

#[tokio::test]
async fn test_transient_target_errors_are_retried() {
    let source = MemorySource::new().with_records(
        EntityKind::Customers,
        vec![SourceRecord::new(1, json!({"id": 1, "email": "flaky@example.com"}))],
    );
    let target = MemoryTarget::new();
    target.fail_next(
        EntityKind::Customers,
        "flaky@example.com",
        2,
        WriteError::RateLimited { retry_after: None },
    );
    let throttle = fast_throttle();
    let executor = BatchExecutor::new(&source, &target, &throttle);

    let report = executor
        .run(
            &EntityRun::new(EntityKind::Customers),
            &RecordingSink::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.stats.successful, 1);
    assert_eq!(target.create_calls(), 3);
    assert_eq!(throttle.retries(), 2);
}

#[tokio::test]
async fn test_existing_target_records_are_mapped() {
    let source = MemorySource::new().with_records(
        EntityKind::Customers,
        vec![
            SourceRecord::new(1, json!({"id": 1, "email": "old@example.com"})),
            SourceRecord::new(2, json!({"id": 2, "email": "new@example.com"})),
        ],
    );
    let target = MemoryTarget::new();
    let existing = target.seed(EntityKind::Customers, json!({"email": "OLD@example.com"}));
    let throttle = fast_throttle();
    let executor = BatchExecutor::new(&source, &target, &throttle);

    let report = executor
        .run(
            &EntityRun::new(EntityKind::Customers),
            &RecordingSink::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.stats.successful, 1);
    assert_eq!(report.stats.skipped, 1);
    assert_eq!(report.id_mapping.get(1), Some(existing));
    assert_eq!(report.migrated_ids, vec![1, 2]);
}
