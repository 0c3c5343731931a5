use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use deletion_undo::core::Clock;
use deletion_undo::core::clock::ManualClock;
use deletion_undo::db::farm::{self, SAMPLE_PESTICIDE_ID, SAMPLE_PLAN_ID};
use deletion_undo::deletion::{Metadata, ScheduleRequest};
use deletion_undo::db::ModelDef;
use deletion_undo::{
    DeletionUndoManager, ErrorKind, EventStatus, MemoryStorage, Record, RecordKey, Schema,
    UndoConfig, UndoError,
};
use futures::future::join_all;
use serde_json::json;
use tokio_test::assert_ok;

struct Harness {
    storage: Arc<MemoryStorage>,
    clock: Arc<ManualClock>,
    manager: Arc<DeletionUndoManager<MemoryStorage>>,
}

async fn harness() -> Harness {
    let schema = Arc::new(farm::farm_planning_schema());
    let storage = Arc::new(MemoryStorage::new(&schema));
    storage.seed(farm::sample_reference_data()).await.unwrap();
    storage.seed(farm::sample_plan()).await.unwrap();
    storage.seed(farm::sample_pesticide()).await.unwrap();

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 5, 12, 8, 30, 0).unwrap(),
    ));
    let manager = Arc::new(DeletionUndoManager::with_clock(
        Arc::clone(&storage),
        schema,
        UndoConfig::default(),
        clock.clone(),
    ));
    Harness {
        storage,
        clock,
        manager,
    }
}

fn plan() -> RecordKey {
    RecordKey::new("CultivationPlan", SAMPLE_PLAN_ID)
}

async fn dump(storage: &MemoryStorage, rows: &[Record]) -> BTreeMap<RecordKey, Option<Record>> {
    let mut out = BTreeMap::new();
    for row in rows {
        out.insert(row.key(), storage.fetch(&row.key()).await.unwrap());
    }
    out
}

#[tokio::test]
async fn plan_round_trip_restores_every_owned_row() {
    let h = harness().await;
    let fixture = farm::sample_plan();
    let before = dump(&h.storage, &fixture).await;
    let total_before = h.storage.total_rows().await;

    let receipt = h
        .manager
        .schedule(plan(), "farmer-42", Metadata::new())
        .await
        .unwrap();
    assert_eq!(receipt.undo_deadline, h.clock.now() + Duration::minutes(5));
    assert_eq!(h.storage.total_rows().await, total_before - 11);
    assert_eq!(h.storage.row_count("Farm").await, 1);

    let event = h.manager.event(&receipt.token).await.unwrap();
    assert_eq!(event.snapshot.node_count(), 12);
    assert_eq!(event.actor_id, "farmer-42");

    h.clock.advance(Duration::minutes(2));
    let undone = h.manager.undo(&receipt.token).await.unwrap();
    assert_eq!(undone.rows_restored, 11);
    assert_eq!(undone.restored_at, h.clock.now());

    assert_eq!(dump(&h.storage, &fixture).await, before);
    assert_eq!(h.storage.total_rows().await, total_before);

    let err = h.manager.undo(&receipt.token).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyConsumed);
    assert_eq!(h.storage.total_rows().await, total_before);

    let event = h.manager.event(&receipt.token).await.unwrap();
    assert_eq!(event.status, EventStatus::Consumed);
    assert!(event.consumed_at.is_some());
}

#[tokio::test]
async fn concurrent_undos_restore_exactly_once() {
    let h = harness().await;
    let total_before = h.storage.total_rows().await;
    let receipt = h
        .manager
        .schedule(plan(), "farmer-42", Metadata::new())
        .await
        .unwrap();

    let attempts = (0..8).map(|_| {
        let manager = Arc::clone(&h.manager);
        let token = receipt.token.clone();
        tokio::spawn(async move { manager.undo(&token).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(result, Err(UndoError::AlreadyConsumed { .. })));
    }
    assert_eq!(h.storage.total_rows().await, total_before);
}

#[tokio::test]
async fn expired_token_is_flipped_and_refused() {
    let h = harness().await;
    let receipt = h
        .manager
        .schedule(plan(), "farmer-42", Metadata::new())
        .await
        .unwrap();

    h.clock.set(receipt.undo_deadline);
    let at_deadline = h
        .manager
        .schedule_with(ScheduleRequest::new(RecordKey::new("Pesticide", SAMPLE_PESTICIDE_ID), "farmer-42"))
        .await
        .unwrap();
    assert_ok!(h.manager.undo(&at_deadline.token).await);

    h.clock.advance(Duration::seconds(1));
    let err = h.manager.undo(&receipt.token).await.unwrap_err();
    assert!(matches!(err, UndoError::Expired { deadline } if deadline == receipt.undo_deadline));
    assert_eq!(
        h.manager.event(&receipt.token).await.unwrap().status,
        EventStatus::Expired
    );
    assert!(h.storage.fetch(&plan()).await.unwrap().is_none());

    let err = h.manager.undo(&receipt.token).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Expired);
}

#[tokio::test]
async fn token_exactly_at_deadline_still_restores() {
    let h = harness().await;
    let receipt = h
        .manager
        .schedule(plan(), "farmer-42", Metadata::new())
        .await
        .unwrap();

    h.clock.set(receipt.undo_deadline);
    let sweep = h.manager.sweeper().sweep_once().await.unwrap();
    assert_eq!(sweep.expired, 0);

    assert_ok!(h.manager.undo(&receipt.token).await);
}

#[tokio::test]
async fn missing_shared_record_blocks_restore() {
    let h = harness().await;
    let receipt = h
        .manager
        .schedule(
            RecordKey::new("Pesticide", SAMPLE_PESTICIDE_ID),
            "farmer-42",
            Metadata::new(),
        )
        .await
        .unwrap();
    assert_eq!(h.storage.row_count("PesticideUsageConstraint").await, 0);

    h.storage.remove(&RecordKey::new("Pest", 1)).await.unwrap();

    let err = h.manager.undo(&receipt.token).await.unwrap_err();
    match err {
        UndoError::ReferenceRecordNotFound { reference, path } => {
            assert_eq!(reference, RecordKey::new("Pest", 1));
            assert_eq!(path, "Pesticide#71/pest/Pest#1");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.storage.row_count("Pesticide").await, 0);
    assert_eq!(h.storage.row_count("PesticideUsageConstraint").await, 0);
    assert_eq!(h.storage.row_count("PesticideApplicationDetail").await, 0);
    assert_eq!(
        h.manager.event(&receipt.token).await.unwrap().status,
        EventStatus::Pending
    );
}

#[tokio::test]
async fn externally_referenced_record_is_restricted() {
    let h = harness().await;
    let total_before = h.storage.total_rows().await;

    let err = h
        .manager
        .schedule(RecordKey::new("Crop", 1), "farmer-42", Metadata::new())
        .await
        .unwrap_err();

    let failure = err.to_failure();
    assert_eq!(failure.error_kind, ErrorKind::DeleteRestricted);
    assert!(failure.detail.contains("Pesticide.crop_id"));
    assert_eq!(h.storage.total_rows().await, total_before);
    assert_eq!(h.storage.event_count().await, 0);
}

#[tokio::test]
async fn sweeper_expires_overdue_and_leaves_the_rest() {
    let h = harness().await;
    let stale = h
        .manager
        .schedule(plan(), "farmer-42", Metadata::new())
        .await
        .unwrap();
    let used = h
        .manager
        .schedule(
            RecordKey::new("Pesticide", SAMPLE_PESTICIDE_ID),
            "farmer-42",
            Metadata::new(),
        )
        .await
        .unwrap();
    h.manager.undo(&used.token).await.unwrap();

    h.clock.advance(Duration::minutes(10));
    let stats = h.manager.sweeper().sweep_once().await.unwrap();
    assert_eq!(stats.expired, 1);

    assert_eq!(
        h.manager.event(&stale.token).await.unwrap().status,
        EventStatus::Expired
    );
    assert_eq!(
        h.manager.event(&used.token).await.unwrap().status,
        EventStatus::Consumed
    );
}

#[tokio::test]
async fn persisted_event_json_shape() {
    let h = harness().await;
    let receipt = h
        .manager
        .schedule(plan(), "farmer-42", Metadata::new())
        .await
        .unwrap();
    let event = h.manager.event(&receipt.token).await.unwrap();

    let value = serde_json::to_value(&event).unwrap();
    let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
    for field in [
        "token",
        "resource_type",
        "resource_id",
        "actor_id",
        "status",
        "created_at",
        "undo_deadline",
        "consumed_at",
        "metadata",
        "toast_message",
        "snapshot",
    ] {
        assert!(keys.contains(&field), "missing {field}");
    }
    assert_eq!(value["status"], json!("pending"));
    assert_eq!(value["resource_id"], json!("8"));
    assert_eq!(value["snapshot"]["model"], json!("CultivationPlan"));
    assert_eq!(value["metadata"]["resource_dom_id"], json!("cultivation_plan_8"));
}

#[tokio::test]
async fn unknown_token_is_not_found() {
    let h = harness().await;
    let err = h.manager.undo("0123").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = h.manager.undo(&"ab".repeat(32)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn sibling_pointer_round_trips_whatever_the_declaration_order() {
    let schema = Arc::new(
        Schema::new()
            .with_model(
                ModelDef::new("Plan")
                    .owns("schedules", "Schedule", "plan_id")
                    .owns("fields", "Field", "plan_id"),
            )
            .with_model(ModelDef::new("Schedule").foreign_key("field_id", "Field"))
            .with_model(ModelDef::new("Field")),
    );
    let storage = Arc::new(MemoryStorage::new(&schema));
    let rows = vec![
        Record::new("Plan", 1, json!({"plan_name": "Autumn"})),
        Record::new("Field", 10, json!({"plan_id": 1, "area": 3.5})),
        Record::new("Schedule", 20, json!({"plan_id": 1, "field_id": 10})),
    ];
    storage.seed(rows.clone()).await.unwrap();
    let before = dump(&storage, &rows).await;

    let manager = DeletionUndoManager::new(Arc::clone(&storage), schema, UndoConfig::default());
    let receipt = manager
        .schedule(RecordKey::new("Plan", 1), "farmer-42", Metadata::new())
        .await
        .unwrap();
    assert_eq!(storage.total_rows().await, 0);

    let undone = manager.undo(&receipt.token).await.unwrap();
    assert_eq!(undone.rows_restored, 3);
    assert_eq!(dump(&storage, &rows).await, before);
}

#[tokio::test]
async fn zero_sweep_interval_does_not_stall_the_sweeper() {
    let h = harness().await;
    let config = UndoConfig {
        sweep_interval_secs: 0,
        ..UndoConfig::default()
    };
    let manager = DeletionUndoManager::with_clock(
        Arc::clone(&h.storage),
        Arc::new(farm::farm_planning_schema()),
        config,
        h.clock.clone(),
    );
    let receipt = manager.schedule(plan(), "farmer-42", Metadata::new()).await.unwrap();
    h.clock.advance(Duration::minutes(10));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = Arc::new(manager.sweeper()).spawn(shutdown_rx);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        manager.event(&receipt.token).await.unwrap().status,
        EventStatus::Expired
    );
}
