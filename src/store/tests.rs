//! Unit tests for the file-backed state store.

use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::{TimeDelta, TimeZone, Utc};
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::instance::LifecycleState;

struct StoreFixture {
    store: FileStore,
    _dir: TempDir,
}

#[fixture]
fn fixture() -> StoreFixture {
    let dir = TempDir::new().expect("temp dir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp dir");
    StoreFixture {
        store: FileStore::new(root.join("state").join("instances.json")),
        _dir: dir,
    }
}

fn record(id: &str) -> InstanceRecord {
    let launch = Utc
        .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp");
    InstanceRecord::new(
        InstanceId::from(id),
        "DEV1-S",
        "fr-par-1",
        launch,
        Duration::from_secs(3600),
    )
    .expect("record should build")
}

#[rstest]
fn missing_file_lists_nothing(fixture: StoreFixture) {
    assert!(fixture.store.list_all().expect("list").is_empty());
}

#[rstest]
fn save_then_get_round_trips(fixture: StoreFixture) {
    let rec = record("fr-par-1/a");
    fixture.store.save(&rec).expect("save");
    assert_eq!(fixture.store.get(&rec.id).expect("get"), rec);
}

#[rstest]
fn get_reports_missing_records(fixture: StoreFixture) {
    let id = InstanceId::from("fr-par-1/missing");
    let err = fixture.store.get(&id).expect_err("missing record");
    assert_eq!(err, StoreError::NotFound { id });
}

#[rstest]
fn save_upserts_by_identifier(fixture: StoreFixture) {
    let rec = record("fr-par-1/a");
    fixture.store.save(&rec).expect("first save");
    let running = rec.clone().with_state(LifecycleState::running());
    fixture.store.save(&running).expect("second save");
    fixture.store.save(&record("fr-par-1/b")).expect("other save");

    let all = fixture.store.list_all().expect("list");
    assert_eq!(all.len(), 2);
    assert_eq!(
        fixture.store.get(&rec.id).expect("get").lifecycle_state,
        LifecycleState::running()
    );
}

#[rstest]
fn save_rejects_expiry_regression(fixture: StoreFixture) {
    let mut rec = record("fr-par-1/a");
    rec.extend_lease(Duration::from_secs(600)).expect("extend");
    fixture.store.save(&rec).expect("save extended");

    let stale = record("fr-par-1/a");
    let err = fixture.store.save(&stale).expect_err("regression");
    assert_eq!(err, StoreError::ExpiryRegression { id: rec.id.clone() });
    assert_eq!(fixture.store.get(&rec.id).expect("get"), rec);
}

#[rstest]
fn update_applies_mutation_atomically(fixture: StoreFixture) {
    let rec = record("fr-par-1/a");
    fixture.store.save(&rec).expect("save");

    let expires_at = fixture
        .store
        .update(&rec.id, |stored| {
            stored
                .extend_lease(Duration::from_secs(1800))
                .map_err(|_| StoreError::Encode(String::from("unexpected")))
        })
        .expect("update");

    assert_eq!(expires_at, rec.expires_at + TimeDelta::minutes(30));
    assert_eq!(
        fixture.store.get(&rec.id).expect("get").expires_at,
        expires_at
    );
}

#[rstest]
fn update_writes_nothing_when_mutation_fails(fixture: StoreFixture) {
    let rec = record("fr-par-1/a");
    fixture.store.save(&rec).expect("save");

    let result: Result<(), StoreError> = fixture.store.update(&rec.id, |stored| {
        stored.lifecycle_state = LifecycleState::stopped();
        Err(StoreError::Encode(String::from("boom")))
    });

    assert!(result.is_err());
    assert_eq!(fixture.store.get(&rec.id).expect("get"), rec);
}

#[rstest]
fn update_rejects_moving_expiry_backwards(fixture: StoreFixture) {
    let rec = record("fr-par-1/a");
    fixture.store.save(&rec).expect("save");

    let result: Result<(), StoreError> = fixture.store.update(&rec.id, |stored| {
        stored.expires_at -= TimeDelta::minutes(5);
        Ok(())
    });

    assert_eq!(
        result,
        Err(StoreError::ExpiryRegression { id: rec.id.clone() })
    );
}

#[rstest]
fn update_rejects_identifier_changes(fixture: StoreFixture) {
    let rec = record("fr-par-1/a");
    fixture.store.save(&rec).expect("save");

    let result: Result<(), StoreError> = fixture.store.update(&rec.id, |stored| {
        stored.id = InstanceId::from("fr-par-1/b");
        Ok(())
    });

    assert_eq!(result, Err(StoreError::IdChanged { id: rec.id.clone() }));
    assert_eq!(fixture.store.get(&rec.id).expect("get"), rec);
    assert!(matches!(
        fixture.store.get(&InstanceId::from("fr-par-1/b")),
        Err(StoreError::NotFound { .. })
    ));
}

#[rstest]
fn update_reports_missing_records(fixture: StoreFixture) {
    let id = InstanceId::from("fr-par-1/ghost");
    let result: Result<(), StoreError> = fixture.store.update(&id, |_| Ok(()));
    assert_eq!(result, Err(StoreError::NotFound { id }));
}

#[rstest]
fn delete_removes_record(fixture: StoreFixture) {
    let rec = record("fr-par-1/a");
    fixture.store.save(&rec).expect("save");
    fixture.store.delete(&rec.id).expect("delete");
    assert!(fixture.store.list_all().expect("list").is_empty());
    assert!(matches!(
        fixture.store.delete(&rec.id),
        Err(StoreError::NotFound { .. })
    ));
}

#[rstest]
fn document_layout_keys_records_by_identifier(fixture: StoreFixture) {
    let rec = record("fr-par-1/a");
    fixture.store.save(&rec).expect("save");

    let raw = std::fs::read_to_string(fixture.store.path()).expect("read store file");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
    let entry = value
        .get("instances")
        .and_then(|instances| instances.get("fr-par-1/a"))
        .expect("record keyed by id");
    assert!(entry.get("instance").is_some());
    assert!(entry.get("created_at").is_some());
    assert!(value.get("updated_at").is_some());
}

#[rstest]
fn corrupt_document_surfaces_parse_error(fixture: StoreFixture) {
    let parent = fixture.store.path().parent().expect("parent");
    std::fs::create_dir_all(parent).expect("create parent");
    std::fs::write(fixture.store.path(), "not json").expect("write garbage");
    assert!(matches!(
        fixture.store.list_all(),
        Err(StoreError::Parse { .. })
    ));
}
