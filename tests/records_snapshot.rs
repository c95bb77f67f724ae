mod common;

use common::user;
use std::time::Duration;
use ticketgate::model::Ticket;
use ticketgate::prelude::*;

fn ticket(id: &str, user_id: &str, number: &str) -> Ticket {
    Ticket {
        id: id.to_string(),
        user_id: user_id.to_string(),
        resource_id: "juanda".to_string(),
        resource_name: "Butik Emas LM - Juanda".to_string(),
        ticket_number: number.to_string(),
        code: "A1B2C3".to_string(),
        time_slot: "08:00-09:00".to_string(),
        created_at: chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
    }
}

#[tokio::test]
async fn flushed_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("database.json");

    let store = RecordStore::open(&path).await.unwrap();
    assert_eq!(store.user_count(), 0);
    store.put_user(user("u1"));
    store.put_ticket(ticket("t1", "u1", "AAA-001"));
    store.flush().await.unwrap();
    store.shutdown().await.unwrap();

    let reopened = RecordStore::open(&path).await.unwrap();
    assert_eq!(reopened.get_user("u1"), store.get_user("u1"));
    assert_eq!(reopened.get_ticket("t1"), Some(ticket("t1", "u1", "AAA-001")));
    assert_eq!(reopened.highest_ticket_sequence(), 1);
    reopened.shutdown().await.unwrap();
}

#[tokio::test]
async fn snapshot_uses_stored_field_names_and_leaves_no_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("database.json");
    let store = RecordStore::open(&path).await.unwrap();
    store.put_user(user("u1"));
    store.put_ticket(ticket("t1", "u1", "AAA-001"));
    store.flush().await.unwrap();

    let json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(json["users"]["u1"]["nik"], user("u1").national_id);
    assert_eq!(json["tickets"]["t1"]["location_id"], "juanda");
    assert_eq!(json["tickets"]["t1"]["ticket_number"], "AAA-001");
    assert!(!dir.path().join("database.json.tmp").exists());
    store.shutdown().await.unwrap();
}

#[tokio::test]
async fn background_snapshots_catch_up_with_bursts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("database.json");
    let store = RecordStore::open(&path).await.unwrap();
    store.put_user(user("u1"));
    for i in 1..=50 {
        store.put_ticket(ticket(&format!("t{i}"), "u1", &ticketgate::ident::format_ticket_number(i)));
    }

    let mut persisted = 0;
    for _ in 0..100 {
        if let Ok(bytes) = std::fs::read(&path) {
            if let Ok(json) = serde_json::from_slice::<serde_json::Value>(&bytes) {
                persisted = json["tickets"].as_object().map_or(0, |t| t.len());
                if persisted == 50 {
                    break;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(persisted, 50);
    store.shutdown().await.unwrap();
}

#[tokio::test]
async fn garbage_snapshot_is_a_startup_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("database.json");
    std::fs::write(&path, b"{ not json").unwrap();
    let err = RecordStore::open(&path).await.unwrap_err();
    assert!(matches!(err, StoreError::Codec(_)));
}

#[tokio::test]
async fn writes_after_shutdown_stay_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("database.json");
    let store = RecordStore::open(&path).await.unwrap();
    store.put_user(user("u1"));
    store.shutdown().await.unwrap();

    store.put_user(user("u2"));
    assert_eq!(store.user_count(), 2);
    assert!(matches!(store.flush().await.unwrap_err(), StoreError::Closed));

    let reopened = RecordStore::open(&path).await.unwrap();
    assert_eq!(reopened.user_count(), 1);
    reopened.shutdown().await.unwrap();
}

#[tokio::test]
async fn uniqueness_spans_email_and_phone() {
    let store = RecordStore::in_memory();
    store.insert_user_unique(user("u1")).unwrap();

    let mut clash = user("u2");
    clash.phone = user("u1").email;
    assert!(matches!(
        store.insert_user_unique(clash),
        Err(StoreError::Conflict(ConflictField::Phone))
    ));

    let mut clash = user("u3");
    clash.email = user("u1").email;
    assert!(matches!(
        store.insert_user_unique(clash),
        Err(StoreError::Conflict(ConflictField::Email))
    ));
    assert_eq!(store.user_count(), 1);
    assert!(store.find_user_by_email_or_phone(&user("u1").phone).is_some());
}

#[tokio::test]
async fn tickets_for_user_are_ordered() {
    let store = RecordStore::in_memory();
    let mut late = ticket("t2", "u1", "AAA-002");
    late.created_at += chrono::TimeDelta::seconds(5);
    store.put_ticket(late.clone());
    store.put_ticket(ticket("t1", "u1", "AAA-001"));
    store.put_ticket(ticket("t3", "u2", "AAA-003"));

    let numbers: Vec<_> =
        store.tickets_for_user("u1").into_iter().map(|t| t.ticket_number).collect();
    assert_eq!(numbers, vec!["AAA-001", "AAA-002"]);
}
