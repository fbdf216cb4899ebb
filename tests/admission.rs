use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use futures::future::join_all;

use tablebook::clock::ManualClock;
use tablebook::engine::{AdmissionPolicy, Engine, EngineError};
use tablebook::model::{LocalizedText, NewRestaurant, RestaurantId, User};
use tablebook::notify::NotifyHub;

// ── Test infrastructure ──────────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("tablebook_int_test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2030, 3, 10)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
}

fn slot_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 3, 11).unwrap()
}

fn slot_time() -> NaiveTime {
    NaiveTime::from_hms_opt(20, 0, 0).unwrap()
}

fn guest(id: u64) -> User {
    User {
        id,
        name: format!("guest{id}"),
        email: format!("guest{id}@example.com"),
        is_admin: false,
    }
}

async fn start_engine(name: &str, capacity: u32) -> (Arc<Engine>, RestaurantId) {
    let engine = Engine::new(
        test_wal_path(name),
        AdmissionPolicy::ConfirmImmediately,
        Arc::new(ManualClock::new(now())),
        Arc::new(NotifyHub::new()),
    )
    .unwrap();
    let restaurant = engine
        .create_restaurant(NewRestaurant {
            name: LocalizedText::new("Mama Noura"),
            area: LocalizedText::new("Al Malaz"),
            cuisine: LocalizedText::new("Shawarma"),
            opens_at: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            closes_at: NaiveTime::from_hms_opt(23, 59, 0).unwrap(),
            capacity,
        })
        .await
        .unwrap();
    (Arc::new(engine), restaurant.id)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_oversell_a_slot() {
    let capacity = 25;
    let (engine, rid) = start_engine("concurrent_oversell.wal", capacity).await;

    let handles = (0..40u64).map(|i| {
        let engine = engine.clone();
        tokio::spawn(async move {
            let people = (i % 3 + 1) as u32;
            engine
                .create_booking(Some(&guest(i)), rid, slot_date(), slot_time(), people)
                .await
        })
    });

    let mut admitted = 0;
    for result in join_all(handles).await {
        match result.unwrap() {
            Ok(b) => admitted += b.people,
            Err(EngineError::CapacityExceeded { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert!(admitted <= capacity);
    let remaining = engine.remaining_seats(rid, slot_date(), slot_time()).await.unwrap();
    assert_eq!(admitted + remaining, capacity);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_seat_goes_to_exactly_one_caller() {
    let (engine, rid) = start_engine("last_seat.wal", 1).await;

    let mut handles = Vec::new();
    for i in 0..16u64 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_booking(Some(&guest(i)), rid, slot_date(), slot_time(), 1)
                .await
                .is_ok()
        }));
    }
    let mut winners = 0;
    for h in handles {
        if h.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancel_and_rebook_stay_within_capacity() {
    let capacity = 10;
    let (engine, rid) = start_engine("cancel_rebook.wal", capacity).await;

    let mut first_wave = Vec::new();
    for i in 0..5u64 {
        let b = engine
            .create_booking(Some(&guest(i)), rid, slot_date(), slot_time(), 2)
            .await
            .unwrap();
        first_wave.push(b);
    }

    let mut handles = Vec::new();
    for b in first_wave {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let owner = guest(b.user_id);
            engine.cancel_booking(b.id, Some(&owner)).await.map(|_| 0)
        }));
    }
    for i in 100..110u64 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_booking(Some(&guest(i)), rid, slot_date(), slot_time(), 2)
                .await
                .map(|b| b.people)
        }));
    }

    let mut rebooked = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(people) => rebooked += people,
            Err(EngineError::CapacityExceeded { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(rebooked <= capacity);
    let remaining = engine.remaining_seats(rid, slot_date(), slot_time()).await.unwrap();
    assert_eq!(rebooked + remaining, capacity);
}
