use super::*;
use crate::clock::FixedClock;
use crate::schedule::BusinessCalendar;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use ulid::Ulid;

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("salonslot_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(path.with_extension("wal.tmp"));
    path
}

fn clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()))
}

fn open(path: &std::path::Path) -> Arc<Engine> {
    Arc::new(Engine::new("salon", path.to_path_buf(), clock()).unwrap())
}

fn request(time: NaiveTime, name: &str) -> NewReservation {
    NewReservation {
        date: day(),
        time,
        customer_name: name.into(),
        phone: None,
        staff_id: None,
    }
}

fn ok() -> Result<(), EngineError> {
    Ok(())
}

fn legacy(time: NaiveTime) -> ReservationRecord {
    ReservationRecord {
        id: Ulid::new(),
        date: day(),
        time,
        customer_name: "Old Customer".into(),
        phone: Some("090-0000-0000".into()),
        staff_id: None,
        status: ReservationStatus::Active,
        created_at: Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap(),
        canceled_at: None,
    }
}

// ── Reserve / cancel ─────────────────────────────────────

#[tokio::test]
async fn engine_reserve_and_lookup() {
    let engine = open(&test_wal_path("reserve_lookup.wal"));
    let record = engine.acquire_and_reserve(request(t(10, 0), "Yuki"), ok).await.unwrap();

    assert!(record.is_active());
    assert_eq!(record.created_at, Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());
    assert_eq!(engine.reverse_lookup(&record.id), Some(record.index_entry()));
    assert_eq!(engine.record_at(day(), t(10, 0), &record.id), Some(record));
    assert_eq!(engine.reserved_times(day()), [t(10, 0)].into());
}

#[tokio::test]
async fn engine_second_reserve_same_slot_conflicts() {
    let engine = open(&test_wal_path("dup_slot.wal"));
    let first = engine.acquire_and_reserve(request(t(10, 0), "Yuki"), ok).await.unwrap();
    let err = engine
        .acquire_and_reserve(request(t(10, 0), "Haruto"), ok)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateSlot(id) if id == first.id));
    assert_eq!(engine.store.record_count(), 1);
}

#[tokio::test]
async fn engine_staff_does_not_split_slot() {
    let engine = open(&test_wal_path("staff_same_slot.wal"));
    let mut with_staff = request(t(10, 0), "Yuki");
    with_staff.staff_id = Some("aiko".into());
    engine.acquire_and_reserve(with_staff, ok).await.unwrap();

    let mut other_staff = request(t(10, 0), "Haruto");
    other_staff.staff_id = Some("ren".into());
    let err = engine.acquire_and_reserve(other_staff, ok).await.unwrap_err();
    assert!(matches!(err, EngineError::DuplicateSlot(_)));
}

#[tokio::test]
async fn engine_recheck_failure_writes_nothing() {
    let engine = open(&test_wal_path("recheck_fail.wal"));
    let err = engine
        .acquire_and_reserve(request(t(10, 0), "Yuki"), || Err(EngineError::CutoffPassed))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CutoffPassed));
    assert_eq!(engine.store.record_count(), 0);
    assert_eq!(engine.wal_appends_since_compact().await, 0);
}

#[tokio::test]
async fn engine_duplicate_checked_before_recheck() {
    let engine = open(&test_wal_path("dup_before_recheck.wal"));
    engine.acquire_and_reserve(request(t(10, 0), "Yuki"), ok).await.unwrap();
    let err = engine
        .acquire_and_reserve(request(t(10, 0), "Haruto"), || Err(EngineError::CutoffPassed))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateSlot(_)));
}

#[tokio::test]
async fn engine_cancel_lifecycle() {
    let engine = open(&test_wal_path("cancel_lifecycle.wal"));
    let record = engine.acquire_and_reserve(request(t(11, 0), "Yuki"), ok).await.unwrap();

    let canceled = engine
        .acquire_and_cancel(day(), t(11, 0), record.id, ok)
        .await
        .unwrap();
    assert_eq!(canceled.status, ReservationStatus::Canceled);
    assert!(canceled.canceled_at.is_some());
    assert_eq!(
        engine.reverse_lookup(&record.id).unwrap().status,
        ReservationStatus::Canceled
    );
    assert!(engine.reserved_times(day()).is_empty());

    let again = engine
        .acquire_and_cancel(day(), t(11, 0), record.id, ok)
        .await
        .unwrap_err();
    assert!(matches!(again, EngineError::AlreadyCanceled(id) if id == record.id));

    let missing = engine
        .acquire_and_cancel(day(), t(11, 0), Ulid::new(), ok)
        .await
        .unwrap_err();
    assert!(matches!(missing, EngineError::NotFound(_)));
}

#[tokio::test]
async fn engine_cancel_recheck_blocks() {
    let engine = open(&test_wal_path("cancel_recheck.wal"));
    let record = engine.acquire_and_reserve(request(t(11, 0), "Yuki"), ok).await.unwrap();
    let err = engine
        .acquire_and_cancel(day(), t(11, 0), record.id, || Err(EngineError::CutoffPassed))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CutoffPassed));
    assert!(engine.record_at(day(), t(11, 0), &record.id).unwrap().is_active());
}

#[tokio::test]
async fn engine_canceled_slot_can_be_rebooked() {
    let engine = open(&test_wal_path("rebook.wal"));
    let first = engine.acquire_and_reserve(request(t(12, 0), "Yuki"), ok).await.unwrap();
    engine.acquire_and_cancel(day(), t(12, 0), first.id, ok).await.unwrap();
    let second = engine.acquire_and_reserve(request(t(12, 0), "Haruto"), ok).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(engine.store.slot_len(day(), t(12, 0)), 2);
    assert_eq!(engine.store.active_at(day(), t(12, 0)).unwrap().id, second.id);
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn engine_concurrent_reserve_single_winner() {
    let engine = open(&test_wal_path("concurrent_reserve.wal"));

    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .acquire_and_reserve(request(t(14, 0), &format!("customer {i}")), ok)
                .await
        }));
    }
    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|h| h.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, EngineError::DuplicateSlot(_)))
    );
    assert_eq!(engine.store.record_count(), 1);
    assert!(engine.locks.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn engine_distinct_slots_all_succeed() {
    let engine = open(&test_wal_path("distinct_slots.wal"));

    let mut handles = Vec::new();
    for slot in 0..16u32 {
        let engine = engine.clone();
        let time = t(10 + slot / 2, (slot % 2) * 30);
        handles.push(tokio::spawn(async move {
            engine.acquire_and_reserve(request(time, "Yuki"), ok).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.reserved_times(day()).len(), 16);
}

#[tokio::test]
async fn engine_operation_completes_after_caller_gives_up() {
    let engine = open(&test_wal_path("run_to_completion.wal"));
    let key = engine.slot_key(day(), t(15, 0));
    let held = engine.locks.acquire(&key).await;

    let attempt = tokio::time::timeout(
        Duration::from_millis(50),
        engine.acquire_and_reserve(request(t(15, 0), "Yuki"), ok),
    )
    .await;
    assert!(attempt.is_err(), "caller should time out while the turn is held");

    engine.locks.release(held);
    let mut booked = false;
    for _ in 0..100 {
        if engine.store.active_at(day(), t(15, 0)).is_some() {
            booked = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(booked, "abandoned reservation must still be written");
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn engine_wal_replay() {
    let path = test_wal_path("replay.wal");
    let (kept, dropped) = {
        let engine = open(&path);
        let kept = engine.acquire_and_reserve(request(t(10, 0), "Yuki"), ok).await.unwrap();
        let dropped = engine.acquire_and_reserve(request(t(10, 30), "Haruto"), ok).await.unwrap();
        engine.acquire_and_cancel(day(), t(10, 30), dropped.id, ok).await.unwrap();
        (kept, dropped)
    };

    let engine = open(&path);
    assert_eq!(engine.reserved_times(day()), [t(10, 0)].into());
    assert_eq!(engine.reverse_lookup(&kept.id), Some(kept.index_entry()));
    assert_eq!(
        engine.reverse_lookup(&dropped.id).unwrap().status,
        ReservationStatus::Canceled
    );
    let err = engine
        .acquire_and_reserve(request(t(10, 0), "Sora"), ok)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateSlot(_)));
}

#[tokio::test]
async fn engine_bookings_after_torn_tail_survive_restart() {
    let path = test_wal_path("torn_then_append.wal");
    {
        let engine = open(&path);
        engine.acquire_and_reserve(request(t(10, 0), "Yuki"), ok).await.unwrap();
    }
    {
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[7u8, 0, 0]).unwrap();
    }
    {
        let engine = open(&path);
        assert_eq!(engine.reserved_times(day()), [t(10, 0)].into());
        engine.acquire_and_reserve(request(t(10, 30), "Haruto"), ok).await.unwrap();
    }

    let engine = open(&path);
    assert_eq!(engine.reserved_times(day()), [t(10, 0), t(10, 30)].into());
    let err = engine
        .acquire_and_reserve(request(t(10, 30), "Ren"), ok)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateSlot(_)));
}

#[tokio::test]
async fn engine_compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    {
        let engine = open(&path);
        for slot in 0..6u32 {
            let time = t(10 + slot, 0);
            let r = engine.acquire_and_reserve(request(time, "Yuki"), ok).await.unwrap();
            if slot % 2 == 0 {
                engine.acquire_and_cancel(day(), time, r.id, ok).await.unwrap();
            }
        }
        assert_eq!(engine.wal_appends_since_compact().await, 9);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        engine.acquire_and_reserve(request(t(17, 0), "Sora"), ok).await.unwrap();
    }

    let engine = open(&path);
    assert_eq!(engine.store.record_count(), 7);
    assert_eq!(
        engine.reserved_times(day()),
        [t(11, 0), t(13, 0), t(15, 0), t(17, 0)].into()
    );
}

// ── Legacy records / index repair ────────────────────────

#[tokio::test]
async fn engine_legacy_record_found_by_scan_and_repaired() {
    let path = test_wal_path("legacy_repair.wal");
    let calendar = BusinessCalendar::new(t(10, 0), t(19, 0), 30);
    let old = legacy(t(13, 30));
    {
        let engine = open(&path);
        engine.import_legacy(old.clone()).await.unwrap();
        assert!(engine.reverse_lookup(&old.id).is_none());
        assert_eq!(engine.reserved_times(day()), [t(13, 30)].into());

        let found = engine
            .scan_for(&old.id, &calendar, day() - chrono::Days::new(3), day())
            .unwrap();
        assert_eq!(found.id, old.id);

        let entry = engine.repair_index(found.date, found.time, found.id).await.unwrap();
        assert_eq!(entry, Some(old.index_entry()));
        assert_eq!(engine.reverse_lookup(&old.id), Some(old.index_entry()));

        // A second repair is a no-op.
        let before = engine.wal_appends_since_compact().await;
        engine.repair_index(found.date, found.time, found.id).await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, before);
    }

    let engine = open(&path);
    assert_eq!(engine.reverse_lookup(&old.id), Some(old.index_entry()));
}

#[tokio::test]
async fn engine_scan_outside_window_misses() {
    let engine = open(&test_wal_path("scan_window.wal"));
    let calendar = BusinessCalendar::new(t(10, 0), t(19, 0), 30);
    let old = legacy(t(10, 0));
    engine.import_legacy(old.clone()).await.unwrap();

    let later = day() + chrono::Days::new(1);
    assert!(engine.scan_for(&old.id, &calendar, later, later + chrono::Days::new(5)).is_none());
    // Off-grid slot time is not probed.
    let off_grid = BusinessCalendar::new(t(10, 15), t(19, 0), 30);
    assert!(engine.scan_for(&old.id, &off_grid, day(), day()).is_none());
}

#[tokio::test]
async fn engine_repair_missing_record_is_none() {
    let engine = open(&test_wal_path("repair_missing.wal"));
    let entry = engine.repair_index(day(), t(10, 0), Ulid::new()).await.unwrap();
    assert!(entry.is_none());
}

#[tokio::test]
async fn engine_legacy_import_respects_occupied_slot() {
    let engine = open(&test_wal_path("legacy_occupied.wal"));
    engine.acquire_and_reserve(request(t(10, 0), "Yuki"), ok).await.unwrap();
    let err = engine.import_legacy(legacy(t(10, 0))).await.unwrap_err();
    assert!(matches!(err, EngineError::DuplicateSlot(_)));
}

#[tokio::test]
async fn engine_legacy_cancel_by_slot() {
    let engine = open(&test_wal_path("legacy_cancel.wal"));
    let old = legacy(t(16, 0));
    engine.import_legacy(old.clone()).await.unwrap();
    let canceled = engine.acquire_and_cancel(day(), t(16, 0), old.id, ok).await.unwrap();
    assert_eq!(canceled.customer_name, "Old Customer");
    assert!(engine.reserved_times(day()).is_empty());
}

// ── Read path ────────────────────────────────────────────

#[tokio::test]
async fn engine_day_slots_reflect_reservations() {
    let engine = open(&test_wal_path("day_slots.wal"));
    let calendar = BusinessCalendar::new(t(10, 0), t(19, 0), 30);
    engine.acquire_and_reserve(request(t(13, 0), "Yuki"), ok).await.unwrap();

    let now = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_time(t(12, 0));
    let slots = engine.day_slots(day(), &calendar, None, 120, now).unwrap();
    assert_eq!(slots.len(), 18);
    let one_pm = slots.iter().find(|s| s.time == t(13, 0)).unwrap();
    assert_eq!(one_pm.reason, Some(SlotReason::Reserved));
    assert_eq!(slots.iter().filter(|s| s.available).count(), 17);
}
