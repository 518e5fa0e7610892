use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use ulid::Ulid;

use super::*;
use crate::model::*;
use crate::notify::NotifyHub;

const H: Minute = 60;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("agenda_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn test_engine(name: &str) -> Engine {
    let path = test_wal_path(name);
    let notify = Arc::new(NotifyHub::new());
    Engine::new(path, notify, 0).unwrap()
}

/// Fixed far-future dates so "not in the past" never trips a test.
fn future_day(weekday: chrono::Weekday) -> NaiveDate {
    NaiveDate::from_isoywd_opt(2099, 10, weekday).unwrap()
}

/// Professional working Tuesdays 09:00–18:00 with a 12:00–13:00 break.
async fn tuesday_professional(engine: &Engine) -> Ulid {
    let pid = Ulid::new();
    engine.create_professional(pid, None).await.unwrap();
    engine
        .add_window(Ulid::new(), pid, Weekday::Tue, TimeSpan::new(9 * H, 18 * H))
        .await
        .unwrap();
    engine
        .add_break(Ulid::new(), pid, TimeSpan::new(12 * H, 13 * H))
        .await
        .unwrap();
    pid
}

#[tokio::test]
async fn create_and_list_professionals() {
    let engine = test_engine("create_list.wal");

    let id = Ulid::new();
    engine
        .create_professional(id, Some("Dr. Reyes".into()))
        .await
        .unwrap();

    let listed = engine.list_professionals().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
    assert_eq!(listed[0].name.as_deref(), Some("Dr. Reyes"));
}

#[tokio::test]
async fn listing_waits_for_in_flight_mutation() {
    let engine = Arc::new(test_engine("list_under_write.wal"));
    let id = Ulid::new();
    engine
        .create_professional(id, Some("Dr. Sato".into()))
        .await
        .unwrap();

    // Hold the write lock the way a booking does across its WAL append.
    let ps = engine.get_professional(&id).unwrap();
    let guard = ps.write().await;

    let listing = tokio::spawn({
        let engine = engine.clone();
        async move { engine.list_professionals().await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!listing.is_finished());

    drop(guard);
    let listed = listing.await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
}

#[tokio::test]
async fn duplicate_professional_rejected() {
    let engine = test_engine("dup_professional.wal");

    let id = Ulid::new();
    engine.create_professional(id, None).await.unwrap();
    let result = engine.create_professional(id, None).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn slots_for_working_day() {
    let engine = test_engine("slots_working_day.wal");
    let pid = tuesday_professional(&engine).await;

    let slots = engine
        .available_slots(pid, future_day(chrono::Weekday::Tue), 60)
        .await
        .unwrap();

    // 09:00 through 11:00 every 15 minutes, then 13:00 through 17:00
    let expected: Vec<Minute> = (0..=8)
        .map(|i| 9 * H + i * 15)
        .chain((0..=16).map(|i| 13 * H + i * 15))
        .collect();
    assert_eq!(slots, expected);
}

#[tokio::test]
async fn slots_empty_on_non_working_day() {
    let engine = test_engine("slots_non_working.wal");
    let pid = tuesday_professional(&engine).await;

    let slots = engine
        .available_slots(pid, future_day(chrono::Weekday::Wed), 60)
        .await
        .unwrap();
    assert!(slots.is_empty());
}

#[tokio::test]
async fn slots_empty_for_unknown_professional() {
    let engine = test_engine("slots_unknown.wal");
    let slots = engine
        .available_slots(Ulid::new(), future_day(chrono::Weekday::Tue), 60)
        .await
        .unwrap();
    assert!(slots.is_empty());
}

#[tokio::test]
async fn booking_removes_overlapping_slots() {
    let engine = test_engine("booking_removes_slots.wal");
    let pid = tuesday_professional(&engine).await;
    let day = future_day(chrono::Weekday::Tue);

    engine
        .book_appointment(Ulid::new(), pid, day, 10 * H, 60, None)
        .await
        .unwrap();

    let slots = engine.available_slots(pid, day, 60).await.unwrap();
    // Nothing between 09:15 and 10:45 can start any more
    assert!(!slots.contains(&(10 * H)));
    assert!(!slots.contains(&(9 * H + 15)));
    assert!(!slots.contains(&(10 * H + 45)));
    // Back-to-back starts survive
    assert!(slots.contains(&(9 * H)));
    assert!(slots.contains(&(11 * H)));
}

#[tokio::test]
async fn overlapping_booking_conflicts() {
    let engine = test_engine("overlap_conflict.wal");
    let pid = tuesday_professional(&engine).await;
    let day = future_day(chrono::Weekday::Tue);

    let first = Ulid::new();
    engine
        .book_appointment(first, pid, day, 10 * H, 60, None)
        .await
        .unwrap();

    let result = engine
        .book_appointment(Ulid::new(), pid, day, 10 * H + 30, 60, None)
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(id)) if id == first));
}

#[tokio::test]
async fn back_to_back_bookings_allowed() {
    let engine = test_engine("back_to_back.wal");
    let pid = tuesday_professional(&engine).await;
    let day = future_day(chrono::Weekday::Tue);

    engine
        .book_appointment(Ulid::new(), pid, day, 10 * H, 60, None)
        .await
        .unwrap();
    engine
        .book_appointment(Ulid::new(), pid, day, 11 * H, 60, None)
        .await
        .unwrap();
    engine
        .book_appointment(Ulid::new(), pid, day, 9 * H, 60, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn booking_on_non_working_day_unavailable() {
    let engine = test_engine("book_non_working.wal");
    let pid = tuesday_professional(&engine).await;

    let result = engine
        .book_appointment(Ulid::new(), pid, future_day(chrono::Weekday::Sun), 10 * H, 60, None)
        .await;
    assert!(matches!(result, Err(EngineError::Unavailable(_))));
}

#[tokio::test]
async fn booking_outside_window_hours_allowed_on_working_day() {
    // Validation is day-level: any working hours that date admit a booking,
    // even one outside the windows. Clients pick starts from the slot query.
    let engine = test_engine("book_outside_hours.wal");
    let pid = tuesday_professional(&engine).await;

    engine
        .book_appointment(Ulid::new(), pid, future_day(chrono::Weekday::Tue), 20 * H, 60, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn booking_in_the_past_rejected() {
    let engine = test_engine("book_past.wal");
    let pid = tuesday_professional(&engine).await;

    // 2000-01-04 was a Tuesday
    let past = NaiveDate::from_ymd_opt(2000, 1, 4).unwrap();
    let result = engine
        .book_appointment(Ulid::new(), pid, past, 10 * H, 60, None)
        .await;
    assert!(matches!(result, Err(EngineError::PastDate(_))));
}

#[tokio::test]
async fn booking_bad_duration_rejected() {
    let engine = test_engine("book_bad_duration.wal");
    let pid = tuesday_professional(&engine).await;
    let day = future_day(chrono::Weekday::Tue);

    assert!(matches!(
        engine.book_appointment(Ulid::new(), pid, day, 10 * H, 0, None).await,
        Err(EngineError::InvalidDuration(_))
    ));
    assert!(matches!(
        engine.book_appointment(Ulid::new(), pid, day, 23 * H, 2 * H, None).await,
        Err(EngineError::OutOfDay(_))
    ));
}

#[tokio::test]
async fn booking_unknown_professional_not_found() {
    let engine = test_engine("book_unknown.wal");
    let result = engine
        .book_appointment(Ulid::new(), Ulid::new(), future_day(chrono::Weekday::Tue), 10 * H, 60, None)
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn day_off_blocks_slots_and_bookings() {
    let engine = test_engine("day_off.wal");
    let pid = tuesday_professional(&engine).await;
    let day = future_day(chrono::Weekday::Tue);

    let off_id = Ulid::new();
    engine.add_day_off(off_id, pid, day).await.unwrap();

    assert!(engine.available_slots(pid, day, 60).await.unwrap().is_empty());
    assert!(matches!(
        engine.book_appointment(Ulid::new(), pid, day, 10 * H, 60, None).await,
        Err(EngineError::Unavailable(_))
    ));

    // Removing the day off restores the schedule
    engine.remove_day_off(off_id).await.unwrap();
    assert!(!engine.available_slots(pid, day, 60).await.unwrap().is_empty());
    engine
        .book_appointment(Ulid::new(), pid, day, 10 * H, 60, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn cancelled_appointment_frees_its_slot() {
    let engine = test_engine("cancel_frees.wal");
    let pid = tuesday_professional(&engine).await;
    let day = future_day(chrono::Weekday::Tue);

    let aid = Ulid::new();
    engine
        .book_appointment(aid, pid, day, 10 * H, 60, None)
        .await
        .unwrap();
    assert!(!engine.available_slots(pid, day, 60).await.unwrap().contains(&(10 * H)));

    engine
        .set_appointment_status(aid, AppointmentStatus::Cancelled)
        .await
        .unwrap();
    assert!(engine.available_slots(pid, day, 60).await.unwrap().contains(&(10 * H)));

    // The freed time can be booked again
    engine
        .book_appointment(Ulid::new(), pid, day, 10 * H, 60, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn status_lifecycle() {
    let engine = test_engine("status_lifecycle.wal");
    let pid = tuesday_professional(&engine).await;
    let day = future_day(chrono::Weekday::Tue);

    let aid = Ulid::new();
    engine
        .book_appointment(aid, pid, day, 10 * H, 60, None)
        .await
        .unwrap();

    // Scheduled cannot jump straight to in_progress or completed
    assert!(matches!(
        engine.set_appointment_status(aid, AppointmentStatus::InProgress).await,
        Err(EngineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        engine.set_appointment_status(aid, AppointmentStatus::Completed).await,
        Err(EngineError::InvalidTransition { .. })
    ));

    engine
        .set_appointment_status(aid, AppointmentStatus::Confirmed)
        .await
        .unwrap();
    engine
        .set_appointment_status(aid, AppointmentStatus::InProgress)
        .await
        .unwrap();
    engine
        .set_appointment_status(aid, AppointmentStatus::Completed)
        .await
        .unwrap();

    // Completed is terminal
    assert!(matches!(
        engine.set_appointment_status(aid, AppointmentStatus::Cancelled).await,
        Err(EngineError::InvalidTransition { .. })
    ));

    // Completed no longer blocks the hour
    assert!(engine.available_slots(pid, day, 60).await.unwrap().contains(&(10 * H)));
}

#[tokio::test]
async fn rejected_transition_leaves_status_unchanged() {
    let engine = test_engine("rejected_transition.wal");
    let pid = tuesday_professional(&engine).await;
    let day = future_day(chrono::Weekday::Tue);

    let aid = Ulid::new();
    engine
        .book_appointment(aid, pid, day, 10 * H, 60, None)
        .await
        .unwrap();
    let _ = engine
        .set_appointment_status(aid, AppointmentStatus::Completed)
        .await;

    let appts = engine.get_appointments(pid, Some(day)).await;
    assert_eq!(appts[0].status, AppointmentStatus::Scheduled);
}

#[tokio::test]
async fn remove_window_drops_slots() {
    let engine = test_engine("remove_window.wal");
    let pid = Ulid::new();
    engine.create_professional(pid, None).await.unwrap();

    let wid = Ulid::new();
    engine
        .add_window(wid, pid, Weekday::Tue, TimeSpan::new(9 * H, 12 * H))
        .await
        .unwrap();

    let day = future_day(chrono::Weekday::Tue);
    assert!(!engine.available_slots(pid, day, 60).await.unwrap().is_empty());

    engine.remove_window(wid).await.unwrap();
    assert!(engine.available_slots(pid, day, 60).await.unwrap().is_empty());
}

#[tokio::test]
async fn remove_break_reopens_midday() {
    let engine = test_engine("remove_break.wal");
    let pid = Ulid::new();
    engine.create_professional(pid, None).await.unwrap();
    engine
        .add_window(Ulid::new(), pid, Weekday::Tue, TimeSpan::new(9 * H, 18 * H))
        .await
        .unwrap();
    let brk = Ulid::new();
    engine
        .add_break(brk, pid, TimeSpan::new(12 * H, 13 * H))
        .await
        .unwrap();

    let day = future_day(chrono::Weekday::Tue);
    assert!(!engine.available_slots(pid, day, 60).await.unwrap().contains(&(12 * H)));

    engine.remove_break(brk).await.unwrap();
    assert!(engine.available_slots(pid, day, 60).await.unwrap().contains(&(12 * H)));
}

#[tokio::test]
async fn delete_professional_invalidates_entities() {
    let engine = test_engine("delete_professional.wal");
    let pid = tuesday_professional(&engine).await;
    let day = future_day(chrono::Weekday::Tue);

    let aid = Ulid::new();
    engine
        .book_appointment(aid, pid, day, 10 * H, 60, None)
        .await
        .unwrap();

    engine.delete_professional(pid).await.unwrap();
    assert!(engine.get_professional(&pid).is_none());
    assert!(matches!(
        engine.set_appointment_status(aid, AppointmentStatus::Confirmed).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn queries_do_not_mutate() {
    let engine = test_engine("idempotent_queries.wal");
    let pid = tuesday_professional(&engine).await;
    let day = future_day(chrono::Weekday::Tue);

    let first = engine.available_slots(pid, day, 90).await.unwrap();
    let second = engine.available_slots(pid, day, 90).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn wal_replay_restores_state() {
    let path = test_wal_path("replay_restore.wal");
    let notify = Arc::new(NotifyHub::new());
    let day = future_day(chrono::Weekday::Tue);

    let pid = Ulid::new();
    let aid = Ulid::new();
    {
        let engine = Engine::new(path.clone(), notify.clone(), 0).unwrap();
        engine.create_professional(pid, Some("Dr. Okafor".into())).await.unwrap();
        engine
            .add_window(Ulid::new(), pid, Weekday::Tue, TimeSpan::new(9 * H, 18 * H))
            .await
            .unwrap();
        engine
            .book_appointment(aid, pid, day, 10 * H, 60, Some("Ana".into()))
            .await
            .unwrap();
        engine
            .set_appointment_status(aid, AppointmentStatus::Confirmed)
            .await
            .unwrap();
    }

    let engine2 = Engine::new(path, notify, 0).unwrap();
    let appts = engine2.get_appointments(pid, Some(day)).await;
    assert_eq!(appts.len(), 1);
    assert_eq!(appts[0].id, aid);
    assert_eq!(appts[0].status, AppointmentStatus::Confirmed);
    assert_eq!(appts[0].customer.as_deref(), Some("Ana"));

    // Conflict survives the restart
    assert!(matches!(
        engine2.book_appointment(Ulid::new(), pid, day, 10 * H + 30, 60, None).await,
        Err(EngineError::Conflict(_))
    ));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact_preserve.wal");
    let notify = Arc::new(NotifyHub::new());
    let day = future_day(chrono::Weekday::Tue);

    let pid = Ulid::new();
    let aid = Ulid::new();
    {
        let engine = Engine::new(path.clone(), notify.clone(), 0).unwrap();
        engine.create_professional(pid, None).await.unwrap();
        engine
            .add_window(Ulid::new(), pid, Weekday::Tue, TimeSpan::new(9 * H, 18 * H))
            .await
            .unwrap();
        // Churn the WAL
        for _ in 0..5 {
            let brk = Ulid::new();
            engine.add_break(brk, pid, TimeSpan::new(12 * H, 13 * H)).await.unwrap();
            engine.remove_break(brk).await.unwrap();
        }
        engine
            .book_appointment(aid, pid, day, 10 * H, 60, None)
            .await
            .unwrap();
        engine
            .set_appointment_status(aid, AppointmentStatus::Confirmed)
            .await
            .unwrap();
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }

    let engine2 = Engine::new(path, notify, 0).unwrap();
    let appts = engine2.get_appointments(pid, None).await;
    assert_eq!(appts.len(), 1);
    assert_eq!(appts[0].status, AppointmentStatus::Confirmed);
    let ps = engine2.get_professional(&pid).unwrap();
    assert!(ps.read().await.breaks.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_single_winner() {
    let engine = Arc::new(test_engine("concurrent_winner.wal"));
    let pid = tuesday_professional(&engine).await;
    let day = future_day(chrono::Weekday::Tue);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .book_appointment(Ulid::new(), pid, day, 10 * H, 60, None)
                .await
        }));
    }

    let mut winners = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(()) => winners += 1,
            Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(engine.get_appointments(pid, Some(day)).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_spans_never_both_commit() {
    let engine = Arc::new(test_engine("concurrent_overlap.wal"));
    let pid = tuesday_professional(&engine).await;
    let day = future_day(chrono::Weekday::Tue);

    // Pairwise-overlapping starts at 15-minute offsets around 10:00
    let mut handles = Vec::new();
    for i in 0..4 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .book_appointment(Ulid::new(), pid, day, 10 * H + i * 15, 60, None)
                .await
        }));
    }
    for h in handles {
        let _ = h.await.unwrap();
    }

    let appts = engine.get_appointments(pid, Some(day)).await;
    for (i, a) in appts.iter().enumerate() {
        for b in &appts[i + 1..] {
            assert!(!a.span.overlaps(&b.span), "overlapping appointments committed");
        }
    }
}
