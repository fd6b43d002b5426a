use super::*;
use crate::clock::{DEFAULT_TIMEZONE, FixedClock};
use crate::geo::{EARTH_RADIUS_M, GeoPoint};
use crate::slots::{Occupancy, SLOT_COUNT, slot_index};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
}

fn at(h: u32, m: u32) -> NaiveDateTime {
    today().and_time(t(h, m))
}

fn anchor() -> GeoPoint {
    GeoPoint::new(37.4505, 126.6570)
}

fn north_of_anchor(meters: f64) -> GeoPoint {
    let a = anchor();
    GeoPoint::new(a.latitude + (meters / EARTH_RADIUS_M).to_degrees(), a.longitude)
}

fn requester(headcount: u32) -> Requester {
    Requester {
        organization_type: "club".into(),
        organization_name: "Chess Club".into(),
        phone: "010-1234-5678".into(),
        email: "chess@example.com".into(),
        event_name: "weekly match".into(),
        headcount,
        climate_control: true,
    }
}

fn room(name: &str) -> NewSpace {
    NewSpace {
        name: name.into(),
        category: "seminar".into(),
        sub_category: "small".into(),
        location: "Building 5, 2F".into(),
        capacity: 20,
        coordinates: Some(anchor()),
    }
}

fn booking(space_id: Ulid, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> NewReservation {
    NewReservation {
        space_id,
        date,
        start,
        end,
        requester: requester(5),
    }
}

// ── Async engine tests ───────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roombook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn open_engine(path: PathBuf, clock: &Arc<FixedClock>, settings: EngineSettings) -> Arc<Engine> {
    Arc::new(Engine::new(path, clock.clone(), settings).unwrap())
}

fn clock_at(now: NaiveDateTime) -> Arc<FixedClock> {
    Arc::new(FixedClock::at_local(DEFAULT_TIMEZONE, now))
}

async fn engine_with_room(name: &str) -> (Arc<Engine>, Arc<FixedClock>, Ulid) {
    let clock = clock_at(at(8, 0));
    let engine = open_engine(test_wal_path(name), &clock, EngineSettings::default());
    let space_id = Ulid::new();
    engine.create_space(space_id, room("Seminar A")).await.unwrap();
    (engine, clock, space_id)
}

#[tokio::test]
async fn create_and_list_spaces() {
    let clock = clock_at(at(8, 0));
    let engine = open_engine(test_wal_path("spaces.wal"), &clock, EngineSettings::default());
    let b = Ulid::new();
    let a = Ulid::new();
    engine.create_space(b, room("Studio B")).await.unwrap();
    engine.create_space(a, room("Hall A")).await.unwrap();

    let names: Vec<String> = engine.list_spaces().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["Hall A", "Studio B"]);
    assert_eq!(engine.get_space(a).unwrap().capacity, 20);
    assert!(matches!(engine.get_space(Ulid::new()), Err(EngineError::NotFound(_))));
    assert!(matches!(
        engine.create_space(a, room("Hall A again")).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn invalid_space_rejected() {
    let clock = clock_at(at(8, 0));
    let engine = open_engine(test_wal_path("bad_space.wal"), &clock, EngineSettings::default());
    let mut draft = room("Nowhere");
    draft.capacity = 0;
    let err = engine.create_space(Ulid::new(), draft).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let mut draft = room("Off the map");
    draft.coordinates = Some(GeoPoint::new(95.0, 0.0));
    assert!(engine.create_space(Ulid::new(), draft).await.is_err());
}

#[tokio::test]
async fn back_to_back_bookings_do_not_conflict() {
    let (engine, _clock, space_id) = engine_with_room("back_to_back.wal").await;
    let user = UserId::new("alice");
    let d = today() + TimeDelta::days(1);

    engine
        .create_reservation(&user, booking(space_id, d, t(9, 0), t(10, 0)))
        .await
        .unwrap();
    let second = engine
        .create_reservation(&user, booking(space_id, d, t(10, 0), t(11, 0)))
        .await
        .unwrap();
    assert_eq!(second.status, ReservationStatus::Pending);
    assert!(!second.reminder_sent);
}

#[tokio::test]
async fn overlapping_booking_conflicts_until_cancelled() {
    let (engine, _clock, space_id) = engine_with_room("overlap.wal").await;
    let alice = UserId::new("alice");
    let bob = UserId::new("bob");
    let d = today() + TimeDelta::days(1);

    let first = engine
        .create_reservation(&alice, booking(space_id, d, t(13, 0), t(15, 0)))
        .await
        .unwrap();
    let err = engine
        .create_reservation(&bob, booking(space_id, d, t(14, 50), t(16, 0)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(id) if id == first.id));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(!err.kind().is_retryable());

    assert!(engine.has_conflict(space_id, d, t(14, 0), t(14, 10)).await.unwrap());
    assert!(!engine.has_conflict(space_id, d, t(15, 0), t(16, 0)).await.unwrap());

    // Same range on another day is fine.
    engine
        .create_reservation(&bob, booking(space_id, d + TimeDelta::days(1), t(14, 50), t(16, 0)))
        .await
        .unwrap();

    engine
        .cancel_reservation(&alice, first.id, Some("moved online".into()))
        .await
        .unwrap();
    engine
        .create_reservation(&bob, booking(space_id, d, t(14, 50), t(16, 0)))
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_identical_creates_one_wins() {
    let (engine, _clock, space_id) = engine_with_room("race.wal").await;
    let d = today() + TimeDelta::days(2);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            let user = UserId::new(format!("user{i}"));
            engine
                .create_reservation(&user, booking(space_id, d, t(18, 0), t(19, 0)))
                .await
        }));
    }

    let mut won = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => won += 1,
            Err(e) => assert!(
                matches!(e.kind(), ErrorKind::Conflict | ErrorKind::LockContention),
                "unexpected error: {e}"
            ),
        }
    }
    assert_eq!(won, 1);
}

#[tokio::test]
async fn concurrent_creates_never_overlap() {
    let (engine, _clock, space_id) = engine_with_room("no_overlap.wal").await;
    let user = UserId::new("load");
    let d = today() + TimeDelta::days(3);

    let mut tasks = Vec::new();
    for i in 0..60u32 {
        let engine = engine.clone();
        let user = user.clone();
        // Staggered 30..70 minute ranges across the day.
        let start_min = 7 * 60 + (i * 37) % (14 * 60);
        let len = 30 + (i % 5) * 10;
        let start = t(start_min / 60, start_min % 60);
        let end = start + TimeDelta::minutes(len as i64);
        if end <= start {
            continue;
        }
        tasks.push(tokio::spawn(async move {
            engine.create_reservation(&user, booking(space_id, d, start, end)).await
        }));
    }
    for task in tasks {
        let _ = task.await.unwrap();
    }

    let rows: Vec<Reservation> = engine
        .reservations_for_user(&user)
        .await
        .into_iter()
        .map(|v| v.reservation)
        .filter(|r| r.status.blocks())
        .collect();
    assert!(!rows.is_empty());
    for (i, a) in rows.iter().enumerate() {
        for b in &rows[i + 1..] {
            assert!(!a.time.overlaps(&b.time), "{} overlaps {}", a.time, b.time);
        }
    }
}

#[tokio::test]
async fn held_lock_surfaces_contention() {
    let clock = clock_at(at(8, 0));
    let settings = EngineSettings {
        lock_timeout: Duration::from_millis(50),
        ..EngineSettings::default()
    };
    let engine = open_engine(test_wal_path("contention.wal"), &clock, settings);
    let space_id = Ulid::new();
    engine.create_space(space_id, room("Busy Room")).await.unwrap();
    let user = UserId::new("alice");
    let d = today() + TimeDelta::days(1);

    let held = engine.lock_space(space_id).await.unwrap();
    assert_eq!(held.space().name, "Busy Room");

    let err = engine
        .create_reservation(&user, booking(space_id, d, t(9, 0), t(10, 0)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LockContention(id) if id == space_id));
    assert!(err.kind().is_retryable());

    // Validation and NotFound are decided before the lock.
    let err = engine
        .create_reservation(&user, booking(space_id, d, t(10, 0), t(9, 0)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = engine
        .create_reservation(&user, booking(Ulid::new(), d, t(9, 0), t(10, 0)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    drop(held);
    engine
        .create_reservation(&user, booking(space_id, d, t(9, 0), t(10, 0)))
        .await
        .unwrap();
}

#[tokio::test]
async fn requester_checked_against_capacity() {
    let (engine, _clock, space_id) = engine_with_room("capacity.wal").await;
    let user = UserId::new("alice");
    let mut request = booking(space_id, today(), t(9, 0), t(10, 0));
    request.requester.headcount = 21;
    let err = engine.create_reservation(&user, request).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(ref m) if m.contains("capacity")));

    let mut request = booking(space_id, today(), t(9, 0), t(10, 0));
    request.requester.email = "nobody".into();
    assert_eq!(
        engine.create_reservation(&user, request).await.unwrap_err().kind(),
        ErrorKind::Validation
    );
}

#[tokio::test]
async fn edit_resets_to_pending_and_skips_itself() {
    let (engine, _clock, space_id) = engine_with_room("edit.wal").await;
    let alice = UserId::new("alice");
    let bob = UserId::new("bob");
    let d = today() + TimeDelta::days(1);

    let r = engine
        .create_reservation(&alice, booking(space_id, d, t(10, 0), t(11, 0)))
        .await
        .unwrap();
    engine
        .create_reservation(&bob, booking(space_id, d, t(12, 0), t(13, 0)))
        .await
        .unwrap();
    engine.confirm_reservation(r.id).await.unwrap();

    // Overlaps only its own old range.
    let edit = ReservationEdit {
        date: d,
        start: t(10, 30),
        end: t(11, 30),
        requester: requester(8),
    };
    let edited = engine.edit_reservation(&alice, r.id, edit).await.unwrap();
    assert_eq!(edited.status, ReservationStatus::Pending);
    assert_eq!(edited.time, TimeRange::new(t(10, 30), t(11, 30)));
    assert_eq!(edited.requester.headcount, 8);

    let onto_bob = ReservationEdit {
        date: d,
        start: t(11, 30),
        end: t(12, 30),
        requester: requester(8),
    };
    assert!(matches!(
        engine.edit_reservation(&alice, r.id, onto_bob).await,
        Err(EngineError::Conflict(_))
    ));

    // Failed edit changed nothing.
    let stored = engine.get_reservation(&alice, r.id).await.unwrap();
    assert_eq!(stored, edited);

    let not_mine = ReservationEdit {
        date: d,
        start: t(15, 0),
        end: t(16, 0),
        requester: requester(2),
    };
    assert_eq!(
        engine.edit_reservation(&bob, r.id, not_mine).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn cancel_is_final() {
    let (engine, _clock, space_id) = engine_with_room("cancel.wal").await;
    let alice = UserId::new("alice");
    let r = engine
        .create_reservation(&alice, booking(space_id, today(), t(9, 0), t(10, 0)))
        .await
        .unwrap();

    assert_eq!(
        engine
            .cancel_reservation(&UserId::new("mallory"), r.id, None)
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );

    let cancelled = engine
        .cancel_reservation(&alice, r.id, Some("schedule change".into()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("schedule change"));

    let err = engine.cancel_reservation(&alice, r.id, None).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition(TransitionError::AlreadyFinal(ReservationStatus::Cancelled))
    ));
    assert_eq!(
        engine.confirm_reservation(r.id).await.unwrap_err().kind(),
        ErrorKind::InvalidStateTransition
    );
    let edit = ReservationEdit {
        date: today(),
        start: t(11, 0),
        end: t(12, 0),
        requester: requester(3),
    };
    assert_eq!(
        engine.edit_reservation(&alice, r.id, edit).await.unwrap_err().kind(),
        ErrorKind::InvalidStateTransition
    );
}

#[tokio::test]
async fn check_in_window_and_idempotence() {
    let (engine, clock, space_id) = engine_with_room("check_in.wal").await;
    let alice = UserId::new("alice");
    let r = engine
        .create_reservation(&alice, booking(space_id, today(), t(10, 0), t(11, 0)))
        .await
        .unwrap();

    // Pending cannot check in.
    clock.set_local(at(10, 0));
    assert_eq!(
        engine.check_in(&alice, r.id, Some(anchor())).await.unwrap_err().kind(),
        ErrorKind::InvalidStateTransition
    );
    engine.confirm_reservation(r.id).await.unwrap();

    clock.set_local(at(9, 44));
    let err = engine.check_in(&alice, r.id, Some(anchor())).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition(TransitionError::TooEarly { .. })));

    clock.set_local(at(9, 46));
    let first = engine.check_in(&alice, r.id, Some(anchor())).await.unwrap();
    assert_eq!(first.status, ReservationStatus::InUse);
    assert!(first.checked_in_at.is_some());

    // Later, elsewhere, still fine and the timestamp stays.
    clock.advance(TimeDelta::hours(5));
    let again = engine.check_in(&alice, r.id, None).await.unwrap();
    assert_eq!(again.checked_in_at, first.checked_in_at);

    // In-use can no longer be cancelled.
    assert_eq!(
        engine.cancel_reservation(&alice, r.id, None).await.unwrap_err().kind(),
        ErrorKind::InvalidStateTransition
    );
}

#[tokio::test]
async fn check_in_geofence() {
    let (engine, clock, space_id) = engine_with_room("geofence.wal").await;
    let alice = UserId::new("alice");
    let r = engine
        .create_reservation(&alice, booking(space_id, today(), t(14, 0), t(16, 0)))
        .await
        .unwrap();
    engine.confirm_reservation(r.id).await.unwrap();
    clock.set_local(at(14, 30));

    let err = engine
        .check_in(&alice, r.id, Some(north_of_anchor(60.0)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition(TransitionError::TooFar { .. })));
    assert_eq!(
        engine.check_in(&alice, r.id, None).await.unwrap_err().kind(),
        ErrorKind::Validation
    );

    let ok = engine
        .check_in(&alice, r.id, Some(north_of_anchor(40.0)))
        .await
        .unwrap();
    assert_eq!(ok.status, ReservationStatus::InUse);
}

#[tokio::test]
async fn check_in_wrong_day_and_closed_window() {
    let (engine, clock, space_id) = engine_with_room("check_in_window.wal").await;
    let alice = UserId::new("alice");
    let tomorrow = engine
        .create_reservation(&alice, booking(space_id, today() + TimeDelta::days(1), t(9, 0), t(10, 0)))
        .await
        .unwrap();
    let early = engine
        .create_reservation(&alice, booking(space_id, today(), t(7, 0), t(8, 0)))
        .await
        .unwrap();
    engine.confirm_reservation(tomorrow.id).await.unwrap();
    engine.confirm_reservation(early.id).await.unwrap();

    clock.set_local(at(9, 0));
    assert!(matches!(
        engine.check_in(&alice, tomorrow.id, Some(anchor())).await,
        Err(EngineError::InvalidTransition(TransitionError::WrongDate { .. }))
    ));
    assert!(matches!(
        engine.check_in(&alice, early.id, Some(anchor())).await,
        Err(EngineError::InvalidTransition(TransitionError::WindowClosed { .. }))
    ));
}

#[tokio::test]
async fn daily_slots() {
    let (engine, _clock, space_id) = engine_with_room("daily.wal").await;
    let alice = UserId::new("alice");
    let d = today() + TimeDelta::days(1);

    let empty = engine.daily_availability(space_id, d).await.unwrap();
    assert_eq!(empty.grid.booked_count(), 0);
    assert_eq!(empty.labelled().len(), SLOT_COUNT);

    engine
        .create_reservation(&alice, booking(space_id, d, t(9, 0), t(9, 30)))
        .await
        .unwrap();
    let cancelled = engine
        .create_reservation(&alice, booking(space_id, d, t(15, 0), t(16, 0)))
        .await
        .unwrap();
    engine.cancel_reservation(&alice, cancelled.id, None).await.unwrap();

    let day = engine.daily_availability(space_id, d).await.unwrap();
    assert_eq!(day.grid.booked_count(), 3);
    for (h, m) in [(9, 0), (9, 10), (9, 20)] {
        assert!(day.grid.is_occupied(slot_index(t(h, m)).unwrap()));
    }
    assert!(!day.grid.is_occupied(slot_index(t(9, 30)).unwrap()));
    assert!(day.labelled().contains(&("09:20".to_string(), true)));

    assert!(matches!(
        engine.daily_availability(Ulid::new(), d).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn monthly_summary() {
    let (engine, _clock, space_id) = engine_with_room("monthly.wal").await;
    let alice = UserId::new("alice");
    let full = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
    let half = NaiveDate::from_ymd_opt(2025, 6, 11).unwrap();

    engine
        .create_reservation(&alice, booking(space_id, full, t(7, 0), t(22, 0)))
        .await
        .unwrap();
    engine
        .create_reservation(&alice, booking(space_id, half, t(7, 0), t(12, 0)))
        .await
        .unwrap();
    // Outside the month.
    engine
        .create_reservation(&alice, booking(space_id, NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(), t(7, 0), t(22, 0)))
        .await
        .unwrap();

    let month = engine.monthly_availability(space_id, 2025, 6).await.unwrap();
    assert_eq!(month.days.len(), 30);
    let tenth = &month.days[9];
    assert_eq!(tenth.date, full);
    assert_eq!(tenth.status, Occupancy::Booked);
    assert_eq!(tenth.occupancy, 1.0);

    let eleventh = &month.days[10];
    assert_eq!(eleventh.status, Occupancy::Partial);
    assert_eq!(eleventh.periods[0].1, Occupancy::Booked);
    assert_eq!(eleventh.periods[1].1, Occupancy::Available);

    assert_eq!(month.days[0].status, Occupancy::Available);
    assert_eq!(month.days[0].occupancy, 0.0);
    assert_eq!(month.days[29].status, Occupancy::Available);

    assert_eq!(
        engine.monthly_availability(space_id, 2025, 13).await.unwrap_err().kind(),
        ErrorKind::Validation
    );
}

#[tokio::test]
async fn last_slot_counts_toward_a_full_day() {
    let (engine, _clock, space_id) = engine_with_room("last_slot.wal").await;
    let alice = UserId::new("alice");
    let d = NaiveDate::from_ymd_opt(2025, 6, 12).unwrap();

    engine
        .create_reservation(&alice, booking(space_id, d, t(7, 0), t(21, 50)))
        .await
        .unwrap();
    let day = engine.daily_availability(space_id, d).await.unwrap();
    assert_eq!(day.grid.booked_count(), SLOT_COUNT - 1);
    assert!(day.labelled().contains(&("21:50".to_string(), false)));
    let month = engine.monthly_availability(space_id, 2025, 6).await.unwrap();
    assert_eq!(month.days[11].status, Occupancy::Partial);
    assert_eq!(month.days[11].periods[2].1, Occupancy::Partial);

    engine
        .create_reservation(&alice, booking(space_id, d, t(21, 50), t(22, 0)))
        .await
        .unwrap();
    let day = engine.daily_availability(space_id, d).await.unwrap();
    assert_eq!(day.labelled().last(), Some(&("21:50".to_string(), true)));
    let month = engine.monthly_availability(space_id, 2025, 6).await.unwrap();
    assert_eq!(month.days[11].status, Occupancy::Booked);
    assert_eq!(month.days[11].occupancy, 1.0);
    assert_eq!(month.days[11].periods[2].1, Occupancy::Booked);
}

#[tokio::test]
async fn available_spaces_for_interval() {
    let clock = clock_at(at(8, 0));
    let engine = open_engine(test_wal_path("free_spaces.wal"), &clock, EngineSettings::default());
    let a = Ulid::new();
    let b = Ulid::new();
    let c = Ulid::new();
    engine.create_space(a, room("A room")).await.unwrap();
    engine.create_space(b, room("B room")).await.unwrap();
    engine.create_space(c, room("C room")).await.unwrap();
    let alice = UserId::new("alice");
    let d = today() + TimeDelta::days(1);

    engine
        .create_reservation(&alice, booking(a, d, t(10, 0), t(12, 0)))
        .await
        .unwrap();
    let r = engine
        .create_reservation(&alice, booking(c, d, t(11, 0), t(11, 30)))
        .await
        .unwrap();
    engine.cancel_reservation(&alice, r.id, None).await.unwrap();
    engine
        .create_reservation(&alice, booking(b, d, t(12, 0), t(13, 0)))
        .await
        .unwrap();

    let free: Vec<Ulid> = engine
        .spaces_available_for_interval(d, t(11, 0), t(12, 0))
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(free, vec![b, c]);

    assert!(engine
        .spaces_available_for_interval(d, t(12, 0), t(11, 0))
        .await
        .is_err());
}

#[tokio::test]
async fn user_reservations_newest_first() {
    let clock = clock_at(at(8, 0));
    let engine = open_engine(test_wal_path("mine.wal"), &clock, EngineSettings::default());
    let a = Ulid::new();
    let b = Ulid::new();
    engine.create_space(a, room("Hall")).await.unwrap();
    let mut studio = room("Studio");
    studio.location = "Annex".into();
    engine.create_space(b, studio).await.unwrap();
    let alice = UserId::new("alice");
    let d = today() + TimeDelta::days(1);

    engine
        .create_reservation(&alice, booking(a, d, t(9, 0), t(10, 0)))
        .await
        .unwrap();
    engine
        .create_reservation(&alice, booking(b, d, t(15, 0), t(16, 0)))
        .await
        .unwrap();
    engine
        .create_reservation(&alice, booking(a, d + TimeDelta::days(1), t(8, 0), t(9, 0)))
        .await
        .unwrap();
    engine
        .create_reservation(&UserId::new("bob"), booking(b, d, t(9, 0), t(10, 0)))
        .await
        .unwrap();

    let mine = engine.reservations_for_user(&alice).await;
    let order: Vec<(NaiveDate, NaiveTime, &str)> = mine
        .iter()
        .map(|v| (v.reservation.date, v.reservation.time.start, v.space_name.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![
            (d + TimeDelta::days(1), t(8, 0), "Hall"),
            (d, t(15, 0), "Studio"),
            (d, t(9, 0), "Hall"),
        ]
    );
    assert_eq!(mine[1].space_location, "Annex");
}

#[tokio::test]
async fn reminder_claimed_once() {
    let (engine, _clock, space_id) = engine_with_room("reminder.wal").await;
    let alice = UserId::new("alice");
    let d = today();
    let pending = engine
        .create_reservation(&alice, booking(space_id, d, t(9, 0), t(10, 0)))
        .await
        .unwrap();
    let cancelled = engine
        .create_reservation(&alice, booking(space_id, d, t(9, 0) + TimeDelta::hours(2), t(12, 0)))
        .await
        .unwrap();
    engine.cancel_reservation(&alice, cancelled.id, None).await.unwrap();

    assert_eq!(engine.due_reminders(d, t(9, 0)).await, vec![pending.id]);
    assert!(engine.due_reminders(d, t(11, 0)).await.is_empty());
    assert!(engine.due_reminders(d, t(9, 10)).await.is_empty());

    let (claimed, space) = engine.claim_reminder(pending.id, d, t(9, 0)).await.unwrap().unwrap();
    assert!(claimed.reminder_sent);
    assert_eq!(space.id, space_id);
    assert!(engine.claim_reminder(pending.id, d, t(9, 0)).await.unwrap().is_none());
    assert!(engine.due_reminders(d, t(9, 0)).await.is_empty());
    assert!(engine.claim_reminder(cancelled.id, d, t(11, 0)).await.unwrap().is_none());
}

#[tokio::test]
async fn reschedule_rearms_reminder() {
    let (engine, _clock, space_id) = engine_with_room("rearm.wal").await;
    let alice = UserId::new("alice");
    let d = today();
    let r = engine
        .create_reservation(&alice, booking(space_id, d, t(9, 0), t(10, 0)))
        .await
        .unwrap();
    engine.claim_reminder(r.id, d, t(9, 0)).await.unwrap();

    // Only the end moves: still reminded.
    let longer = ReservationEdit {
        date: d,
        start: t(9, 0),
        end: t(10, 30),
        requester: requester(5),
    };
    assert!(engine.edit_reservation(&alice, r.id, longer).await.unwrap().reminder_sent);

    let later = ReservationEdit {
        date: d,
        start: t(13, 0),
        end: t(14, 0),
        requester: requester(5),
    };
    let moved = engine.edit_reservation(&alice, r.id, later).await.unwrap();
    assert!(!moved.reminder_sent);
    assert_eq!(engine.due_reminders(d, t(13, 0)).await, vec![r.id]);
}

#[tokio::test]
async fn claim_for_a_stale_minute_is_skipped() {
    let (engine, _clock, space_id) = engine_with_room("stale_claim.wal").await;
    let alice = UserId::new("alice");
    let d = today();
    let r = engine
        .create_reservation(&alice, booking(space_id, d, t(9, 0), t(10, 0)))
        .await
        .unwrap();
    assert_eq!(engine.due_reminders(d, t(9, 0)).await, vec![r.id]);

    // Moved between the scan and the claim.
    let later = ReservationEdit {
        date: d,
        start: t(9, 30),
        end: t(10, 30),
        requester: requester(5),
    };
    engine.edit_reservation(&alice, r.id, later).await.unwrap();

    assert!(engine.claim_reminder(r.id, d, t(9, 0)).await.unwrap().is_none());
    assert!(!engine.get_reservation(&alice, r.id).await.unwrap().reminder_sent);
    assert_eq!(engine.due_reminders(d, t(9, 30)).await, vec![r.id]);
    let (claimed, _) = engine.claim_reminder(r.id, d, t(9, 30)).await.unwrap().unwrap();
    assert_eq!(claimed.time.start, t(9, 30));
}

#[tokio::test]
async fn delete_space_cascades() {
    let (engine, _clock, space_id) = engine_with_room("cascade.wal").await;
    let alice = UserId::new("alice");
    let r1 = engine
        .create_reservation(&alice, booking(space_id, today(), t(9, 0), t(10, 0)))
        .await
        .unwrap();
    engine
        .create_reservation(&alice, booking(space_id, today(), t(11, 0), t(12, 0)))
        .await
        .unwrap();

    assert_eq!(engine.delete_space(space_id).await.unwrap(), 2);
    assert_eq!(engine.reservation_count(), 0);
    assert!(matches!(engine.get_reservation(&alice, r1.id).await, Err(EngineError::NotFound(_))));
    assert!(engine.reservations_for_user(&alice).await.is_empty());
    assert!(matches!(engine.delete_space(space_id).await, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let clock = clock_at(at(8, 0));
    let alice = UserId::new("alice");
    let space_id = Ulid::new();
    let gone = Ulid::new();
    let (kept, reminded) = {
        let engine = open_engine(path.clone(), &clock, EngineSettings::default());
        engine.create_space(space_id, room("Seminar A")).await.unwrap();
        engine.create_space(gone, room("Temporary")).await.unwrap();
        let kept = engine
            .create_reservation(&alice, booking(space_id, today(), t(9, 0), t(10, 0)))
            .await
            .unwrap();
        let reminded = engine
            .create_reservation(&alice, booking(space_id, today(), t(13, 0), t(14, 0)))
            .await
            .unwrap();
        engine
            .create_reservation(&alice, booking(gone, today(), t(13, 0), t(14, 0)))
            .await
            .unwrap();
        engine.confirm_reservation(kept.id).await.unwrap();
        engine.cancel_reservation(&alice, kept.id, Some("rain".into())).await.unwrap();
        engine.claim_reminder(reminded.id, today(), t(13, 0)).await.unwrap();
        engine.delete_space(gone).await.unwrap();
        (kept, reminded)
    };

    let engine = open_engine(path, &clock, EngineSettings::default());
    assert_eq!(engine.space_count(), 1);
    assert_eq!(engine.reservation_count(), 2);
    let kept = engine.get_reservation(&alice, kept.id).await.unwrap();
    assert_eq!(kept.status, ReservationStatus::Cancelled);
    assert_eq!(kept.cancel_reason.as_deref(), Some("rain"));
    assert!(engine.get_reservation(&alice, reminded.id).await.unwrap().reminder_sent);
    assert!(engine.due_reminders(today(), t(13, 0)).await.is_empty());
}

#[tokio::test]
async fn compaction_keeps_state() {
    let path = test_wal_path("compact.wal");
    let clock = clock_at(at(8, 0));
    let alice = UserId::new("alice");
    let space_id = Ulid::new();
    let id = {
        let engine = open_engine(path.clone(), &clock, EngineSettings::default());
        engine.create_space(space_id, room("Seminar A")).await.unwrap();
        let r = engine
            .create_reservation(&alice, booking(space_id, today(), t(9, 0), t(10, 0)))
            .await
            .unwrap();
        engine.confirm_reservation(r.id).await.unwrap();
        clock.set_local(at(9, 0));
        engine.check_in(&alice, r.id, Some(anchor())).await.unwrap();
        assert_eq!(engine.journal_appends_since_compact().await, 4);

        engine.compact_journal().await.unwrap();
        assert_eq!(engine.journal_appends_since_compact().await, 0);

        // Appends after compaction land in the new file.
        engine
            .create_reservation(&alice, booking(space_id, today(), t(11, 0), t(12, 0)))
            .await
            .unwrap();
        r.id
    };

    let engine = open_engine(path, &clock, EngineSettings::default());
    let r = engine.get_reservation(&alice, id).await.unwrap();
    assert_eq!(r.status, ReservationStatus::InUse);
    assert!(r.checked_in_at.is_some());
    assert_eq!(engine.reservations_for_user(&alice).await.len(), 2);
}
