use chrono::{Duration, TimeZone, Utc};

use super::Database;
use crate::{
    models::{
        Booking, BookingStatus, Room, RoomStatus, RoomUpdate, Service, ServiceCategory, Session,
        SessionStatus, SessionStatusUpdate, Therapist, TherapistStatus, TherapistUpdate,
    },
    persistence::Persistence,
};

fn test_db() -> (Database, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let db = Database::new(tmp.path().join("spadesk.sqlite3")).unwrap();
    (db, tmp)
}

fn session() -> Session {
    let created = Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 0).unwrap();
    Session {
        id: "s1".into(),
        service_id: "couples-90".into(),
        therapist_ids: vec!["t1".into(), "t2".into()],
        room_id: "r1".into(),
        status: SessionStatus::Ready,
        start_time: None,
        end_time: None,
        duration_minutes: 90,
        price: 240.0,
        payout: 70.0,
        booking_id: Some("b1".into()),
        business_day: created.date_naive(),
        created_at: created,
        updated_at: created,
    }
}

#[tokio::test]
async fn session_round_trip_and_status_update() {
    let (db, _tmp) = test_db();
    let mut record = session();

    db.save_session(&record).await.unwrap();
    assert_eq!(db.get_session("s1").await.unwrap(), Some(record.clone()));

    let started = Utc.with_ymd_and_hms(2026, 10, 16, 10, 0, 0).unwrap();
    record.begin(started);
    db.save_session(&record).await.unwrap();

    let end_time = started + Duration::minutes(90);
    db.update_session_status(
        "s1",
        SessionStatusUpdate {
            status: SessionStatus::Completed,
            end_time: Some(end_time),
        },
    )
    .await
    .unwrap();

    let stored = db.get_session("s1").await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(stored.start_time, Some(started));
    assert_eq!(stored.end_time, Some(end_time));
    assert_eq!(stored.therapist_ids, record.therapist_ids);

    let today = db.list_sessions_for_day(record.business_day).await.unwrap();
    assert_eq!(today.len(), 1);
    let tomorrow = db
        .list_sessions_for_day(record.business_day.succ_opt().unwrap())
        .await
        .unwrap();
    assert!(tomorrow.is_empty());
}

#[tokio::test]
async fn status_update_on_missing_session_fails() {
    let (db, _tmp) = test_db();
    let err = db
        .update_session_status(
            "missing",
            SessionStatusUpdate {
                status: SessionStatus::Completed,
                end_time: None,
            },
        )
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("missing"));
}

#[tokio::test]
async fn delete_session_is_idempotent() {
    let (db, _tmp) = test_db();
    db.save_session(&session()).await.unwrap();

    db.delete_session("s1").await.unwrap();
    db.delete_session("s1").await.unwrap();
    assert_eq!(db.get_session("s1").await.unwrap(), None);
}

#[tokio::test]
async fn therapist_patch_keeps_unset_fields() {
    let (db, _tmp) = test_db();
    let checked_in = Utc.with_ymd_and_hms(2026, 10, 16, 8, 45, 0).unwrap();
    db.save_therapist(&Therapist {
        id: "t1".into(),
        name: "Ana".into(),
        status: TherapistStatus::InSession,
        completed_room_ids: Vec::new(),
        checked_in_at: checked_in,
    })
    .await
    .unwrap();

    db.update_therapist(
        "t1",
        TherapistUpdate {
            status: None,
            completed_room_ids: Some(vec!["r1".into()]),
        },
    )
    .await
    .unwrap();
    db.update_therapist("t1", TherapistUpdate::status(TherapistStatus::Available))
        .await
        .unwrap();

    let roster = db
        .list_therapists_for_day(checked_in.date_naive())
        .await
        .unwrap();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].status, TherapistStatus::Available);
    assert_eq!(roster[0].completed_room_ids, vec!["r1".to_string()]);
}

#[tokio::test]
async fn business_day_snapshot_skips_closed_bookings() {
    let (db, _tmp) = test_db();
    let day = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();

    db.save_service(&Service {
        id: "couples-90".into(),
        name: "Couples 90".into(),
        category: ServiceCategory::Dual,
        duration_minutes: 90,
        price: 240.0,
        payout: 70.0,
    })
    .await
    .unwrap();
    db.save_room(&Room {
        id: "r1".into(),
        name: "Lotus".into(),
        status: RoomStatus::Occupied,
    })
    .await
    .unwrap();
    db.update_room("r1", RoomUpdate::status(RoomStatus::Available))
        .await
        .unwrap();

    for (id, status) in [("b1", BookingStatus::Scheduled), ("b2", BookingStatus::Cancelled)] {
        db.save_booking(&Booking {
            id: id.into(),
            customer_name: "Dana".into(),
            service_id: "couples-90".into(),
            scheduled_at: day,
            therapist_ids: vec!["t1".into(), "t2".into()],
            room_id: None,
            status,
        })
        .await
        .unwrap();
    }
    db.update_booking_status("b1", BookingStatus::InProgress)
        .await
        .unwrap();
    db.save_session(&session()).await.unwrap();

    let snapshot = db.load_business_day(day.date_naive()).await.unwrap();
    assert_eq!(snapshot.services.len(), 1);
    assert_eq!(snapshot.rooms[0].status, RoomStatus::Available);
    assert_eq!(snapshot.bookings.len(), 1);
    assert_eq!(snapshot.bookings[0].status, BookingStatus::InProgress);
    assert_eq!(snapshot.sessions.len(), 1);
}

#[tokio::test]
async fn reopening_keeps_schema_version() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("spadesk.sqlite3");
    {
        let db = Database::new(path.clone()).unwrap();
        db.save_session(&session()).await.unwrap();
    }
    let db = Database::new(path.clone()).unwrap();
    assert_eq!(db.path(), path.as_path());
    assert!(db.get_session("s1").await.unwrap().is_some());
}
