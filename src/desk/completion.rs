use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    error::{DeskError, DeskResult},
    events::{DeskEvent, EventBus},
    models::{
        BookingStatus, RoomStatus, RoomUpdate, Session, SessionStatus, SessionStatusUpdate,
        TherapistStatus, TherapistUpdate,
    },
    persistence::Persistence,
    timer::{Expiry, TimerManager},
};

use super::{
    guard::{CompletionGuard, CompletionTicket},
    state::DeskState,
};

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Completed(Session),
    /// Another completion, or an edit of the session, is in flight.
    AlreadyCompleting,
    /// Unknown, deleted, or already completed session.
    Skipped,
}

/// Moves one session to Completed and frees everything it held.
///
/// The in-memory move happens only after the status change is saved. A failed
/// save leaves the session as it was and releases the guard, so the next timer
/// tick or a manual retry can try again.
#[derive(Clone)]
pub struct CompletionPipeline {
    state: Arc<Mutex<DeskState>>,
    persistence: Arc<dyn Persistence>,
    timers: TimerManager,
    events: EventBus,
    clock: Arc<dyn Clock>,
    guard: CompletionGuard,
}

impl CompletionPipeline {
    pub fn new(
        state: Arc<Mutex<DeskState>>,
        persistence: Arc<dyn Persistence>,
        timers: TimerManager,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state,
            persistence,
            timers,
            events,
            clock,
            guard: CompletionGuard::new(),
        }
    }

    /// Blocks completion of the session until the ticket drops. None while a
    /// completion already holds it.
    pub fn hold(&self, session_id: &str) -> Option<CompletionTicket> {
        self.guard.try_acquire(session_id)
    }

    pub fn is_completing(&self, session_id: &str) -> bool {
        self.guard.is_completing(session_id)
    }

    pub async fn complete(&self, session_id: &str) -> DeskResult<CompletionOutcome> {
        let Some(_ticket) = self.guard.try_acquire(session_id) else {
            debug!("Completion of session {} already in flight", session_id);
            return Ok(CompletionOutcome::AlreadyCompleting);
        };

        let now = self.clock.now();
        let end_time = {
            let state = self.state.lock().await;
            match state.sessions.find_active(session_id) {
                Some(session) => session.completion_end_time(now),
                None => {
                    if state.sessions.is_completed(session_id) {
                        debug!("Session {} is already completed", session_id);
                    } else {
                        debug!("No active session {} to complete", session_id);
                    }
                    self.timers.disarm(session_id);
                    return Ok(CompletionOutcome::Skipped);
                }
            }
        };

        let update = SessionStatusUpdate {
            status: SessionStatus::Completed,
            end_time: Some(end_time),
        };
        if let Err(err) = self
            .persistence
            .update_session_status(session_id, update)
            .await
        {
            let failure = DeskError::persistence(err);
            error!("Failed to save completion of session {}: {}", session_id, failure);
            self.events.emit(DeskEvent::CompletionFailed {
                session_id: session_id.to_string(),
                message: failure.to_string(),
            });
            return Err(failure);
        }

        let (completed, freed_therapists, freed_room) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let Some(session) = state.sessions.find_active_mut(session_id) else {
                warn!(
                    "Session {} was removed while its completion was being saved",
                    session_id
                );
                self.timers.disarm(session_id);
                return Ok(CompletionOutcome::Skipped);
            };
            session.end_time = Some(end_time);
            session.updated_at = now;

            let completed = state.sessions.move_to_completed(session_id)?.clone();
            let (freed_therapists, freed_room) = state.finish(&completed);
            (completed, freed_therapists, freed_room)
        };

        self.events.emit(DeskEvent::SessionCompleted {
            session: completed.clone(),
        });

        for therapist in &freed_therapists {
            let update = TherapistUpdate {
                status: Some(TherapistStatus::Available),
                completed_room_ids: Some(therapist.completed_room_ids.clone()),
            };
            if let Err(err) = self.persistence.update_therapist(&therapist.id, update).await {
                warn!("Failed to save therapist {} as available: {err:#}", therapist.id);
            }
            self.events.emit(DeskEvent::TherapistFreed {
                therapist_id: therapist.id.clone(),
            });
        }

        if let Some(room) = freed_room {
            if let Err(err) = self
                .persistence
                .update_room(&room.id, RoomUpdate::status(RoomStatus::Available))
                .await
            {
                warn!("Failed to save room {} as available: {err:#}", room.id);
            }
            self.events.emit(DeskEvent::RoomFreed { room_id: room.id });
        }

        if let Some(booking_id) = completed.booking_id.as_deref() {
            self.close_booking(booking_id).await;
        }

        self.timers.disarm(session_id);
        info!("Session {} completed", session_id);

        Ok(CompletionOutcome::Completed(completed))
    }

    async fn close_booking(&self, booking_id: &str) {
        if let Err(err) = self
            .persistence
            .update_booking_status(booking_id, BookingStatus::Completed)
            .await
        {
            warn!("Session finished but booking {} could not be closed: {err:#}", booking_id);
            return;
        }

        self.state
            .lock()
            .await
            .bookings
            .retain(|booking| booking.id != booking_id);
        self.events.emit(DeskEvent::BookingCompleted {
            booking_id: booking_id.to_string(),
        });
    }
}

/// Runs a completion for every expiry the timers report until `shutdown`.
pub fn spawn_expiry_dispatcher(
    pipeline: CompletionPipeline,
    mut expired_rx: mpsc::UnboundedReceiver<Expiry>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                expiry = expired_rx.recv() => {
                    let Some(expiry) = expiry else { break };
                    if pipeline.is_completing(&expiry.session_id) {
                        continue;
                    }
                    let pipeline = pipeline.clone();
                    tokio::spawn(async move {
                        match pipeline.complete(&expiry.session_id).await {
                            Ok(CompletionOutcome::Completed(_)) => info!(
                                "Session {} auto-completed ({:?} timer)",
                                expiry.session_id, expiry.source
                            ),
                            Ok(_) => {}
                            Err(err) => error!(
                                "Auto-completion of session {} failed: {}",
                                expiry.session_id, err
                            ),
                        }
                    });
                }
            }
        }
        debug!("Expiry dispatcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::{
        clock::ManualClock,
        models::{Booking, Room, Therapist},
        persistence::testing::RecordingPersistence,
        timer::TimerConfig,
    };

    struct Fixture {
        pipeline: CompletionPipeline,
        state: Arc<Mutex<DeskState>>,
        persistence: Arc<RecordingPersistence>,
        timers: TimerManager,
        events: EventBus,
        clock: ManualClock,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 10, 0, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(t0());
        let persistence = Arc::new(RecordingPersistence::default());
        let (timers, _expired) = TimerManager::new(Arc::new(clock.clone()), TimerConfig::default());
        let events = EventBus::new();

        let mut desk = DeskState::new(t0().date_naive());
        desk.therapists.insert(
            "t1".into(),
            Therapist {
                id: "t1".into(),
                name: "Ana".into(),
                status: TherapistStatus::InSession,
                completed_room_ids: Vec::new(),
                checked_in_at: t0(),
            },
        );
        desk.rooms.insert(
            "r1".into(),
            Room {
                id: "r1".into(),
                name: "Room 1".into(),
                status: RoomStatus::Occupied,
            },
        );
        let state = Arc::new(Mutex::new(desk));

        let pipeline = CompletionPipeline::new(
            state.clone(),
            persistence.clone(),
            timers.clone(),
            events.clone(),
            Arc::new(clock.clone()),
        );

        Fixture {
            pipeline,
            state,
            persistence,
            timers,
            events,
            clock,
        }
    }

    fn running_session(id: &str) -> Session {
        let mut session = Session {
            id: id.into(),
            service_id: "swedish-60".into(),
            therapist_ids: vec!["t1".into()],
            room_id: "r1".into(),
            status: SessionStatus::Ready,
            start_time: None,
            end_time: None,
            duration_minutes: 60,
            price: 90.0,
            payout: 40.0,
            booking_id: None,
            business_day: t0().date_naive(),
            created_at: t0(),
            updated_at: t0(),
        };
        session.begin(t0());
        session
    }

    #[tokio::test]
    async fn duplicate_completion_persists_once() {
        let fx = fixture();
        let session = running_session("s1");
        let end_time = session.end_time.unwrap();
        fx.state.lock().await.sessions.add_active(session);
        fx.timers.arm("s1", end_time);
        fx.clock.advance(chrono::Duration::minutes(61));

        let first = fx.pipeline.complete("s1").await.unwrap();
        let second = fx.pipeline.complete("s1").await.unwrap();

        assert!(matches!(first, CompletionOutcome::Completed(_)));
        assert_eq!(second, CompletionOutcome::Skipped);
        assert_eq!(fx.persistence.status_update_count(), 1);
        assert_eq!(fx.persistence.therapist_update_count(), 1);
        assert_eq!(fx.persistence.room_update_count(), 1);

        let state = fx.state.lock().await;
        assert_eq!(state.sessions.completed().len(), 1);
        assert!(state.sessions.active().is_empty());
        assert_eq!(state.therapists["t1"].completed_room_ids, vec!["r1".to_string()]);
        assert!(!fx.timers.is_armed("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn interleaved_completion_is_rejected_by_guard() {
        let fx = fixture();
        fx.state.lock().await.sessions.add_active(running_session("s1"));
        fx.persistence.delay_status_updates(Duration::from_millis(300));

        let pipeline = fx.pipeline.clone();
        let in_flight = tokio::spawn(async move { pipeline.complete("s1").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(fx.pipeline.is_completing("s1"));

        let second = fx.pipeline.complete("s1").await.unwrap();
        assert_eq!(second, CompletionOutcome::AlreadyCompleting);

        let first = in_flight.await.unwrap().unwrap();
        assert!(matches!(first, CompletionOutcome::Completed(_)));
        assert_eq!(fx.persistence.status_update_count(), 1);
        assert!(!fx.pipeline.is_completing("s1"));
    }

    #[tokio::test]
    async fn failed_save_leaves_session_running_and_allows_retry() {
        let fx = fixture();
        fx.state.lock().await.sessions.add_active(running_session("s1"));
        fx.persistence.fail_next_status_updates(1);
        let mut events = fx.events.subscribe();

        let err = fx.pipeline.complete("s1").await.unwrap_err();
        assert!(matches!(err, DeskError::PersistenceFailure(_)));
        assert!(!fx.pipeline.is_completing("s1"));
        {
            let state = fx.state.lock().await;
            let session = state.sessions.find_active("s1").unwrap();
            assert_eq!(session.status, SessionStatus::InProgress);
            assert_eq!(state.therapists["t1"].status, TherapistStatus::InSession);
        }
        assert!(matches!(
            events.try_recv().unwrap(),
            DeskEvent::CompletionFailed { .. }
        ));

        let retry = fx.pipeline.complete("s1").await.unwrap();
        assert!(matches!(retry, CompletionOutcome::Completed(_)));
        let state = fx.state.lock().await;
        assert_eq!(state.sessions.find("s1").unwrap().status, SessionStatus::Completed);
        assert_eq!(state.rooms["r1"].status, RoomStatus::Available);
    }

    #[tokio::test]
    async fn unknown_session_is_a_no_op() {
        let fx = fixture();
        let outcome = fx.pipeline.complete("missing").await.unwrap();
        assert_eq!(outcome, CompletionOutcome::Skipped);
        assert_eq!(fx.persistence.status_update_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn session_deleted_during_save_is_tolerated() {
        let fx = fixture();
        fx.state.lock().await.sessions.add_active(running_session("s1"));
        fx.persistence.delay_status_updates(Duration::from_millis(50));

        let pipeline = fx.pipeline.clone();
        let in_flight = tokio::spawn(async move { pipeline.complete("s1").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        fx.state.lock().await.sessions.remove_active("s1");

        let outcome = in_flight.await.unwrap().unwrap();
        assert_eq!(outcome, CompletionOutcome::Skipped);
        assert!(fx.state.lock().await.sessions.completed().is_empty());
    }

    #[tokio::test]
    async fn booking_closed_after_completion() {
        let fx = fixture();
        let mut session = running_session("s1");
        session.booking_id = Some("b1".into());
        {
            let mut state = fx.state.lock().await;
            state.sessions.add_active(session);
            state.bookings.push(Booking {
                id: "b1".into(),
                customer_name: "Dana".into(),
                service_id: "swedish-60".into(),
                scheduled_at: t0(),
                therapist_ids: vec!["t1".into()],
                room_id: Some("r1".into()),
                status: BookingStatus::InProgress,
            });
        }

        fx.pipeline.complete("s1").await.unwrap();

        assert!(fx.state.lock().await.bookings.is_empty());
        let updates = fx.persistence.booking_updates.lock().unwrap().clone();
        assert_eq!(updates, vec![("b1".to_string(), BookingStatus::Completed)]);
    }

    #[tokio::test]
    async fn booking_failure_does_not_undo_completion() {
        let fx = fixture();
        let mut session = running_session("s1");
        session.booking_id = Some("b1".into());
        {
            let mut state = fx.state.lock().await;
            state.sessions.add_active(session);
            state.bookings.push(Booking {
                id: "b1".into(),
                customer_name: "Dana".into(),
                service_id: "swedish-60".into(),
                scheduled_at: t0(),
                therapist_ids: vec!["t1".into()],
                room_id: Some("r1".into()),
                status: BookingStatus::InProgress,
            });
        }
        fx.persistence.fail_next_booking_updates(1);

        let outcome = fx.pipeline.complete("s1").await.unwrap();

        assert!(matches!(outcome, CompletionOutcome::Completed(_)));
        let state = fx.state.lock().await;
        assert!(state.sessions.is_completed("s1"));
        assert_eq!(state.bookings.len(), 1);
    }
}
