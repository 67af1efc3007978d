use std::{collections::BTreeSet, sync::Arc};

use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    clock::Clock,
    error::{DeskError, DeskResult},
    events::{DeskEvent, EventBus},
    models::{
        Booking, BookingStatus, DailySummary, NewSession, Room, RoomStatus, RoomUpdate, Service,
        Session, SessionChanges, SessionStatus, Therapist, TherapistStatus, TherapistUpdate,
    },
    persistence::Persistence,
    timer::{shifted_end_time, TimerConfig, TimerManager},
};

use super::{
    completion::{spawn_expiry_dispatcher, CompletionOutcome, CompletionPipeline},
    guard::CompletionTicket,
    state::{DeskSnapshot, DeskState},
};

/// Handle the front desk drives; cheap to clone.
#[derive(Clone)]
pub struct FrontDesk {
    state: Arc<Mutex<DeskState>>,
    persistence: Arc<dyn Persistence>,
    timers: TimerManager,
    pipeline: CompletionPipeline,
    events: EventBus,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    dispatcher: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl FrontDesk {
    /// Must be called from within a tokio runtime.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        clock: Arc<dyn Clock>,
        timer_config: TimerConfig,
    ) -> Self {
        let business_day = clock.now().date_naive();
        let state = Arc::new(Mutex::new(DeskState::new(business_day)));
        let events = EventBus::new();
        let (timers, expired_rx) = TimerManager::new(clock.clone(), timer_config);
        let pipeline = CompletionPipeline::new(
            state.clone(),
            persistence.clone(),
            timers.clone(),
            events.clone(),
            clock.clone(),
        );
        let shutdown = CancellationToken::new();
        let dispatcher = spawn_expiry_dispatcher(pipeline.clone(), expired_rx, shutdown.clone());

        Self {
            state,
            persistence,
            timers,
            pipeline,
            events,
            clock,
            shutdown,
            dispatcher: Arc::new(Mutex::new(Some(dispatcher))),
        }
    }

    /// Replaces the desk state with a persisted business day and re-arms every
    /// running session. Sessions already past their end complete on the first
    /// poll. Returns how many timers were armed.
    pub async fn recover(&self, snapshot: DeskSnapshot) -> usize {
        self.timers.disarm_all().await;

        let mut state = DeskState::new(snapshot.business_day);
        state.services = snapshot
            .services
            .into_iter()
            .map(|service| (service.id.clone(), service))
            .collect();
        state.therapists = snapshot
            .therapists
            .into_iter()
            .map(|therapist| (therapist.id.clone(), therapist))
            .collect();
        state.rooms = snapshot
            .rooms
            .into_iter()
            .map(|room| (room.id.clone(), room))
            .collect();
        state.bookings = snapshot
            .bookings
            .into_iter()
            .filter(|booking| booking.status.is_open())
            .collect();

        for session in snapshot.sessions {
            if session.status.is_active() {
                state.sessions.add_active(session);
            } else {
                state.sessions.add_completed(session);
            }
        }
        let rearm: Vec<(String, DateTime<Utc>)> = state
            .sessions
            .in_progress()
            .filter_map(|session| Some((session.id.clone(), session.end_time?)))
            .collect();

        let active = state.sessions.active().len();
        *self.state.lock().await = state;

        for (session_id, end_time) in &rearm {
            self.timers.arm(session_id, *end_time);
        }

        info!(
            "Recovered business day {}: {} active session(s), {} timer(s) re-armed",
            snapshot.business_day,
            active,
            rearm.len()
        );
        rearm.len()
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.timers.disarm_all().await;
        if let Some(handle) = self.dispatcher.lock().await.take() {
            if let Err(err) = handle.await {
                warn!("Expiry dispatcher did not stop cleanly: {err}");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeskEvent> {
        self.events.subscribe()
    }

    // Catalog and roster

    pub async fn register_service(&self, service: Service) -> DeskResult<Service> {
        if service.duration_minutes == 0 {
            return Err(DeskError::Validation(format!(
                "{} must last at least one minute",
                service.name
            )));
        }
        self.persistence
            .save_service(&service)
            .await
            .map_err(DeskError::persistence)?;
        self.state
            .lock()
            .await
            .services
            .insert(service.id.clone(), service.clone());
        Ok(service)
    }

    pub async fn register_room(&self, name: &str) -> DeskResult<Room> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DeskError::Validation("room name is empty".into()));
        }
        let room = Room {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            status: RoomStatus::Available,
        };
        self.persistence
            .save_room(&room)
            .await
            .map_err(DeskError::persistence)?;
        self.state
            .lock()
            .await
            .rooms
            .insert(room.id.clone(), room.clone());
        Ok(room)
    }

    pub async fn check_in_therapist(&self, name: &str) -> DeskResult<Therapist> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DeskError::Validation("therapist name is empty".into()));
        }
        let therapist = Therapist {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            status: TherapistStatus::Available,
            completed_room_ids: Vec::new(),
            checked_in_at: self.clock.now(),
        };
        self.persistence
            .save_therapist(&therapist)
            .await
            .map_err(DeskError::persistence)?;
        self.state
            .lock()
            .await
            .therapists
            .insert(therapist.id.clone(), therapist.clone());

        self.events.emit(DeskEvent::TherapistCheckedIn {
            therapist_id: therapist.id.clone(),
        });
        info!("{} checked in", therapist.name);
        Ok(therapist)
    }

    pub async fn check_out_therapist(&self, therapist_id: &str) -> DeskResult<Therapist> {
        {
            let state = self.state.lock().await;
            let therapist = state
                .therapists
                .get(therapist_id)
                .ok_or_else(|| DeskError::not_found("therapist", therapist_id))?;
            if therapist.status == TherapistStatus::InSession {
                return Err(DeskError::Validation(format!(
                    "{} is still in a session",
                    therapist.name
                )));
            }
        }

        self.persistence
            .update_therapist(
                therapist_id,
                TherapistUpdate::status(TherapistStatus::CheckedOut),
            )
            .await
            .map_err(DeskError::persistence)?;

        let therapist = {
            let mut state = self.state.lock().await;
            let therapist = state
                .therapists
                .get_mut(therapist_id)
                .ok_or_else(|| DeskError::not_found("therapist", therapist_id))?;
            therapist.status = TherapistStatus::CheckedOut;
            therapist.clone()
        };

        self.events.emit(DeskEvent::TherapistCheckedOut {
            therapist_id: therapist_id.to_string(),
        });
        Ok(therapist)
    }

    // Session lifecycle

    pub async fn create_session(&self, new: NewSession) -> DeskResult<Session> {
        let now = self.clock.now();
        let session = {
            let mut state = self.state.lock().await;
            if let Some(booking_id) = &new.booking_id {
                state.booking(booking_id)?;
            }
            let service = state.service(&new.service_id)?.clone();
            state.validate_assignment(&service, &new.therapist_ids, &new.room_id, None)?;

            let session = Session {
                id: Uuid::new_v4().to_string(),
                service_id: service.id.clone(),
                therapist_ids: new.therapist_ids,
                room_id: new.room_id,
                status: SessionStatus::Ready,
                start_time: None,
                end_time: None,
                duration_minutes: service.duration_minutes,
                price: service.price,
                payout: service.payout,
                booking_id: new.booking_id,
                business_day: state.sessions.business_day(),
                created_at: now,
                updated_at: now,
            };
            state.sessions.add_active(session.clone());
            state.occupy(&session);
            session
        };

        if let Err(err) = self.persistence.save_session(&session).await {
            let mut state = self.state.lock().await;
            state.sessions.remove_active(&session.id);
            state.release(&session);
            return Err(DeskError::persistence(err));
        }

        self.persist_occupancy(&session.therapist_ids, &[session.room_id.clone()])
            .await;
        self.events.emit(DeskEvent::SessionCreated {
            session: session.clone(),
        });
        info!("Session {} created in room {}", session.id, session.room_id);
        Ok(session)
    }

    pub async fn start_session(&self, session_id: &str) -> DeskResult<Session> {
        let _hold = self.hold_session(session_id)?;
        let now = self.clock.now();
        let (previous, started, end_time) = {
            let mut state = self.state.lock().await;
            let session = active_session_mut(&mut state, session_id, "start")?;
            if session.status != SessionStatus::Ready {
                return Err(DeskError::InvalidTransition {
                    id: session_id.to_string(),
                    status: session.status,
                    action: "start",
                });
            }
            let previous = session.clone();
            let end_time = session.begin(now);
            (previous, session.clone(), end_time)
        };

        if let Err(err) = self.persistence.save_session(&started).await {
            self.restore_session(previous).await;
            return Err(DeskError::persistence(err));
        }

        self.timers.arm(session_id, end_time);
        self.events.emit(DeskEvent::SessionStarted {
            session_id: session_id.to_string(),
            end_time,
        });
        info!("Session {} started, ends at {}", session_id, end_time);
        Ok(started)
    }

    /// Changes service, therapists or room of a Ready or running session.
    ///
    /// A running session whose duration changes keeps its original schedule
    /// shifted by the duration delta, and its timer is re-armed.
    pub async fn modify_session(
        &self,
        session_id: &str,
        changes: SessionChanges,
    ) -> DeskResult<Session> {
        let _hold = self.hold_session(session_id)?;
        let now = self.clock.now();
        let (previous, updated, rearm_at) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let current = active_session_mut(state, session_id, "modify")?.clone();
            if changes.is_empty() {
                return Ok(current);
            }

            let service_id = changes.service_id.as_deref().unwrap_or(&current.service_id);
            let service = state.service(service_id)?.clone();
            let therapist_ids = changes
                .therapist_ids
                .unwrap_or_else(|| current.therapist_ids.clone());
            let room_id = changes.room_id.unwrap_or_else(|| current.room_id.clone());
            state.validate_assignment(&service, &therapist_ids, &room_id, Some(&current))?;

            let mut updated = current.clone();
            updated.service_id = service.id.clone();
            updated.duration_minutes = service.duration_minutes;
            updated.price = service.price;
            updated.payout = service.payout;
            updated.therapist_ids = therapist_ids;
            updated.room_id = room_id;
            updated.updated_at = now;

            let mut rearm_at = None;
            if current.status == SessionStatus::InProgress
                && updated.duration_minutes != current.duration_minutes
            {
                if let Some(old_end) = current.end_time {
                    let new_end = shifted_end_time(
                        old_end,
                        current.duration_minutes,
                        updated.duration_minutes,
                    );
                    updated.end_time = Some(new_end);
                    rearm_at = Some(new_end);
                }
            }

            state.release(&current);
            state.occupy(&updated);
            if let Some(session) = state.sessions.find_active_mut(session_id) {
                *session = updated.clone();
            }
            (current, updated, rearm_at)
        };

        if let Err(err) = self.persistence.save_session(&updated).await {
            let mut state = self.state.lock().await;
            state.release(&updated);
            state.occupy(&previous);
            if let Some(session) = state.sessions.find_active_mut(session_id) {
                *session = previous;
            }
            return Err(DeskError::persistence(err));
        }

        if let Some(end_time) = rearm_at {
            self.timers.disarm(session_id);
            self.timers.arm(session_id, end_time);
            info!("Session {} rescheduled to end at {}", session_id, end_time);
        }

        let therapist_ids: BTreeSet<String> = previous
            .therapist_ids
            .iter()
            .chain(updated.therapist_ids.iter())
            .cloned()
            .collect();
        let room_ids: BTreeSet<String> = [previous.room_id.clone(), updated.room_id.clone()]
            .into_iter()
            .collect();
        self.persist_occupancy(
            &therapist_ids.into_iter().collect::<Vec<_>>(),
            &room_ids.into_iter().collect::<Vec<_>>(),
        )
        .await;

        self.events.emit(DeskEvent::SessionModified {
            session: updated.clone(),
        });
        Ok(updated)
    }

    /// Manual completion; duplicate or unknown ids are no-ops.
    pub async fn complete_session(&self, session_id: &str) -> DeskResult<CompletionOutcome> {
        self.pipeline.complete(session_id).await
    }

    pub async fn delete_session(&self, session_id: &str) -> DeskResult<Session> {
        let _hold = self.hold_session(session_id)?;
        let removed = {
            let mut state = self.state.lock().await;
            active_session_mut(&mut state, session_id, "delete")?;
            let removed = state
                .sessions
                .remove_active(session_id)
                .ok_or_else(|| DeskError::not_found("session", session_id))?;
            state.release(&removed);
            removed
        };
        self.timers.disarm(session_id);

        if let Err(err) = self.persistence.delete_session(session_id).await {
            {
                let mut state = self.state.lock().await;
                state.occupy(&removed);
                state.sessions.add_active(removed.clone());
            }
            if let (SessionStatus::InProgress, Some(end_time)) = (removed.status, removed.end_time)
            {
                self.timers.arm(session_id, end_time);
            }
            return Err(DeskError::persistence(err));
        }

        self.persist_occupancy(&removed.therapist_ids, &[removed.room_id.clone()])
            .await;

        if let Some(booking_id) = removed.booking_id.as_deref() {
            self.reopen_booking(booking_id).await;
        }

        self.events.emit(DeskEvent::SessionDeleted {
            session_id: session_id.to_string(),
        });
        info!("Session {} deleted", session_id);
        Ok(removed)
    }

    // Bookings

    pub async fn add_booking(&self, booking: Booking) -> DeskResult<Booking> {
        {
            let state = self.state.lock().await;
            state.service(&booking.service_id)?;
            if booking.status != BookingStatus::Scheduled {
                return Err(DeskError::Validation(format!(
                    "new booking {} must be scheduled, not {}",
                    booking.id,
                    booking.status.as_str()
                )));
            }
            if state.booking(&booking.id).is_ok() {
                return Err(DeskError::Validation(format!(
                    "booking {} already exists",
                    booking.id
                )));
            }
        }

        self.persistence
            .save_booking(&booking)
            .await
            .map_err(DeskError::persistence)?;
        self.state.lock().await.bookings.push(booking.clone());
        Ok(booking)
    }

    pub async fn cancel_booking(&self, booking_id: &str) -> DeskResult<()> {
        {
            let state = self.state.lock().await;
            let booking = state.booking(booking_id)?;
            if booking.status != BookingStatus::Scheduled {
                return Err(DeskError::Validation(format!(
                    "booking {} is {}",
                    booking_id,
                    booking.status.as_str()
                )));
            }
        }

        self.persistence
            .update_booking_status(booking_id, BookingStatus::Cancelled)
            .await
            .map_err(DeskError::persistence)?;
        self.state
            .lock()
            .await
            .bookings
            .retain(|booking| booking.id != booking_id);
        self.events.emit(DeskEvent::BookingCancelled {
            booking_id: booking_id.to_string(),
        });
        Ok(())
    }

    /// Turns a scheduled booking into a running session.
    ///
    /// `room_id` overrides the room reserved on the booking.
    pub async fn start_booking(
        &self,
        booking_id: &str,
        room_id: Option<String>,
    ) -> DeskResult<Session> {
        let new = {
            let state = self.state.lock().await;
            let booking = state.booking(booking_id)?;
            if booking.status != BookingStatus::Scheduled {
                return Err(DeskError::Validation(format!(
                    "booking {} is {}",
                    booking_id,
                    booking.status.as_str()
                )));
            }
            let room_id = room_id
                .or_else(|| booking.room_id.clone())
                .ok_or_else(|| {
                    DeskError::Validation(format!("booking {booking_id} has no room assigned"))
                })?;
            NewSession {
                service_id: booking.service_id.clone(),
                therapist_ids: booking.therapist_ids.clone(),
                room_id,
                booking_id: Some(booking_id.to_string()),
            }
        };

        let session = self.create_session(new).await?;
        let started = self.start_session(&session.id).await?;

        if let Some(booking) = self.state.lock().await.booking_mut(booking_id) {
            booking.status = BookingStatus::InProgress;
        }
        if let Err(err) = self
            .persistence
            .update_booking_status(booking_id, BookingStatus::InProgress)
            .await
        {
            warn!("Booking {} started but its status was not saved: {err:#}", booking_id);
        }

        Ok(started)
    }

    // Reads

    pub async fn business_day(&self) -> NaiveDate {
        self.state.lock().await.sessions.business_day()
    }

    pub async fn session(&self, session_id: &str) -> DeskResult<Session> {
        self.state
            .lock()
            .await
            .sessions
            .find(session_id)
            .cloned()
            .ok_or_else(|| DeskError::not_found("session", session_id))
    }

    pub async fn active_sessions(&self) -> Vec<Session> {
        self.state.lock().await.sessions.active().to_vec()
    }

    pub async fn completed_sessions(&self) -> Vec<Session> {
        self.state.lock().await.sessions.completed().to_vec()
    }

    pub async fn therapist(&self, therapist_id: &str) -> DeskResult<Therapist> {
        self.state
            .lock()
            .await
            .therapists
            .get(therapist_id)
            .cloned()
            .ok_or_else(|| DeskError::not_found("therapist", therapist_id))
    }

    pub async fn therapists(&self) -> Vec<Therapist> {
        self.state.lock().await.therapists.values().cloned().collect()
    }

    pub async fn room(&self, room_id: &str) -> DeskResult<Room> {
        self.state
            .lock()
            .await
            .rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| DeskError::not_found("room", room_id))
    }

    pub async fn rooms(&self) -> Vec<Room> {
        self.state.lock().await.rooms.values().cloned().collect()
    }

    pub async fn services(&self) -> Vec<Service> {
        self.state.lock().await.services.values().cloned().collect()
    }

    pub async fn bookings(&self) -> Vec<Booking> {
        self.state.lock().await.bookings.clone()
    }

    pub async fn daily_summary(&self) -> DailySummary {
        self.state.lock().await.sessions.summary()
    }

    pub fn remaining_ms(&self, session_id: &str) -> Option<i64> {
        self.timers.remaining_ms(session_id)
    }

    pub fn scheduled_end(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.timers.end_time(session_id)
    }

    pub fn is_timer_armed(&self, session_id: &str) -> bool {
        self.timers.is_armed(session_id)
    }

    // Helpers

    /// Keeps the completion pipeline off the session until the ticket drops,
    /// so an edit and its save never interleave with a completion.
    fn hold_session(&self, session_id: &str) -> DeskResult<CompletionTicket> {
        self.pipeline
            .hold(session_id)
            .ok_or_else(|| DeskError::Completing {
                id: session_id.to_string(),
            })
    }

    async fn restore_session(&self, previous: Session) {
        let mut state = self.state.lock().await;
        if let Some(session) = state.sessions.find_active_mut(&previous.id) {
            *session = previous;
        }
    }

    async fn reopen_booking(&self, booking_id: &str) {
        if let Some(booking) = self.state.lock().await.booking_mut(booking_id) {
            booking.status = BookingStatus::Scheduled;
        }
        if let Err(err) = self
            .persistence
            .update_booking_status(booking_id, BookingStatus::Scheduled)
            .await
        {
            warn!("Failed to reopen booking {}: {err:#}", booking_id);
        }
    }

    /// Saves the current in-memory status of the given therapists and rooms.
    async fn persist_occupancy(&self, therapist_ids: &[String], room_ids: &[String]) {
        let (therapists, rooms) = {
            let state = self.state.lock().await;
            let therapists: Vec<(String, TherapistStatus)> = therapist_ids
                .iter()
                .filter_map(|id| state.therapists.get(id))
                .map(|therapist| (therapist.id.clone(), therapist.status))
                .collect();
            let rooms: Vec<(String, RoomStatus)> = room_ids
                .iter()
                .filter_map(|id| state.rooms.get(id))
                .map(|room| (room.id.clone(), room.status))
                .collect();
            (therapists, rooms)
        };

        for (therapist_id, status) in therapists {
            if let Err(err) = self
                .persistence
                .update_therapist(&therapist_id, TherapistUpdate::status(status))
                .await
            {
                warn!("Failed to save status of therapist {}: {err:#}", therapist_id);
            }
        }
        for (room_id, status) in rooms {
            if let Err(err) = self
                .persistence
                .update_room(&room_id, RoomUpdate::status(status))
                .await
            {
                warn!("Failed to save status of room {}: {err:#}", room_id);
            }
        }
    }
}

/// Active session for `action`, rejecting completed ones.
fn active_session_mut<'a>(
    state: &'a mut DeskState,
    session_id: &str,
    action: &'static str,
) -> DeskResult<&'a mut Session> {
    if state.sessions.is_completed(session_id) {
        return Err(DeskError::InvalidTransition {
            id: session_id.to_string(),
            status: SessionStatus::Completed,
            action,
        });
    }
    state
        .sessions
        .find_active_mut(session_id)
        .ok_or_else(|| DeskError::not_found("session", session_id))
}
