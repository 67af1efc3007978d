use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use log::warn;

use crate::{
    error::{DeskError, DeskResult},
    models::{
        Booking, Room, RoomStatus, Service, Session, Therapist, TherapistStatus,
    },
};

use super::store::SessionStore;

/// Persisted rows for one business day, used to resume after a restart.
#[derive(Debug, Clone)]
pub struct DeskSnapshot {
    pub business_day: NaiveDate,
    pub services: Vec<Service>,
    pub therapists: Vec<Therapist>,
    pub rooms: Vec<Room>,
    pub bookings: Vec<Booking>,
    pub sessions: Vec<Session>,
}

/// Everything the desk mutates, guarded by one lock.
#[derive(Debug)]
pub struct DeskState {
    pub sessions: SessionStore,
    pub services: BTreeMap<String, Service>,
    pub therapists: BTreeMap<String, Therapist>,
    pub rooms: BTreeMap<String, Room>,
    /// Open bookings only; completed and cancelled ones are dropped.
    pub bookings: Vec<Booking>,
}

impl DeskState {
    pub fn new(business_day: NaiveDate) -> Self {
        Self {
            sessions: SessionStore::new(business_day),
            services: BTreeMap::new(),
            therapists: BTreeMap::new(),
            rooms: BTreeMap::new(),
            bookings: Vec::new(),
        }
    }

    pub fn service(&self, service_id: &str) -> DeskResult<&Service> {
        self.services
            .get(service_id)
            .ok_or_else(|| DeskError::not_found("service", service_id))
    }

    pub fn booking(&self, booking_id: &str) -> DeskResult<&Booking> {
        self.bookings
            .iter()
            .find(|booking| booking.id == booking_id)
            .ok_or_else(|| DeskError::not_found("booking", booking_id))
    }

    pub fn booking_mut(&mut self, booking_id: &str) -> Option<&mut Booking> {
        self.bookings
            .iter_mut()
            .find(|booking| booking.id == booking_id)
    }

    /// Checks staffing and availability for putting `therapist_ids` and
    /// `room_id` on a session of `service`.
    ///
    /// Therapists and the room already held by `current` count as available.
    pub fn validate_assignment(
        &self,
        service: &Service,
        therapist_ids: &[String],
        room_id: &str,
        current: Option<&Session>,
    ) -> DeskResult<()> {
        let required = service.category.required_therapists();
        if therapist_ids.len() != required {
            return Err(DeskError::Validation(format!(
                "{} needs {} therapist(s), got {}",
                service.name,
                required,
                therapist_ids.len()
            )));
        }

        let unique: HashSet<&str> = therapist_ids.iter().map(String::as_str).collect();
        if unique.len() != therapist_ids.len() {
            return Err(DeskError::Validation(
                "the same therapist is listed twice".into(),
            ));
        }

        for therapist_id in therapist_ids {
            let therapist = self
                .therapists
                .get(therapist_id)
                .ok_or_else(|| DeskError::not_found("therapist", therapist_id))?;
            let held = current.is_some_and(|session| session.therapist_ids.contains(therapist_id));
            match therapist.status {
                TherapistStatus::Available => {}
                TherapistStatus::InSession if held => {}
                TherapistStatus::InSession => {
                    return Err(DeskError::Validation(format!(
                        "{} is already in a session",
                        therapist.name
                    )));
                }
                TherapistStatus::CheckedOut => {
                    return Err(DeskError::Validation(format!(
                        "{} is checked out",
                        therapist.name
                    )));
                }
            }
        }

        let room = self
            .rooms
            .get(room_id)
            .ok_or_else(|| DeskError::not_found("room", room_id))?;
        let held = current.is_some_and(|session| session.room_id == room_id);
        if room.status == RoomStatus::Occupied && !held {
            return Err(DeskError::Validation(format!("{} is occupied", room.name)));
        }

        Ok(())
    }

    /// Marks the session's therapists in session and its room occupied.
    pub fn occupy(&mut self, session: &Session) {
        for therapist_id in &session.therapist_ids {
            if let Some(therapist) = self.therapists.get_mut(therapist_id) {
                therapist.status = TherapistStatus::InSession;
            }
        }
        if let Some(room) = self.rooms.get_mut(&session.room_id) {
            room.status = RoomStatus::Occupied;
        }
    }

    /// Frees the session's therapists and room without recording a finished
    /// room; used when a session is cancelled or rolled back.
    pub fn release(&mut self, session: &Session) {
        for therapist_id in &session.therapist_ids {
            if let Some(therapist) = self.therapists.get_mut(therapist_id) {
                if therapist.status == TherapistStatus::InSession {
                    therapist.status = TherapistStatus::Available;
                }
            }
        }
        if let Some(room) = self.rooms.get_mut(&session.room_id) {
            room.status = RoomStatus::Available;
        }
    }

    /// Frees therapists and room after a finished session and records the
    /// room on each therapist. Returns the therapists and room that changed.
    pub fn finish(&mut self, session: &Session) -> (Vec<Therapist>, Option<Room>) {
        let mut freed = Vec::with_capacity(session.therapist_ids.len());
        for therapist_id in &session.therapist_ids {
            match self.therapists.get_mut(therapist_id) {
                Some(therapist) => {
                    therapist.status = TherapistStatus::Available;
                    therapist.completed_room_ids.push(session.room_id.clone());
                    freed.push(therapist.clone());
                }
                None => warn!(
                    "Therapist {} on session {} is not on today's roster",
                    therapist_id, session.id
                ),
            }
        }

        let room = match self.rooms.get_mut(&session.room_id) {
            Some(room) => {
                room.status = RoomStatus::Available;
                Some(room.clone())
            }
            None => {
                warn!("Room {} on session {} is unknown", session.room_id, session.id);
                None
            }
        };

        (freed, room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ServiceCategory, SessionStatus};
    use chrono::{TimeZone, Utc};

    fn state() -> DeskState {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();
        let mut state = DeskState::new(now.date_naive());
        for (id, name) in [("t1", "Ana"), ("t2", "Ben"), ("t3", "Cy")] {
            state.therapists.insert(
                id.into(),
                Therapist {
                    id: id.into(),
                    name: name.into(),
                    status: TherapistStatus::Available,
                    completed_room_ids: Vec::new(),
                    checked_in_at: now,
                },
            );
        }
        state.rooms.insert(
            "r1".into(),
            Room {
                id: "r1".into(),
                name: "Room 1".into(),
                status: RoomStatus::Available,
            },
        );
        state
    }

    fn service(category: ServiceCategory) -> Service {
        Service {
            id: "svc".into(),
            name: "Couples".into(),
            category,
            duration_minutes: 60,
            price: 160.0,
            payout: 60.0,
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn dual_service_needs_two_therapists() {
        let state = state();
        let err = state
            .validate_assignment(&service(ServiceCategory::Dual), &ids(&["t1"]), "r1", None)
            .unwrap_err();
        assert!(matches!(err, DeskError::Validation(_)));

        state
            .validate_assignment(&service(ServiceCategory::Dual), &ids(&["t1", "t2"]), "r1", None)
            .unwrap();
    }

    #[test]
    fn busy_therapist_allowed_only_on_own_session() {
        let mut state = state();
        state.therapists.get_mut("t1").unwrap().status = TherapistStatus::InSession;
        state.rooms.get_mut("r1").unwrap().status = RoomStatus::Occupied;
        let single = service(ServiceCategory::Single);

        let err = state
            .validate_assignment(&single, &ids(&["t1"]), "r1", None)
            .unwrap_err();
        assert!(matches!(err, DeskError::Validation(_)));

        let now = Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();
        let current = Session {
            id: "s1".into(),
            service_id: "svc".into(),
            therapist_ids: ids(&["t1"]),
            room_id: "r1".into(),
            status: SessionStatus::Ready,
            start_time: None,
            end_time: None,
            duration_minutes: 60,
            price: 80.0,
            payout: 40.0,
            booking_id: None,
            business_day: now.date_naive(),
            created_at: now,
            updated_at: now,
        };
        state
            .validate_assignment(&single, &ids(&["t1"]), "r1", Some(&current))
            .unwrap();
    }

    #[test]
    fn unknown_room_is_not_found() {
        let state = state();
        let err = state
            .validate_assignment(&service(ServiceCategory::Single), &ids(&["t1"]), "r9", None)
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
