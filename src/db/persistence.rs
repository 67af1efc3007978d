use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    desk::DeskSnapshot,
    models::{
        Booking, BookingStatus, Room, RoomUpdate, Service, Session, SessionStatusUpdate,
        Therapist, TherapistUpdate,
    },
    persistence::Persistence,
};

use super::connection::Database;

#[async_trait]
impl Persistence for Database {
    async fn update_session_status(
        &self,
        session_id: &str,
        update: SessionStatusUpdate,
    ) -> Result<()> {
        self.mark_session_status(session_id, update)
            .await
            .with_context(|| format!("failed to update status of session {session_id}"))
    }

    async fn update_therapist(&self, therapist_id: &str, update: TherapistUpdate) -> Result<()> {
        self.patch_therapist(therapist_id, update)
            .await
            .with_context(|| format!("failed to update therapist {therapist_id}"))
    }

    async fn update_room(&self, room_id: &str, update: RoomUpdate) -> Result<()> {
        self.patch_room(room_id, update)
            .await
            .with_context(|| format!("failed to update room {room_id}"))
    }

    async fn update_booking_status(&self, booking_id: &str, status: BookingStatus) -> Result<()> {
        self.mark_booking_status(booking_id, status)
            .await
            .with_context(|| format!("failed to update booking {booking_id}"))
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        self.upsert_session(session)
            .await
            .with_context(|| format!("failed to save session {}", session.id))
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.remove_session(session_id)
            .await
            .with_context(|| format!("failed to delete session {session_id}"))
    }

    async fn save_therapist(&self, therapist: &Therapist) -> Result<()> {
        self.upsert_therapist(therapist)
            .await
            .with_context(|| format!("failed to save therapist {}", therapist.id))
    }

    async fn save_room(&self, room: &Room) -> Result<()> {
        self.upsert_room(room)
            .await
            .with_context(|| format!("failed to save room {}", room.id))
    }

    async fn save_service(&self, service: &Service) -> Result<()> {
        self.upsert_service(service)
            .await
            .with_context(|| format!("failed to save service {}", service.id))
    }

    async fn save_booking(&self, booking: &Booking) -> Result<()> {
        self.upsert_booking(booking)
            .await
            .with_context(|| format!("failed to save booking {}", booking.id))
    }
}

impl Database {
    /// Everything the desk needs to resume `business_day`.
    pub async fn load_business_day(&self, business_day: NaiveDate) -> Result<DeskSnapshot> {
        Ok(DeskSnapshot {
            business_day,
            services: self.list_services().await.context("failed to load services")?,
            therapists: self
                .list_therapists_for_day(business_day)
                .await
                .context("failed to load therapists")?,
            rooms: self.list_rooms().await.context("failed to load rooms")?,
            bookings: self
                .list_open_bookings()
                .await
                .context("failed to load bookings")?,
            sessions: self
                .list_sessions_for_day(business_day)
                .await
                .context("failed to load sessions")?,
        })
    }
}
