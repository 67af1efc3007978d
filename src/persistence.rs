use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    Booking, BookingStatus, Room, RoomUpdate, Service, Session, SessionStatusUpdate, Therapist,
    TherapistUpdate,
};

/// External store the desk writes through.
///
/// Every call may fail (unreachable store, rejected write); callers decide
/// whether a failure is fatal to the operation or best-effort.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn update_session_status(
        &self,
        session_id: &str,
        update: SessionStatusUpdate,
    ) -> Result<()>;

    async fn update_therapist(&self, therapist_id: &str, update: TherapistUpdate) -> Result<()>;

    async fn update_room(&self, room_id: &str, update: RoomUpdate) -> Result<()>;

    async fn update_booking_status(&self, booking_id: &str, status: BookingStatus) -> Result<()>;

    /// Inserts or replaces the whole session row.
    async fn save_session(&self, session: &Session) -> Result<()>;

    async fn delete_session(&self, session_id: &str) -> Result<()>;

    async fn save_therapist(&self, therapist: &Therapist) -> Result<()>;

    async fn save_room(&self, room: &Room) -> Result<()>;

    async fn save_service(&self, service: &Service) -> Result<()>;

    async fn save_booking(&self, booking: &Booking) -> Result<()>;
}

#[cfg(test)]
pub mod testing {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };
    use std::time::Duration;

    use anyhow::{bail, Result};
    use async_trait::async_trait;

    use super::Persistence;
    use crate::models::{
        Booking, BookingStatus, Room, RoomUpdate, Service, Session, SessionStatusUpdate,
        Therapist, TherapistUpdate,
    };

    /// In-memory double that records calls and can be told to fail.
    #[derive(Default)]
    pub struct RecordingPersistence {
        pub status_updates: Mutex<Vec<(String, SessionStatusUpdate)>>,
        pub therapist_updates: Mutex<Vec<(String, TherapistUpdate)>>,
        pub room_updates: Mutex<Vec<(String, RoomUpdate)>>,
        pub booking_updates: Mutex<Vec<(String, BookingStatus)>>,
        pub saved_sessions: Mutex<Vec<Session>>,
        pub deleted_sessions: Mutex<Vec<String>>,
        fail_status_updates: AtomicUsize,
        fail_booking_updates: AtomicUsize,
        fail_session_writes: AtomicUsize,
        status_delay_ms: AtomicUsize,
    }

    impl RecordingPersistence {
        /// The next `count` session status updates fail.
        pub fn fail_next_status_updates(&self, count: usize) {
            self.fail_status_updates.store(count, Ordering::SeqCst);
        }

        pub fn fail_next_booking_updates(&self, count: usize) {
            self.fail_booking_updates.store(count, Ordering::SeqCst);
        }

        /// The next `count` session saves or deletes fail.
        pub fn fail_next_session_writes(&self, count: usize) {
            self.fail_session_writes.store(count, Ordering::SeqCst);
        }

        /// Status updates sleep this long before answering.
        pub fn delay_status_updates(&self, delay: Duration) {
            self.status_delay_ms
                .store(delay.as_millis() as usize, Ordering::SeqCst);
        }

        pub fn status_update_count(&self) -> usize {
            self.status_updates.lock().unwrap().len()
        }

        pub fn therapist_update_count(&self) -> usize {
            self.therapist_updates.lock().unwrap().len()
        }

        pub fn room_update_count(&self) -> usize {
            self.room_updates.lock().unwrap().len()
        }

        fn take_failure(counter: &AtomicUsize) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl Persistence for RecordingPersistence {
        async fn update_session_status(
            &self,
            session_id: &str,
            update: SessionStatusUpdate,
        ) -> Result<()> {
            let delay = self.status_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            }
            if Self::take_failure(&self.fail_status_updates) {
                bail!("network unreachable");
            }
            self.status_updates
                .lock()
                .unwrap()
                .push((session_id.to_string(), update));
            Ok(())
        }

        async fn update_therapist(
            &self,
            therapist_id: &str,
            update: TherapistUpdate,
        ) -> Result<()> {
            self.therapist_updates
                .lock()
                .unwrap()
                .push((therapist_id.to_string(), update));
            Ok(())
        }

        async fn update_room(&self, room_id: &str, update: RoomUpdate) -> Result<()> {
            self.room_updates
                .lock()
                .unwrap()
                .push((room_id.to_string(), update));
            Ok(())
        }

        async fn update_booking_status(
            &self,
            booking_id: &str,
            status: BookingStatus,
        ) -> Result<()> {
            if Self::take_failure(&self.fail_booking_updates) {
                bail!("booking service unavailable");
            }
            self.booking_updates
                .lock()
                .unwrap()
                .push((booking_id.to_string(), status));
            Ok(())
        }

        async fn save_session(&self, session: &Session) -> Result<()> {
            if Self::take_failure(&self.fail_session_writes) {
                bail!("write rejected");
            }
            self.saved_sessions.lock().unwrap().push(session.clone());
            Ok(())
        }

        async fn delete_session(&self, session_id: &str) -> Result<()> {
            if Self::take_failure(&self.fail_session_writes) {
                bail!("write rejected");
            }
            self.deleted_sessions
                .lock()
                .unwrap()
                .push(session_id.to_string());
            Ok(())
        }

        async fn save_therapist(&self, _therapist: &Therapist) -> Result<()> {
            Ok(())
        }

        async fn save_room(&self, _room: &Room) -> Result<()> {
            Ok(())
        }

        async fn save_service(&self, _service: &Service) -> Result<()> {
            Ok(())
        }

        async fn save_booking(&self, _booking: &Booking) -> Result<()> {
            Ok(())
        }
    }
}
