pub mod booking;
pub mod room;
pub mod service;
pub mod session;
pub mod therapist;

pub use booking::{Booking, BookingStatus};
pub use room::{Room, RoomStatus, RoomUpdate};
pub use service::{Service, ServiceCategory};
pub use session::{
    DailySummary, NewSession, Session, SessionChanges, SessionStatus, SessionStatusUpdate,
    TherapistPayout,
};
pub use therapist::{Therapist, TherapistStatus, TherapistUpdate};
