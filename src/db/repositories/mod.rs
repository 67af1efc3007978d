pub mod bookings;
pub mod rooms;
pub mod services;
pub mod sessions;
pub mod therapists;
