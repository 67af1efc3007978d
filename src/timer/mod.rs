pub mod manager;
pub mod schedule;

pub use manager::{Expiry, ExpirySource, TimerConfig, TimerManager, DEFAULT_POLL_INTERVAL};
pub use schedule::shifted_end_time;
