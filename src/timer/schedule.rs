use chrono::{DateTime, Duration, Utc};

/// End time of a running session after its service duration changes.
///
/// The original schedule is shifted by the duration delta; it is not
/// recomputed from the current time.
pub fn shifted_end_time(
    old_end: DateTime<Utc>,
    old_duration_minutes: u32,
    new_duration_minutes: u32,
) -> DateTime<Utc> {
    let delta = i64::from(new_duration_minutes) - i64::from(old_duration_minutes);
    old_end + Duration::minutes(delta)
}
