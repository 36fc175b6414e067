use chrono::Utc;

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Get current timestamp in milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a whole number of days into milliseconds.
pub fn days_to_ms(days: u32) -> i64 {
    i64::from(days) * DAY_MS
}
