//! Wall-clock helpers
//!
//! All account timestamps are unix epoch seconds. Keeping the conversion in
//! one place avoids the scattered `SystemTime::now().duration_since(..)`
//! blocks otherwise needed by every caller.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in whole seconds.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Human-readable distance between `now` and an expiry timestamp.
///
/// Produces `"in 2h 5m"` for future instants and `"expired 3m ago"` for past
/// ones. Only the two most significant units are shown.
pub fn describe_expiry(expires_at: i64, now: i64) -> String {
    let delta = expires_at - now;
    if delta >= 0 {
        format!("in {}", human_span(delta as u64))
    } else {
        format!("expired {} ago", human_span(delta.unsigned_abs()))
    }
}

fn human_span(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;

    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_after_2024() {
        assert!(now_secs() > 1_704_067_200);
    }

    #[test]
    fn describes_future_expiry() {
        assert_eq!(describe_expiry(1_000 + 7_500, 1_000), "in 2h 5m");
        assert_eq!(describe_expiry(1_000 + 3 * 86_400 + 3_600, 1_000), "in 3d 1h");
    }

    #[test]
    fn describes_past_expiry() {
        assert_eq!(describe_expiry(1_000, 1_190), "expired 3m 10s ago");
    }

    #[test]
    fn zero_delta_is_not_expired() {
        assert_eq!(describe_expiry(500, 500), "in 0s");
    }
}
