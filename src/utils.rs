// src/utils.rs
// Utility functions for MIG Quote SDK

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds (0 if the system clock is before the epoch).
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Human-readable UTC rendering of a unix timestamp for reports and logs.
pub fn format_timestamp(secs: u64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp(secs as i64, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_epoch() {
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00+00:00");
    }
}
