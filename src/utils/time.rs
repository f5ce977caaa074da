//! Bucket-time helpers.

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Granularity of every stored bucket.
pub const BUCKET_SECS: i64 = 3600;

/// Truncate a timestamp down to the start of its hour.
pub fn truncate_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    let secs = t.timestamp().div_euclid(BUCKET_SECS) * BUCKET_SECS;
    from_unix(secs)
}

/// Convert unix seconds into a UTC timestamp.
///
/// Out-of-range values clamp to the epoch; block timestamps never get close.
pub fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

/// Round unix seconds to the nearest multiple of `interval`, halves rounding up.
///
/// Intervals of zero or less leave the value untouched.
pub fn round_to_interval(secs: i64, interval: Duration) -> i64 {
    let step = interval.num_seconds();
    if step <= 0 {
        return secs;
    }
    let floor = secs.div_euclid(step) * step;
    if secs - floor >= step - (step / 2) {
        floor + step
    } else {
        floor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_hour() {
        let t = from_unix(7_200 + 59 * 60 + 59);
        assert_eq!(truncate_hour(t), from_unix(7_200));
        assert_eq!(truncate_hour(from_unix(7_200)), from_unix(7_200));
    }

    #[test]
    fn test_round_to_interval() {
        let hour = Duration::hours(1);
        assert_eq!(round_to_interval(3_600 + 1_799, hour), 3_600);
        assert_eq!(round_to_interval(3_600 + 1_800, hour), 7_200);
        assert_eq!(round_to_interval(-1, hour), 0);
    }

    #[test]
    fn test_round_with_zero_interval_is_identity() {
        assert_eq!(round_to_interval(12_345, Duration::zero()), 12_345);
    }
}
