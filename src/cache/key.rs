//! Fixed-width cache keys.
//!
//! Layout: `[endpoint u8][from i64 LE][to i64 LE][interval i64 LE][suffix..]`.
//! The structured prefix is always 25 bytes, so keys of different endpoints
//! never collide whatever the suffix holds.

use chrono::{DateTime, Duration, Utc};

use crate::db::TimeRange;
use crate::utils::round_to_interval;

/// Width of the structured key prefix.
pub const KEY_PREFIX_LEN: usize = 1 + 8 + 8 + 8;

/// Encoding of an open range side.
const UNBOUNDED: i64 = i64::MIN;

/// Query shape a cached value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Endpoint {
    Pair = 1,
    Pairs = 2,
    Token = 3,
    Tokens = 4,
    Totals = 5,
    TokenBuckets = 6,
    PairBuckets = 7,
}

fn encode_bound(bound: Option<DateTime<Utc>>, interval: Duration) -> i64 {
    bound.map_or(UNBOUNDED, |t| round_to_interval(t.timestamp(), interval))
}

/// Build the key for `endpoint` over `range` at `interval`, with an entity suffix.
pub fn cache_key(endpoint: Endpoint, range: TimeRange, interval: Duration, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(KEY_PREFIX_LEN + suffix.len());
    key.push(endpoint as u8);
    key.extend_from_slice(&encode_bound(range.from, interval).to_le_bytes());
    key.extend_from_slice(&encode_bound(range.to, interval).to_le_bytes());
    key.extend_from_slice(&interval.num_seconds().to_le_bytes());
    key.extend_from_slice(suffix);
    key
}
