//! Utility functions for the swapstats collector.
//!
//! This module is organized into focused submodules:
//!
//! - [`conversion`] - Fixed-point conversions (U256 ⇄ BigDecimal, hex encoding)
//! - [`time`] - Hour truncation and interval rounding
//! - [`retry`] - Bounded retry with fixed backoff

mod conversion;
mod retry;
mod time;

// ============================================
// Common Constants
// ============================================

/// LP tokens of V2 pairs always carry 18 decimals.
pub const PAIR_DECIMALS: u8 = 18;

// ============================================
// Re-exports
// ============================================

pub use conversion::{hex_encode, int_to_dec, reserve_to_dec, u256_to_bigint};
pub use retry::{retry, RetryPolicy};
pub use time::{from_unix, round_to_interval, truncate_hour, BUCKET_SECS};
