use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row id of the single checkpoint record.
pub const LAST_CHECK_ID: &str = "last_check";

/// Collection progress checkpoint (PostgreSQL).
///
/// Written only after a run completes. `last_check_at` is the hour boundary the
/// run stopped at; `last_block_number` the highest block whose events were counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastCheck {
    pub last_check_at: DateTime<Utc>,
    pub last_block_number: u64,
}

impl LastCheck {
    pub fn new(last_check_at: DateTime<Utc>, last_block_number: u64) -> Self {
        Self {
            last_check_at,
            last_block_number,
        }
    }
}
