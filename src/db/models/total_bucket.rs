use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::rollup::Bucket;

/// Exchange-wide hourly totals (PostgreSQL)
///
/// Primary Key: `{unix_hour}`
/// `liquidity_usd` is the collection run's snapshot, so it is stored as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalBucket {
    pub time: DateTime<Utc>,
    pub volume_usd: BigDecimal,
    pub liquidity_usd: BigDecimal,
}

impl TotalBucket {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time,
            volume_usd: BigDecimal::from(0),
            liquidity_usd: BigDecimal::from(0),
        }
    }

    pub fn document_id(&self) -> String {
        self.time.timestamp().to_string()
    }
}

impl Bucket for TotalBucket {
    fn time(&self) -> DateTime<Utc> {
        self.time
    }

    fn set_time(&mut self, time: DateTime<Utc>) {
        self.time = time;
    }

    fn group_key(&self) -> &str {
        ""
    }

    fn merge(&mut self, other: &Self) {
        self.volume_usd += &other.volume_usd;
    }
}
