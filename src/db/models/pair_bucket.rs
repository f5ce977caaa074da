use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Pair, PairLiquidity};
use crate::db::rollup::Bucket;

/// Hourly activity of one pair (PostgreSQL)
///
/// Primary Key: `{address}_{unix_hour}`
/// Flow fields sum over the hour; price, reserve and supply fields are the
/// snapshot taken when the bucket was created. `liquidity_usd` is derived and
/// never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairBucket {
    pub address: String,
    pub pair: String,
    pub time: DateTime<Utc>,

    // Flow
    pub amount0_in: BigDecimal,
    pub amount1_in: BigDecimal,
    pub amount0_out: BigDecimal,
    pub amount1_out: BigDecimal,
    pub volume_usd: BigDecimal,

    // Snapshot
    pub price0_usd: BigDecimal,
    pub price1_usd: BigDecimal,
    pub total_supply: BigDecimal,
    pub reserve0: BigDecimal,
    pub reserve1: BigDecimal,

    pub liquidity_usd: BigDecimal,
}

impl PairBucket {
    /// Empty bucket for `pair` at `time`, carrying the run's liquidity snapshot.
    pub fn new(pair: &Pair, time: DateTime<Utc>, snapshot: &PairLiquidity) -> Self {
        let zero = BigDecimal::from(0);
        Self {
            address: pair.address.clone(),
            pair: pair.pair.clone(),
            time,
            amount0_in: zero.clone(),
            amount1_in: zero.clone(),
            amount0_out: zero.clone(),
            amount1_out: zero.clone(),
            volume_usd: zero,
            price0_usd: snapshot.price0_usd.clone(),
            price1_usd: snapshot.price1_usd.clone(),
            total_supply: snapshot.total_supply.clone(),
            reserve0: snapshot.reserve0.clone(),
            reserve1: snapshot.reserve1.clone(),
            liquidity_usd: snapshot.liquidity_usd(),
        }
    }

    pub fn document_id(&self) -> String {
        format!("{}_{}", self.address, self.time.timestamp())
    }

    /// Accumulate one swap. Volume is measured on the input side.
    pub fn add_swap(
        &mut self,
        amount0_in: &BigDecimal,
        amount1_in: &BigDecimal,
        amount0_out: &BigDecimal,
        amount1_out: &BigDecimal,
    ) {
        self.amount0_in += amount0_in;
        self.amount1_in += amount1_in;
        self.amount0_out += amount0_out;
        self.amount1_out += amount1_out;
        self.volume_usd += amount0_in * &self.price0_usd + amount1_in * &self.price1_usd;
    }

    pub fn recompute_liquidity(&mut self) {
        self.liquidity_usd = &self.reserve0 * &self.price0_usd + &self.reserve1 * &self.price1_usd;
    }
}

impl Bucket for PairBucket {
    fn time(&self) -> DateTime<Utc> {
        self.time
    }

    fn set_time(&mut self, time: DateTime<Utc>) {
        self.time = time;
    }

    fn group_key(&self) -> &str {
        &self.address
    }

    fn merge(&mut self, other: &Self) {
        self.amount0_in += &other.amount0_in;
        self.amount1_in += &other.amount1_in;
        self.amount0_out += &other.amount0_out;
        self.amount1_out += &other.amount1_out;
        self.volume_usd += &other.volume_usd;
    }
}
