use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Token;
use crate::db::rollup::Bucket;

/// Hourly activity of one token across every pair it trades in (PostgreSQL)
///
/// Primary Key: `{address}_{unix_hour}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucket {
    pub address: String,
    pub symbol: String,
    pub time: DateTime<Utc>,

    // Flow
    pub amount_in: BigDecimal,
    pub amount_out: BigDecimal,
    pub volume_usd: BigDecimal,

    // Snapshot
    pub price_usd: BigDecimal,
    /// Sum of the token's reserve over all pairs containing it
    pub reserve: BigDecimal,

    pub liquidity_usd: BigDecimal,
}

impl TokenBucket {
    pub fn new(token: &Token, time: DateTime<Utc>, price_usd: BigDecimal, reserve: BigDecimal) -> Self {
        let liquidity_usd = &reserve * &price_usd;
        Self {
            address: token.address.clone(),
            symbol: token.symbol.clone(),
            time,
            amount_in: BigDecimal::from(0),
            amount_out: BigDecimal::from(0),
            volume_usd: BigDecimal::from(0),
            price_usd,
            reserve,
            liquidity_usd,
        }
    }

    pub fn document_id(&self) -> String {
        format!("{}_{}", self.address, self.time.timestamp())
    }

    pub fn add_flow(&mut self, amount_in: &BigDecimal, amount_out: &BigDecimal) {
        self.amount_in += amount_in;
        self.amount_out += amount_out;
        self.volume_usd += amount_in * &self.price_usd;
    }

    pub fn recompute_liquidity(&mut self) {
        self.liquidity_usd = &self.reserve * &self.price_usd;
    }
}

impl Bucket for TokenBucket {
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
        self.amount_in += &other.amount_in;
        self.amount_out += &other.amount_out;
        self.volume_usd += &other.volume_usd;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::from_unix;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn weth_bucket(hour: i64, price: &str, reserve: &str) -> TokenBucket {
        let weth = Token::new("0xb0".into(), "Wrapped Ether".into(), "WETH".into(), 18);
        TokenBucket::new(&weth, from_unix(hour * 3_600), dec(price), dec(reserve))
    }

    #[test]
    fn test_flow_is_priced_and_merged() {
        let mut first = weth_bucket(1, "2000", "15");
        first.add_flow(&dec("0.5"), &dec("0.25"));
        let mut later = weth_bucket(2, "2500", "12");
        later.add_flow(&dec("1"), &dec("0"));

        assert_eq!(first.document_id(), "0xb0_3600");
        assert_eq!(first.volume_usd, dec("1000"));
        assert_eq!(first.liquidity_usd, dec("30000"));

        first.merge(&later);
        assert_eq!(first.amount_in, dec("1.5"));
        assert_eq!(first.amount_out, dec("0.25"));
        assert_eq!(first.volume_usd, dec("3500"));
        // Snapshot fields stay with the bucket merged into
        assert_eq!(first.price_usd, dec("2000"));
        assert_eq!(first.reserve, dec("15"));
        assert_eq!(first.time, from_unix(3_600));
    }

    #[test]
    fn test_serde_round_trip() {
        let mut bucket = weth_bucket(1, "2000", "15");
        bucket.add_flow(&dec("0.29"), &dec("0"));

        let json = serde_json::to_value(&bucket).unwrap();
        assert_eq!(json["symbol"], "WETH");
        assert!(json["reserve"].is_string());

        let back: TokenBucket = serde_json::from_value(json).unwrap();
        assert_eq!(back, bucket);
    }
}
