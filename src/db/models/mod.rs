use bigdecimal::BigDecimal;
use std::str::FromStr;

use crate::error::StatsError;

mod checkpoint;
mod liquidity;
mod pair;
mod pair_bucket;
mod token;
mod token_bucket;
mod total_bucket;

pub use checkpoint::{LastCheck, LAST_CHECK_ID};
pub use liquidity::PairLiquidity;
pub use pair::Pair;
pub use pair_bucket::PairBucket;
pub use token::Token;
pub use token_bucket::TokenBucket;
pub use total_bucket::TotalBucket;

/// Parse a persisted decimal string back into a `BigDecimal`.
pub fn parse_decimal(field: &'static str, value: &str) -> Result<BigDecimal, StatsError> {
    BigDecimal::from_str(value).map_err(|_| StatsError::InvalidDecimal {
        field,
        value: value.to_string(),
    })
}
