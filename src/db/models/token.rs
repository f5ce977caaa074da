use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// Token metadata and current market state (PostgreSQL)
///
/// Primary Key: address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub address: String,

    // On-chain metadata (immutable after first fetch)
    pub name: String,
    pub symbol: String,
    pub decimals: u8,

    // Refreshed on every collection run
    pub total_supply: BigDecimal,
    pub reference_price: BigDecimal,
}

impl Token {
    /// Constructor for just metadata (used by discovery)
    pub fn new(address: String, name: String, symbol: String, decimals: u8) -> Self {
        Self {
            // Always lowercase addresses for consistent comparisons
            address: address.to_lowercase(),
            name,
            symbol,
            decimals,
            total_supply: BigDecimal::from(0),
            reference_price: BigDecimal::from(0),
        }
    }
}
