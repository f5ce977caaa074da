use bigdecimal::BigDecimal;
use serde::Serialize;

/// Point-in-time liquidity of a pair, recomputed on every collection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairLiquidity {
    pub address: String,
    pub reserve0: BigDecimal,
    pub reserve1: BigDecimal,
    pub total_supply: BigDecimal,
    pub price0_usd: BigDecimal,
    pub price1_usd: BigDecimal,
}

impl PairLiquidity {
    pub fn liquidity_usd(&self) -> BigDecimal {
        &self.reserve0 * &self.price0_usd + &self.reserve1 * &self.price1_usd
    }
}
