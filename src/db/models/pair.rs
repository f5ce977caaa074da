use serde::{Deserialize, Serialize};

use super::Token;

/// A V2 pair and its two constituent tokens (PostgreSQL)
///
/// Primary Key: address
/// `index` is the factory's `allPairs` position and the resume cursor for discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair {
    pub index: u64,
    pub address: String,
    pub token0: Token,
    pub token1: Token,
    /// Display name, `"{symbol0}-{symbol1}"`
    pub pair: String,
}

impl Pair {
    pub fn new(index: u64, address: String, token0: Token, token1: Token) -> Self {
        let pair = format!("{}-{}", token0.symbol, token1.symbol);
        Self {
            index,
            address: address.to_lowercase(),
            token0,
            token1,
            pair,
        }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.token0.address == token || self.token1.address == token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_display_name() {
        let usdc = Token::new("0xA".into(), "USD Coin".into(), "USDC".into(), 6);
        let weth = Token::new("0xB".into(), "Wrapped Ether".into(), "WETH".into(), 18);
        let pair = Pair::new(0, "0xC".into(), weth, usdc);

        assert_eq!(pair.pair, "WETH-USDC");
        assert_eq!(pair.address, "0xc");
        assert!(pair.contains("0xa"));
        assert!(!pair.contains("0xc"));
    }
}
