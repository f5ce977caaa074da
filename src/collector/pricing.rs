//! USD pricing against a single reference stablecoin.
//!
//! The reference token is worth exactly 1. Any other token is priced from its
//! direct pair against the reference token; there is no multi-hop routing.

use bigdecimal::{BigDecimal, RoundingMode};
use num_traits::Zero;
use log::warn;
use rustc_hash::FxHashMap;

use crate::db::models::{Pair, Token};
use crate::error::StatsError;

/// Fractional digits kept on derived prices.
const PRICE_SCALE: i64 = 30;

/// Decimal-adjusted reserves and LP supply of a pair, read once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct PairReserves {
    pub reserve0: BigDecimal,
    pub reserve1: BigDecimal,
    pub total_supply: BigDecimal,
}

impl PairReserves {
    /// This pair's reserve of `token`, if it is one of the pair's tokens.
    pub fn reserve_of(&self, pair: &Pair, token: &str) -> Option<&BigDecimal> {
        if pair.token0.address == token {
            Some(&self.reserve0)
        } else if pair.token1.address == token {
            Some(&self.reserve1)
        } else {
            None
        }
    }
}

/// Per-run token prices.
#[derive(Debug, Default)]
pub struct PriceBook {
    prices: FxHashMap<String, BigDecimal>,
    unpriced: Vec<String>,
}

impl PriceBook {
    /// Price every token appearing in `pairs`. Tokens without a usable
    /// reference pair are priced at zero.
    pub fn build(
        pairs: &[Pair],
        reserves: &FxHashMap<String, PairReserves>,
        reference_symbol: &str,
        min_reference_liquidity: &BigDecimal,
    ) -> Self {
        let mut prices = FxHashMap::default();
        let mut unpriced = Vec::new();

        for token in pairs.iter().flat_map(|pair| [&pair.token0, &pair.token1]) {
            if prices.contains_key(&token.address) {
                continue;
            }
            let price = match reference_price(token, pairs, reserves, reference_symbol, min_reference_liquidity) {
                Ok(price) => price,
                Err(e) => {
                    warn!("{}, valuing {} at zero", e, token.symbol);
                    unpriced.push(token.address.clone());
                    BigDecimal::zero()
                },
            };
            prices.insert(token.address.clone(), price);
        }

        Self { prices, unpriced }
    }

    /// Tokens that had no reference pair, in first-seen order.
    pub fn unpriced(&self) -> &[String] {
        &self.unpriced
    }

    /// USD price of `token`; zero when unknown.
    pub fn price(&self, token: &str) -> BigDecimal {
        self.prices.get(token).cloned().unwrap_or_else(BigDecimal::zero)
    }
}

/// Price `token` from its deepest direct pair against the reference token.
///
/// The pair is too thin to trust when its reference reserve is below
/// `min_reference_liquidity`; the price is zero then.
pub fn reference_price(
    token: &Token,
    pairs: &[Pair],
    reserves: &FxHashMap<String, PairReserves>,
    reference_symbol: &str,
    min_reference_liquidity: &BigDecimal,
) -> Result<BigDecimal, StatsError> {
    if token.symbol == reference_symbol {
        return Ok(BigDecimal::from(1));
    }

    let mut best: Option<(&BigDecimal, &BigDecimal)> = None;
    for pair in pairs.iter().filter(|pair| pair.contains(&token.address)) {
        let other = if pair.token0.address == token.address {
            &pair.token1
        } else {
            &pair.token0
        };
        if other.symbol != reference_symbol {
            continue;
        }
        let Some(snapshot) = reserves.get(&pair.address) else {
            continue;
        };
        let (Some(token_reserve), Some(reference_reserve)) = (
            snapshot.reserve_of(pair, &token.address),
            snapshot.reserve_of(pair, &other.address),
        ) else {
            continue;
        };

        if best.map_or(true, |(_, deepest)| reference_reserve > deepest) {
            best = Some((token_reserve, reference_reserve));
        }
    }

    let (token_reserve, reference_reserve) = best.ok_or_else(|| StatsError::PriceNotFound {
        token: token.address.clone(),
    })?;

    if reference_reserve < min_reference_liquidity || token_reserve.is_zero() {
        return Ok(BigDecimal::zero());
    }

    Ok((reference_reserve / token_reserve).with_scale_round(PRICE_SCALE, RoundingMode::HalfEven))
}
