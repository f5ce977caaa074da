use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use futures::future::try_join_all;
use log::{debug, info};
use rustc_hash::{FxHashMap, FxHashSet};

use super::chain::ChainClient;
use super::discovery::{discover_pairs, TokenCache};
use super::pricing::{PairReserves, PriceBook};
use super::swaps::{PairSwap, SwapFetcher};
use crate::config::ChainSettings;
use crate::db::models::{
    LastCheck, Pair, PairBucket, PairLiquidity, Token, TokenBucket, TotalBucket,
};
use crate::db::StatsStore;
use crate::utils::{int_to_dec, reserve_to_dec, retry, truncate_hour, RetryPolicy, PAIR_DECIMALS};

/// What a completed run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub pairs: usize,
    pub new_pairs: usize,
    pub events: usize,
    /// Distinct transaction senders among the counted events.
    pub traders: usize,
    pub pair_buckets: usize,
    pub token_buckets: usize,
    pub total_buckets: usize,
    pub checkpoint: LastCheck,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No new complete hour since the last run.
    Skipped,
    Completed(RunSummary),
}

/// Block range and hour boundary of one run.
#[derive(Debug, Clone, Copy)]
struct RunWindow {
    start_block: u64,
    end_block: u64,
    stop_at: DateTime<Utc>,
    previous_block: u64,
}

/// Hourly bucket builder for the V2 exchange.
///
/// Each run turns the swaps between the last checkpoint and the chain head
/// into pair, token, and total buckets for every hour that has fully elapsed,
/// then advances the checkpoint. Runs are at-least-once: a failed run leaves
/// the checkpoint untouched and the next run rebuilds the same buckets.
pub struct Collector<C: ?Sized, S: ?Sized> {
    chain: Arc<C>,
    store: Arc<S>,
    settings: ChainSettings,
}

impl<C, S> Collector<C, S>
where
    C: ChainClient + ?Sized,
    S: StatsStore + ?Sized,
{
    pub fn new(chain: Arc<C>, store: Arc<S>, settings: ChainSettings) -> Self {
        Self {
            chain,
            store,
            settings,
        }
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.settings.retry_attempts, self.settings.retry_backoff())
    }

    pub async fn run(&self) -> Result<RunOutcome> {
        let Some(window) = self.window().await? else {
            return Ok(RunOutcome::Skipped);
        };
        info!(
            "Collecting blocks {}..={} up to {}",
            window.start_block, window.end_block, window.stop_at
        );

        let (pairs, new_pairs) = self.load_pairs().await?;
        let reserves = self.read_reserves(&pairs).await?;
        let prices = PriceBook::build(
            &pairs,
            &reserves,
            &self.settings.reference_symbol,
            &BigDecimal::from(self.settings.min_reference_liquidity),
        );
        self.refresh_tokens(&pairs, &prices).await?;

        // ============================================
        // Pair buckets
        // ============================================

        let mut fetcher = SwapFetcher::new(
            self.chain.as_ref(),
            self.policy(),
            self.settings.max_block_span,
            self.settings.resolve_tx_senders,
        );

        let mut pair_buckets = Vec::new();
        let mut total_liquidity = BigDecimal::from(0);
        let mut events = 0;
        let mut traders = FxHashSet::default();
        let mut last_block = None;

        for pair in &pairs {
            let snapshot = liquidity_snapshot(pair, &reserves, &prices)?;
            total_liquidity += snapshot.liquidity_usd();

            let swaps: Vec<PairSwap> = fetcher
                .fetch(&pair.address, window.start_block, window.end_block, window.stop_at)
                .await
                .with_context(|| format!("Failed to fetch swaps of {}", pair.address))?;

            events += swaps.len();
            for swap in &swaps {
                last_block = last_block.max(Some(swap.log.block_number));
                if let Some(origin) = &swap.origin {
                    traders.insert(origin.clone());
                }
            }

            pair_buckets.extend(hourly_pair_buckets(pair, &snapshot, &swaps, window.stop_at));
        }

        // ============================================
        // Token and total buckets
        // ============================================

        let reserve_totals = token_reserves(&pairs, &reserves);
        let token_buckets = roll_into_tokens(&pairs, &pair_buckets, &prices, &reserve_totals);
        let total_buckets = roll_into_totals(&pair_buckets, &total_liquidity);

        self.store
            .save_pair_buckets(&pair_buckets)
            .await
            .context("Failed to save pair buckets")?;
        self.store
            .save_token_buckets(&token_buckets)
            .await
            .context("Failed to save token buckets")?;
        self.store
            .save_total_buckets(&total_buckets)
            .await
            .context("Failed to save total buckets")?;

        let checkpoint = LastCheck::new(
            window.stop_at,
            last_block.unwrap_or(window.previous_block),
        );
        self.store
            .set_last_check(&checkpoint)
            .await
            .context("Failed to save checkpoint")?;

        let summary = RunSummary {
            pairs: pairs.len(),
            new_pairs,
            events,
            traders: traders.len(),
            pair_buckets: pair_buckets.len(),
            token_buckets: token_buckets.len(),
            total_buckets: total_buckets.len(),
            checkpoint,
        };
        info!(
            "Collection complete: {} pairs ({} new), {} swaps by {} traders, {} pair / {} token / {} total buckets, checkpoint block {}",
            summary.pairs,
            summary.new_pairs,
            summary.events,
            summary.traders,
            summary.pair_buckets,
            summary.token_buckets,
            summary.total_buckets,
            checkpoint.last_block_number
        );

        Ok(RunOutcome::Completed(summary))
    }

    /// Resolve the block range of this run, or `None` if the current hour was
    /// already collected.
    async fn window(&self) -> Result<Option<RunWindow>> {
        let policy = self.policy();
        let chain = self.chain.as_ref();

        let head = retry(policy, "eth_blockNumber", || chain.latest_block_number()).await?;
        let head_time = retry(policy, "eth_getBlockByNumber", || chain.block_timestamp(head)).await?;
        let stop_at = truncate_hour(head_time);

        let checkpoint = self
            .store
            .last_check()
            .await
            .context("Failed to load checkpoint")?;

        let window = match checkpoint {
            Some(last) if last.last_check_at >= stop_at => {
                info!("Hour {} already collected, skipping", last.last_check_at);
                return Ok(None);
            },
            Some(last) => RunWindow {
                start_block: last.last_block_number + 1,
                end_block: head,
                stop_at,
                previous_block: last.last_block_number,
            },
            None => {
                let start_block = head.saturating_sub(self.settings.lookback_blocks);
                RunWindow {
                    start_block,
                    end_block: head,
                    stop_at,
                    previous_block: start_block.saturating_sub(1),
                }
            },
        };

        Ok(Some(window))
    }

    /// Known pairs plus any the factory listed since the last run.
    ///
    /// New pairs and their tokens are persisted before they join the working set.
    async fn load_pairs(&self) -> Result<(Vec<Pair>, usize)> {
        let mut pairs = self.store.pairs().await.context("Failed to load pairs")?;
        let tokens = self.store.tokens().await.context("Failed to load tokens")?;
        let cache = TokenCache::seed(tokens);

        let discovered = discover_pairs(self.chain.as_ref(), self.policy(), &cache, pairs.len())
            .await
            .context("Pair discovery failed")?;

        if !discovered.is_empty() {
            let mut new_tokens: FxHashMap<String, Token> = FxHashMap::default();
            for pair in &discovered {
                for token in [&pair.token0, &pair.token1] {
                    new_tokens
                        .entry(token.address.clone())
                        .or_insert_with(|| token.clone());
                }
            }
            let new_tokens: Vec<Token> = new_tokens.into_values().collect();

            self.store
                .save_tokens(&new_tokens)
                .await
                .context("Failed to save discovered tokens")?;
            self.store
                .save_pairs(&discovered)
                .await
                .context("Failed to save discovered pairs")?;
            info!("Discovered {} new pairs", discovered.len());
        }

        let new_pairs = discovered.len();
        pairs.extend(discovered);
        Ok((pairs, new_pairs))
    }

    async fn read_reserves(&self, pairs: &[Pair]) -> Result<FxHashMap<String, PairReserves>> {
        let policy = self.policy();
        let chain = self.chain.as_ref();

        let reads = pairs.iter().map(|pair| async move {
            let address = pair.address.as_str();
            let (reserve0, reserve1) = retry(policy, "getReserves", || chain.reserves(address))
                .await
                .with_context(|| format!("Failed to read reserves of {}", address))?;
            let supply = retry(policy, "totalSupply", || chain.pair_total_supply(address))
                .await
                .with_context(|| format!("Failed to read LP supply of {}", address))?;

            Ok::<_, anyhow::Error>((
                pair.address.clone(),
                PairReserves {
                    reserve0: reserve_to_dec(reserve0, pair.token0.decimals),
                    reserve1: reserve_to_dec(reserve1, pair.token1.decimals),
                    total_supply: int_to_dec(supply, PAIR_DECIMALS),
                },
            ))
        });

        Ok(try_join_all(reads).await?.into_iter().collect())
    }

    /// Refresh supply and price of every token appearing in `pairs`.
    async fn refresh_tokens(&self, pairs: &[Pair], prices: &PriceBook) -> Result<()> {
        let policy = self.policy();
        let chain = self.chain.as_ref();

        let mut unique: FxHashMap<&str, &Token> = FxHashMap::default();
        for pair in pairs {
            unique.entry(pair.token0.address.as_str()).or_insert(&pair.token0);
            unique.entry(pair.token1.address.as_str()).or_insert(&pair.token1);
        }

        let reads = unique.into_values().map(|token| async move {
            let address = token.address.as_str();
            let supply = retry(policy, "totalSupply", || chain.token_total_supply(address))
                .await
                .with_context(|| format!("Failed to read supply of token {}", address))?;

            let mut token = token.clone();
            token.total_supply = int_to_dec(supply, token.decimals);
            token.reference_price = prices.price(address);
            Ok::<_, anyhow::Error>(token)
        });
        let tokens = try_join_all(reads).await?;

        debug!("Refreshed {} tokens", tokens.len());
        self.store
            .save_tokens(&tokens)
            .await
            .context("Failed to save tokens")
    }
}

fn liquidity_snapshot(
    pair: &Pair,
    reserves: &FxHashMap<String, PairReserves>,
    prices: &PriceBook,
) -> Result<PairLiquidity> {
    let snapshot = reserves
        .get(&pair.address)
        .with_context(|| format!("Missing reserves of {}", pair.address))?;

    Ok(PairLiquidity {
        address: pair.address.clone(),
        reserve0: snapshot.reserve0.clone(),
        reserve1: snapshot.reserve1.clone(),
        total_supply: snapshot.total_supply.clone(),
        price0_usd: prices.price(&pair.token0.address),
        price1_usd: prices.price(&pair.token1.address),
    })
}

/// Merge a pair's swaps into hourly buckets.
///
/// A pair without swaps still reports its liquidity through one bucket for the
/// last complete hour.
fn hourly_pair_buckets(
    pair: &Pair,
    snapshot: &PairLiquidity,
    swaps: &[PairSwap],
    stop_at: DateTime<Utc>,
) -> Vec<PairBucket> {
    if swaps.is_empty() {
        return vec![PairBucket::new(pair, stop_at - Duration::hours(1), snapshot)];
    }

    let mut hours: BTreeMap<DateTime<Utc>, PairBucket> = BTreeMap::new();
    for swap in swaps {
        let hour = truncate_hour(swap.timestamp);
        let log = &swap.log;
        hours
            .entry(hour)
            .or_insert_with(|| PairBucket::new(pair, hour, snapshot))
            .add_swap(
                &int_to_dec(log.amount0_in, pair.token0.decimals),
                &int_to_dec(log.amount1_in, pair.token1.decimals),
                &int_to_dec(log.amount0_out, pair.token0.decimals),
                &int_to_dec(log.amount1_out, pair.token1.decimals),
            );
    }
    hours.into_values().collect()
}

/// Sum of each token's reserve over every pair containing it.
fn token_reserves(
    pairs: &[Pair],
    reserves: &FxHashMap<String, PairReserves>,
) -> FxHashMap<String, BigDecimal> {
    let mut totals: FxHashMap<String, BigDecimal> = FxHashMap::default();
    for pair in pairs {
        let Some(snapshot) = reserves.get(&pair.address) else {
            continue;
        };
        *totals.entry(pair.token0.address.clone()).or_default() += &snapshot.reserve0;
        *totals.entry(pair.token1.address.clone()).or_default() += &snapshot.reserve1;
    }
    totals
}

fn roll_into_tokens(
    pairs: &[Pair],
    pair_buckets: &[PairBucket],
    prices: &PriceBook,
    token_reserves: &FxHashMap<String, BigDecimal>,
) -> Vec<TokenBucket> {
    let by_address: FxHashMap<&str, &Pair> =
        pairs.iter().map(|pair| (pair.address.as_str(), pair)).collect();

    let mut buckets: BTreeMap<(DateTime<Utc>, String), TokenBucket> = BTreeMap::new();
    for bucket in pair_buckets {
        let Some(pair) = by_address.get(bucket.address.as_str()) else {
            continue;
        };
        let sides = [
            (&pair.token0, &bucket.amount0_in, &bucket.amount0_out),
            (&pair.token1, &bucket.amount1_in, &bucket.amount1_out),
        ];
        for (token, amount_in, amount_out) in sides {
            buckets
                .entry((bucket.time, token.address.clone()))
                .or_insert_with(|| {
                    let reserve = token_reserves.get(&token.address).cloned().unwrap_or_default();
                    TokenBucket::new(token, bucket.time, prices.price(&token.address), reserve)
                })
                .add_flow(amount_in, amount_out);
        }
    }
    buckets.into_values().collect()
}

fn roll_into_totals(pair_buckets: &[PairBucket], total_liquidity: &BigDecimal) -> Vec<TotalBucket> {
    let mut totals: BTreeMap<DateTime<Utc>, TotalBucket> = BTreeMap::new();
    for bucket in pair_buckets {
        totals
            .entry(bucket.time)
            .or_insert_with(|| TotalBucket::new(bucket.time))
            .volume_usd += &bucket.volume_usd;
    }
    totals
        .into_values()
        .map(|mut total| {
            total.liquidity_usd = total_liquidity.clone();
            total
        })
        .collect()
}
