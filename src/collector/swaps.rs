//! Chunked, retried swap log fetching with per-run lookup caches.

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::debug;
use rustc_hash::FxHashMap;

use super::chain::{ChainClient, SwapLog};
use crate::utils::{retry, RetryPolicy};

/// A swap annotated with its block time and, optionally, the transaction origin.
#[derive(Debug, Clone, PartialEq)]
pub struct PairSwap {
    pub log: SwapLog,
    pub timestamp: DateTime<Utc>,
    pub origin: Option<String>,
}

/// Split `[start, end]` into consecutive inclusive ranges of at most `span` blocks.
pub fn block_chunks(start: u64, end: u64, span: u64) -> Vec<(u64, u64)> {
    let span = span.max(1);
    let mut chunks = Vec::new();
    let mut from = start;
    while from <= end {
        let to = from.saturating_add(span - 1).min(end);
        chunks.push((from, to));
        if to == u64::MAX {
            break;
        }
        from = to + 1;
    }
    chunks
}

/// Fetches and annotates swaps for one collection run.
pub struct SwapFetcher<'a, C: ?Sized> {
    chain: &'a C,
    policy: RetryPolicy,
    max_block_span: u64,
    resolve_senders: bool,
    block_times: FxHashMap<u64, DateTime<Utc>>,
    senders: FxHashMap<String, String>,
}

impl<'a, C: ChainClient + ?Sized> SwapFetcher<'a, C> {
    pub fn new(chain: &'a C, policy: RetryPolicy, max_block_span: u64, resolve_senders: bool) -> Self {
        Self {
            chain,
            policy,
            max_block_span,
            resolve_senders,
            block_times: FxHashMap::default(),
            senders: FxHashMap::default(),
        }
    }

    /// All swaps of `pair` in `[start, end]` timestamped before `stop_at`,
    /// ascending by block. Senders are only resolved for the swaps kept.
    pub async fn fetch(
        &mut self,
        pair: &str,
        start: u64,
        end: u64,
        stop_at: DateTime<Utc>,
    ) -> Result<Vec<PairSwap>> {
        let mut swaps = Vec::new();

        for (from, to) in block_chunks(start, end, self.max_block_span) {
            let chain = self.chain;
            let operation = format!("eth_getLogs {} [{}, {}]", pair, from, to);
            let logs = retry(self.policy, &operation, || chain.swap_logs(pair, from, to)).await?;

            for log in logs {
                let timestamp = self.block_time(log.block_number).await?;
                if timestamp >= stop_at {
                    continue;
                }
                let origin = if self.resolve_senders {
                    Some(self.sender(&log.tx_hash).await?)
                } else {
                    None
                };
                swaps.push(PairSwap {
                    log,
                    timestamp,
                    origin,
                });
            }
        }

        debug!("Fetched {} swaps for {} in [{}, {}]", swaps.len(), pair, start, end);
        Ok(swaps)
    }

    async fn block_time(&mut self, block: u64) -> Result<DateTime<Utc>> {
        if let Some(time) = self.block_times.get(&block) {
            return Ok(*time);
        }
        let chain = self.chain;
        let time = retry(self.policy, "eth_getBlockByNumber", || chain.block_timestamp(block)).await?;
        self.block_times.insert(block, time);
        Ok(time)
    }

    async fn sender(&mut self, tx_hash: &str) -> Result<String> {
        if let Some(sender) = self.senders.get(tx_hash) {
            return Ok(sender.clone());
        }
        let chain = self.chain;
        let sender = retry(self.policy, "eth_getTransactionByHash", || {
            chain.transaction_sender(tx_hash)
        })
        .await?;
        self.senders.insert(tx_hash.to_string(), sender.clone());
        Ok(sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::fake::FakeChain;
    use crate::error::StatsError;
    use rstest::rstest;
    use std::time::Duration;

    #[rstest]
    #[case(0, 9, 10, vec![(0, 9)])]
    #[case(0, 10, 10, vec![(0, 9), (10, 10)])]
    #[case(5, 30, 10, vec![(5, 14), (15, 24), (25, 30)])]
    #[case(7, 7, 10_000, vec![(7, 7)])]
    #[case(8, 7, 10, vec![])]
    fn test_block_chunks(
        #[case] start: u64,
        #[case] end: u64,
        #[case] span: u64,
        #[case] expected: Vec<(u64, u64)>,
    ) {
        assert_eq!(block_chunks(start, end, span), expected);
    }

    #[test]
    fn test_chunks_cover_range_without_gaps() {
        let chunks = block_chunks(3, 100_003, 10_000);
        assert_eq!(chunks.first().map(|c| c.0), Some(3));
        assert_eq!(chunks.last().map(|c| c.1), Some(100_003));
        assert!(chunks.windows(2).all(|w| w[1].0 == w[0].1 + 1));
        assert!(chunks.iter().all(|(from, to)| to - from < 10_000));
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1))
    }

    fn far_future(chain: &FakeChain) -> DateTime<Utc> {
        chain.block_time(1_000_000)
    }

    #[tokio::test]
    async fn test_fetch_annotates_and_caches_lookups() {
        let chain = FakeChain::standard();
        let mut fetcher = SwapFetcher::new(&chain, policy(1), 100, true);

        let swaps = fetcher.fetch("0xd0", 0, 1_000, far_future(&chain)).await.unwrap();

        assert_eq!(swaps.len(), 4);
        assert_eq!(swaps[0].timestamp, chain.block_time(10));
        assert_eq!(swaps[0].origin.as_deref(), Some(FakeChain::ORIGIN));
        // Two swaps share one transaction and one block
        assert_eq!(chain.sender_calls(), 3);
        assert_eq!(chain.timestamp_calls(), 3);
        assert!(chain.log_calls() >= 10);
    }

    #[tokio::test]
    async fn test_swaps_at_or_after_stop_are_dropped_before_sender_lookup() {
        let chain = FakeChain::standard();
        let mut fetcher = SwapFetcher::new(&chain, policy(1), 10_000, true);

        let swaps = fetcher.fetch("0xd0", 0, 1_000, chain.block_time(650)).await.unwrap();

        assert_eq!(swaps.len(), 3);
        assert!(swaps.iter().all(|s| s.log.block_number < 650));
        // Block 650 still needs its timestamp, but not its sender
        assert_eq!(chain.timestamp_calls(), 3);
        assert_eq!(chain.sender_calls(), 2);
    }

    #[tokio::test]
    async fn test_fetch_without_sender_lookup() {
        let chain = FakeChain::standard();
        let mut fetcher = SwapFetcher::new(&chain, policy(1), 10_000, false);

        let swaps = fetcher.fetch("0xd0", 0, 1_000, far_future(&chain)).await.unwrap();

        assert!(swaps.iter().all(|s| s.origin.is_none()));
        assert_eq!(chain.sender_calls(), 0);
    }

    #[tokio::test]
    async fn test_flaky_logs_are_retried() {
        let chain = FakeChain::standard();
        chain.fail_logs(2);
        let mut fetcher = SwapFetcher::new(&chain, policy(3), 10_000, false);

        let swaps = fetcher.fetch("0xd0", 0, 1_000, far_future(&chain)).await.unwrap();
        assert_eq!(swaps.len(), 4);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_fails_fetch() {
        let chain = FakeChain::standard();
        chain.fail_logs(5);
        let mut fetcher = SwapFetcher::new(&chain, policy(3), 10_000, false);

        let err = fetcher.fetch("0xd0", 0, 1_000, far_future(&chain)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StatsError>(),
            Some(StatsError::RetriesExhausted { attempts: 3, .. })
        ));
    }
}
