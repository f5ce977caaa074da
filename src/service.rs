//! Query surface handed to the API layer.

use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use log::info;

use crate::cache::CachedBackend;
use crate::collector::{ChainClient, Collector, RunOutcome};
use crate::config::{CacheSettings, ChainSettings};
use crate::db::models::{Pair, PairBucket, Token, TokenBucket, TotalBucket};
use crate::db::{StatsBackend, StatsStore, TimeRange};

/// Cached reads over a store, plus the collector that writes to it.
///
/// Every completed collection run drops the whole cache so readers never see
/// rollups older than the last run.
pub struct StatsService<C: ?Sized, S: ?Sized> {
    backend: CachedBackend<Arc<S>>,
    collector: Collector<C, S>,
}

impl<C, S> StatsService<C, S>
where
    C: ChainClient + ?Sized,
    S: StatsStore + ?Sized,
{
    pub fn new(chain: Arc<C>, store: Arc<S>, chain_settings: ChainSettings, cache: &CacheSettings) -> Self {
        Self {
            backend: CachedBackend::new(store.clone(), cache),
            collector: Collector::new(chain, store, chain_settings),
        }
    }

    pub async fn pairs(&self) -> Result<Vec<Pair>> {
        self.backend.pairs().await
    }

    pub async fn pair(&self, address: &str) -> Result<Option<Pair>> {
        self.backend.pair(address).await
    }

    pub async fn tokens(&self) -> Result<Vec<Token>> {
        self.backend.tokens().await
    }

    pub async fn token(&self, address: &str) -> Result<Option<Token>> {
        self.backend.token(address).await
    }

    pub async fn totals(&self, range: TimeRange, interval: Duration) -> Result<Vec<TotalBucket>> {
        self.backend.totals(range, interval).await
    }

    /// Buckets of one pair, or of every pair when `address` is empty.
    pub async fn pair_buckets(
        &self,
        address: &str,
        range: TimeRange,
        interval: Duration,
    ) -> Result<Vec<PairBucket>> {
        self.backend.pair_buckets(address, range, interval).await
    }

    /// Buckets of one token, or of every token when `address` is empty.
    pub async fn token_buckets(
        &self,
        address: &str,
        range: TimeRange,
        interval: Duration,
    ) -> Result<Vec<TokenBucket>> {
        self.backend.token_buckets(address, range, interval).await
    }

    pub async fn run_collection(&self) -> Result<RunOutcome> {
        let outcome = self.collector.run().await?;
        if let RunOutcome::Completed(_) = &outcome {
            self.backend.invalidate_all().await;
            info!("Query cache invalidated");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::fake::{FakeChain, GENESIS};
    use crate::db::MemoryStore;
    use crate::utils::from_unix;
    use bigdecimal::BigDecimal;

    fn chain_settings() -> ChainSettings {
        ChainSettings {
            rpc_url: "http://localhost:8545".into(),
            factory_address: "0x5c69bee701ef814a2b6a3edd4b1652cb9cc5aa6f".into(),
            reference_symbol: "USDC".into(),
            max_block_span: 10_000,
            lookback_blocks: 1_440,
            retry_attempts: 1,
            retry_backoff_ms: 1,
            request_timeout_secs: 5,
            resolve_tx_senders: false,
            min_reference_liquidity: 10,
        }
    }

    fn service() -> (Arc<FakeChain>, StatsService<FakeChain, MemoryStore>) {
        let chain = Arc::new(FakeChain::standard());
        let store = Arc::new(MemoryStore::new());
        let service = StatsService::new(chain.clone(), store, chain_settings(), &CacheSettings::default());
        (chain, service)
    }

    #[tokio::test]
    async fn test_completed_run_invalidates_cache() {
        let (chain, service) = service();

        // Cached before the first run
        assert!(service.pairs().await.unwrap().is_empty());
        assert_eq!(service.pair("0xd0").await.unwrap(), None);

        assert!(matches!(service.run_collection().await.unwrap(), RunOutcome::Completed(_)));
        assert_eq!(service.pairs().await.unwrap().len(), 2);
        assert!(service.pair("0xD0").await.unwrap().is_some());

        chain.set_head(1_000);
        let before = service.totals(TimeRange::unbounded(), Duration::zero()).await.unwrap();
        service.run_collection().await.unwrap();
        let after = service.totals(TimeRange::unbounded(), Duration::zero()).await.unwrap();
        assert_eq!(before.len(), 2);
        assert_eq!(after.len(), 3);
    }

    #[tokio::test]
    async fn test_daily_rollup_through_service() {
        let (_, service) = service();
        service.run_collection().await.unwrap();

        let to = from_unix(GENESIS + 2 * 3_600);
        let range = TimeRange::new(None, Some(to));
        let day = service.pair_buckets("0xd0", range, Duration::days(1)).await.unwrap();

        assert_eq!(day.len(), 1);
        assert_eq!(day[0].volume_usd, BigDecimal::from(2_600));
        assert_eq!(day[0].time, from_unix(GENESIS + 3_600));

        let all_pairs = service.pair_buckets("", range, Duration::zero()).await.unwrap();
        assert_eq!(all_pairs.len(), 3);
    }

    #[tokio::test]
    async fn test_skipped_run_keeps_cache() {
        let (_, service) = service();
        service.run_collection().await.unwrap();
        let tokens = service.tokens().await.unwrap();

        assert_eq!(service.run_collection().await.unwrap(), RunOutcome::Skipped);
        assert_eq!(service.tokens().await.unwrap(), tokens);
    }
}
