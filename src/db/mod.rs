use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

pub mod memory;
pub mod models;
pub mod postgres;
pub mod rollup;

pub use memory::MemoryStore;
pub use postgres::PostgresClient;

use models::{LastCheck, Pair, PairBucket, Token, TokenBucket, TotalBucket};

/// Half-open time range `[from, to)`. Either side may be left open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self::new(Some(from), Some(to))
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| time >= from) && self.to.map_or(true, |to| time < to)
    }
}

/// Read side of the statistics store.
///
/// Bucket queries take an entity address, or `""` for every entity, and roll
/// the stored hourly rows up into `interval` windows.
#[async_trait]
pub trait StatsBackend: Send + Sync {
    async fn pairs(&self) -> anyhow::Result<Vec<Pair>>;

    async fn pair(&self, address: &str) -> anyhow::Result<Option<Pair>>;

    async fn tokens(&self) -> anyhow::Result<Vec<Token>>;

    async fn token(&self, address: &str) -> anyhow::Result<Option<Token>>;

    async fn totals(&self, range: TimeRange, interval: Duration) -> anyhow::Result<Vec<TotalBucket>>;

    async fn pair_buckets(
        &self,
        address: &str,
        range: TimeRange,
        interval: Duration,
    ) -> anyhow::Result<Vec<PairBucket>>;

    async fn token_buckets(
        &self,
        address: &str,
        range: TimeRange,
        interval: Duration,
    ) -> anyhow::Result<Vec<TokenBucket>>;
}

#[async_trait]
impl<T: StatsBackend + ?Sized> StatsBackend for Arc<T> {
    async fn pairs(&self) -> anyhow::Result<Vec<Pair>> {
        (**self).pairs().await
    }

    async fn pair(&self, address: &str) -> anyhow::Result<Option<Pair>> {
        (**self).pair(address).await
    }

    async fn tokens(&self) -> anyhow::Result<Vec<Token>> {
        (**self).tokens().await
    }

    async fn token(&self, address: &str) -> anyhow::Result<Option<Token>> {
        (**self).token(address).await
    }

    async fn totals(&self, range: TimeRange, interval: Duration) -> anyhow::Result<Vec<TotalBucket>> {
        (**self).totals(range, interval).await
    }

    async fn pair_buckets(
        &self,
        address: &str,
        range: TimeRange,
        interval: Duration,
    ) -> anyhow::Result<Vec<PairBucket>> {
        (**self).pair_buckets(address, range, interval).await
    }

    async fn token_buckets(
        &self,
        address: &str,
        range: TimeRange,
        interval: Duration,
    ) -> anyhow::Result<Vec<TokenBucket>> {
        (**self).token_buckets(address, range, interval).await
    }
}

/// Write side used by the collector. Every write is an upsert by document id.
#[async_trait]
pub trait StatsStore: StatsBackend {
    async fn save_pairs(&self, pairs: &[Pair]) -> anyhow::Result<()>;

    async fn save_tokens(&self, tokens: &[Token]) -> anyhow::Result<()>;

    async fn save_pair_buckets(&self, buckets: &[PairBucket]) -> anyhow::Result<()>;

    async fn save_token_buckets(&self, buckets: &[TokenBucket]) -> anyhow::Result<()>;

    async fn save_total_buckets(&self, buckets: &[TotalBucket]) -> anyhow::Result<()>;

    async fn last_check(&self) -> anyhow::Result<Option<LastCheck>>;

    async fn set_last_check(&self, checkpoint: &LastCheck) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::from_unix;

    #[test]
    fn test_time_range_is_half_open() {
        let range = TimeRange::between(from_unix(0), from_unix(3_600));
        assert!(range.contains(from_unix(0)));
        assert!(range.contains(from_unix(3_599)));
        assert!(!range.contains(from_unix(3_600)));
    }

    #[test]
    fn test_unbounded_range_contains_everything() {
        let range = TimeRange::unbounded();
        assert!(range.contains(from_unix(0)));
        assert!(range.contains(from_unix(i32::MAX as i64)));
    }
}
