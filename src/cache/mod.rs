//! Read-through cache in front of a [`StatsBackend`].
//!
//! Fills are single-flight: a miss takes the exclusive fill lock, re-checks the
//! cache, and only then queries the backend. Errors are never cached.
//! Invalidation takes the same lock, so a fill that started before it can
//! not put its result back afterwards.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use log::debug;
use moka::future::Cache;
use tokio::sync::RwLock;

use crate::config::CacheSettings;
use crate::db::models::{Pair, PairBucket, Token, TokenBucket, TotalBucket};
use crate::db::{StatsBackend, TimeRange};

mod key;

pub use key::{cache_key, Endpoint, KEY_PREFIX_LEN};

/// A cached query result, tagged by query shape.
#[derive(Debug, Clone)]
pub enum CachedValue {
    Pairs(Arc<Vec<Pair>>),
    Pair(Arc<Option<Pair>>),
    Tokens(Arc<Vec<Token>>),
    Token(Arc<Option<Token>>),
    Totals(Arc<Vec<TotalBucket>>),
    PairBuckets(Arc<Vec<PairBucket>>),
    TokenBuckets(Arc<Vec<TokenBucket>>),
}

/// Conversion between a query's result type and its [`CachedValue`] variant.
pub trait CacheEntry: Clone + Send + Sync + Sized + 'static {
    fn into_cached(self) -> CachedValue;

    /// `None` when the value holds another variant.
    fn from_cached(value: CachedValue) -> Option<Self>;
}

macro_rules! cache_entry {
    ($ty:ty, $variant:ident) => {
        impl CacheEntry for $ty {
            fn into_cached(self) -> CachedValue {
                CachedValue::$variant(Arc::new(self))
            }

            fn from_cached(value: CachedValue) -> Option<Self> {
                match value {
                    CachedValue::$variant(inner) => Some(Arc::unwrap_or_clone(inner)),
                    _ => None,
                }
            }
        }
    };
}

cache_entry!(Vec<Pair>, Pairs);
cache_entry!(Option<Pair>, Pair);
cache_entry!(Vec<Token>, Tokens);
cache_entry!(Option<Token>, Token);
cache_entry!(Vec<TotalBucket>, Totals);
cache_entry!(Vec<PairBucket>, PairBuckets);
cache_entry!(Vec<TokenBucket>, TokenBuckets);

/// Caching wrapper around any [`StatsBackend`].
pub struct CachedBackend<B> {
    inner: B,
    cache: Cache<Vec<u8>, CachedValue>,
    fill_lock: RwLock<()>,
}

impl<B: StatsBackend> CachedBackend<B> {
    pub fn new(inner: B, settings: &CacheSettings) -> Self {
        let cache = Cache::builder()
            .max_capacity(settings.max_capacity)
            .time_to_live(settings.ttl())
            .build();

        Self {
            inner,
            cache,
            fill_lock: RwLock::new(()),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Drop every cached entry, after any fill in flight has landed.
    pub async fn invalidate_all(&self) {
        let _exclusive = self.fill_lock.write().await;
        self.cache.invalidate_all();
    }

    async fn lookup<T: CacheEntry>(&self, key: &[u8]) -> Option<T> {
        self.cache.get(key).await.and_then(T::from_cached)
    }

    async fn get_or_fill<T, F, Fut>(&self, key: Vec<u8>, fill: F) -> anyhow::Result<T>
    where
        T: CacheEntry,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        {
            let _shared = self.fill_lock.read().await;
            if let Some(hit) = self.lookup(&key).await {
                return Ok(hit);
            }
        }

        let _exclusive = self.fill_lock.write().await;
        // Another caller may have filled it while we waited
        if let Some(hit) = self.lookup(&key).await {
            return Ok(hit);
        }

        debug!("Cache miss for endpoint {}", key[0]);
        let value = fill().await?;
        self.cache.insert(key, value.clone().into_cached()).await;
        Ok(value)
    }
}

#[async_trait]
impl<B: StatsBackend> StatsBackend for CachedBackend<B> {
    async fn pairs(&self) -> anyhow::Result<Vec<Pair>> {
        let key = cache_key(Endpoint::Pairs, TimeRange::unbounded(), Duration::zero(), &[]);
        self.get_or_fill(key, || self.inner.pairs()).await
    }

    async fn pair(&self, address: &str) -> anyhow::Result<Option<Pair>> {
        let address = address.to_lowercase();
        let key = cache_key(
            Endpoint::Pair,
            TimeRange::unbounded(),
            Duration::zero(),
            address.as_bytes(),
        );
        self.get_or_fill(key, || self.inner.pair(&address)).await
    }

    async fn tokens(&self) -> anyhow::Result<Vec<Token>> {
        let key = cache_key(Endpoint::Tokens, TimeRange::unbounded(), Duration::zero(), &[]);
        self.get_or_fill(key, || self.inner.tokens()).await
    }

    async fn token(&self, address: &str) -> anyhow::Result<Option<Token>> {
        let address = address.to_lowercase();
        let key = cache_key(
            Endpoint::Token,
            TimeRange::unbounded(),
            Duration::zero(),
            address.as_bytes(),
        );
        self.get_or_fill(key, || self.inner.token(&address)).await
    }

    async fn totals(&self, range: TimeRange, interval: Duration) -> anyhow::Result<Vec<TotalBucket>> {
        let key = cache_key(Endpoint::Totals, range, interval, &[]);
        self.get_or_fill(key, || self.inner.totals(range, interval)).await
    }

    async fn pair_buckets(
        &self,
        address: &str,
        range: TimeRange,
        interval: Duration,
    ) -> anyhow::Result<Vec<PairBucket>> {
        let address = address.to_lowercase();
        let key = cache_key(Endpoint::PairBuckets, range, interval, address.as_bytes());
        self.get_or_fill(key, || self.inner.pair_buckets(&address, range, interval))
            .await
    }

    async fn token_buckets(
        &self,
        address: &str,
        range: TimeRange,
        interval: Duration,
    ) -> anyhow::Result<Vec<TokenBucket>> {
        let address = address.to_lowercase();
        let key = cache_key(Endpoint::TokenBuckets, range, interval, address.as_bytes());
        self.get_or_fill(key, || self.inner.token_buckets(&address, range, interval))
            .await
    }
}
