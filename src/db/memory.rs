//! In-process store with the same query semantics as the PostgreSQL backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Duration;
use parking_lot::RwLock;

use super::models::{LastCheck, Pair, PairBucket, Token, TokenBucket, TotalBucket};
use super::rollup::{rollup, Bucket};
use super::{StatsBackend, StatsStore, TimeRange};

#[derive(Default)]
struct Collections {
    pairs: BTreeMap<String, Pair>,
    tokens: BTreeMap<String, Token>,
    pair_buckets: BTreeMap<String, PairBucket>,
    token_buckets: BTreeMap<String, TokenBucket>,
    total_buckets: BTreeMap<String, TotalBucket>,
    last_check: Option<LastCheck>,
}

/// Document collections keyed by document id, held in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored pair buckets, ascending by time.
    pub fn stored_pair_buckets(&self) -> Vec<PairBucket> {
        let inner = self.inner.read();
        select(inner.pair_buckets.values(), "", TimeRange::unbounded())
    }

    /// Raw stored token buckets, ascending by time.
    pub fn stored_token_buckets(&self) -> Vec<TokenBucket> {
        let inner = self.inner.read();
        select(inner.token_buckets.values(), "", TimeRange::unbounded())
    }

    /// Raw stored total buckets, ascending by time.
    pub fn stored_total_buckets(&self) -> Vec<TotalBucket> {
        let inner = self.inner.read();
        select(inner.total_buckets.values(), "", TimeRange::unbounded())
    }
}

/// Filter rows by entity and range, then order them the way a range scan would.
fn select<'a, B>(rows: impl Iterator<Item = &'a B>, address: &str, range: TimeRange) -> Vec<B>
where
    B: Bucket + 'a,
{
    let mut selected: Vec<B> = rows
        .filter(|row| address.is_empty() || row.group_key() == address)
        .filter(|row| range.contains(row.time()))
        .cloned()
        .collect();
    selected.sort_by_key(|row| row.time());
    selected
}

#[async_trait]
impl StatsBackend for MemoryStore {
    async fn pairs(&self) -> anyhow::Result<Vec<Pair>> {
        let mut pairs: Vec<Pair> = self.inner.read().pairs.values().cloned().collect();
        pairs.sort_by_key(|pair| pair.index);
        Ok(pairs)
    }

    async fn pair(&self, address: &str) -> anyhow::Result<Option<Pair>> {
        Ok(self.inner.read().pairs.get(&address.to_lowercase()).cloned())
    }

    async fn tokens(&self) -> anyhow::Result<Vec<Token>> {
        Ok(self.inner.read().tokens.values().cloned().collect())
    }

    async fn token(&self, address: &str) -> anyhow::Result<Option<Token>> {
        Ok(self.inner.read().tokens.get(&address.to_lowercase()).cloned())
    }

    async fn totals(&self, range: TimeRange, interval: Duration) -> anyhow::Result<Vec<TotalBucket>> {
        let rows = select(self.inner.read().total_buckets.values(), "", range);
        Ok(rollup(rows, range.to, interval))
    }

    async fn pair_buckets(
        &self,
        address: &str,
        range: TimeRange,
        interval: Duration,
    ) -> anyhow::Result<Vec<PairBucket>> {
        let address = address.to_lowercase();
        let mut rows = select(self.inner.read().pair_buckets.values(), &address, range);
        rows.iter_mut().for_each(PairBucket::recompute_liquidity);
        Ok(rollup(rows, range.to, interval))
    }

    async fn token_buckets(
        &self,
        address: &str,
        range: TimeRange,
        interval: Duration,
    ) -> anyhow::Result<Vec<TokenBucket>> {
        let address = address.to_lowercase();
        let mut rows = select(self.inner.read().token_buckets.values(), &address, range);
        rows.iter_mut().for_each(TokenBucket::recompute_liquidity);
        Ok(rollup(rows, range.to, interval))
    }
}

#[async_trait]
impl StatsStore for MemoryStore {
    async fn save_pairs(&self, pairs: &[Pair]) -> anyhow::Result<()> {
        let mut inner = self.inner.write();
        for pair in pairs {
            inner.pairs.insert(pair.address.clone(), pair.clone());
        }
        Ok(())
    }

    async fn save_tokens(&self, tokens: &[Token]) -> anyhow::Result<()> {
        let mut inner = self.inner.write();
        for token in tokens {
            inner.tokens.insert(token.address.clone(), token.clone());
        }
        Ok(())
    }

    async fn save_pair_buckets(&self, buckets: &[PairBucket]) -> anyhow::Result<()> {
        let mut inner = self.inner.write();
        for bucket in buckets {
            inner.pair_buckets.insert(bucket.document_id(), bucket.clone());
        }
        Ok(())
    }

    async fn save_token_buckets(&self, buckets: &[TokenBucket]) -> anyhow::Result<()> {
        let mut inner = self.inner.write();
        for bucket in buckets {
            inner.token_buckets.insert(bucket.document_id(), bucket.clone());
        }
        Ok(())
    }

    async fn save_total_buckets(&self, buckets: &[TotalBucket]) -> anyhow::Result<()> {
        let mut inner = self.inner.write();
        for bucket in buckets {
            inner.total_buckets.insert(bucket.document_id(), bucket.clone());
        }
        Ok(())
    }

    async fn last_check(&self) -> anyhow::Result<Option<LastCheck>> {
        Ok(self.inner.read().last_check)
    }

    async fn set_last_check(&self, checkpoint: &LastCheck) -> anyhow::Result<()> {
        self.inner.write().last_check = Some(*checkpoint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::from_unix;
    use bigdecimal::BigDecimal;

    const HOUR: i64 = 3_600;

    fn total(hour: i64, volume: i64, liquidity: i64) -> TotalBucket {
        TotalBucket {
            time: from_unix(hour * HOUR),
            volume_usd: BigDecimal::from(volume),
            liquidity_usd: BigDecimal::from(liquidity),
        }
    }

    #[tokio::test]
    async fn test_native_range_excludes_right_edge() {
        let store = MemoryStore::new();
        store
            .save_total_buckets(&[total(0, 1, 1), total(1, 1, 2)])
            .await
            .unwrap();

        let t0 = from_unix(0);
        let first_only = store
            .totals(TimeRange::between(t0, t0 + Duration::minutes(59)), Duration::zero())
            .await
            .unwrap();
        assert_eq!(first_only, vec![total(0, 1, 1)]);

        let both = store
            .totals(TimeRange::between(t0, t0 + Duration::minutes(61)), Duration::zero())
            .await
            .unwrap();
        assert_eq!(both, vec![total(0, 1, 1), total(1, 1, 2)]);
    }

    #[tokio::test]
    async fn test_totals_day_rollup() {
        let store = MemoryStore::new();
        store
            .save_total_buckets(&[total(2, 4, 2), total(0, 1, 1), total(1, 1, 1)])
            .await
            .unwrap();

        let out = store
            .totals(
                TimeRange::between(from_unix(0), from_unix(3 * HOUR)),
                Duration::hours(24),
            )
            .await
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].volume_usd, BigDecimal::from(6));
        assert_eq!(out[0].liquidity_usd, BigDecimal::from(2));
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_document_id() {
        let store = MemoryStore::new();
        store.save_total_buckets(&[total(0, 1, 1)]).await.unwrap();
        store.save_total_buckets(&[total(0, 5, 1)]).await.unwrap();

        let stored = store.stored_total_buckets();
        assert_eq!(stored, vec![total(0, 5, 1)]);
    }

    #[tokio::test]
    async fn test_unknown_entity_is_none_and_quiet_pair_is_empty() {
        let store = MemoryStore::new();
        assert!(store.pair("0xdead").await.unwrap().is_none());
        assert!(store.token("0xdead").await.unwrap().is_none());

        let buckets = store
            .pair_buckets("0xdead", TimeRange::unbounded(), Duration::hours(1))
            .await
            .unwrap();
        assert!(buckets.is_empty());
    }
}
