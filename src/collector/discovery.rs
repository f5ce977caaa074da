//! Incremental pair discovery through the factory's `allPairs` index.

use anyhow::{Context, Result};
use futures::future::try_join_all;
use log::debug;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::chain::ChainClient;
use crate::db::models::{Pair, Token};
use crate::utils::{retry, RetryPolicy};

/// Address → token map shared by concurrent discoveries within one run.
///
/// Many readers, one writer on first sight of a new address. The lock is never
/// held across an await.
#[derive(Debug, Default)]
pub struct TokenCache {
    tokens: RwLock<FxHashMap<String, Token>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache pre-filled with already known tokens.
    pub fn seed(tokens: impl IntoIterator<Item = Token>) -> Self {
        let tokens = tokens
            .into_iter()
            .map(|token| (token.address.clone(), token))
            .collect();
        Self {
            tokens: RwLock::new(tokens),
        }
    }

    pub fn get(&self, address: &str) -> Option<Token> {
        self.tokens.read().get(address).cloned()
    }

    /// Insert `token` unless a concurrent discovery got there first.
    /// Returns the cached entry either way.
    pub fn insert(&self, token: Token) -> Token {
        self.tokens
            .write()
            .entry(token.address.clone())
            .or_insert(token)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Discover every pair the factory lists beyond the first `known` indices.
///
/// One future per index, joined fail-fast: each call is retried under
/// `policy`, and the first call to exhaust it drops the rest. The result is
/// sorted by index.
pub async fn discover_pairs<C>(
    chain: &C,
    policy: RetryPolicy,
    tokens: &TokenCache,
    known: usize,
) -> Result<Vec<Pair>>
where
    C: ChainClient + ?Sized,
{
    let length = retry(policy, "allPairsLength", || chain.all_pairs_length())
        .await
        .context("Failed to read factory pair count")?;

    let known = known as u64;
    if length <= known {
        return Ok(Vec::new());
    }

    debug!("Discovering pairs {}..{}", known, length);
    let lookups = (known..length).map(|index| discover_pair(chain, policy, tokens, index));
    let mut pairs = try_join_all(lookups).await?;
    pairs.sort_by_key(|pair| pair.index);

    Ok(pairs)
}

async fn discover_pair<C>(chain: &C, policy: RetryPolicy, tokens: &TokenCache, index: u64) -> Result<Pair>
where
    C: ChainClient + ?Sized,
{
    let address = retry(policy, "allPairs", || chain.pair_at(index))
        .await
        .with_context(|| format!("Failed to read pair at index {}", index))?;
    let (token0, token1) = retry(policy, "token0/token1", || chain.pair_tokens(&address))
        .await
        .with_context(|| format!("Failed to read tokens of pair {}", address))?;

    let (token0, token1) = futures::try_join!(
        resolve_token(chain, policy, tokens, &token0),
        resolve_token(chain, policy, tokens, &token1)
    )?;

    Ok(Pair::new(index, address, token0, token1))
}

async fn resolve_token<C>(chain: &C, policy: RetryPolicy, tokens: &TokenCache, address: &str) -> Result<Token>
where
    C: ChainClient + ?Sized,
{
    let address = address.to_lowercase();
    if let Some(token) = tokens.get(&address) {
        return Ok(token);
    }

    let metadata = retry(policy, "ERC-20 metadata", || chain.token_metadata(&address))
        .await
        .with_context(|| format!("Failed to read metadata of token {}", address))?;

    Ok(tokens.insert(Token::new(
        address,
        metadata.name,
        metadata.symbol,
        metadata.decimals,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::fake::FakeChain;
    use crate::error::StatsError;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_discovers_only_new_indices() {
        let chain = FakeChain::standard();
        let tokens = TokenCache::new();

        let pairs = discover_pairs(&chain, policy(), &tokens, 1).await.unwrap();

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].index, 1);
        assert_eq!(pairs[0].pair, "FOO-WETH");
        assert_eq!(tokens.len(), 2);
    }

    #[tokio::test]
    async fn test_shared_tokens_are_fetched_once() {
        let chain = FakeChain::standard();
        let tokens = TokenCache::new();

        let pairs = discover_pairs(&chain, policy(), &tokens, 0).await.unwrap();

        assert_eq!(pairs.iter().map(|p| p.index).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(tokens.len(), 3);
        // WETH appears in both pairs but may race between the two lookups
        assert!(chain.metadata_calls() >= 3 && chain.metadata_calls() <= 4);
    }

    #[tokio::test]
    async fn test_seeded_tokens_skip_rpc() {
        let chain = FakeChain::standard();
        let first = TokenCache::new();
        discover_pairs(&chain, policy(), &first, 0).await.unwrap();
        let calls = chain.metadata_calls();

        let seeded = TokenCache::seed(
            ["0xa0", "0xb0", "0xc0"]
                .iter()
                .filter_map(|addr| first.get(addr)),
        );
        discover_pairs(&chain, policy(), &seeded, 0).await.unwrap();

        assert_eq!(chain.metadata_calls(), calls);
    }

    #[tokio::test]
    async fn test_first_failure_aborts_discovery() {
        let chain = FakeChain::standard();
        chain.fail_pair_at(1);

        let err = discover_pairs(&chain, policy(), &TokenCache::new(), 0).await.unwrap_err();
        assert!(format!("{:#}", err).contains("index 1"));
    }

    #[tokio::test]
    async fn test_metadata_failure_is_retried_then_aborts() {
        let chain = FakeChain::standard();
        chain.fail_metadata("0xa0");
        let tokens = TokenCache::new();

        let err = discover_pairs(&chain, policy(), &tokens, 0).await.unwrap_err();

        assert!(format!("{:#}", err).contains("metadata of token 0xa0"));
        assert!(matches!(
            err.downcast_ref::<StatsError>(),
            Some(StatsError::RetriesExhausted { attempts: 2, .. })
        ));
        assert!(tokens.get("0xa0").is_none());
    }
}
