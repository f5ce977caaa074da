//! Chain RPC seam used by the collector.

use std::future::{Future, IntoFuture};
use std::time::Duration;

use alloy::eips::BlockNumberOrTag;
use alloy::network::TransactionResponse;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use url::Url;

use crate::abis::{IUniswapV2Factory, IUniswapV2Pair, V2Swap, IERC20};
use crate::config::ChainSettings;
use crate::utils::{from_unix, hex_encode};

/// A decoded V2 `Swap` log. Addresses are lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapLog {
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
    pub sender: String,
    pub recipient: String,
    pub amount0_in: U256,
    pub amount1_in: U256,
    pub amount0_out: U256,
    pub amount1_out: U256,
}

/// ERC-20 metadata read once on discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Everything the collector reads from the chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn latest_block_number(&self) -> Result<u64>;

    async fn block_timestamp(&self, block: u64) -> Result<DateTime<Utc>>;

    /// Swap logs of `pair` in `[from_block, to_block]`, ascending.
    async fn swap_logs(&self, pair: &str, from_block: u64, to_block: u64) -> Result<Vec<SwapLog>>;

    /// Originating account of a transaction.
    async fn transaction_sender(&self, tx_hash: &str) -> Result<String>;

    async fn all_pairs_length(&self) -> Result<u64>;

    async fn pair_at(&self, index: u64) -> Result<String>;

    async fn pair_tokens(&self, pair: &str) -> Result<(String, String)>;

    /// Raw `getReserves()` of a pair.
    async fn reserves(&self, pair: &str) -> Result<(u128, u128)>;

    async fn pair_total_supply(&self, pair: &str) -> Result<U256>;

    async fn token_metadata(&self, token: &str) -> Result<TokenMetadata>;

    async fn token_total_supply(&self, token: &str) -> Result<U256>;
}

/// [`ChainClient`] over JSON-RPC.
pub struct RpcChainClient {
    provider: DynProvider,
    factory: Address,
    timeout: Duration,
}

impl RpcChainClient {
    pub fn new(settings: &ChainSettings) -> Result<Self> {
        let url = Url::parse(&settings.rpc_url).context("Invalid RPC URL")?;
        let provider = DynProvider::new(ProviderBuilder::new().connect_http(url));
        let factory = parse_address(&settings.factory_address)?;

        Ok(Self {
            provider,
            factory,
            timeout: settings.request_timeout(),
        })
    }

    /// Await an RPC call under the per-call timeout.
    async fn call<T, E, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: IntoFuture<Output = std::result::Result<T, E>>,
        F::IntoFuture: Future<Output = std::result::Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        tokio::time::timeout(self.timeout, fut.into_future())
            .await
            .with_context(|| format!("{} timed out", what))?
            .with_context(|| format!("{} failed", what))
    }

    /// Like [`call`](Self::call) for optional string getters.
    async fn call_string<F>(&self, what: &str, fut: F) -> Result<String>
    where
        F: IntoFuture<Output = std::result::Result<String, alloy::contract::Error>>,
        F::IntoFuture: Future<Output = std::result::Result<String, alloy::contract::Error>>,
    {
        let result = tokio::time::timeout(self.timeout, fut.into_future())
            .await
            .with_context(|| format!("{} timed out", what))?;
        string_or_empty(what, result)
    }
}

/// Transport failures are errors. A reply that does not decode as a string,
/// such as a `bytes32` symbol, becomes an empty string.
fn string_or_empty(what: &str, result: std::result::Result<String, alloy::contract::Error>) -> Result<String> {
    match result {
        Ok(value) => Ok(value),
        Err(e @ alloy::contract::Error::TransportError(_)) => {
            Err(anyhow::Error::new(e).context(format!("{} failed", what)))
        },
        Err(e) => {
            warn!("{} returned no string ({}), storing it empty", what, e);
            Ok(String::new())
        },
    }
}

fn parse_address(addr: &str) -> Result<Address> {
    addr.parse()
        .with_context(|| format!("Invalid address {}", addr))
}

fn address_string(address: Address) -> String {
    hex_encode(address.as_slice())
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn latest_block_number(&self) -> Result<u64> {
        self.call("eth_blockNumber", self.provider.get_block_number())
            .await
    }

    async fn block_timestamp(&self, number: u64) -> Result<DateTime<Utc>> {
        let block = self
            .call(
                "eth_getBlockByNumber",
                self.provider
                    .get_block_by_number(BlockNumberOrTag::Number(number)),
            )
            .await?
            .with_context(|| format!("Block {} not found", number))?;

        Ok(from_unix(block.header.timestamp as i64))
    }

    async fn swap_logs(&self, pair: &str, from_block: u64, to_block: u64) -> Result<Vec<SwapLog>> {
        let filter = Filter::new()
            .address(parse_address(pair)?)
            .event_signature(V2Swap::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self.call("eth_getLogs", self.provider.get_logs(&filter)).await?;

        let mut swaps = Vec::with_capacity(logs.len());
        for log in logs {
            let decoded = log.log_decode::<V2Swap>().context("Failed to decode Swap log")?;
            let swap = decoded.inner.data;
            swaps.push(SwapLog {
                block_number: log.block_number.context("Swap log without block number")?,
                tx_hash: log
                    .transaction_hash
                    .map(|h| hex_encode(h.as_slice()))
                    .unwrap_or_default(),
                log_index: log.log_index.unwrap_or_default(),
                sender: address_string(swap.sender),
                recipient: address_string(swap.to),
                amount0_in: swap.amount0In,
                amount1_in: swap.amount1In,
                amount0_out: swap.amount0Out,
                amount1_out: swap.amount1Out,
            });
        }

        Ok(swaps)
    }

    async fn transaction_sender(&self, tx_hash: &str) -> Result<String> {
        let hash: B256 = tx_hash
            .parse()
            .with_context(|| format!("Invalid transaction hash {}", tx_hash))?;

        let tx = self
            .call(
                "eth_getTransactionByHash",
                self.provider.get_transaction_by_hash(hash),
            )
            .await?
            .with_context(|| format!("Transaction {} not found", tx_hash))?;

        Ok(address_string(tx.from()))
    }

    async fn all_pairs_length(&self) -> Result<u64> {
        let factory = IUniswapV2Factory::new(self.factory, &self.provider);
        let length: U256 = self.call("allPairsLength", factory.allPairsLength().call()).await?;
        Ok(length.saturating_to())
    }

    async fn pair_at(&self, index: u64) -> Result<String> {
        let factory = IUniswapV2Factory::new(self.factory, &self.provider);
        let pair = self
            .call("allPairs", factory.allPairs(U256::from(index)).call())
            .await?;
        Ok(address_string(pair))
    }

    async fn pair_tokens(&self, pair: &str) -> Result<(String, String)> {
        let contract = IUniswapV2Pair::new(parse_address(pair)?, &self.provider);
        let token0 = self.call("token0", contract.token0().call()).await?;
        let token1 = self.call("token1", contract.token1().call()).await?;
        Ok((address_string(token0), address_string(token1)))
    }

    async fn reserves(&self, pair: &str) -> Result<(u128, u128)> {
        let contract = IUniswapV2Pair::new(parse_address(pair)?, &self.provider);
        let reserves = self.call("getReserves", contract.getReserves().call()).await?;
        Ok((reserves.reserve0.to::<u128>(), reserves.reserve1.to::<u128>()))
    }

    async fn pair_total_supply(&self, pair: &str) -> Result<U256> {
        let contract = IUniswapV2Pair::new(parse_address(pair)?, &self.provider);
        self.call("totalSupply", contract.totalSupply().call()).await
    }

    async fn token_metadata(&self, token: &str) -> Result<TokenMetadata> {
        let contract = IERC20::new(parse_address(token)?, &self.provider);

        let decimals = self.call("decimals", contract.decimals().call()).await?;
        let name = self.call_string("name", contract.name().call()).await?;
        let symbol = self.call_string("symbol", contract.symbol().call()).await?;

        Ok(TokenMetadata {
            name,
            symbol,
            decimals,
        })
    }

    async fn token_total_supply(&self, token: &str) -> Result<U256> {
        let contract = IERC20::new(parse_address(token)?, &self.provider);
        self.call("totalSupply", contract.totalSupply().call()).await
    }
}
