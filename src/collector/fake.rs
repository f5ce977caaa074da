//! Scripted in-memory chain for collector tests.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use alloy::primitives::U256;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::chain::{ChainClient, SwapLog, TokenMetadata};
use crate::utils::from_unix;

/// Hour-aligned timestamp of block 0.
pub const GENESIS: i64 = 472_222 * 3_600;

/// Seconds between blocks.
pub const BLOCK_TIME: i64 = 12;

struct FakePair {
    address: String,
    token0: String,
    token1: String,
    reserves: (u128, u128),
    total_supply: U256,
}

struct FakeToken {
    address: String,
    metadata: TokenMetadata,
    total_supply: U256,
}

struct State {
    head: u64,
    pairs: Vec<FakePair>,
    tokens: Vec<FakeToken>,
    swaps: Vec<(String, SwapLog)>,
    fail_pair_at: Option<u64>,
    fail_metadata: Option<String>,
}

pub struct FakeChain {
    state: Mutex<State>,
    log_failures: AtomicU32,
    log_calls: AtomicUsize,
    sender_calls: AtomicUsize,
    timestamp_calls: AtomicUsize,
    metadata_calls: AtomicUsize,
}

fn units(amount: u64, decimals: u8) -> U256 {
    U256::from(amount) * U256::from(10u64).pow(U256::from(decimals))
}

fn swap(block: u64, tx: u8, log_index: u64, amounts: [U256; 4]) -> SwapLog {
    SwapLog {
        block_number: block,
        tx_hash: format!("0x{:064x}", tx),
        log_index,
        sender: "0x00000000000000000000000000000000000000aa".to_string(),
        recipient: "0x00000000000000000000000000000000000000bb".to_string(),
        amount0_in: amounts[0],
        amount1_in: amounts[1],
        amount0_out: amounts[2],
        amount1_out: amounts[3],
    }
}

impl FakeChain {
    pub const ORIGIN: &'static str = "0x0000000000000000000000000000000000000abc";

    /// Two pairs: WETH/USDC at index 0 (`0xd0`) and FOO/WETH at index 1 (`0xe0`).
    ///
    /// USDC `0xa0` (6 decimals), WETH `0xb0` and FOO `0xc0` (18 decimals).
    /// Reserves price WETH at 2000 USDC; FOO has no USDC pair. Head is block
    /// 700, inside hour 2. `0xd0` trades at block 10 (hour 0), twice in one
    /// transaction at block 400 (hour 1), and at block 650 (hour 2).
    pub fn standard() -> Self {
        let zero = U256::ZERO;
        let pairs = vec![
            FakePair {
                address: "0xd0".into(),
                token0: "0xb0".into(),
                token1: "0xa0".into(),
                reserves: (10 * 10u128.pow(18), 20_000 * 10u128.pow(6)),
                total_supply: units(400, 18),
            },
            FakePair {
                address: "0xe0".into(),
                token0: "0xc0".into(),
                token1: "0xb0".into(),
                reserves: (1_000 * 10u128.pow(18), 5 * 10u128.pow(18)),
                total_supply: units(70, 18),
            },
        ];
        let token = |address: &str, symbol: &str, decimals: u8, supply: u64| FakeToken {
            address: address.into(),
            metadata: TokenMetadata {
                name: format!("{} token", symbol),
                symbol: symbol.into(),
                decimals,
            },
            total_supply: units(supply, decimals),
        };
        let tokens = vec![
            token("0xa0", "USDC", 6, 1_000_000),
            token("0xb0", "WETH", 18, 50_000),
            token("0xc0", "FOO", 18, 1_000_000_000),
        ];
        let milli = U256::from(10u64).pow(U256::from(15u64));
        let swaps = vec![
            ("0xd0".into(), swap(10, 1, 0, [units(1, 18), zero, zero, units(1_990, 6)])),
            ("0xd0".into(), swap(400, 2, 0, [zero, units(500, 6), milli * U256::from(240u64), zero])),
            ("0xd0".into(), swap(400, 2, 1, [zero, units(100, 6), milli * U256::from(50u64), zero])),
            ("0xd0".into(), swap(650, 3, 0, [units(2, 18), zero, zero, units(3_900, 6)])),
        ];

        Self {
            state: Mutex::new(State {
                head: 700,
                pairs,
                tokens,
                swaps,
                fail_pair_at: None,
                fail_metadata: None,
            }),
            log_failures: AtomicU32::new(0),
            log_calls: AtomicUsize::new(0),
            sender_calls: AtomicUsize::new(0),
            timestamp_calls: AtomicUsize::new(0),
            metadata_calls: AtomicUsize::new(0),
        }
    }

    pub fn block_time(&self, block: u64) -> DateTime<Utc> {
        from_unix(GENESIS + block as i64 * BLOCK_TIME)
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().head = head;
    }

    pub fn fail_pair_at(&self, index: u64) {
        self.state.lock().fail_pair_at = Some(index);
    }

    /// Fail every metadata read of `token`.
    pub fn fail_metadata(&self, token: &str) {
        self.state.lock().fail_metadata = Some(token.to_string());
    }

    /// Fail the next `n` log queries.
    pub fn fail_logs(&self, n: u32) {
        self.log_failures.store(n, Ordering::SeqCst);
    }

    pub fn log_calls(&self) -> usize {
        self.log_calls.load(Ordering::SeqCst)
    }

    pub fn sender_calls(&self) -> usize {
        self.sender_calls.load(Ordering::SeqCst)
    }

    pub fn timestamp_calls(&self) -> usize {
        self.timestamp_calls.load(Ordering::SeqCst)
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn latest_block_number(&self) -> Result<u64> {
        Ok(self.state.lock().head)
    }

    async fn block_timestamp(&self, block: u64) -> Result<DateTime<Utc>> {
        self.timestamp_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.block_time(block))
    }

    async fn swap_logs(&self, pair: &str, from_block: u64, to_block: u64) -> Result<Vec<SwapLog>> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.log_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.log_failures.store(remaining - 1, Ordering::SeqCst);
            bail!("rpc timeout");
        }

        let state = self.state.lock();
        Ok(state
            .swaps
            .iter()
            .filter(|(address, log)| {
                address == pair && log.block_number >= from_block && log.block_number <= to_block
            })
            .map(|(_, log)| log.clone())
            .collect())
    }

    async fn transaction_sender(&self, _tx_hash: &str) -> Result<String> {
        self.sender_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::ORIGIN.to_string())
    }

    async fn all_pairs_length(&self) -> Result<u64> {
        Ok(self.state.lock().pairs.len() as u64)
    }

    async fn pair_at(&self, index: u64) -> Result<String> {
        let state = self.state.lock();
        if state.fail_pair_at == Some(index) {
            bail!("execution reverted");
        }
        state
            .pairs
            .get(index as usize)
            .map(|p| p.address.clone())
            .context("index out of range")
    }

    async fn pair_tokens(&self, pair: &str) -> Result<(String, String)> {
        let state = self.state.lock();
        let p = state.pairs.iter().find(|p| p.address == pair).context("unknown pair")?;
        Ok((p.token0.clone(), p.token1.clone()))
    }

    async fn reserves(&self, pair: &str) -> Result<(u128, u128)> {
        let state = self.state.lock();
        let p = state.pairs.iter().find(|p| p.address == pair).context("unknown pair")?;
        Ok(p.reserves)
    }

    async fn pair_total_supply(&self, pair: &str) -> Result<U256> {
        let state = self.state.lock();
        let p = state.pairs.iter().find(|p| p.address == pair).context("unknown pair")?;
        Ok(p.total_supply)
    }

    async fn token_metadata(&self, token: &str) -> Result<TokenMetadata> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if state.fail_metadata.as_deref() == Some(token) {
            bail!("rpc timeout");
        }
        let t = state.tokens.iter().find(|t| t.address == token).context("unknown token")?;
        Ok(t.metadata.clone())
    }

    async fn token_total_supply(&self, token: &str) -> Result<U256> {
        let state = self.state.lock();
        let t = state.tokens.iter().find(|t| t.address == token).context("unknown token")?;
        Ok(t.total_supply)
    }
}
