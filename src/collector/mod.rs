//! Hourly swap statistics collection.
//!
//! - [`chain`] - RPC seam and its alloy implementation
//! - [`discovery`] - Factory index scan and per-run token cache
//! - [`pricing`] - Reference stablecoin prices
//! - [`swaps`] - Chunked swap log fetching
//! - [`collector`] - One collection run, from head lookup to checkpoint

pub mod chain;
#[allow(clippy::module_inception)]
pub mod collector;
pub mod discovery;
pub mod pricing;
pub mod swaps;

#[cfg(test)]
pub(crate) mod fake;

pub use chain::{ChainClient, RpcChainClient, SwapLog, TokenMetadata};
pub use collector::{Collector, RunOutcome, RunSummary};
pub use discovery::{discover_pairs, TokenCache};
pub use pricing::{PairReserves, PriceBook};
pub use swaps::{PairSwap, SwapFetcher};
