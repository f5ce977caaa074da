pub mod abis;
pub mod cache;
pub mod collector;
pub mod config;
pub mod cron;
pub mod db;
pub mod error;
pub mod service;
pub mod utils;

pub use cache::CachedBackend;
pub use collector::{Collector, RpcChainClient, RunOutcome};
pub use config::Settings;
pub use cron::CollectionScheduler;
pub use db::{MemoryStore, PostgresClient, StatsBackend, StatsStore, TimeRange};
pub use error::StatsError;
pub use service::StatsService;
