mod config;

pub use config::{CacheSettings, ChainSettings, CollectorSettings, PostgresSettings, Settings};
