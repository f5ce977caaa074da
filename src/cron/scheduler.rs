//! Cron scheduler driving the periodic collection run.
//!
//! Ticks more often than once an hour are cheap: a run inside an already
//! collected hour returns `Skipped` after two RPC calls.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::collector::{ChainClient, RunOutcome};
use crate::config::CollectorSettings;
use crate::db::StatsStore;
use crate::service::StatsService;

/// Cron scheduler owning the collection job.
pub struct CollectionScheduler<C: ?Sized, S: ?Sized> {
    service: Arc<StatsService<C, S>>,
    settings: CollectorSettings,
    /// Held for the duration of a run; a tick that finds it taken is skipped.
    running: Arc<Mutex<()>>,
}

impl<C, S> CollectionScheduler<C, S>
where
    C: ChainClient + ?Sized + 'static,
    S: StatsStore + ?Sized + 'static,
{
    pub fn new(service: Arc<StatsService<C, S>>, settings: CollectorSettings) -> Self {
        Self {
            service,
            settings,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Run one collection unless another one is still in flight.
    ///
    /// Returns `None` when the tick was skipped for that reason.
    pub async fn tick(&self) -> Option<Result<RunOutcome>> {
        collect_once(&self.service, &self.running).await
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        self.register_collection_job(&scheduler).await?;

        scheduler.start().await?;
        info!("Cron scheduler started");

        // Collect right away instead of waiting a full interval
        report(self.tick().await);

        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_collection_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let service = self.service.clone();
        let running = self.running.clone();
        let interval = self.settings.interval_secs;

        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _lock| {
            let service = service.clone();
            let running = running.clone();
            Box::pin(async move {
                report(collect_once(&service, &running).await);
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered collection job (every {}s)", interval);
        Ok(())
    }
}

async fn collect_once<C, S>(service: &StatsService<C, S>, running: &Mutex<()>) -> Option<Result<RunOutcome>>
where
    C: ChainClient + ?Sized,
    S: StatsStore + ?Sized,
{
    let Ok(_guard) = running.try_lock() else {
        warn!("Previous collection still running, skipping tick");
        return None;
    };
    Some(service.run_collection().await)
}

fn report(result: Option<Result<RunOutcome>>) {
    if let Some(Err(e)) = result {
        error!("Collection run failed: {:#}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::fake::FakeChain;
    use crate::config::{CacheSettings, ChainSettings};
    use crate::db::MemoryStore;

    fn scheduler() -> CollectionScheduler<FakeChain, MemoryStore> {
        let settings = ChainSettings {
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
        };
        let service = StatsService::new(
            Arc::new(FakeChain::standard()),
            Arc::new(MemoryStore::new()),
            settings,
            &CacheSettings::default(),
        );
        CollectionScheduler::new(Arc::new(service), CollectorSettings::default())
    }

    #[tokio::test]
    async fn test_tick_runs_then_skips_collected_hour() {
        let scheduler = scheduler();

        assert!(matches!(scheduler.tick().await, Some(Ok(RunOutcome::Completed(_)))));
        assert!(matches!(scheduler.tick().await, Some(Ok(RunOutcome::Skipped))));
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let scheduler = scheduler();

        let _held = scheduler.running.lock().await;
        assert!(scheduler.tick().await.is_none());
    }
}
