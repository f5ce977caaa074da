use std::sync::Arc;

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use swapstats::{CollectionScheduler, PostgresClient, RpcChainClient, Settings, StatsService};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .context("Failed to initialize logger")?;

    let settings =
        Settings::new().context("Failed to load config.yaml. Please ensure it exists and is valid")?;

    let store = PostgresClient::new(settings.postgres.clone())
        .await
        .context("Failed to initialize database connection")?;
    store.migrate().await.context("Failed to run migrations")?;

    let chain = RpcChainClient::new(&settings.chain).context("Failed to create RPC client")?;

    let service = Arc::new(StatsService::new(
        Arc::new(chain),
        Arc::new(store),
        settings.chain.clone(),
        &settings.cache,
    ));

    let cancellation_token = CancellationToken::new();

    let scheduler = CollectionScheduler::new(service, settings.collector.clone());
    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {:#}", e);
        }
    });

    info!("Collector running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm_stream =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    cancellation_token.cancel();

    info!("Waiting for cron scheduler to stop...");
    let _ = cron_handle.await;

    info!("Shutdown complete");
    Ok(())
}
