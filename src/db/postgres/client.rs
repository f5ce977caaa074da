use std::time::Duration;

use anyhow::Context;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use log::info;
use tokio_postgres::NoTls;

use crate::config::PostgresSettings;
use crate::utils::{retry, RetryPolicy};

const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Split SQL into statements, respecting dollar-quoted strings.
/// This handles PostgreSQL function definitions that use $$ ... $$ blocks.
fn split_sql_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut start = 0;
    let mut in_dollar_quote = false;
    let bytes = sql.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if i + 1 < bytes.len() && bytes[i] == b'$' && bytes[i + 1] == b'$' {
            in_dollar_quote = !in_dollar_quote;
            i += 2;
            continue;
        }

        if bytes[i] == b';' && !in_dollar_quote {
            let stmt = &sql[start..i];
            if !stmt.trim().is_empty() {
                statements.push(stmt);
            }
            start = i + 1;
        }
        i += 1;
    }

    if start < sql.len() {
        let stmt = &sql[start..];
        if !stmt.trim().is_empty() {
            statements.push(stmt);
        }
    }

    statements
}

/// PostgreSQL client with connection pooling.
///
/// Stores pairs, tokens, hourly buckets and the collection checkpoint as
/// id-keyed rows. Uses `deadpool-postgres` for connection management.
#[derive(Clone)]
pub struct PostgresClient {
    pub pool: Pool,
}

impl PostgresClient {
    pub async fn new(settings: PostgresSettings) -> anyhow::Result<Self> {
        info!("Connecting to PostgreSQL");

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&settings.host)
            .port(settings.port)
            .user(&settings.user)
            .password(&settings.password)
            .dbname(&settings.database);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(settings.pool_size)
            .build()
            .context("Failed to create PostgreSQL connection pool")?;

        // Test the connection
        let policy = RetryPolicy::new(CONNECT_ATTEMPTS, CONNECT_BACKOFF);
        retry(policy, "PostgreSQL connect", || async {
            pool.get().await.map(|_| ()).map_err(anyhow::Error::from)
        })
        .await?;

        info!("Successfully connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        info!("Running PostgreSQL migrations");
        let client = self.pool.get().await?;

        let schema = tokio::fs::read_to_string("schema/postgres.sql")
            .await
            .context("Failed to read schema/postgres.sql")?;

        for stmt in split_sql_statements(&schema) {
            let stmt = stmt.trim();
            client
                .execute(stmt, &[])
                .await
                .with_context(|| format!("Failed to execute migration statement: {}", stmt))?;
        }

        info!("PostgreSQL migrations completed successfully");
        Ok(())
    }
}
