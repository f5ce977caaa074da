use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::{pin_mut, TryStreamExt};
use log::error;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

use crate::db::models::{
    parse_decimal, LastCheck, Pair, PairBucket, Token, TokenBucket, TotalBucket, LAST_CHECK_ID,
};
use crate::db::postgres::PostgresClient;
use crate::db::rollup::rollup;
use crate::db::{StatsBackend, StatsStore, TimeRange};
use crate::error::StatsError;

/// Sanitize a string for PostgreSQL by removing null bytes (0x00)
/// which are invalid in UTF-8 text columns
fn sanitize_string(s: &str) -> String {
    s.replace('\0', "")
}

/// Rows per multi-row INSERT.
const BATCH_SIZE: usize = 500;

/// Build `($1, $2, ...), ($n, ...)` placeholders for a multi-row insert.
fn values_clauses(rows: usize, cols: usize) -> String {
    (0..rows)
        .map(|i| {
            let start = i * cols + 1;
            let placeholders: Vec<String> = (start..start + cols).map(|n| format!("${}", n)).collect();
            format!("({})", placeholders.join(", "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

const PAIR_SELECT: &str = r#"
    SELECT
        p.id, p.pair_index, p.pair,
        t0.id AS t0_id, t0.name AS t0_name, t0.symbol AS t0_symbol, t0.decimals AS t0_decimals,
        t0.total_supply AS t0_total_supply, t0.reference_price AS t0_reference_price,
        t1.id AS t1_id, t1.name AS t1_name, t1.symbol AS t1_symbol, t1.decimals AS t1_decimals,
        t1.total_supply AS t1_total_supply, t1.reference_price AS t1_reference_price
    FROM stats.pairs p
    JOIN stats.tokens t0 ON t0.id = p.token0_address
    JOIN stats.tokens t1 ON t1.id = p.token1_address
"#;

const TOKEN_SELECT: &str = r#"
    SELECT id, name, symbol, decimals, total_supply, reference_price
    FROM stats.tokens
"#;

// Several entities share an hour, so the address breaks ties
const PAIR_BUCKETS_QUERY: &str = r#"
    SELECT
        address, pair, time,
        amount0_in, amount1_in, amount0_out, amount1_out, volume_usd,
        price0_usd, price1_usd, total_supply, reserve0, reserve1
    FROM stats.pair_buckets
    WHERE ($1::text = '' OR address = $1)
      AND ($2::timestamptz IS NULL OR time >= $2)
      AND ($3::timestamptz IS NULL OR time < $3)
    ORDER BY time ASC, address ASC
"#;

const TOKEN_BUCKETS_QUERY: &str = r#"
    SELECT
        address, symbol, time,
        amount_in, amount_out, volume_usd, price_usd, reserve
    FROM stats.token_buckets
    WHERE ($1::text = '' OR address = $1)
      AND ($2::timestamptz IS NULL OR time >= $2)
      AND ($3::timestamptz IS NULL OR time < $3)
    ORDER BY time ASC, address ASC
"#;

impl PostgresClient {
    // ==================== PAIRS ====================

    /// Get all pairs in discovery order, with their tokens joined in
    pub async fn get_pairs(&self) -> anyhow::Result<Vec<Pair>> {
        let client = self.pool.get().await?;
        let query = format!("{} ORDER BY p.pair_index ASC", PAIR_SELECT);

        let rows = client.query(&query, &[]).await?;
        Ok(rows.iter().filter_map(|row| skip_invalid(row_to_pair(row))).collect())
    }

    pub async fn get_pair(&self, address: &str) -> anyhow::Result<Option<Pair>> {
        let client = self.pool.get().await?;
        let query = format!("{} WHERE p.id = $1", PAIR_SELECT);
        let address = address.to_lowercase();

        let row = client.query_opt(&query, &[&address]).await?;
        Ok(row.and_then(|row| skip_invalid(row_to_pair(&row))))
    }

    /// Batch insert/update pairs. Tokens are stored separately.
    pub async fn set_pairs(&self, pairs: &[Pair]) -> anyhow::Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }

        const COLS_PER_ROW: usize = 5;
        let client = self.pool.get().await?;

        for chunk in pairs.chunks(BATCH_SIZE) {
            let query = format!(
                r#"
                INSERT INTO stats.pairs (id, pair_index, token0_address, token1_address, pair)
                VALUES {}
                ON CONFLICT (id) DO UPDATE SET
                    pair_index = EXCLUDED.pair_index,
                    token0_address = EXCLUDED.token0_address,
                    token1_address = EXCLUDED.token1_address,
                    pair = EXCLUDED.pair
                "#,
                values_clauses(chunk.len(), COLS_PER_ROW)
            );

            let owned: Vec<(i64, String)> = chunk
                .iter()
                .map(|pair| (pair.index as i64, sanitize_string(&pair.pair)))
                .collect();

            let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(chunk.len() * COLS_PER_ROW);
            for (i, pair) in chunk.iter().enumerate() {
                params.push(&pair.address);
                params.push(&owned[i].0);
                params.push(&pair.token0.address);
                params.push(&pair.token1.address);
                params.push(&owned[i].1);
            }

            client.execute(&query, &params).await.map_err(|e| {
                error!("Failed to batch insert {} pairs: {:?}", chunk.len(), e);
                e
            })?;
        }

        Ok(())
    }

    // ==================== TOKENS ====================

    pub async fn get_tokens(&self) -> anyhow::Result<Vec<Token>> {
        let client = self.pool.get().await?;
        let query = format!("{} ORDER BY id ASC", TOKEN_SELECT);

        let rows = client.query(&query, &[]).await?;
        Ok(rows.iter().filter_map(|row| skip_invalid(row_to_token(row, ""))).collect())
    }

    pub async fn get_token(&self, address: &str) -> anyhow::Result<Option<Token>> {
        let client = self.pool.get().await?;
        let query = format!("{} WHERE id = $1", TOKEN_SELECT);
        let address = address.to_lowercase();

        let row = client.query_opt(&query, &[&address]).await?;
        Ok(row.and_then(|row| skip_invalid(row_to_token(&row, ""))))
    }

    /// Batch insert/update tokens (true batch insert with multi-row VALUES)
    pub async fn set_tokens(&self, tokens: &[Token]) -> anyhow::Result<()> {
        if tokens.is_empty() {
            return Ok(());
        }

        const COLS_PER_ROW: usize = 6;
        let client = self.pool.get().await?;

        for chunk in tokens.chunks(BATCH_SIZE) {
            let query = format!(
                r#"
                INSERT INTO stats.tokens (id, name, symbol, decimals, total_supply, reference_price)
                VALUES {}
                ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    symbol = EXCLUDED.symbol,
                    decimals = EXCLUDED.decimals,
                    total_supply = EXCLUDED.total_supply,
                    reference_price = EXCLUDED.reference_price
                "#,
                values_clauses(chunk.len(), COLS_PER_ROW)
            );

            // Strings and narrowed integers must outlive the params slice
            let owned: Vec<(String, String, i16, String, String)> = chunk
                .iter()
                .map(|token| {
                    (
                        sanitize_string(&token.name),
                        sanitize_string(&token.symbol),
                        token.decimals as i16,
                        token.total_supply.to_string(),
                        token.reference_price.to_string(),
                    )
                })
                .collect();

            let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(chunk.len() * COLS_PER_ROW);
            for (i, token) in chunk.iter().enumerate() {
                params.push(&token.address);
                params.push(&owned[i].0);
                params.push(&owned[i].1);
                params.push(&owned[i].2);
                params.push(&owned[i].3);
                params.push(&owned[i].4);
            }

            client.execute(&query, &params).await.map_err(|e| {
                error!("Failed to batch insert {} tokens: {:?}", chunk.len(), e);
                e
            })?;
        }

        Ok(())
    }

    // ==================== BUCKETS ====================

    /// Stored pair buckets in `[from, to)` ascending by time, then address. `""` matches every pair.
    pub async fn get_pair_buckets(&self, address: &str, range: TimeRange) -> anyhow::Result<Vec<PairBucket>> {
        let address = address.to_lowercase();
        self.range_query(
            PAIR_BUCKETS_QUERY,
            &[&address, &range.from, &range.to],
            row_to_pair_bucket::<Row>,
        )
        .await
    }

    /// Stored token buckets in `[from, to)` ascending by time, then address. `""` matches every token.
    pub async fn get_token_buckets(&self, address: &str, range: TimeRange) -> anyhow::Result<Vec<TokenBucket>> {
        let address = address.to_lowercase();
        self.range_query(
            TOKEN_BUCKETS_QUERY,
            &[&address, &range.from, &range.to],
            row_to_token_bucket::<Row>,
        )
        .await
    }

    /// Stored total buckets in `[from, to)` ascending by time.
    pub async fn get_total_buckets(&self, range: TimeRange) -> anyhow::Result<Vec<TotalBucket>> {
        let query = r#"
            SELECT time, volume_usd, liquidity_usd
            FROM stats.total_buckets
            WHERE ($1::timestamptz IS NULL OR time >= $1)
              AND ($2::timestamptz IS NULL OR time < $2)
            ORDER BY time ASC
        "#;
        self.range_query(query, &[&range.from, &range.to], row_to_total_bucket::<Row>)
            .await
    }

    /// Stream a range query, decoding rows one by one and skipping undecodable ones.
    async fn range_query<T>(
        &self,
        query: &str,
        params: &[&(dyn ToSql + Sync)],
        decode: fn(&Row) -> Result<T, StatsError>,
    ) -> anyhow::Result<Vec<T>> {
        let client = self.pool.get().await?;

        let stream = client.query_raw(query, params.iter().copied()).await?;
        pin_mut!(stream);

        let mut out = Vec::new();
        while let Some(row) = stream.try_next().await? {
            if let Some(item) = skip_invalid(decode(&row)) {
                out.push(item);
            }
        }
        Ok(out)
    }

    pub async fn set_pair_buckets(&self, buckets: &[PairBucket]) -> anyhow::Result<()> {
        if buckets.is_empty() {
            return Ok(());
        }

        const COLS_PER_ROW: usize = 14;
        let client = self.pool.get().await?;

        for chunk in buckets.chunks(BATCH_SIZE) {
            let query = format!(
                r#"
                INSERT INTO stats.pair_buckets (
                    id, address, pair, time,
                    amount0_in, amount1_in, amount0_out, amount1_out, volume_usd,
                    price0_usd, price1_usd, total_supply, reserve0, reserve1
                ) VALUES {}
                ON CONFLICT (id) DO UPDATE SET
                    pair = EXCLUDED.pair,
                    amount0_in = EXCLUDED.amount0_in,
                    amount1_in = EXCLUDED.amount1_in,
                    amount0_out = EXCLUDED.amount0_out,
                    amount1_out = EXCLUDED.amount1_out,
                    volume_usd = EXCLUDED.volume_usd,
                    price0_usd = EXCLUDED.price0_usd,
                    price1_usd = EXCLUDED.price1_usd,
                    total_supply = EXCLUDED.total_supply,
                    reserve0 = EXCLUDED.reserve0,
                    reserve1 = EXCLUDED.reserve1
                "#,
                values_clauses(chunk.len(), COLS_PER_ROW)
            );

            let owned: Vec<[String; 12]> = chunk
                .iter()
                .map(|b| {
                    [
                        b.document_id(),
                        sanitize_string(&b.pair),
                        b.amount0_in.to_string(),
                        b.amount1_in.to_string(),
                        b.amount0_out.to_string(),
                        b.amount1_out.to_string(),
                        b.volume_usd.to_string(),
                        b.price0_usd.to_string(),
                        b.price1_usd.to_string(),
                        b.total_supply.to_string(),
                        b.reserve0.to_string(),
                        b.reserve1.to_string(),
                    ]
                })
                .collect();

            let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(chunk.len() * COLS_PER_ROW);
            for (i, bucket) in chunk.iter().enumerate() {
                let [id, pair, rest @ ..] = &owned[i];
                params.push(id);
                params.push(&bucket.address);
                params.push(pair);
                params.push(&bucket.time);
                for value in rest {
                    params.push(value);
                }
            }

            client.execute(&query, &params).await.map_err(|e| {
                error!("Failed to batch insert {} pair buckets: {:?}", chunk.len(), e);
                e
            })?;
        }

        Ok(())
    }

    pub async fn set_token_buckets(&self, buckets: &[TokenBucket]) -> anyhow::Result<()> {
        if buckets.is_empty() {
            return Ok(());
        }

        const COLS_PER_ROW: usize = 9;
        let client = self.pool.get().await?;

        for chunk in buckets.chunks(BATCH_SIZE) {
            let query = format!(
                r#"
                INSERT INTO stats.token_buckets (
                    id, address, symbol, time,
                    amount_in, amount_out, volume_usd, price_usd, reserve
                ) VALUES {}
                ON CONFLICT (id) DO UPDATE SET
                    symbol = EXCLUDED.symbol,
                    amount_in = EXCLUDED.amount_in,
                    amount_out = EXCLUDED.amount_out,
                    volume_usd = EXCLUDED.volume_usd,
                    price_usd = EXCLUDED.price_usd,
                    reserve = EXCLUDED.reserve
                "#,
                values_clauses(chunk.len(), COLS_PER_ROW)
            );

            let owned: Vec<[String; 7]> = chunk
                .iter()
                .map(|b| {
                    [
                        b.document_id(),
                        sanitize_string(&b.symbol),
                        b.amount_in.to_string(),
                        b.amount_out.to_string(),
                        b.volume_usd.to_string(),
                        b.price_usd.to_string(),
                        b.reserve.to_string(),
                    ]
                })
                .collect();

            let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(chunk.len() * COLS_PER_ROW);
            for (i, bucket) in chunk.iter().enumerate() {
                let [id, symbol, rest @ ..] = &owned[i];
                params.push(id);
                params.push(&bucket.address);
                params.push(symbol);
                params.push(&bucket.time);
                for value in rest {
                    params.push(value);
                }
            }

            client.execute(&query, &params).await.map_err(|e| {
                error!("Failed to batch insert {} token buckets: {:?}", chunk.len(), e);
                e
            })?;
        }

        Ok(())
    }

    pub async fn set_total_buckets(&self, buckets: &[TotalBucket]) -> anyhow::Result<()> {
        if buckets.is_empty() {
            return Ok(());
        }

        const COLS_PER_ROW: usize = 4;
        let client = self.pool.get().await?;

        for chunk in buckets.chunks(BATCH_SIZE) {
            let query = format!(
                r#"
                INSERT INTO stats.total_buckets (id, time, volume_usd, liquidity_usd)
                VALUES {}
                ON CONFLICT (id) DO UPDATE SET
                    volume_usd = EXCLUDED.volume_usd,
                    liquidity_usd = EXCLUDED.liquidity_usd
                "#,
                values_clauses(chunk.len(), COLS_PER_ROW)
            );

            let owned: Vec<[String; 3]> = chunk
                .iter()
                .map(|b| [b.document_id(), b.volume_usd.to_string(), b.liquidity_usd.to_string()])
                .collect();

            let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(chunk.len() * COLS_PER_ROW);
            for (i, bucket) in chunk.iter().enumerate() {
                let [id, volume, liquidity] = &owned[i];
                params.push(id);
                params.push(&bucket.time);
                params.push(volume);
                params.push(liquidity);
            }

            client.execute(&query, &params).await.map_err(|e| {
                error!("Failed to batch insert {} total buckets: {:?}", chunk.len(), e);
                e
            })?;
        }

        Ok(())
    }

    // ==================== CHECKPOINT ====================

    pub async fn get_last_check(&self) -> anyhow::Result<Option<LastCheck>> {
        let client = self.pool.get().await?;
        let query = "SELECT last_check_at, last_block_number FROM stats.timestamps WHERE id = $1";

        let row = client.query_opt(query, &[&LAST_CHECK_ID]).await?;
        Ok(row.map(|row| {
            let last_block_number: i64 = row.get("last_block_number");
            LastCheck::new(row.get("last_check_at"), last_block_number as u64)
        }))
    }

    pub async fn upsert_last_check(&self, checkpoint: &LastCheck) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO stats.timestamps (id, last_check_at, last_block_number)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                last_check_at = EXCLUDED.last_check_at,
                last_block_number = EXCLUDED.last_block_number
        "#;
        let last_block_number = checkpoint.last_block_number as i64;

        client
            .execute(
                query,
                &[&LAST_CHECK_ID, &checkpoint.last_check_at, &last_block_number],
            )
            .await
            .map_err(|e| {
                error!("Failed to write checkpoint: {:?}", e);
                e
            })?;

        Ok(())
    }
}

#[async_trait]
impl StatsBackend for PostgresClient {
    async fn pairs(&self) -> anyhow::Result<Vec<Pair>> {
        self.get_pairs().await
    }

    async fn pair(&self, address: &str) -> anyhow::Result<Option<Pair>> {
        self.get_pair(address).await
    }

    async fn tokens(&self) -> anyhow::Result<Vec<Token>> {
        self.get_tokens().await
    }

    async fn token(&self, address: &str) -> anyhow::Result<Option<Token>> {
        self.get_token(address).await
    }

    async fn totals(&self, range: TimeRange, interval: Duration) -> anyhow::Result<Vec<TotalBucket>> {
        let rows = self.get_total_buckets(range).await?;
        Ok(rollup(rows, range.to, interval))
    }

    async fn pair_buckets(
        &self,
        address: &str,
        range: TimeRange,
        interval: Duration,
    ) -> anyhow::Result<Vec<PairBucket>> {
        let rows = self.get_pair_buckets(address, range).await?;
        Ok(rollup(rows, range.to, interval))
    }

    async fn token_buckets(
        &self,
        address: &str,
        range: TimeRange,
        interval: Duration,
    ) -> anyhow::Result<Vec<TokenBucket>> {
        let rows = self.get_token_buckets(address, range).await?;
        Ok(rollup(rows, range.to, interval))
    }
}

#[async_trait]
impl StatsStore for PostgresClient {
    async fn save_pairs(&self, pairs: &[Pair]) -> anyhow::Result<()> {
        self.set_pairs(pairs).await
    }

    async fn save_tokens(&self, tokens: &[Token]) -> anyhow::Result<()> {
        self.set_tokens(tokens).await
    }

    async fn save_pair_buckets(&self, buckets: &[PairBucket]) -> anyhow::Result<()> {
        self.set_pair_buckets(buckets).await
    }

    async fn save_token_buckets(&self, buckets: &[TokenBucket]) -> anyhow::Result<()> {
        self.set_token_buckets(buckets).await
    }

    async fn save_total_buckets(&self, buckets: &[TotalBucket]) -> anyhow::Result<()> {
        self.set_total_buckets(buckets).await
    }

    async fn last_check(&self) -> anyhow::Result<Option<LastCheck>> {
        self.get_last_check().await
    }

    async fn set_last_check(&self, checkpoint: &LastCheck) -> anyhow::Result<()> {
        self.upsert_last_check(checkpoint).await
    }
}

// ==================== HELPER FUNCTIONS ====================

/// Log and drop a record whose stored decimals no longer parse.
fn skip_invalid<T>(decoded: Result<T, StatsError>) -> Option<T> {
    match decoded {
        Ok(value) => Some(value),
        Err(e) => {
            error!("Skipping undecodable row: {}", e);
            None
        },
    }
}

/// Named column access, so decoding does not depend on a live [`Row`].
trait Columns {
    fn text(&self, col: &str) -> String;
    fn time(&self, col: &str) -> DateTime<Utc>;
}

impl Columns for Row {
    fn text(&self, col: &str) -> String {
        self.get(col)
    }

    fn time(&self, col: &str) -> DateTime<Utc> {
        self.get(col)
    }
}

fn lowercased<R: Columns>(row: &R, col: &str) -> String {
    row.text(col).to_lowercase()
}

fn decimal<R: Columns>(row: &R, col: &'static str) -> Result<bigdecimal::BigDecimal, StatsError> {
    parse_decimal(col, &row.text(col))
}

/// Decode a token from columns named `{prefix}{column}`.
fn row_to_token(row: &Row, prefix: &str) -> Result<Token, StatsError> {
    let col = |name: &str| format!("{}{}", prefix, name);
    let decimals: i16 = row.get(col("decimals").as_str());
    let total_supply: String = row.get(col("total_supply").as_str());
    let reference_price: String = row.get(col("reference_price").as_str());

    let mut token = Token::new(
        lowercased(row, &col("id")),
        row.get(col("name").as_str()),
        row.get(col("symbol").as_str()),
        decimals as u8,
    );
    token.total_supply = parse_decimal("total_supply", &total_supply)?;
    token.reference_price = parse_decimal("reference_price", &reference_price)?;
    Ok(token)
}

fn row_to_pair(row: &Row) -> Result<Pair, StatsError> {
    let index: i64 = row.get("pair_index");
    Ok(Pair {
        index: index as u64,
        address: lowercased(row, "id"),
        token0: row_to_token(row, "t0_")?,
        token1: row_to_token(row, "t1_")?,
        pair: row.get("pair"),
    })
}

fn row_to_pair_bucket<R: Columns>(row: &R) -> Result<PairBucket, StatsError> {
    let mut bucket = PairBucket {
        address: lowercased(row, "address"),
        pair: row.text("pair"),
        time: row.time("time"),
        amount0_in: decimal(row, "amount0_in")?,
        amount1_in: decimal(row, "amount1_in")?,
        amount0_out: decimal(row, "amount0_out")?,
        amount1_out: decimal(row, "amount1_out")?,
        volume_usd: decimal(row, "volume_usd")?,
        price0_usd: decimal(row, "price0_usd")?,
        price1_usd: decimal(row, "price1_usd")?,
        total_supply: decimal(row, "total_supply")?,
        reserve0: decimal(row, "reserve0")?,
        reserve1: decimal(row, "reserve1")?,
        liquidity_usd: bigdecimal::BigDecimal::from(0),
    };
    bucket.recompute_liquidity();
    Ok(bucket)
}

fn row_to_token_bucket<R: Columns>(row: &R) -> Result<TokenBucket, StatsError> {
    let mut bucket = TokenBucket {
        address: lowercased(row, "address"),
        symbol: row.text("symbol"),
        time: row.time("time"),
        amount_in: decimal(row, "amount_in")?,
        amount_out: decimal(row, "amount_out")?,
        volume_usd: decimal(row, "volume_usd")?,
        price_usd: decimal(row, "price_usd")?,
        reserve: decimal(row, "reserve")?,
        liquidity_usd: bigdecimal::BigDecimal::from(0),
    };
    bucket.recompute_liquidity();
    Ok(bucket)
}

fn row_to_total_bucket<R: Columns>(row: &R) -> Result<TotalBucket, StatsError> {
    Ok(TotalBucket {
        time: row.time("time"),
        volume_usd: decimal(row, "volume_usd")?,
        liquidity_usd: decimal(row, "liquidity_usd")?,
    })
}
