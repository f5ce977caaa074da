use thiserror::Error;

/// Distinct failure conditions that callers branch on.
///
/// Everything else travels as a plain `anyhow::Error`.
#[derive(Debug, Error)]
pub enum StatsError {
    /// No direct pair against the reference token exists for this token.
    /// Recoverable: the price degrades to zero.
    #[error("price not found for {token}")]
    PriceNotFound { token: String },

    /// A persisted decimal string failed to parse. The affected record is skipped.
    #[error("invalid decimal in field {field}: {value:?}")]
    InvalidDecimal { field: &'static str, value: String },

    /// A retried operation never succeeded.
    #[error("{operation} failed after {attempts} attempts")]
    RetriesExhausted { operation: String, attempts: u32 },
}
