//! Error taxonomy for the core (§7 of the design spec).

use thiserror::Error;

/// Errors surfaced by the stock database, resolution dispatcher, real-time monitor,
/// expression evaluator and alerts engine.
///
/// Fetch errors never abort a caller — they increment `fetch_errors` on the affected stock
/// and are logged at `warn` level (see [`crate::error::CoreError::FetchError`]). Only
/// invariant violations (hash-table insertion failure, unmigratable stream corruption)
/// propagate as `Err` out of the core's public entry points.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed expression, missing field, or a nonsense date argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A handle's id is zero or not present in the hash table.
    #[error("invalid handle")]
    InvalidHandle,

    /// The stock database's reader-writer lock could not be taken.
    #[error("database access failed")]
    DbAccess,

    /// Slot insertion failed even after a growth pass.
    #[error("hash table too small after growth")]
    HashTableTooSmall,

    /// The real-time stream's header is invalid or its version could not be migrated.
    #[error("real-time stream corrupt: {0}")]
    StreamCorrupt(String),

    /// An HTTP or JSON error occurred while resolving a fetch level.
    #[error("fetch error: {0}")]
    FetchError(String),

    /// A bounded spin-wait exhausted its budget.
    #[error("evaluation timed out after {0:?}")]
    EvaluationTimeout(std::time::Duration),

    /// The stock has accumulated `fetch_errors >= 20` and is no longer resolved.
    #[error("stock is poisoned (too many fetch errors)")]
    Poisoned,

    /// The backend is not reachable (transient).
    #[error("backend not available: {0}")]
    NotAvailable(String),
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        CoreError::FetchError(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::FetchError(format!("json parse error: {e}"))
    }
}

impl From<url::ParseError> for CoreError {
    fn from(e: url::ParseError) -> Self {
        CoreError::InvalidArgument(format!("invalid url: {e}"))
    }
}
