// =============================================================================
// Error taxonomy for the Meridian scanning engine
// =============================================================================
//
// Kinds, not call sites: every fallible boundary in the engine maps its
// failures onto one of these variants so that callers can branch on the kind
// without knowing which backend produced it.
//
// "Not ready" is deliberately absent — a metric that cannot be computed from
// the current snapshot returns `None` from its computer and is simply omitted
// from the metrics map. It never travels through this enum.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScannerError {
    /// Input rejected at the boundary: bad tick, malformed rule JSON,
    /// condition validation failure. Never corrupts state.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A finalized bar arrived at or before the last finalized minute.
    #[error("out-of-order bar for {symbol}: incoming {incoming} <= last {last}")]
    OutOfOrder {
        symbol: String,
        incoming: i64,
        last: i64,
    },

    /// Rule or symbol lookup missed. Returned to the caller, never retried
    /// silently.
    #[error("not found: {0}")]
    NotFound(String),

    /// Durable or cache store operation failed.
    #[error("backend failure: {0}")]
    Backend(String),

    /// A scan tick ran past its deadline. Partial results already emitted
    /// remain valid.
    #[error("scan deadline exceeded after {elapsed_ms} ms with {skipped} symbols unscanned")]
    DeadlineExceeded { elapsed_ms: u64, skipped: usize },

    /// Unrecoverable startup failure (invalid configuration, durable store
    /// unreachable). The process exits with a distinct code.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<rusqlite::Error> for ScannerError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(format!("sqlite: {e}"))
    }
}

impl From<redis::RedisError> for ScannerError {
    fn from(e: redis::RedisError) -> Self {
        Self::Backend(format!("redis: {e}"))
    }
}

impl ScannerError {
    /// True for failures of an idempotent store operation that are safe to
    /// retry exactly once.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

pub type Result<T> = std::result::Result<T, ScannerError>;
