//! Engine error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Persisted threshold below the ladder floor; the stored state is corrupt
    #[error("previous threshold {previous} is below the initial threshold {floor}")]
    ThresholdBelowFloor { previous: f64, floor: f64 },

    #[error("arithmetic failure: {0}")]
    Arithmetic(String),

    #[error("wallet unavailable: {0}")]
    Wallet(String),

    #[error("trade data store error: {0}")]
    Store(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
