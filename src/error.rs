use thiserror::Error;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Rate limiter cancelled")]
    Cancelled,

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("XRPC error ({status}) {error}: {message}")]
    Api {
        status: u16,
        error: String,
        message: String,
    },

    #[error("Invalid record timestamp {value:?}: {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Invalid record URI: {0}")]
    InvalidRecordUri(String),

    #[error("Rate limit wait hook failed: {0}")]
    WaitHook(#[source] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SweepError {
    /// Whether a later scheduling cycle can expect a different outcome.
    ///
    /// Remote failures are retried from the last persisted cursor. Parse errors
    /// repeat on the same data, and a cancelled limiter never comes back.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SweepError::Transport(_) | SweepError::Api { .. })
    }
}

pub type Result<T> = std::result::Result<T, SweepError>;
