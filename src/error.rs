use thiserror::Error;

/// Run configuration rejected before any state changes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please enter at least one message template")]
    NoTemplates,

    #[error("No contacts available")]
    NoTargets,

    #[error("Min delay must be at least 1 second (got {0})")]
    MinDelayTooShort(u64),

    #[error("Max delay ({max}s) must be greater than or equal to min delay ({min}s)")]
    MaxBelowMin { min: u64, max: u64 },

    #[error("Break threshold must be at least 1 message")]
    BreakThresholdZero,
}

/// The page provider failed or answered with something unusable.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Not supported by this provider: {0}")]
    Unsupported(&'static str),

    #[error("Provider error: {0}")]
    Remote(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Could not persist run state: {0}")]
    Store(#[from] StoreError),

    #[error("No saved run to resume")]
    NoSavedRun,

    #[error("Run is not active")]
    NotRunning,
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Could not persist roster: {0}")]
    Store(#[from] StoreError),
}
