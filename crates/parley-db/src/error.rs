use thiserror::Error;

/// Every way a store operation can fail. Callers above the store hand these
/// back untouched.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("document encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("document written to '{collection}' is not a JSON object")]
    NotAnObject { collection: String },

    #[error("DB lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("background store task failed: {0}")]
    Background(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
