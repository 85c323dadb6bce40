use thiserror::Error;

use crate::mapping::engine::UnmappableReason;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("fetch error ({bookmaker}): {source}")]
    Fetch {
        bookmaker: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("fetch timed out ({bookmaker})")]
    FetchTimeout { bookmaker: String },

    #[error("market unmappable: {0:?}")]
    Mapping(UnmappableReason),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
