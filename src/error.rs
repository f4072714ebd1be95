use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Import error: {0}")]
    Import(String),

    #[error("Invalid date: {0}")]
    DateParse(String),

    #[error("Invalid granularity: {0}")]
    GranularityParse(String),

    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error("Invalid histogram buckets: {0}")]
    BucketConfig(String),

    #[error("Sample value {0} matches no histogram bucket")]
    UnbucketedSample(f64),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
