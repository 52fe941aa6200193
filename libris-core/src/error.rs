// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibrisError {
    #[error("Invalid projection: {0}")]
    InvalidProjection(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Collection '{0}' is empty")]
    EmptyCollection(String),

    #[error("Database unavailable: {0}")]
    DatabaseUnavailable(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid page: {0}")]
    InvalidPage(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Invalid index spec: {0}")]
    InvalidIndexSpec(String),

    #[error("Aggregation error: {0}")]
    AggregationError(String),

    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LibrisError>;
