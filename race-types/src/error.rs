//! Error types for ddl-race-types.

use thiserror::Error;

/// Errors produced while building or decoding harness types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// A namespace string was not of the form `db.coll`.
    #[error("invalid namespace: {0:?}")]
    InvalidNamespace(String),

    /// A server reply document could not be interpreted.
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// A collection UUID could not be decoded.
    #[error("invalid collection uuid: {0}")]
    InvalidUuid(String),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
