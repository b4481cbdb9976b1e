//! Server error codes observed by the harness.
//!
//! Only the codes the harness reasons about get a named variant; everything
//! else round-trips through [`ErrorCode::Other`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// An error code from the server's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ErrorCode {
    /// 2: a parameter had an unacceptable value.
    BadValue,
    /// 6: the target host could not be reached.
    HostUnreachable,
    /// 20: the operation is not allowed in the current state.
    IllegalOperation,
    /// 26: the namespace does not exist.
    NamespaceNotFound,
    /// 48: the target namespace already exists.
    NamespaceExists,
    /// 72: the command options were invalid.
    InvalidOptions,
    /// 89: a network operation timed out.
    NetworkTimeout,
    /// 175: a running query plan was killed (e.g. its collection went away).
    QueryPlanKilled,
    /// 361: the collection UUID differs from the one the command started with.
    CollectionUuidMismatch,
    /// 4952606: too few distinct shard key values to generate split points.
    InsufficientDistinctValues,
    /// Any other code.
    Other(i32),
}

impl ErrorCode {
    /// The numeric code.
    pub fn code(&self) -> i32 {
        match self {
            ErrorCode::BadValue => 2,
            ErrorCode::HostUnreachable => 6,
            ErrorCode::IllegalOperation => 20,
            ErrorCode::NamespaceNotFound => 26,
            ErrorCode::NamespaceExists => 48,
            ErrorCode::InvalidOptions => 72,
            ErrorCode::NetworkTimeout => 89,
            ErrorCode::QueryPlanKilled => 175,
            ErrorCode::CollectionUuidMismatch => 361,
            ErrorCode::InsufficientDistinctValues => 4_952_606,
            ErrorCode::Other(code) => *code,
        }
    }

    /// The server's code name, if known.
    pub fn name(&self) -> Option<&'static str> {
        match self {
            ErrorCode::BadValue => Some("BadValue"),
            ErrorCode::HostUnreachable => Some("HostUnreachable"),
            ErrorCode::IllegalOperation => Some("IllegalOperation"),
            ErrorCode::NamespaceNotFound => Some("NamespaceNotFound"),
            ErrorCode::NamespaceExists => Some("NamespaceExists"),
            ErrorCode::InvalidOptions => Some("InvalidOptions"),
            ErrorCode::NetworkTimeout => Some("NetworkTimeout"),
            ErrorCode::QueryPlanKilled => Some("QueryPlanKilled"),
            ErrorCode::CollectionUuidMismatch => Some("CollectionUUIDMismatch"),
            // Location code, the server gives it no name
            ErrorCode::InsufficientDistinctValues => None,
            ErrorCode::Other(_) => None,
        }
    }

    /// Host-level failures are never legitimate race outcomes.
    pub fn is_network_error(&self) -> bool {
        matches!(self, ErrorCode::HostUnreachable | ErrorCode::NetworkTimeout)
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        match code {
            2 => ErrorCode::BadValue,
            6 => ErrorCode::HostUnreachable,
            20 => ErrorCode::IllegalOperation,
            26 => ErrorCode::NamespaceNotFound,
            48 => ErrorCode::NamespaceExists,
            72 => ErrorCode::InvalidOptions,
            89 => ErrorCode::NetworkTimeout,
            175 => ErrorCode::QueryPlanKilled,
            361 => ErrorCode::CollectionUuidMismatch,
            4_952_606 => ErrorCode::InsufficientDistinctValues,
            other => ErrorCode::Other(other),
        }
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({})", name, self.code()),
            None => write!(f, "{}", self.code()),
        }
    }
}
