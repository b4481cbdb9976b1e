//! Outcome of a command invocation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::{ErrorCode, TypesError};

/// A command that completed with an error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFailure {
    /// Error code from the server taxonomy.
    pub code: ErrorCode,
    /// Human-readable message from the server.
    pub errmsg: String,
}

impl CommandFailure {
    /// Build a failure from a code and message.
    pub fn new(code: ErrorCode, errmsg: impl Into<String>) -> Self {
        Self {
            code,
            errmsg: errmsg.into(),
        }
    }

    /// Render as a server error reply.
    pub fn to_reply(&self) -> Value {
        let mut reply = json!({
            "ok": 0,
            "code": self.code.code(),
            "errmsg": self.errmsg,
        });
        if let (Some(name), Some(obj)) = (self.code.name(), reply.as_object_mut()) {
            obj.insert("codeName".into(), json!(name));
        }
        reply
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.errmsg)
    }
}

/// What a completed command invocation returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// `ok: 1` with the full reply document.
    Success(Value),
    /// `ok: 0` with an error code.
    Failure(CommandFailure),
}

impl Outcome {
    /// Shorthand for a failure outcome.
    pub fn failure(code: ErrorCode, errmsg: impl Into<String>) -> Self {
        Outcome::Failure(CommandFailure::new(code, errmsg))
    }

    /// Interpret a raw reply document.
    ///
    /// `ok` may be a number or a boolean; a failed reply must carry a `code`.
    pub fn from_reply(reply: Value) -> Result<Self, TypesError> {
        let ok = match reply.get("ok") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
            Some(other) => {
                return Err(TypesError::MalformedReply(format!(
                    "unexpected ok field: {}",
                    other
                )))
            }
            None => return Err(TypesError::MalformedReply("missing ok field".into())),
        };

        if ok {
            return Ok(Outcome::Success(reply));
        }

        let code = reply
            .get("code")
            .and_then(Value::as_i64)
            .ok_or_else(|| TypesError::MalformedReply(format!("error without code: {}", reply)))?;
        let code = i32::try_from(code)
            .map_err(|_| TypesError::MalformedReply(format!("error code out of range: {}", code)))?;
        let errmsg = reply
            .get("errmsg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Outcome::Failure(CommandFailure {
            code: ErrorCode::from(code),
            errmsg,
        }))
    }

    /// Whether the command succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// The error code, if the command failed.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(failure) => Some(failure.code),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success(_) => write!(f, "ok"),
            Outcome::Failure(failure) => write!(f, "failed with {}", failure),
        }
    }
}
