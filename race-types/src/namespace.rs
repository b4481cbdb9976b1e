//! Namespace addressing and collection identity.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::TypesError;

/// A database + collection pair, addressed as `db.coll`.
///
/// Serializes as the dotted string, matching how the server keys
/// `config.queryAnalyzers` documents.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace {
    db: String,
    coll: String,
}

impl Namespace {
    /// Create a namespace from its two halves.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::InvalidNamespace`] if either half is empty or the
    /// database name contains a dot.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Result<Self, TypesError> {
        let db = db.into();
        let coll = coll.into();
        if db.is_empty() || coll.is_empty() || db.contains('.') {
            return Err(TypesError::InvalidNamespace(format!("{}.{}", db, coll)));
        }
        Ok(Self { db, coll })
    }

    /// Create a fresh, uniquely named namespace for one scenario.
    pub fn unique(prefix: &str) -> Self {
        let db_suffix = uuid::Uuid::new_v4().as_simple().to_string();
        let coll_suffix = uuid::Uuid::new_v4().as_simple().to_string();
        Self {
            db: format!("{}_{}", prefix, &db_suffix[..12]),
            coll: format!("coll_{}", &coll_suffix[..12]),
        }
    }

    /// The database half.
    pub fn db(&self) -> &str {
        &self.db
    }

    /// The collection half.
    pub fn coll(&self) -> &str {
        &self.coll
    }

    /// A namespace in the same database with a different collection name.
    pub fn sibling(&self, coll: impl Into<String>) -> Result<Self, TypesError> {
        Self::new(self.db.clone(), coll)
    }

    /// A sibling namespace named after a fresh UUID, used as a rename target.
    pub fn random_sibling(&self) -> Self {
        Self {
            db: self.db.clone(),
            coll: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl FromStr for Namespace {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((db, coll)) => Self::new(db, coll),
            None => Err(TypesError::InvalidNamespace(s.to_string())),
        }
    }
}

impl TryFrom<String> for Namespace {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.to_string()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace({})", self)
    }
}

/// Server-assigned identity of a collection.
///
/// Changes whenever the collection is dropped and recreated; unchanged by
/// deleting its documents.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionUuid(uuid::Uuid);

impl CollectionUuid {
    /// Create a new random identity (what the server does on create).
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// The inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Decode a UUID from relaxed or canonical Extended JSON.
    ///
    /// Accepts `{"$uuid": "<hyphenated>"}`, `{"$binary": {"base64": ..,
    /// "subType": "04"}}`, and a bare hyphenated string.
    pub fn from_extended_json(value: &Value) -> Result<Self, TypesError> {
        if let Some(s) = value.as_str() {
            return parse_hyphenated(s);
        }
        if let Some(s) = value.get("$uuid").and_then(Value::as_str) {
            return parse_hyphenated(s);
        }
        if let Some(binary) = value.get("$binary") {
            let sub_type = binary.get("subType").and_then(Value::as_str).unwrap_or("");
            if sub_type != "04" && sub_type != "4" {
                return Err(TypesError::InvalidUuid(format!(
                    "binary subtype {:?} is not a UUID",
                    sub_type
                )));
            }
            let encoded = binary
                .get("base64")
                .and_then(Value::as_str)
                .ok_or_else(|| TypesError::InvalidUuid("missing base64 payload".into()))?;
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|e| TypesError::InvalidUuid(e.to_string()))?;
            let uuid = uuid::Uuid::from_slice(&bytes)
                .map_err(|e| TypesError::InvalidUuid(e.to_string()))?;
            return Ok(Self(uuid));
        }
        Err(TypesError::InvalidUuid(value.to_string()))
    }
}

fn parse_hyphenated(s: &str) -> Result<CollectionUuid, TypesError> {
    uuid::Uuid::parse_str(s)
        .map(CollectionUuid)
        .map_err(|e| TypesError::InvalidUuid(e.to_string()))
}

impl Default for CollectionUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CollectionUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for CollectionUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectionUuid({})", &self.0.to_string()[..8])
    }
}
