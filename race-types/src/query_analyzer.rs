//! Persisted query sampling configuration (`config.queryAnalyzers`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CollectionUuid, Namespace, SamplingMode, TypesError};

/// One `config.queryAnalyzers` document.
///
/// Keyed by namespace string; `coll_uuid` is the collection identity at the
/// time sampling was configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalyzerDoc {
    /// Namespace the configuration applies to.
    #[serde(rename = "_id")]
    pub ns: Namespace,
    /// Collection identity recorded when the document was written.
    #[serde(rename = "collUuid")]
    pub coll_uuid: CollectionUuid,
    /// Current sampling mode.
    pub mode: SamplingMode,
    /// Sampling rate while `mode` is `full`.
    #[serde(rename = "samplesPerSecond", skip_serializing_if = "Option::is_none", default)]
    pub samples_per_second: Option<f64>,
}

impl QueryAnalyzerDoc {
    /// Decode a document read back from the server as Extended JSON.
    ///
    /// `collUuid` may arrive in any of the forms accepted by
    /// [`CollectionUuid::from_extended_json`].
    pub fn from_extended_json(doc: &Value) -> Result<Self, TypesError> {
        let ns: Namespace = doc
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| TypesError::MalformedReply(format!("queryAnalyzers doc without _id: {}", doc)))?
            .parse()?;
        let coll_uuid = doc
            .get("collUuid")
            .ok_or_else(|| TypesError::MalformedReply("queryAnalyzers doc without collUuid".into()))
            .and_then(CollectionUuid::from_extended_json)?;
        let mode = match doc.get("mode").and_then(Value::as_str) {
            Some("off") => SamplingMode::Off,
            _ => SamplingMode::Full,
        };
        let samples_per_second = doc.get("samplesPerSecond").and_then(Value::as_f64);
        Ok(Self {
            ns,
            coll_uuid,
            mode,
            samples_per_second,
        })
    }
}
