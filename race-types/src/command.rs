//! The administrative commands exercised by the harness.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

use crate::Namespace;

/// Which of the two administrative commands a scenario exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CommandKind {
    /// `analyzeShardKey`: key characteristics and read/write distribution.
    #[serde(rename = "analyzeShardKey")]
    AnalyzeShardKey,
    /// `configureQueryAnalyzer`: turn query sampling on or off.
    #[serde(rename = "configureQueryAnalyzer")]
    ConfigureQueryAnalyzer,
}

impl CommandKind {
    /// The command name as sent to the server.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::AnalyzeShardKey => "analyzeShardKey",
            CommandKind::ConfigureQueryAnalyzer => "configureQueryAnalyzer",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate shard key: an ordered list of ascending fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardKey {
    fields: Vec<String>,
}

impl ShardKey {
    /// A key over the given fields, in order.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// The `{_id: 1}` key used by the race matrix.
    pub fn id() -> Self {
        Self::new(["_id"])
    }

    /// Key fields, in order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Render as a key pattern document, e.g. `{"_id": 1}`.
    pub fn to_document(&self) -> Value {
        let mut pattern = Map::new();
        for field in &self.fields {
            pattern.insert(field.clone(), json!(1));
        }
        Value::Object(pattern)
    }

    /// Extract this key's value from a document (missing fields become null).
    pub fn extract(&self, doc: &Value) -> Value {
        let values: Vec<Value> = self
            .fields
            .iter()
            .map(|field| lookup_path(doc, field).cloned().unwrap_or(Value::Null))
            .collect();
        match values.len() {
            1 => values.into_iter().next().unwrap_or(Value::Null),
            _ => Value::Array(values),
        }
    }
}

fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, part| current.get(part))
}

/// Query sampling mode for `configureQueryAnalyzer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// Sample queries at the configured rate.
    Full,
    /// Stop sampling.
    Off,
}

impl SamplingMode {
    /// The mode string as sent to the server.
    pub fn as_str(&self) -> &'static str {
        match self {
            SamplingMode::Full => "full",
            SamplingMode::Off => "off",
        }
    }
}

/// One invocation of a command under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandSpec {
    /// Compute shard key metrics.
    AnalyzeShardKey {
        /// Target namespace.
        ns: Namespace,
        /// Candidate shard key.
        key: ShardKey,
    },
    /// Toggle query sampling.
    ConfigureQueryAnalyzer {
        /// Target namespace.
        ns: Namespace,
        /// Sampling mode.
        mode: SamplingMode,
        /// Sampling rate; must be absent when the mode is `off`.
        samples_per_second: Option<f64>,
    },
}

impl CommandSpec {
    /// `analyzeShardKey` with the given key.
    pub fn analyze_shard_key(ns: Namespace, key: ShardKey) -> Self {
        CommandSpec::AnalyzeShardKey { ns, key }
    }

    /// `configureQueryAnalyzer` with mode `full` at the given rate.
    pub fn sampling_on(ns: Namespace, samples_per_second: f64) -> Self {
        CommandSpec::ConfigureQueryAnalyzer {
            ns,
            mode: SamplingMode::Full,
            samples_per_second: Some(samples_per_second),
        }
    }

    /// `configureQueryAnalyzer` with mode `off`.
    pub fn sampling_off(ns: Namespace) -> Self {
        CommandSpec::ConfigureQueryAnalyzer {
            ns,
            mode: SamplingMode::Off,
            samples_per_second: None,
        }
    }

    /// Which command this is.
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandSpec::AnalyzeShardKey { .. } => CommandKind::AnalyzeShardKey,
            CommandSpec::ConfigureQueryAnalyzer { .. } => CommandKind::ConfigureQueryAnalyzer,
        }
    }

    /// The target namespace.
    pub fn namespace(&self) -> &Namespace {
        match self {
            CommandSpec::AnalyzeShardKey { ns, .. } => ns,
            CommandSpec::ConfigureQueryAnalyzer { ns, .. } => ns,
        }
    }

    /// Render the admin command document.
    pub fn to_document(&self) -> Value {
        match self {
            CommandSpec::AnalyzeShardKey { ns, key } => json!({
                "analyzeShardKey": ns.to_string(),
                "key": key.to_document(),
            }),
            CommandSpec::ConfigureQueryAnalyzer {
                ns,
                mode,
                samples_per_second,
            } => {
                let mut doc = json!({
                    "configureQueryAnalyzer": ns.to_string(),
                    "mode": mode.as_str(),
                });
                if let (Some(rate), Some(obj)) = (samples_per_second, doc.as_object_mut()) {
                    obj.insert("samplesPerSecond".into(), json!(rate));
                }
                doc
            }
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_document())
    }
}
