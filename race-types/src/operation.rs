//! Race axes: the namespace mutation and the deployment shape.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A namespace-mutating operation applied concurrently with a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutatingOperation {
    /// Rename the collection to a fresh name in the same database.
    Rename,
    /// Drop the collection.
    Drop,
    /// Drop the collection and create an empty one under the same name.
    Recreate,
    /// Delete every document, keeping the collection.
    MakeEmpty,
}

impl MutatingOperation {
    /// All operations, in matrix order.
    pub const ALL: [MutatingOperation; 4] = [
        MutatingOperation::Rename,
        MutatingOperation::Drop,
        MutatingOperation::Recreate,
        MutatingOperation::MakeEmpty,
    ];

    /// Short name used in scenario labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutatingOperation::Rename => "rename",
            MutatingOperation::Drop => "drop",
            MutatingOperation::Recreate => "recreate",
            MutatingOperation::MakeEmpty => "makeEmpty",
        }
    }

    /// Whether the collection identity changes.
    pub fn changes_identity(&self) -> bool {
        matches!(self, MutatingOperation::Drop | MutatingOperation::Recreate)
    }
}

impl fmt::Display for MutatingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment shape the matrix runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Topology {
    /// A single-shard cluster behind a router.
    Sharded,
    /// A standalone replica set.
    ReplicaSet,
}

impl Topology {
    /// Both topologies, in matrix order.
    pub const ALL: [Topology; 2] = [Topology::Sharded, Topology::ReplicaSet];

    /// Short name used in scenario labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topology::Sharded => "sharded",
            Topology::ReplicaSet => "replicaSet",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
