//! Connection abstraction for the DDL race harness.
//!
//! This module provides the boundary between the harness and the database
//! deployment it races against (a live cluster reached through `mongosh`, or
//! the in-memory simulation for hermetic tests).
//!
//! # Design
//!
//! The connection trait is async and host-scoped:
//! - `run_command()` issues one of the administrative commands under test
//! - the mutation methods rename, drop, create and empty collections
//! - `configure_fail_point()` / `wait_for_fail_point()` drive server fail points
//! - `collection_uuid()` / `find_query_analyzer_doc()` read persisted state
//!
//! A [`Deployment`] groups the connections of one topology and can open fresh
//! connections to any of its hosts.
//!
//! # Example
//!
//! ```ignore
//! let deployment = SimDeployment::sharded();
//! let router = deployment.router();
//! router.insert_documents(&ns, docs).await?;
//! let outcome = router.run_command(&CommandSpec::analyze_shard_key(ns, ShardKey::id())).await?;
//! ```

use async_trait::async_trait;
use ddl_race_types::{
    CollectionUuid, CommandFailure, CommandSpec, Namespace, Outcome, QueryAnalyzerDoc, Topology,
    TypesError,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Connection errors.
///
/// These are failures of the *connection*, not domain outcomes: an
/// administrative command that the server rejects is an [`Outcome::Failure`],
/// while a mutation the server rejects is [`ClientError::CommandFailed`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The host could not be reached, or went away mid-command.
    #[error("host {host} unreachable: {reason}")]
    Unreachable {
        /// Host address.
        host: String,
        /// What went wrong.
        reason: String,
    },

    /// The host is not part of the deployment.
    #[error("unknown host: {0}")]
    UnknownHost(String),

    /// A helper command (mutation, seeding, fail point) returned an error reply.
    #[error("{command} failed: {failure}")]
    CommandFailed {
        /// Command name.
        command: String,
        /// The server's error.
        failure: CommandFailure,
    },

    /// A reply could not be decoded.
    #[error("bad reply: {0}")]
    Reply(#[from] TypesError),

    /// Waiting on the server timed out.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Docker API error while reaching the live deployment.
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

impl ClientError {
    /// Wrap a failed helper command.
    pub fn command_failed(command: &str, failure: CommandFailure) -> Self {
        ClientError::CommandFailed {
            command: command.to_string(),
            failure,
        }
    }
}

/// Fail point activation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPointMode {
    /// Active until turned off.
    AlwaysOn,
    /// Inactive.
    Off,
}

impl FailPointMode {
    /// The mode string understood by `configureFailPoint`.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailPointMode::AlwaysOn => "alwaysOn",
            FailPointMode::Off => "off",
        }
    }
}

/// A connection to one host of a deployment.
#[async_trait]
pub trait Connection: Send + Sync {
    /// The host this connection talks to.
    fn host(&self) -> &str;

    /// Run one of the administrative commands under test.
    ///
    /// Error replies are returned as [`Outcome::Failure`]; only connection
    /// problems are `Err`.
    async fn run_command(&self, command: &CommandSpec) -> Result<Outcome, ClientError>;

    /// Insert documents, creating the collection if needed.
    ///
    /// Returns the number of documents inserted.
    async fn insert_documents(&self, ns: &Namespace, docs: Vec<Value>) -> Result<u64, ClientError>;

    /// Rename a collection within its database.
    async fn rename_collection(&self, from: &Namespace, to: &Namespace) -> Result<(), ClientError>;

    /// Drop a collection. Returns whether it existed; dropping a missing
    /// collection is not an error.
    async fn drop_collection(&self, ns: &Namespace) -> Result<bool, ClientError>;

    /// Create an empty collection.
    async fn create_collection(&self, ns: &Namespace) -> Result<(), ClientError>;

    /// Delete every document in a collection. Returns the number deleted.
    async fn delete_all(&self, ns: &Namespace) -> Result<u64, ClientError>;

    /// Current identity of a collection, or `None` if it does not exist.
    async fn collection_uuid(&self, ns: &Namespace) -> Result<Option<CollectionUuid>, ClientError>;

    /// Read the persisted sampling configuration for a namespace.
    async fn find_query_analyzer_doc(
        &self,
        ns: &Namespace,
    ) -> Result<Option<QueryAnalyzerDoc>, ClientError>;

    /// Set a fail point on this host.
    ///
    /// Returns how many times the fail point had been entered before the change.
    async fn configure_fail_point(&self, name: &str, mode: FailPointMode) -> Result<u64, ClientError>;

    /// Block until the fail point has been entered at least `times_entered` times.
    async fn wait_for_fail_point(
        &self,
        name: &str,
        times_entered: u64,
        timeout: Duration,
    ) -> Result<(), ClientError>;
}

/// One deployment topology and the hosts the harness needs.
#[async_trait]
pub trait Deployment: Send + Sync {
    /// Shape of this deployment.
    fn topology(&self) -> Topology;

    /// Connection commands and mutations are sent to (router or primary).
    fn router(&self) -> Arc<dyn Connection>;

    /// Connection to the host that executes the commands, where fail points
    /// must be armed (the shard primary, or the replica set primary).
    fn fail_point_host(&self) -> Arc<dyn Connection>;

    /// Open a fresh connection to a host of this deployment.
    async fn connect(&self, host: &str) -> Result<Arc<dyn Connection>, ClientError>;
}

/// Turn a helper command's outcome into its reply, or a [`ClientError`].
pub fn expect_ok(command: &str, outcome: Outcome) -> Result<Value, ClientError> {
    match outcome {
        Outcome::Success(reply) => Ok(reply),
        Outcome::Failure(failure) => Err(ClientError::command_failed(command, failure)),
    }
}
