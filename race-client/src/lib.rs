//! # ddl-race-client
//!
//! Connections to the database deployment a DDL race runs against.
//!
//! ## Architecture
//!
//! ```text
//! race harness ──► Deployment ──► Connection (router)        ──► commands, mutations
//!                       │
//!                       └───────► Connection (shard primary) ──► fail points
//! ```
//!
//! Two deployments are provided:
//! - [`sim::SimDeployment`] - in-memory cluster that models collection
//!   identity, fail points and the two commands' phases (hermetic tests)
//! - [`shell::ShellDeployment`] - a live cluster reached through `mongosh`
//!   running in a Docker container

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod shell;
pub mod sim;

pub use connection::{expect_ok, ClientError, Connection, Deployment, FailPointMode};
pub use shell::{ShellConfig, ShellDeployment};
pub use sim::{SimDeployment, SimEvent, SimOptions};

/// Fail point that parks `analyzeShardKey` before key characteristics metrics.
pub const KEY_CHARACTERISTICS_FAIL_POINT: &str =
    "analyzeShardKeyPauseBeforeCalculatingKeyCharacteristicsMetrics";

/// Fail point that parks `analyzeShardKey` before read/write distribution metrics.
pub const READ_WRITE_DISTRIBUTION_FAIL_POINT: &str =
    "analyzeShardKeyPauseBeforeCalculatingReadWriteDistributionMetrics";
