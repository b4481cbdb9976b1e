//! # ddl-race-tests
//!
//! Race harness for `analyzeShardKey` and `configureQueryAnalyzer`.
//!
//! Each scenario races one command against a namespace mutation (rename,
//! drop, drop+recreate, delete-all) and checks that the command only ever
//! fails in the ways its allow-list permits:
//! - [`sync_point`] - Park the command at a server fail point
//! - [`launcher`] - Start the command on its own task with jitter
//! - [`mutator`] - Apply the racing mutation
//! - [`validator`] - Allow-lists per (command, operation) pair
//! - [`consistency`] - Persisted sampling configuration after a recreate
//! - [`driver`] - The scenario matrix
//!
//! Scenarios run against the in-memory deployment by default and against a
//! live cluster with `cargo test -p ddl-race-tests live -- --ignored`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod consistency;
pub mod driver;

pub mod scenarios;

pub use config::{ConfigError, HarnessConfig};
pub use driver::{matrix, MatrixReport, RaceDriver, Scenario, ScenarioReport};
pub use error::HarnessError;
