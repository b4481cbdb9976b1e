//! # ddl-race-types
//!
//! Foundational types for the DDL race harness.
//!
//! This crate provides the types shared by the client and harness crates:
//! - [`Namespace`], [`CollectionUuid`] - Addressing and identity of collections
//! - [`CommandSpec`], [`ShardKey`], [`SamplingMode`] - The administrative commands under test
//! - [`Outcome`], [`CommandFailure`], [`ErrorCode`] - What a command invocation returned
//! - [`MutatingOperation`], [`Topology`] - The race axes
//! - [`QueryAnalyzerDoc`] - The persisted sampling configuration
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod command;
mod error;
mod error_code;
mod namespace;
mod operation;
mod outcome;
mod query_analyzer;

pub use command::{CommandKind, CommandSpec, SamplingMode, ShardKey};
pub use error::TypesError;
pub use error_code::ErrorCode;
pub use namespace::{CollectionUuid, Namespace};
pub use operation::{MutatingOperation, Topology};
pub use outcome::{CommandFailure, Outcome};
pub use query_analyzer::QueryAnalyzerDoc;
