//! Race scenarios.
//!
//! - `sim` - Full matrix and fail point ordering against the in-memory deployment
//! - [`doubles`] - Deployments that hang, panic, lose their host or reject mutations
//! - `live` - Full matrix against a real cluster (`#[ignore = "requires live deployment"]`)
//!
//! Run the live scenarios with a `race.toml` carrying a `[live]` section:
//!
//! ```text
//! DDL_RACE_CONFIG=race.toml cargo test -p ddl-race-tests live -- --ignored
//! ```
