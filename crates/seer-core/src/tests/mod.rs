//! Cross-module tests for the world model.
//!
//! - `helpers.rs`: measurement, hull and server factories
//! - `isolation.rs`: snapshot isolation and empty-value semantics
//! - `integration.rs`: the core loop end to end

mod helpers;
mod isolation;
