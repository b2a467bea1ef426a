//! # Seer Core
//!
//! A live world model of physical entities, built from sensor measurements
//! and refined by independently scheduled processing plugins.
//!
//! ## Architecture
//!
//! - **Entities** ([`entity`]): one record of belief per tracked object,
//!   with a bounded measurement history, a 2-D footprint and an optional
//!   mesh.
//! - **Store** ([`store`]): the canonical id-to-entity map. Single writer,
//!   copy-on-write entities.
//! - **Snapshots** ([`world_model`]): immutable point-in-time views handed to
//!   plugins.
//! - **Update requests** ([`update_request`]): batches of proposed
//!   mutations, applied by the core loop field group by field group.
//! - **Plugins** ([`plugin`], [`plugin_container`]): background processing
//!   stages scheduled at a configured frequency.
//! - **Perception** ([`perception`]): per-entity classification chains.
//! - **Merging** ([`merge`]): collapses duplicate stale percepts whose
//!   footprints overlap.
//! - **Core loop** ([`server`]): sense, harvest, apply, dispatch, merge.
//!
//! ## Usage
//!
//! ```
//! use seer_core::config::ServerConfig;
//! use seer_core::plugin::PluginRegistry;
//! use seer_core::server::Server;
//!
//! let config = ServerConfig::from_toml(r#"
//!     [[plugins]]
//!     name = "percepts"
//!     kind = "footprint"
//! "#).unwrap();
//! let mut server = Server::from_config(config, &PluginRegistry::with_builtins()).unwrap();
//! server.step(0.0);
//! let report = server.shutdown();
//! assert!(report.is_clean());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

// Re-export the geometry substrate
pub use footprint;

pub mod config;
pub mod entity;
pub mod error;
pub mod merge;
pub mod model;
pub mod perception;
pub mod plugin;
pub mod plugin_container;
pub mod plugins;
pub mod property;
pub mod sensor;
pub mod serialization;
pub mod server;
pub mod store;
pub mod update_request;
pub mod worker;
pub mod world_model;

#[cfg(test)]
mod tests;

pub use config::ServerConfig;
pub use entity::{Entity, EntityId, Measurement};
pub use error::{Result, SeerError};
pub use plugin::{Plugin, PluginContext, PluginRegistry};
pub use server::Server;
pub use store::{ApplyMode, EntityStore};
pub use update_request::UpdateRequest;
pub use world_model::WorldModel;
