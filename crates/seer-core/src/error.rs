//! Error types for the world-model core.

use thiserror::Error;

use crate::entity::EntityId;

/// Top-level error type for world-model operations.
#[derive(Error, Debug)]
pub enum SeerError {
    /// Configuration is malformed or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// A `[[plugins]]` entry names a kind that is not registered.
    #[error("plugin '{name}': unknown kind '{kind}'")]
    UnknownPluginKind {
        /// Configured instance name.
        name: String,
        /// Requested plugin kind.
        kind: String,
    },

    /// A plugin rejected its parameters.
    #[error("plugin '{name}': {reason}")]
    PluginConfig {
        /// Configured instance name.
        name: String,
        /// Why configuration failed.
        reason: String,
    },

    /// One or more plugins could not be set up.
    #[error("{} plugin(s) failed to load: {}", .0.len(), join_errors(.0))]
    PluginSetup(Vec<SeerError>),

    /// A property name was registered twice with different value types.
    #[error("property '{name}' is registered as {registered}, requested as {requested}")]
    PropertyType {
        /// Property name.
        name: String,
        /// Type the property was first registered with.
        registered: &'static str,
        /// Type of the conflicting request.
        requested: &'static str,
    },

    /// A model description could not be turned into entities.
    #[error("model '{id}': {reason}")]
    Model {
        /// Id (or path) of the failing description.
        id: String,
        /// Diagnostic.
        reason: String,
    },

    /// An update request referenced entities that do not exist.
    #[error("update request rejected: unknown entities {missing:?}")]
    ApplyRejected {
        /// Ids that could not be resolved.
        missing: Vec<EntityId>,
    },

    /// Geometry could not be built or decoded.
    #[error("geometry error: {0}")]
    Geometry(#[from] footprint::GeometryError),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_errors(errors: &[SeerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, SeerError>;
