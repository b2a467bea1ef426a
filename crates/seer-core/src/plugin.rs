//! Plugin contract and the plugin registry.
//!
//! A plugin inspects an immutable [`WorldModel`] snapshot and records the
//! changes it proposes in an [`UpdateRequest`]. It never touches the store:
//! the core loop applies the request once the plugin has finished.
//!
//! Each plugin instance is owned by a
//! [`PluginContainer`](crate::plugin_container::PluginContainer), which runs
//! [`Plugin::process`] on a background thread. Because only one invocation
//! of a given instance runs at a time, `process` takes `&mut self` and a
//! plugin may keep state between cycles.
//!
//! # Plugin Registry
//!
//! Plugin kinds are enumerated explicitly in a [`PluginRegistry`], which maps
//! a kind name (as written in the `[[plugins]]` configuration) to a factory.
//!
//! # Example
//!
//! ```
//! use seer_core::plugin::{Plugin, PluginContext, PluginRegistry};
//! use seer_core::update_request::UpdateRequest;
//! use seer_core::world_model::WorldModel;
//!
//! struct Labeler;
//!
//! impl Plugin for Labeler {
//!     fn name(&self) -> &str {
//!         "labeler"
//!     }
//!
//!     fn process(&mut self, _ctx: &PluginContext, world: &WorldModel, request: &mut UpdateRequest) {
//!         for entity in world.iter().filter(|e| e.entity_type().is_empty()) {
//!             request.set_type(entity.id().clone(), "unknown");
//!         }
//!     }
//! }
//!
//! let mut registry = PluginRegistry::new();
//! registry.register("labeler", || Box::new(Labeler));
//! assert!(registry.create("labeler").is_some());
//! assert!(registry.create("missing").is_none());
//! ```

use std::collections::BTreeMap;

use crate::error::Result;
use crate::plugins::{FootprintPlugin, ReaperPlugin};
use crate::property::PropertyRegistry;
use crate::update_request::UpdateRequest;
use crate::world_model::WorldModel;
use crate::worker::CancelToken;

// =============================================================================
// Plugin Context
// =============================================================================

/// Per-dispatch information handed to [`Plugin::process`].
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// Core-loop cycle that built the snapshot.
    pub cycle: u64,
    /// Snapshot time in seconds.
    pub time: f64,
    /// Set when the core loop is shutting down.
    pub cancel: CancelToken,
}

impl PluginContext {
    /// Returns true if the plugin should stop early.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// =============================================================================
// Plugin Trait
// =============================================================================

/// A processing stage proposing changes to the world model.
///
/// # Implementation Guidelines
///
/// 1. **Read only the snapshot**: everything the plugin learns about the
///    world comes from the `WorldModel` it is given.
/// 2. **Write only the request**: mutations are proposals, applied later
///    and possibly merged with other plugins' requests.
/// 3. **Check for cancellation** in long loops via [`PluginContext::is_cancelled`].
pub trait Plugin: Send {
    /// Kind name of the plugin.
    fn name(&self) -> &str;

    /// Applies configuration parameters and registers typed properties.
    ///
    /// Called once at startup, before the first dispatch.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters are invalid.
    fn configure(&mut self, parameters: &toml::Table, properties: &mut PropertyRegistry) -> Result<()> {
        let _ = (parameters, properties);
        Ok(())
    }

    /// Inspects the snapshot and records proposed changes.
    fn process(&mut self, ctx: &PluginContext, world: &WorldModel, request: &mut UpdateRequest);
}

// =============================================================================
// Plugin Registry
// =============================================================================

/// Constructor for a plugin kind.
pub type PluginFactory = Box<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Name-to-factory table of plugin kinds.
#[derive(Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in plugin kinds.
    ///
    /// - `footprint`: [`FootprintPlugin`]
    /// - `reaper`: [`ReaperPlugin`]
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("footprint", || Box::new(FootprintPlugin::new()));
        registry.register("reaper", || Box::new(ReaperPlugin::new()));
        registry
    }

    /// Registers (or replaces) a plugin kind.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    /// Instantiates a plugin of the given kind.
    #[must_use]
    pub fn create(&self, kind: &str) -> Option<Box<dyn Plugin>> {
        self.factories.get(kind).map(|factory| factory())
    }

    /// Returns true if the kind is registered.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds in name order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> + '_ {
        self.factories.keys().map(String::as_str)
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns true if no kinds are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Plugin for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn process(&mut self, _ctx: &PluginContext, _world: &WorldModel, _request: &mut UpdateRequest) {}
    }

    #[test]
    fn builtins_are_registered() {
        let registry = PluginRegistry::with_builtins();
        let kinds: Vec<&str> = registry.kinds().collect();
        assert_eq!(kinds, vec!["footprint", "reaper"]);
        assert_eq!(registry.create("reaper").unwrap().name(), "reaper");
    }

    #[test]
    fn register_replaces_kind() {
        let mut registry = PluginRegistry::with_builtins();
        registry.register("footprint", || Box::new(Noop));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.create("footprint").unwrap().name(), "noop");
    }

    #[test]
    fn default_configure_accepts_anything() {
        let mut plugin = Noop;
        let mut properties = PropertyRegistry::new();
        let params: toml::Table = toml::from_str("anything = 1").unwrap();
        assert!(plugin.configure(&params, &mut properties).is_ok());
    }

    #[test]
    fn context_reports_cancellation() {
        let ctx = PluginContext {
            cycle: 1,
            time: 0.0,
            cancel: CancelToken::new(),
        };
        assert!(!ctx.is_cancelled());
        ctx.cancel.cancel();
        assert!(ctx.is_cancelled());
    }
}
