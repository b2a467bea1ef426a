//! Reaper plugin: forgets percepts that are no longer observed.
//!
//! Removes every shapeless entity that has at least one measurement and whose
//! last measurement is older than `max_age` seconds (default `30.0`) relative
//! to the snapshot time. Entities without measurements, typically loaded
//! from a model, are never reaped.

use crate::error::{Result, SeerError};
use crate::plugin::{Plugin, PluginContext};
use crate::property::PropertyRegistry;
use crate::update_request::UpdateRequest;
use crate::world_model::WorldModel;

use super::float_parameter;

/// Default age in seconds after which an unobserved percept is removed.
pub const DEFAULT_MAX_AGE: f64 = 30.0;

/// Removes stale shapeless percepts.
#[derive(Debug, Clone)]
pub struct ReaperPlugin {
    max_age: f64,
}

impl ReaperPlugin {
    /// Creates the plugin with the default age.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
        }
    }

    /// Configured maximum age in seconds.
    #[must_use]
    pub fn max_age(&self) -> f64 {
        self.max_age
    }
}

impl Default for ReaperPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for ReaperPlugin {
    fn name(&self) -> &str {
        "reaper"
    }

    fn configure(&mut self, parameters: &toml::Table, _properties: &mut PropertyRegistry) -> Result<()> {
        if let Some(max_age) = float_parameter(parameters, "max_age") {
            let max_age = max_age.map_err(SeerError::Config)?;
            if max_age <= 0.0 {
                return Err(SeerError::Config(format!("max_age must be positive, got {max_age}")));
            }
            self.max_age = max_age;
        }
        Ok(())
    }

    fn process(&mut self, ctx: &PluginContext, world: &WorldModel, request: &mut UpdateRequest) {
        let mut reaped = 0usize;
        for entity in world.iter() {
            if entity.has_shape() || entity.measurement_count() == 0 {
                continue;
            }
            if ctx.time - entity.last_update_time() > self.max_age {
                request.remove_entity(entity.id().clone());
                reaped += 1;
            }
        }
        if reaped > 0 {
            tracing::debug!(reaped, max_age = self.max_age, "reaping stale percepts");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, EntityId, ImageMask, MaskArea, Measurement};
    use crate::worker::CancelToken;
    use footprint::{Mesh, Pose};
    use glam::DVec3;
    use std::sync::Arc;

    fn measured(id: &str, t: f64) -> Entity {
        let mut e = Entity::new(EntityId::from(id), "", 0.0);
        let m = Measurement::new(t, Pose::IDENTITY, ImageMask::new(1, 1), Vec::new());
        e.add_measurement(Arc::new(m), &MaskArea);
        e
    }

    fn run(plugin: &mut ReaperPlugin, now: f64, entities: Vec<Entity>) -> UpdateRequest {
        let map = entities
            .into_iter()
            .map(|e| (e.id().clone(), Arc::new(e)))
            .collect();
        let world = WorldModel::new(map, 1, now);
        let ctx = PluginContext {
            cycle: 1,
            time: now,
            cancel: CancelToken::new(),
        };
        let mut request = UpdateRequest::new();
        plugin.process(&ctx, &world, &mut request);
        request
    }

    #[test]
    fn removes_only_stale_percepts() {
        let mut plugin = ReaperPlugin::new();
        let mut shaped = measured("shaped", 0.0);
        shaped.set_shape(Some(Arc::new(Mesh::cuboid(DVec3::ZERO, DVec3::ONE))));
        let loaded = Entity::new(EntityId::from("loaded"), "table", 0.0);

        let request = run(&mut plugin, 100.0, vec![measured("old", 10.0), measured("fresh", 90.0), shaped, loaded]);
        let removed: Vec<&str> = request.removals().iter().map(EntityId::as_str).collect();
        assert_eq!(removed, vec!["old"]);
    }

    #[test]
    fn max_age_is_configurable() {
        let mut plugin = ReaperPlugin::new();
        let params: toml::Table = toml::from_str("max_age = 5").unwrap();
        plugin.configure(&params, &mut PropertyRegistry::new()).unwrap();
        assert_eq!(plugin.max_age(), 5.0);

        let request = run(&mut plugin, 100.0, vec![measured("recent", 90.0)]);
        assert_eq!(request.removals().len(), 1);
    }

    #[test]
    fn rejects_non_positive_age() {
        let mut plugin = ReaperPlugin::new();
        let params: toml::Table = toml::from_str("max_age = 0").unwrap();
        assert!(plugin.configure(&params, &mut PropertyRegistry::new()).is_err());
    }
}
