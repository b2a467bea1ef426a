//! Footprint plugin.
//!
//! For every shapeless entity that received a measurement since the last
//! run, the plugin takes the newest measurement with segmented points and
//! proposes:
//!
//! - a convex hull: the 2-D hull of the points with their z range
//! - a pose: translation to the point centroid, identity rotation
//! - the `footprint_area` property (`f64`, square metres)
//!
//! Shaped entities are skipped, since their hull follows their mesh.
//!
//! # Parameters
//!
//! - `min_area` (default `0.0`): footprints smaller than this are ignored

use std::collections::BTreeMap;

use footprint::Pose;

use crate::entity::EntityId;
use crate::error::{Result, SeerError};
use crate::plugin::{Plugin, PluginContext};
use crate::property::{PropertyKey, PropertyRegistry};
use crate::update_request::UpdateRequest;
use crate::world_model::WorldModel;

use super::float_parameter;

/// Property name under which the footprint area is published.
pub const FOOTPRINT_AREA: &str = "footprint_area";

/// Derives hulls and positions of shapeless entities from their points.
///
/// # Example
///
/// ```
/// use seer_core::plugins::FootprintPlugin;
/// use seer_core::plugin::Plugin;
///
/// let plugin = FootprintPlugin::new();
/// assert_eq!(plugin.name(), "footprint");
/// ```
#[derive(Debug)]
pub struct FootprintPlugin {
    min_area: f64,
    area_key: PropertyKey<f64>,
    seen: BTreeMap<EntityId, u64>,
}

impl FootprintPlugin {
    /// Creates the plugin with default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            min_area: 0.0,
            area_key: PropertyKey::unregistered(FOOTPRINT_AREA),
            seen: BTreeMap::new(),
        }
    }
}

impl Default for FootprintPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for FootprintPlugin {
    fn name(&self) -> &str {
        "footprint"
    }

    fn configure(&mut self, parameters: &toml::Table, properties: &mut PropertyRegistry) -> Result<()> {
        if let Some(min_area) = float_parameter(parameters, "min_area") {
            self.min_area = min_area.map_err(SeerError::Config)?;
        }
        self.area_key = properties.register::<f64>(FOOTPRINT_AREA)?;
        Ok(())
    }

    fn process(&mut self, ctx: &PluginContext, world: &WorldModel, request: &mut UpdateRequest) {
        self.seen.retain(|id, _| world.contains(id));

        for entity in world.iter() {
            if ctx.is_cancelled() {
                return;
            }
            if entity.has_shape() {
                continue;
            }
            let seq = entity.measurement_seq();
            if self.seen.get(entity.id()).is_some_and(|&last| last >= seq) {
                continue;
            }
            self.seen.insert(entity.id().clone(), seq);

            let Some(measurement) = entity.latest_measurements(entity.measurement_count()).find(|m| !m.points().is_empty()) else {
                continue;
            };
            let hull = measurement.footprint();
            let area = hull.area();
            if !hull.is_proper() || area < self.min_area {
                continue;
            }
            let Some(centroid) = measurement.centroid() else {
                continue;
            };

            let id = entity.id().clone();
            request.set_convex_hull(id.clone(), hull);
            request.set_pose(id.clone(), Pose::from_translation(centroid));
            request.set_property(id, &self.area_key, area);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, ImageMask, MaskArea, Measurement};
    use crate::worker::CancelToken;
    use footprint::Mesh;
    use glam::DVec3;
    use std::sync::Arc;

    fn ctx() -> PluginContext {
        PluginContext {
            cycle: 1,
            time: 10.0,
            cancel: CancelToken::new(),
        }
    }

    fn square_points(x: f64, size: f64) -> Vec<DVec3> {
        vec![
            DVec3::new(x, 0.0, 0.0),
            DVec3::new(x + size, 0.0, 0.0),
            DVec3::new(x + size, size, 0.5),
            DVec3::new(x, size, 0.5),
        ]
    }

    fn world_with(entities: Vec<Entity>) -> WorldModel {
        let map = entities
            .into_iter()
            .map(|e| (e.id().clone(), Arc::new(e)))
            .collect();
        WorldModel::new(map, 1, 10.0)
    }

    fn measured(id: &str, points: Vec<DVec3>) -> Entity {
        let mut e = Entity::new(EntityId::from(id), "", 0.0);
        let m = Measurement::new(1.0, Pose::IDENTITY, ImageMask::new(4, 4), points);
        e.add_measurement(Arc::new(m), &MaskArea);
        e
    }

    fn configured() -> (FootprintPlugin, PropertyKey<f64>) {
        let mut registry = PropertyRegistry::new();
        let mut plugin = FootprintPlugin::new();
        plugin.configure(&toml::Table::new(), &mut registry).unwrap();
        let key = registry.register::<f64>(FOOTPRINT_AREA).unwrap();
        (plugin, key)
    }

    #[test]
    fn proposes_hull_pose_and_area() {
        let (mut plugin, key) = configured();
        let world = world_with(vec![measured("blob", square_points(1.0, 2.0))]);
        let mut request = UpdateRequest::new();
        plugin.process(&ctx(), &world, &mut request);

        let id = EntityId::from("blob");
        let hull = &request.convex_hulls()[&id];
        assert!((hull.area() - 4.0).abs() < 1e-9);
        assert_eq!(hull.z_max(), 0.5);
        assert_eq!(request.poses()[&id].translation, DVec3::new(2.0, 1.0, 0.25));
        assert!(request.properties()[&id].contains_key(&key.idx().unwrap()));
    }

    #[test]
    fn skips_unchanged_entities_on_next_run() {
        let (mut plugin, _) = configured();
        let world = world_with(vec![measured("blob", square_points(0.0, 1.0))]);

        let mut first = UpdateRequest::new();
        plugin.process(&ctx(), &world, &mut first);
        assert!(!first.is_empty());

        let mut second = UpdateRequest::new();
        plugin.process(&ctx(), &world, &mut second);
        assert!(second.is_empty());
    }

    #[test]
    fn skips_shaped_and_pointless_entities() {
        let (mut plugin, _) = configured();
        let mut shaped = measured("box", square_points(0.0, 1.0));
        shaped.set_shape(Some(Arc::new(Mesh::cuboid(DVec3::ZERO, DVec3::ONE))));
        let world = world_with(vec![shaped, measured("empty", Vec::new()), Entity::new(EntityId::from("never"), "", 0.0)]);

        let mut request = UpdateRequest::new();
        plugin.process(&ctx(), &world, &mut request);
        assert!(request.is_empty());
    }

    #[test]
    fn min_area_filters_small_footprints() {
        let mut plugin = FootprintPlugin::new();
        let params: toml::Table = toml::from_str("min_area = 2").unwrap();
        plugin.configure(&params, &mut PropertyRegistry::new()).unwrap();

        let world = world_with(vec![measured("small", square_points(0.0, 1.0)), measured("big", square_points(5.0, 2.0))]);
        let mut request = UpdateRequest::new();
        plugin.process(&ctx(), &world, &mut request);
        assert_eq!(request.convex_hulls().len(), 1);
        assert!(request.convex_hulls().contains_key(&EntityId::from("big")));
    }

    #[test]
    fn rejects_non_numeric_parameters() {
        let mut plugin = FootprintPlugin::new();
        let params: toml::Table = toml::from_str("min_area = \"large\"").unwrap();
        let err = plugin.configure(&params, &mut PropertyRegistry::new()).unwrap_err();
        assert!(err.to_string().contains("min_area"));
    }
}
