//! Interchange formats for entity state.
//!
//! Geometry types serialize through their own `serde` impls in the
//! `footprint` crate. This module adds the split [`Timestamp`], the JSON
//! export of entities and snapshots, and the deep merge used for data
//! documents.

use std::collections::BTreeMap;

use footprint::{ConvexHull2D, Mesh, Pose};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{Entity, EntityId, Relation};
use crate::error::Result;
use crate::world_model::WorldModel;

// =============================================================================
// Timestamp
// =============================================================================

/// Time split into whole seconds and nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Whole seconds.
    pub sec: i64,
    /// Nanoseconds within the second.
    pub nsec: i32,
}

impl Timestamp {
    /// Splits a time in seconds. Both parts truncate toward zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_secs(t: f64) -> Self {
        let sec = t.trunc();
        Self {
            sec: sec as i64,
            nsec: ((t - sec) * 1e9) as i32,
        }
    }

    /// Recombines the parts into seconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_secs(self) -> f64 {
        self.sec as f64 + f64::from(self.nsec) * 1e-9
    }
}

// =============================================================================
// Entity export
// =============================================================================

#[derive(Serialize)]
struct EntityRecord<'a> {
    id: &'a EntityId,
    #[serde(rename = "type")]
    entity_type: &'a str,
    pose: &'a Pose,
    convex_hull: &'a ConvexHull2D,
    #[serde(skip_serializing_if = "Option::is_none")]
    shape: Option<&'a Mesh>,
    creation_time: Timestamp,
    last_update: Timestamp,
    measurement_seq: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    relations: &'a BTreeMap<EntityId, Relation>,
    data: &'a Value,
}

impl<'a> From<&'a Entity> for EntityRecord<'a> {
    fn from(e: &'a Entity) -> Self {
        Self {
            id: e.id(),
            entity_type: e.entity_type(),
            pose: e.pose(),
            convex_hull: e.convex_hull(),
            shape: e.shape().map(|m| &**m),
            creation_time: Timestamp::from_secs(e.creation_time()),
            last_update: Timestamp::from_secs(e.last_update_time()),
            measurement_seq: e.measurement_seq(),
            relations: e.relations(),
            data: e.data(),
        }
    }
}

/// Exports one entity as a JSON document.
///
/// # Errors
///
/// Fails only if a geometry value cannot be represented in JSON (NaN).
pub fn entity_to_json(entity: &Entity) -> Result<Value> {
    Ok(serde_json::to_value(EntityRecord::from(entity))?)
}

#[derive(Serialize)]
struct WorldRecord<'a> {
    cycle: u64,
    time: Timestamp,
    entities: Vec<EntityRecord<'a>>,
}

/// Exports a snapshot as `{cycle, time, entities: [...]}` in id order.
///
/// # Errors
///
/// Fails only if a geometry value cannot be represented in JSON (NaN).
pub fn world_to_json(world: &WorldModel) -> Result<Value> {
    let record = WorldRecord {
        cycle: world.cycle(),
        time: Timestamp::from_secs(world.time()),
        entities: world.iter().map(|e| EntityRecord::from(e.as_ref())).collect(),
    };
    Ok(serde_json::to_value(record)?)
}

// =============================================================================
// Data documents
// =============================================================================

/// Deep-merges `patch` into `target`.
///
/// Objects merge key by key; any other value in `patch` replaces the value
/// in `target`.
pub fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{DVec2, DVec3};
    use serde_json::json;

    mod timestamp_tests {
        use super::*;

        #[test]
        fn splits_seconds_and_nanoseconds() {
            let ts = Timestamp::from_secs(12.25);
            assert_eq!(ts, Timestamp { sec: 12, nsec: 250_000_000 });
            assert_eq!(serde_json::to_value(ts).unwrap(), json!({"sec": 12, "nsec": 250_000_000}));
        }

        #[test]
        fn recombines_within_a_nanosecond() {
            let t = 1_700_000_000.123_456;
            let back = Timestamp::from_secs(t).as_secs();
            assert!((back - t).abs() < 1e-6);
        }
    }

    mod merge_tests {
        use super::*;

        #[test]
        fn nested_objects_merge() {
            let mut doc = json!({"a": {"x": 1}, "b": [1, 2]});
            merge_json(&mut doc, &json!({"a": {"y": 2}, "b": [3]}));
            assert_eq!(doc, json!({"a": {"x": 1, "y": 2}, "b": [3]}));
        }

        #[test]
        fn scalar_replaces_object() {
            let mut doc = json!({"a": {"x": 1}});
            merge_json(&mut doc, &json!({"a": 5}));
            assert_eq!(doc, json!({"a": 5}));
        }

        #[test]
        fn null_target_takes_patch() {
            let mut doc = Value::Null;
            merge_json(&mut doc, &json!({"k": "v"}));
            assert_eq!(doc, json!({"k": "v"}));
        }
    }

    mod export_tests {
        use super::*;
        use std::sync::Arc;

        #[test]
        fn entity_export_fields() {
            let mut e = Entity::new(EntityId::from("table"), "furniture", 3.5);
            e.set_pose(Pose::from_translation(DVec3::new(1.0, 2.0, 0.0)));
            e.set_convex_hull(ConvexHull2D::from_points(
                [DVec2::new(0.0, 0.0), DVec2::new(1.0, 0.0), DVec2::new(0.0, 1.0)],
                0.0,
                0.7,
            ));
            e.set_data(json!({"color": "brown"}));

            let doc = entity_to_json(&e).unwrap();
            assert_eq!(doc["id"], "table");
            assert_eq!(doc["type"], "furniture");
            assert_eq!(doc["pose"]["x"], 1.0);
            assert_eq!(doc["pose"]["qw"], 1.0);
            assert_eq!(doc["convex_hull"]["z_max"], 0.7);
            assert_eq!(doc["convex_hull"]["points"][1]["x"], 1.0);
            assert_eq!(doc["creation_time"]["sec"], 3);
            assert_eq!(doc["creation_time"]["nsec"], 500_000_000);
            assert_eq!(doc["last_update"]["sec"], 3);
            assert_eq!(doc["measurement_seq"], 0);
            assert_eq!(doc["data"]["color"], "brown");
            assert!(doc.get("shape").is_none());
            assert!(doc.get("relations").is_none());
        }

        #[test]
        fn shaped_entity_exports_mesh() {
            let mut e = Entity::new(EntityId::from("box"), "", 0.0);
            e.set_shape(Some(Arc::new(Mesh::cuboid(DVec3::ZERO, DVec3::ONE))));
            let doc = entity_to_json(&e).unwrap();
            assert_eq!(doc["shape"]["vertices"].as_array().unwrap().len(), 8);
            assert_eq!(doc["shape"]["triangles"].as_array().unwrap().len(), 12);
        }
    }
}
