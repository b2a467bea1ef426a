//! Declarative world descriptions.
//!
//! A model description is a JSON object describing one entity and,
//! recursively, the entities it is composed of:
//!
//! ```json
//! {
//!   "id": "kitchen",
//!   "composition": [
//!     {"id": "table", "type": "table", "pose": {"x": 3.0, "y": 5.0, "Z": 1.57}},
//!     {"id": "lamp", "shape": {"box": {"size": {"x": 0.2, "y": 0.2, "z": 0.5}}}, "color": "red"}
//!   ]
//! }
//! ```
//!
//! Recognised fields:
//!
//! | field         | meaning                                                              |
//! |---------------|----------------------------------------------------------------------|
//! | `id`          | entity id; children are named `parent/child` unless the parent id is empty or starts with `_` |
//! | `type`        | entity type; if it names a library model, that model is merged underneath |
//! | `pose`        | `x`, `y`, `z` translation and optional `X`, `Y`, `Z` roll/pitch/yaw, relative to the parent |
//! | `shape`       | `{"box": {"min": .., "max": ..}}`, `{"box": {"size": ..}}` or `{"mesh": {"vertices": .., "triangles": ..}}` |
//! | `composition` | array of child descriptions                                          |
//!
//! Every other field becomes the entity's data document. Ids missing from a
//! description are generated.

use std::collections::BTreeMap;

use footprint::{Mesh, Pose};
use glam::DVec3;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::entity::EntityId;
use crate::error::{Result, SeerError};
use crate::serialization::merge_json;
use crate::update_request::UpdateRequest;

const STRUCTURAL_KEYS: [&str; 5] = ["id", "type", "pose", "shape", "composition"];

// =============================================================================
// Model Library
// =============================================================================

/// Named model descriptions that entity types can inherit from.
#[derive(Debug, Clone, Default)]
pub struct ModelLibrary {
    models: BTreeMap<String, Value>,
}

impl ModelLibrary {
    /// Creates an empty library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a library from an object mapping model names to descriptions.
    ///
    /// # Errors
    ///
    /// Returns [`SeerError::Config`] if `doc` is not an object of objects.
    pub fn from_json(doc: &Value) -> Result<Self> {
        let Some(entries) = doc.as_object() else {
            return Err(SeerError::Config("model library must be a JSON object".to_string()));
        };
        let mut library = Self::new();
        for (name, description) in entries {
            if !description.is_object() {
                return Err(SeerError::Config(format!("model '{name}' must be a JSON object")));
            }
            library.insert(name.clone(), description.clone());
        }
        Ok(library)
    }

    /// Adds (or replaces) a model.
    pub fn insert(&mut self, name: impl Into<String>, description: Value) {
        self.models.insert(name.into(), description);
    }

    /// Raw description of a model, without inheritance applied.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.models.get(name)
    }

    /// Returns true if the model exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Number of models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Returns true if the library is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Description of a model with its whole super-type chain merged in,
    /// most derived fields winning.
    ///
    /// # Errors
    ///
    /// Fails if the model, or one of its super types, is unknown, or if the
    /// chain is cyclic.
    pub fn resolve(&self, name: &str) -> Result<Value> {
        let mut chain: Vec<&str> = Vec::new();
        let mut current = name;
        loop {
            if chain.contains(&current) {
                return Err(SeerError::Model {
                    id: name.to_string(),
                    reason: format!("inheritance cycle through '{current}'"),
                });
            }
            let Some(description) = self.models.get(current) else {
                return Err(SeerError::Model {
                    id: name.to_string(),
                    reason: format!("unknown model '{current}'"),
                });
            };
            chain.push(current);
            // A type that names no model is a plain label and ends the chain.
            match description.get("type").and_then(Value::as_str) {
                Some(super_type) if self.models.contains_key(super_type) => current = super_type,
                _ => break,
            }
        }

        let mut resolved = Value::Object(Map::new());
        for model in chain.iter().rev() {
            if let Some(description) = self.models.get(*model) {
                merge_json(&mut resolved, description);
            }
        }
        Ok(resolved)
    }
}

// =============================================================================
// Model Builder
// =============================================================================

/// Output of [`ModelBuilder::build`].
#[derive(Debug, Default)]
pub struct ModelBuild {
    /// Request creating and describing the entities.
    pub request: UpdateRequest,
    /// Ids of the entities described, parents before children.
    pub created: Vec<EntityId>,
    /// Descriptions that were skipped, with the reason.
    pub diagnostics: Vec<SeerError>,
}

/// Turns model descriptions into update requests.
#[derive(Debug, Clone, Copy)]
pub struct ModelBuilder<'a> {
    library: &'a ModelLibrary,
}

impl<'a> ModelBuilder<'a> {
    /// Creates a builder resolving types against `library`.
    #[must_use]
    pub fn new(library: &'a ModelLibrary) -> Self {
        Self { library }
    }

    /// Builds a description and its composition.
    ///
    /// A description that cannot be built is skipped together with its own
    /// children and reported in [`ModelBuild::diagnostics`]; its siblings
    /// are still built.
    pub fn build(&self, description: &Value, next_id: &mut dyn FnMut() -> EntityId) -> ModelBuild {
        let mut out = ModelBuild::default();
        let mut lineage = Vec::new();
        self.build_entity(description, None, Pose::IDENTITY, &mut lineage, next_id, &mut out);
        if !out.diagnostics.is_empty() {
            tracing::warn!(
                skipped = out.diagnostics.len(),
                built = out.created.len(),
                "model descriptions skipped"
            );
        }
        out
    }

    fn build_entity(
        &self,
        description: &Value,
        parent: Option<&EntityId>,
        parent_pose: Pose,
        lineage: &mut Vec<String>,
        next_id: &mut dyn FnMut() -> EntityId,
        out: &mut ModelBuild,
    ) {
        let id = match description.get("id").and_then(Value::as_str) {
            Some(local) => match parent {
                Some(parent) if !parent.as_str().is_empty() && !parent.as_str().starts_with('_') => {
                    EntityId::from(format!("{parent}/{local}"))
                }
                _ => EntityId::from(local),
            },
            None => next_id(),
        };

        // Library types currently being expanded above this entity.
        let library_type = description
            .get("type")
            .and_then(Value::as_str)
            .filter(|t| self.library.contains(t));
        if let Some(entity_type) = library_type {
            if lineage.iter().any(|t| t == entity_type) {
                let err = SeerError::Model {
                    id: id.to_string(),
                    reason: format!("composition cycle through '{entity_type}'"),
                };
                tracing::debug!(id = %id, error = %err, "skipping model description");
                out.diagnostics.push(err);
                return;
            }
        }

        let entity = match self.describe(&id, description, parent_pose) {
            Ok(entity) => entity,
            Err(err) => {
                tracing::debug!(id = %id, error = %err, "skipping model description");
                out.diagnostics.push(err);
                return;
            }
        };

        let request = &mut out.request;
        request.create_entity(id.clone());
        request.set_type(id.clone(), entity.entity_type);
        request.set_pose(id.clone(), entity.pose);
        if let Some(shape) = entity.shape {
            request.set_shape(id.clone(), Arc::new(shape));
        }
        if let Some(data) = entity.data {
            request.add_data(id.clone(), data);
        }
        out.created.push(id.clone());

        if let Some(entity_type) = library_type {
            lineage.push(entity_type.to_string());
        }
        for child in &entity.composition {
            self.build_entity(child, Some(&id), entity.pose, lineage, next_id, out);
        }
        if library_type.is_some() {
            lineage.pop();
        }
    }

    fn describe(&self, id: &EntityId, description: &Value, parent_pose: Pose) -> Result<Described> {
        let fail = |reason: String| SeerError::Model {
            id: id.to_string(),
            reason,
        };

        if !description.is_object() {
            return Err(fail("description must be a JSON object".to_string()));
        }

        let entity_type = description.get("type").and_then(Value::as_str).unwrap_or_default().to_string();
        let combined = if self.library.contains(&entity_type) {
            let mut combined = self.library.resolve(&entity_type).map_err(|e| fail(e.to_string()))?;
            merge_json(&mut combined, description);
            combined
        } else {
            description.clone()
        };

        let pose = match combined.get("pose") {
            Some(pose) => parent_pose * parse_pose(pose).map_err(fail)?,
            None => parent_pose,
        };

        let shape = match combined.get("shape") {
            Some(shape) => Some(parse_shape(shape).map_err(fail)?),
            None => None,
        };

        let composition = match combined.get("composition") {
            None => Vec::new(),
            Some(Value::Array(children)) => children.clone(),
            Some(_) => return Err(fail("'composition' must be an array".to_string())),
        };

        let data = combined.as_object().and_then(|fields| {
            let rest: Map<String, Value> = fields
                .iter()
                .filter(|(key, _)| !STRUCTURAL_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            (!rest.is_empty()).then_some(Value::Object(rest))
        });

        Ok(Described {
            entity_type,
            pose,
            shape,
            composition,
            data,
        })
    }
}

struct Described {
    entity_type: String,
    pose: Pose,
    shape: Option<Mesh>,
    composition: Vec<Value>,
    data: Option<Value>,
}

fn number(group: &Value, key: &str) -> std::result::Result<f64, String> {
    match group.get(key) {
        None => Ok(0.0),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| format!("'{key}' must be a number")),
    }
}

fn vector(group: &Value) -> std::result::Result<DVec3, String> {
    Ok(DVec3::new(number(group, "x")?, number(group, "y")?, number(group, "z")?))
}

fn parse_pose(pose: &Value) -> std::result::Result<Pose, String> {
    if !pose.is_object() {
        return Err("'pose' must be an object".to_string());
    }
    Ok(Pose::from_xyz_rpy(
        number(pose, "x")?,
        number(pose, "y")?,
        number(pose, "z")?,
        number(pose, "X")?,
        number(pose, "Y")?,
        number(pose, "Z")?,
    ))
}

fn parse_shape(shape: &Value) -> std::result::Result<Mesh, String> {
    if let Some(shape_box) = shape.get("box") {
        let (min, max) = match (shape_box.get("min"), shape_box.get("max"), shape_box.get("size")) {
            (Some(min), Some(max), _) => (vector(min)?, vector(max)?),
            (_, _, Some(size)) => {
                let half = vector(size)? / 2.0;
                (-half, half)
            }
            _ => return Err("box needs 'min' and 'max', or 'size'".to_string()),
        };
        if min.cmpgt(max).any() {
            return Err(format!("box min {min} exceeds max {max}"));
        }
        return Ok(Mesh::cuboid(min, max));
    }
    if let Some(mesh) = shape.get("mesh") {
        return serde_json::from_value(mesh.clone()).map_err(|e| format!("invalid mesh: {e}"));
    }
    Err("unsupported shape; expected 'box' or 'mesh'".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::IdGenerator;
    use serde_json::json;

    fn build(library: &ModelLibrary, description: &Value) -> ModelBuild {
        let mut ids = IdGenerator::seeded(11);
        ModelBuilder::new(library).build(description, &mut || ids.next_id())
    }

    fn library() -> ModelLibrary {
        ModelLibrary::from_json(&json!({
            "furniture": {"color": "brown", "material": "wood"},
            "table": {
                "type": "furniture",
                "shape": {"box": {"min": {"x": -0.5, "y": -1.0, "z": 0.0}, "max": {"x": 0.5, "y": 1.0, "z": 0.8}}},
                "color": "white"
            }
        }))
        .unwrap()
    }

    mod library_tests {
        use super::*;

        #[test]
        fn resolve_merges_super_types() {
            let table = library().resolve("table").unwrap();
            assert_eq!(table["color"], "white");
            assert_eq!(table["material"], "wood");
            assert!(table.get("shape").is_some());
        }

        #[test]
        fn resolve_detects_cycles() {
            let mut library = ModelLibrary::new();
            library.insert("a", json!({"type": "b"}));
            library.insert("b", json!({"type": "a"}));
            let err = library.resolve("a").unwrap_err();
            assert!(err.to_string().contains("cycle"));
        }

        #[test]
        fn self_composing_model_is_skipped() {
            let library = ModelLibrary::from_json(&json!({
                "shelf": {"composition": [{"id": "board", "type": "shelf"}, {"id": "bracket"}]}
            }))
            .unwrap();
            let out = build(&library, &json!({"id": "s", "type": "shelf"}));

            assert_eq!(out.diagnostics.len(), 1);
            assert!(matches!(
                &out.diagnostics[0],
                SeerError::Model { id, reason } if id == "s/board" && reason.contains("composition cycle through 'shelf'")
            ));
            let ids: Vec<&str> = out.created.iter().map(EntityId::as_str).collect();
            assert_eq!(ids, vec!["s", "s/bracket"]);
        }

        #[test]
        fn mutually_composing_models_are_skipped() {
            let library = ModelLibrary::from_json(&json!({
                "a": {"composition": [{"id": "b", "type": "b"}]},
                "b": {"composition": [{"id": "a", "type": "a"}]}
            }))
            .unwrap();
            let out = build(&library, &json!({"id": "root", "type": "a"}));
            assert_eq!(out.diagnostics.len(), 1);
            let ids: Vec<&str> = out.created.iter().map(EntityId::as_str).collect();
            assert_eq!(ids, vec!["root", "root/b"]);
        }

        #[test]
        fn repeated_sibling_types_are_not_cycles() {
            let out = build(
                &library(),
                &json!({"id": "room", "composition": [{"id": "t1", "type": "table"}, {"id": "t2", "type": "table"}]}),
            );
            assert!(out.diagnostics.is_empty());
            assert_eq!(out.created.len(), 3);
        }

        #[test]
        fn unknown_model_is_an_error() {
            assert!(library().resolve("spaceship").is_err());
            assert!(ModelLibrary::from_json(&json!([1, 2])).is_err());
        }
    }

    mod builder_tests {
        use super::*;

        #[test]
        fn builds_composition_with_prefixed_ids() {
            let world = json!({
                "id": "kitchen",
                "composition": [
                    {"id": "table", "type": "table", "pose": {"x": 3.0, "y": 5.0}},
                    {"id": "lamp", "pose": {"z": 1.0}, "shape": {"box": {"size": {"x": 0.2, "y": 0.2, "z": 0.5}}}}
                ]
            });
            let out = build(&library(), &world);
            assert!(out.diagnostics.is_empty());

            let ids: Vec<&str> = out.created.iter().map(EntityId::as_str).collect();
            assert_eq!(ids, vec!["kitchen", "kitchen/table", "kitchen/lamp"]);

            let request = &out.request;
            let table = EntityId::from("kitchen/table");
            assert_eq!(request.types()[&table], "table");
            assert_eq!(request.poses()[&table].translation, DVec3::new(3.0, 5.0, 0.0));
            assert_eq!(request.shapes()[&table].vertices().len(), 8);
            assert_eq!(request.data()[&table], json!({"color": "white", "material": "wood"}));
            assert!(request.creations().contains(&EntityId::from("kitchen/lamp")));
        }

        #[test]
        fn underscore_parent_ids_are_not_prefixed() {
            let out = build(&library(), &json!({"id": "_root", "composition": [{"id": "floor"}]}));
            assert!(out.request.creations().contains(&EntityId::from("floor")));
        }

        #[test]
        fn missing_ids_are_generated() {
            let out = build(&library(), &json!({"composition": [{}, {"id": "named"}]}));
            assert_eq!(out.created.len(), 3);
            assert_eq!(out.created[0].as_str().len(), 32);
            // Generated parent ids are prefixed like any other.
            assert_eq!(out.created[2].as_str(), format!("{}/named", out.created[0]));
        }

        #[test]
        fn child_pose_is_relative_to_parent() {
            let world = json!({
                "id": "room",
                "pose": {"x": 1.0, "Z": std::f64::consts::FRAC_PI_2},
                "composition": [{"id": "chair", "pose": {"x": 2.0}}]
            });
            let out = build(&library(), &world);
            let chair = out.request.poses()[&EntityId::from("room/chair")];
            let expected = Pose::from_xyz_rpy(1.0, 2.0, 0.0, 0.0, 0.0, std::f64::consts::FRAC_PI_2);
            assert!(chair.abs_diff_eq(&expected, 1e-9));
        }

        #[test]
        fn failing_entity_is_skipped_alone() {
            let world = json!({
                "id": "room",
                "composition": [
                    {"id": "bad", "shape": {"cylinder": {}}, "composition": [{"id": "inner"}]},
                    {"id": "good"}
                ]
            });
            let out = build(&library(), &world);
            assert_eq!(out.diagnostics.len(), 1);
            assert!(matches!(&out.diagnostics[0], SeerError::Model { id, .. } if id == "room/bad"));

            let ids: Vec<&str> = out.created.iter().map(EntityId::as_str).collect();
            assert_eq!(ids, vec!["room", "room/good"]);
        }

        #[test]
        fn inline_mesh_shape() {
            let world = json!({
                "id": "wedge",
                "shape": {"mesh": {
                    "vertices": [{"x": 0, "y": 0, "z": 0}, {"x": 1, "y": 0, "z": 0}, {"x": 0, "y": 1, "z": 1}],
                    "triangles": [{"i1": 0, "i2": 1, "i3": 2}]
                }}
            });
            let out = build(&library(), &world);
            assert_eq!(out.request.shapes()[&EntityId::from("wedge")].triangles().len(), 1);

            let broken = json!({"id": "x", "shape": {"mesh": {"vertices": [], "triangles": [{"i1": 0, "i2": 1, "i3": 2}]}}});
            assert_eq!(build(&library(), &broken).diagnostics.len(), 1);
        }

        #[test]
        fn inverted_box_is_rejected() {
            let world = json!({"id": "x", "shape": {"box": {"min": {"x": 1}, "max": {"x": 0}}}});
            let out = build(&library(), &world);
            assert_eq!(out.diagnostics.len(), 1);
            assert!(out.request.is_empty());
        }
    }
}
