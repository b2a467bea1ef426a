//! Update requests: batched, not-yet-applied mutations of the world model.
//!
//! Plugins never touch the canonical entity map. Instead each plugin fills an
//! [`UpdateRequest`] while inspecting a snapshot, and the core loop applies
//! the harvested requests in one synchronous step.
//!
//! A request is a pure accumulator keyed by entity id. Recording a mutation
//! is cheap and never validates anything: whether an id exists is only
//! decided at application time. Writing the same field of the same entity
//! twice keeps the last value, except for measurements (appended), data
//! documents (deep-merged) and removals (a set).
//!
//! # Field Groups
//!
//! Mutations are grouped by field. Application walks the groups in the order
//! of [`FieldGroups::APPLY_ORDER`], so creations always precede every other
//! group and removals always come last.
//!
//! ```
//! use seer_core::entity::EntityId;
//! use seer_core::update_request::{FieldGroups, UpdateRequest};
//!
//! let mut req = UpdateRequest::new();
//! assert!(req.is_empty());
//!
//! let id = EntityId::from("cup");
//! req.create_entity(id.clone());
//! req.set_type(id.clone(), "cup");
//! req.remove_entity(EntityId::from("stale"));
//!
//! assert!(!req.is_empty());
//! assert_eq!(
//!     req.touched(),
//!     FieldGroups::CREATIONS | FieldGroups::TYPES | FieldGroups::REMOVALS
//! );
//! ```

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use footprint::{ConvexHull2D, Mesh, Pose};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{EntityId, Measurement, Relation};
use crate::property::{PropertyKey, PropertyValue};
use crate::serialization::merge_json;

// =============================================================================
// Field Groups
// =============================================================================

bitflags! {
    /// Set of field groups touched by a request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FieldGroups: u16 {
        /// Explicit entity creations.
        const CREATIONS = 1 << 0;
        /// Measurement appends.
        const MEASUREMENTS = 1 << 1;
        /// Mesh assignments.
        const SHAPES = 1 << 2;
        /// Footprint assignments.
        const HULLS = 1 << 3;
        /// Type label assignments.
        const TYPES = 1 << 4;
        /// Pose assignments.
        const POSES = 1 << 5;
        /// Directed relation assignments.
        const RELATIONS = 1 << 6;
        /// Data document merges.
        const DATA = 1 << 7;
        /// Typed property assignments.
        const PROPERTIES = 1 << 8;
        /// Entity removals.
        const REMOVALS = 1 << 9;
    }
}

impl FieldGroups {
    /// Order in which groups are applied.
    pub const APPLY_ORDER: [FieldGroups; 10] = [
        Self::CREATIONS,
        Self::MEASUREMENTS,
        Self::SHAPES,
        Self::HULLS,
        Self::TYPES,
        Self::POSES,
        Self::RELATIONS,
        Self::DATA,
        Self::PROPERTIES,
        Self::REMOVALS,
    ];

    /// Lowercase name of a single group, for logs and reports.
    #[must_use]
    pub fn label(self) -> &'static str {
        const LABELS: [&str; 10] = [
            "creations",
            "measurements",
            "shapes",
            "hulls",
            "types",
            "poses",
            "relations",
            "data",
            "properties",
            "removals",
        ];
        Self::APPLY_ORDER
            .iter()
            .position(|group| *group == self)
            .map_or("mixed", |i| LABELS[i])
    }
}

// =============================================================================
// Update Request
// =============================================================================

/// Batch of proposed mutations, keyed by entity id.
#[derive(Default, Clone)]
pub struct UpdateRequest {
    creations: BTreeSet<EntityId>,
    measurements: BTreeMap<EntityId, Vec<Arc<Measurement>>>,
    shapes: BTreeMap<EntityId, Arc<Mesh>>,
    hulls: BTreeMap<EntityId, ConvexHull2D>,
    types: BTreeMap<EntityId, String>,
    poses: BTreeMap<EntityId, Pose>,
    relations: BTreeMap<EntityId, BTreeMap<EntityId, Relation>>,
    data: BTreeMap<EntityId, Value>,
    properties: BTreeMap<EntityId, BTreeMap<usize, PropertyValue>>,
    removals: BTreeSet<EntityId>,
    touched: FieldGroups,
}

impl UpdateRequest {
    /// Creates an empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Mutators
    // -------------------------------------------------------------------------

    /// Requests creation of a new, empty entity.
    ///
    /// Creating an id that already exists leaves the existing entity alone.
    pub fn create_entity(&mut self, id: EntityId) {
        self.creations.insert(id);
        self.touched |= FieldGroups::CREATIONS;
    }

    /// Appends a measurement to an entity's history.
    pub fn add_measurement(&mut self, id: EntityId, measurement: Arc<Measurement>) {
        self.measurements.entry(id).or_default().push(measurement);
        self.touched |= FieldGroups::MEASUREMENTS;
    }

    /// Appends several measurements. An empty list records nothing.
    pub fn add_measurements(&mut self, id: EntityId, measurements: impl IntoIterator<Item = Arc<Measurement>>) {
        let mut measurements = measurements.into_iter().peekable();
        if measurements.peek().is_none() {
            return;
        }
        self.measurements.entry(id).or_default().extend(measurements);
        self.touched |= FieldGroups::MEASUREMENTS;
    }

    /// Attaches a mesh.
    pub fn set_shape(&mut self, id: EntityId, shape: Arc<Mesh>) {
        self.shapes.insert(id, shape);
        self.touched |= FieldGroups::SHAPES;
    }

    /// Replaces an entity's footprint.
    pub fn set_convex_hull(&mut self, id: EntityId, hull: ConvexHull2D) {
        self.hulls.insert(id, hull);
        self.touched |= FieldGroups::HULLS;
    }

    /// Replaces an entity's type label.
    pub fn set_type(&mut self, id: EntityId, entity_type: impl Into<String>) {
        self.types.insert(id, entity_type.into());
        self.touched |= FieldGroups::TYPES;
    }

    /// Replaces an entity's pose.
    pub fn set_pose(&mut self, id: EntityId, pose: Pose) {
        self.poses.insert(id, pose);
        self.touched |= FieldGroups::POSES;
    }

    /// Sets the directed relation `from -> to`.
    pub fn set_relation(&mut self, from: EntityId, to: EntityId, relation: Relation) {
        self.relations.entry(from).or_default().insert(to, relation);
        self.touched |= FieldGroups::RELATIONS;
    }

    /// Merges a document into an entity's data.
    ///
    /// Several merges for the same id within one request are combined with
    /// a deep merge, later keys winning.
    pub fn add_data(&mut self, id: EntityId, data: Value) {
        match self.data.get_mut(&id) {
            Some(existing) => merge_json(existing, &data),
            None => {
                self.data.insert(id, data);
            }
        }
        self.touched |= FieldGroups::DATA;
    }

    /// Sets a typed property. Unregistered keys are ignored.
    pub fn set_property<T: Any + Send + Sync>(&mut self, id: EntityId, key: &PropertyKey<T>, value: T) {
        let Some(idx) = key.idx() else {
            return;
        };
        self.properties
            .entry(id)
            .or_default()
            .insert(idx, Arc::new(value));
        self.touched |= FieldGroups::PROPERTIES;
    }

    /// Removes an entity.
    pub fn remove_entity(&mut self, id: EntityId) {
        self.removals.insert(id);
        self.touched |= FieldGroups::REMOVALS;
    }

    /// Appends every mutation of `other` after the ones already recorded.
    ///
    /// Field values from `other` win; measurements append; data merges.
    pub fn extend(&mut self, other: UpdateRequest) {
        self.creations.extend(other.creations);
        for (id, ms) in other.measurements {
            self.measurements.entry(id).or_default().extend(ms);
        }
        self.shapes.extend(other.shapes);
        self.hulls.extend(other.hulls);
        self.types.extend(other.types);
        self.poses.extend(other.poses);
        for (from, targets) in other.relations {
            self.relations.entry(from).or_default().extend(targets);
        }
        for (id, doc) in other.data {
            match self.data.get_mut(&id) {
                Some(existing) => merge_json(existing, &doc),
                None => {
                    self.data.insert(id, doc);
                }
            }
        }
        for (id, props) in other.properties {
            self.properties.entry(id).or_default().extend(props);
        }
        self.removals.extend(other.removals);
        self.touched |= other.touched;
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Returns true if no mutation was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }

    /// Field groups holding at least one mutation.
    #[must_use]
    pub fn touched(&self) -> FieldGroups {
        self.touched
    }

    /// Requested creations.
    #[must_use]
    pub fn creations(&self) -> &BTreeSet<EntityId> {
        &self.creations
    }

    /// Measurement appends per entity, in recording order.
    #[must_use]
    pub fn measurements(&self) -> &BTreeMap<EntityId, Vec<Arc<Measurement>>> {
        &self.measurements
    }

    /// Mesh assignments.
    #[must_use]
    pub fn shapes(&self) -> &BTreeMap<EntityId, Arc<Mesh>> {
        &self.shapes
    }

    /// Footprint assignments.
    #[must_use]
    pub fn convex_hulls(&self) -> &BTreeMap<EntityId, ConvexHull2D> {
        &self.hulls
    }

    /// Type assignments.
    #[must_use]
    pub fn types(&self) -> &BTreeMap<EntityId, String> {
        &self.types
    }

    /// Pose assignments.
    #[must_use]
    pub fn poses(&self) -> &BTreeMap<EntityId, Pose> {
        &self.poses
    }

    /// Relation assignments, `from -> (to -> relation)`.
    #[must_use]
    pub fn relations(&self) -> &BTreeMap<EntityId, BTreeMap<EntityId, Relation>> {
        &self.relations
    }

    /// Data document merges.
    #[must_use]
    pub fn data(&self) -> &BTreeMap<EntityId, Value> {
        &self.data
    }

    /// Property assignments, `id -> (slot -> value)`.
    #[must_use]
    pub fn properties(&self) -> &BTreeMap<EntityId, BTreeMap<usize, PropertyValue>> {
        &self.properties
    }

    /// Requested removals.
    #[must_use]
    pub fn removals(&self) -> &BTreeSet<EntityId> {
        &self.removals
    }

    /// Every id the request refers to (relation targets included), sorted.
    #[must_use]
    pub fn referenced_ids(&self) -> BTreeSet<&EntityId> {
        let mut ids: BTreeSet<&EntityId> = BTreeSet::new();
        ids.extend(self.measurements.keys());
        ids.extend(self.shapes.keys());
        ids.extend(self.hulls.keys());
        ids.extend(self.types.keys());
        ids.extend(self.poses.keys());
        for (from, targets) in &self.relations {
            ids.insert(from);
            ids.extend(targets.keys());
        }
        ids.extend(self.data.keys());
        ids.extend(self.properties.keys());
        ids.extend(self.removals.iter());
        ids
    }
}

impl fmt::Debug for UpdateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateRequest")
            .field("touched", &self.touched)
            .field("creations", &self.creations)
            .field("measurements", &self.measurements.len())
            .field("shapes", &self.shapes.len())
            .field("hulls", &self.hulls.len())
            .field("types", &self.types)
            .field("poses", &self.poses.len())
            .field("relations", &self.relations.len())
            .field("data", &self.data.len())
            .field("properties", &self.properties.len())
            .field("removals", &self.removals)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
