//! Entity module: the unit record of belief about one tracked object.
//!
//! - [`EntityId`]: opaque, immutable string identifier
//! - [`IdGenerator`]: random (or seeded) id source
//! - [`Entity`]: type, pose, geometry, bounded measurement history and
//!   collaborator-owned data
//! - [`Relation`]: payload of a directed edge between two entities
//!
//! # Geometry
//!
//! An entity may carry a 3-D [`Mesh`] (its *shape*) and always carries a 2-D
//! footprint. While a shape is attached the footprint is derived from it:
//! attaching a shape or moving a shaped entity recomputes the hull from the
//! mesh under the current pose. Shapeless entities get their hull assigned
//! directly.
//!
//! # Measurement History
//!
//! Measurements are kept in a bounded, insertion-ordered buffer. Appending to
//! a full buffer evicts the oldest entry. The *best* measurement is tracked
//! with a [`MeasurementQuality`] heuristic and always refers to an entry that
//! is still in the buffer.
//!
//! ```
//! use std::sync::Arc;
//! use footprint::Pose;
//! use seer_core::entity::{Entity, EntityId, ImageMask, MaskArea, Measurement};
//!
//! let mut entity = Entity::with_capacity(EntityId::from("cup"), "", 2, 0.0);
//!
//! for (t, pixels) in [(1.0, 10), (2.0, 30), (3.0, 20)] {
//!     let mut mask = ImageMask::new(64, 64);
//!     for i in 0..pixels {
//!         mask.add_point(i, 0);
//!     }
//!     let m = Measurement::new(t, Pose::IDENTITY, mask, Vec::new());
//!     entity.add_measurement(Arc::new(m), &MaskArea);
//! }
//!
//! assert_eq!(entity.measurement_count(), 2);
//! assert_eq!(entity.measurement_seq(), 3);
//! assert_eq!(entity.best_measurement().unwrap().timestamp(), 2.0);
//! ```

pub mod measurement;

use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use footprint::{ConvexHull2D, Mesh, Pose};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::property::{PropertyKey, PropertyValue};
use crate::serialization::merge_json;

pub use measurement::{ImageMask, MaskArea, Measurement, MeasurementQuality};

/// Default capacity of an entity's measurement history.
pub const DEFAULT_MEASUREMENT_CAPACITY: usize = 5;

// =============================================================================
// Entity Id
// =============================================================================

/// Unique identifier of an entity.
///
/// Ids are opaque strings, cheap to clone, and ordered lexicographically.
/// The ordering defines the deterministic iteration order of the store.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct EntityId(Arc<str>);

impl EntityId {
    /// Creates an id from a string.
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self(Arc::from(id))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0.to_string()
    }
}

/// Source of fresh entity ids: 32 lowercase hex characters.
///
/// Seeded generators produce the same sequence on every run, which keeps
/// tests and replays reproducible.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    rng: ChaCha8Rng,
}

impl IdGenerator {
    /// Creates a generator seeded from the thread-local random source.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self::seeded(rand::random())
    }

    /// Creates a deterministic generator.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Produces the next id.
    pub fn next_id(&mut self) -> EntityId {
        let hi: u64 = self.rng.gen();
        let lo: u64 = self.rng.gen();
        EntityId::from(format!("{hi:016x}{lo:016x}"))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::from_entropy()
    }
}

// =============================================================================
// Relation
// =============================================================================

/// Payload of a directed relation between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Relation label, e.g. `"on_top_of"`.
    pub kind: String,
    /// Collaborator-defined payload.
    #[serde(default)]
    pub data: Value,
}

impl Relation {
    /// Creates a relation without payload.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: Value::Null,
        }
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

// =============================================================================
// Entity
// =============================================================================

/// Belief about one tracked object.
///
/// Entities published in a snapshot are shared by `Arc` and never edited in
/// place; the store mutates a private copy (`Arc::make_mut`).
#[derive(Clone)]
pub struct Entity {
    id: EntityId,
    entity_type: String,
    pose: Pose,
    shape: Option<Arc<Mesh>>,
    shape_revision: u64,
    convex_hull: ConvexHull2D,
    measurements: VecDeque<Arc<Measurement>>,
    capacity: usize,
    best: Option<(Arc<Measurement>, f64)>,
    measurement_seq: u64,
    creation_time: f64,
    data: Value,
    relations: BTreeMap<EntityId, Relation>,
    properties: BTreeMap<usize, PropertyValue>,
}

impl Entity {
    /// Creates an entity with the default history capacity.
    #[must_use]
    pub fn new(id: EntityId, entity_type: impl Into<String>, creation_time: f64) -> Self {
        Self::with_capacity(id, entity_type, DEFAULT_MEASUREMENT_CAPACITY, creation_time)
    }

    /// Creates an entity keeping at most `capacity` measurements (at least one).
    #[must_use]
    pub fn with_capacity(
        id: EntityId,
        entity_type: impl Into<String>,
        capacity: usize,
        creation_time: f64,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            id,
            entity_type: entity_type.into(),
            pose: Pose::IDENTITY,
            shape: None,
            shape_revision: 0,
            convex_hull: ConvexHull2D::default(),
            measurements: VecDeque::with_capacity(capacity),
            capacity,
            best: None,
            measurement_seq: 0,
            creation_time,
            data: Value::Null,
            relations: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Identity and type
    // -------------------------------------------------------------------------

    /// The entity id.
    #[must_use]
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// Type label (empty if unknown).
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Replaces the type label.
    pub fn set_type(&mut self, entity_type: impl Into<String>) {
        self.entity_type = entity_type.into();
    }

    /// Time the entity was created, in seconds.
    #[must_use]
    pub fn creation_time(&self) -> f64 {
        self.creation_time
    }

    // -------------------------------------------------------------------------
    // Pose and geometry
    // -------------------------------------------------------------------------

    /// World pose of the entity.
    #[must_use]
    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    /// Moves the entity. A shaped entity's footprint follows the pose.
    pub fn set_pose(&mut self, pose: Pose) {
        self.pose = pose;
        if self.shape.is_some() {
            self.update_convex_hull();
        }
    }

    /// The attached mesh, if any.
    #[must_use]
    pub fn shape(&self) -> Option<&Arc<Mesh>> {
        self.shape.as_ref()
    }

    /// Returns true if a mesh is attached.
    #[must_use]
    pub fn has_shape(&self) -> bool {
        self.shape.is_some()
    }

    /// Attaches (or detaches) a mesh.
    ///
    /// Attaching bumps the shape revision and recomputes the footprint.
    /// Detaching keeps the last footprint.
    pub fn set_shape(&mut self, shape: Option<Arc<Mesh>>) {
        self.shape = shape;
        if self.shape.is_some() {
            self.shape_revision += 1;
            self.update_convex_hull();
        }
    }

    /// Revision of the attached mesh; 0 when no mesh is attached.
    #[must_use]
    pub fn shape_revision(&self) -> u64 {
        if self.shape.is_some() {
            self.shape_revision
        } else {
            0
        }
    }

    /// Ground-plane footprint.
    #[must_use]
    pub fn convex_hull(&self) -> &ConvexHull2D {
        &self.convex_hull
    }

    /// Replaces the footprint directly.
    pub fn set_convex_hull(&mut self, hull: ConvexHull2D) {
        self.convex_hull = hull;
    }

    fn update_convex_hull(&mut self) {
        if let Some(mesh) = &self.shape {
            self.convex_hull = mesh.footprint(&self.pose);
        }
    }

    // -------------------------------------------------------------------------
    // Measurements
    // -------------------------------------------------------------------------

    /// Appends a measurement and re-evaluates the best one.
    ///
    /// At capacity the oldest measurement is evicted first; if it was the
    /// best, the best is cleared before the new candidate is scored. The new
    /// measurement replaces the best only if it scores strictly higher.
    pub fn add_measurement(&mut self, measurement: Arc<Measurement>, quality: &dyn MeasurementQuality) {
        if self.measurements.len() >= self.capacity {
            self.measurements.pop_front();
            let best_evicted = self.best.as_ref().is_some_and(|(best, _)| {
                !self.measurements.iter().any(|m| Arc::ptr_eq(m, best))
            });
            if best_evicted {
                self.best = None;
            }
        }

        self.measurements.push_back(Arc::clone(&measurement));
        self.measurement_seq += 1;

        if let Some(score) = quality.score(&measurement) {
            let improves = match &self.best {
                Some((_, best_score)) => score > *best_score,
                None => true,
            };
            if improves {
                self.best = Some((measurement, score));
            }
        }
    }

    /// All measurements, oldest first.
    pub fn measurements(&self) -> impl DoubleEndedIterator<Item = &Arc<Measurement>> + '_ {
        self.measurements.iter()
    }

    /// Measurements with a timestamp of at least `min_timestamp`, oldest first.
    pub fn measurements_since(&self, min_timestamp: f64) -> impl Iterator<Item = &Arc<Measurement>> + '_ {
        self.measurements
            .iter()
            .filter(move |m| m.timestamp() >= min_timestamp)
    }

    /// The `count` most recent measurements, newest first.
    pub fn latest_measurements(&self, count: usize) -> impl Iterator<Item = &Arc<Measurement>> + '_ {
        self.measurements.iter().rev().take(count)
    }

    /// Most recently added measurement.
    #[must_use]
    pub fn last_measurement(&self) -> Option<&Arc<Measurement>> {
        self.measurements.back()
    }

    /// Highest-scoring measurement still in the history.
    #[must_use]
    pub fn best_measurement(&self) -> Option<&Arc<Measurement>> {
        self.best.as_ref().map(|(m, _)| m)
    }

    /// Number of measurements currently held.
    #[must_use]
    pub fn measurement_count(&self) -> usize {
        self.measurements.len()
    }

    /// Maximum number of measurements held.
    #[must_use]
    pub fn measurement_capacity(&self) -> usize {
        self.capacity
    }

    /// Number of measurements ever added. Plugins compare it across
    /// snapshots to detect new data.
    #[must_use]
    pub fn measurement_seq(&self) -> u64 {
        self.measurement_seq
    }

    /// Timestamp of the last measurement, or the creation time if the
    /// entity was never measured.
    #[must_use]
    pub fn last_update_time(&self) -> f64 {
        self.last_measurement()
            .map_or(self.creation_time, |m| m.timestamp())
    }

    // -------------------------------------------------------------------------
    // Data, relations, properties
    // -------------------------------------------------------------------------

    /// Collaborator-owned data document. The core never interprets it.
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Replaces the data document.
    pub fn set_data(&mut self, data: Value) {
        self.data = data;
    }

    /// Deep-merges `patch` into the data document (patch keys win).
    pub fn merge_data(&mut self, patch: &Value) {
        merge_json(&mut self.data, patch);
    }

    /// Outgoing relations keyed by target id.
    #[must_use]
    pub fn relations(&self) -> &BTreeMap<EntityId, Relation> {
        &self.relations
    }

    /// Sets the relation from this entity to `target`.
    pub fn set_relation(&mut self, target: EntityId, relation: Relation) {
        self.relations.insert(target, relation);
    }

    /// Reads a typed property.
    #[must_use]
    pub fn property<T: Any + Send + Sync>(&self, key: &PropertyKey<T>) -> Option<&T> {
        let value = self.properties.get(&key.idx()?)?;
        (**value).downcast_ref::<T>()
    }

    /// Writes a typed property. Invalid keys are ignored.
    pub fn set_property<T: Any + Send + Sync>(&mut self, key: &PropertyKey<T>, value: T) {
        if let Some(idx) = key.idx() {
            self.properties.insert(idx, Arc::new(value));
        }
    }

    pub(crate) fn set_property_value(&mut self, idx: usize, value: PropertyValue) {
        self.properties.insert(idx, value);
    }

    /// Number of properties set.
    #[must_use]
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("type", &self.entity_type)
            .field("pose", &self.pose)
            .field("shape_revision", &self.shape_revision())
            .field("hull_points", &self.convex_hull.points().len())
            .field("measurements", &self.measurements.len())
            .field("measurement_seq", &self.measurement_seq)
            .field("creation_time", &self.creation_time)
            .field("relations", &self.relations.len())
            .field("properties", &self.properties.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
