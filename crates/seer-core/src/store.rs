//! The canonical entity map.
//!
//! The [`EntityStore`] is owned by the core loop, which is its only writer.
//! Entities are held as `Arc<Entity>` in a `BTreeMap`, giving deterministic
//! id-ordered iteration and cheap snapshots: [`EntityStore::snapshot`] copies
//! the map of pointers, and every later edit goes through `Arc::make_mut`,
//! cloning an entity only if a snapshot still shares it.
//!
//! # Applying Update Requests
//!
//! [`EntityStore::apply_batch`] applies a set of harvested requests field
//! group by field group (see [`FieldGroups::APPLY_ORDER`]). Within a group the
//! requests are visited in order, so a later request wins ties on the same
//! entity.
//!
//! Two modes are available:
//!
//! - [`ApplyMode::BestEffort`]: every mutation that can be applied is
//!   applied. Mutations naming an unknown entity are absorbed and listed in
//!   the [`ApplyReport`].
//! - [`ApplyMode::Atomic`]: a request referring to any entity that neither
//!   exists nor is created by the batch is rejected as a whole.
//!
//! Entities only come into existence through the creations group (or the
//! privileged sensor path); no other group creates entities implicitly.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::{
    Entity, EntityId, IdGenerator, MaskArea, Measurement, MeasurementQuality,
    DEFAULT_MEASUREMENT_CAPACITY,
};
use crate::error::{Result, SeerError};
use crate::update_request::{FieldGroups, UpdateRequest};
use crate::world_model::WorldModel;

// =============================================================================
// Apply Mode and Report
// =============================================================================

/// How a batch of update requests treats references to unknown entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    /// Apply what can be applied; absorb the rest.
    #[default]
    BestEffort,
    /// Reject a request outright if it refers to any unknown entity.
    Atomic,
}

/// A mutation that named an entity which did not exist when applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsorbedMutation {
    /// Position of the request in the batch.
    pub request: usize,
    /// The unknown entity.
    pub id: EntityId,
    /// Field group of the mutation.
    pub group: FieldGroups,
}

/// A request rejected in atomic mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRequest {
    /// Position of the request in the batch.
    pub request: usize,
    /// Ids the request referred to that could not be resolved.
    pub missing: Vec<EntityId>,
}

/// Outcome of applying a batch of update requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Number of non-empty requests applied.
    pub applied: usize,
    /// Entities created by the batch.
    pub created: Vec<EntityId>,
    /// Entities removed by the batch.
    pub removed: Vec<EntityId>,
    /// Mutations dropped because their entity did not exist.
    pub absorbed: Vec<AbsorbedMutation>,
    /// Requests rejected in atomic mode.
    pub rejected: Vec<RejectedRequest>,
}

impl ApplyReport {
    /// Returns true if nothing was absorbed or rejected.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.absorbed.is_empty() && self.rejected.is_empty()
    }
}

// =============================================================================
// Entity Store
// =============================================================================

/// Canonical id-to-entity map with copy-on-write entities.
pub struct EntityStore {
    entities: BTreeMap<EntityId, Arc<Entity>>,
    measurement_capacity: usize,
    quality: Arc<dyn MeasurementQuality>,
    ids: IdGenerator,
}

impl EntityStore {
    /// Creates an empty store with default history capacity, the mask-area
    /// quality heuristic and a randomly seeded id generator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            measurement_capacity: DEFAULT_MEASUREMENT_CAPACITY,
            quality: Arc::new(MaskArea),
            ids: IdGenerator::from_entropy(),
        }
    }

    /// Sets the history capacity of entities created from now on.
    #[must_use]
    pub fn with_measurement_capacity(mut self, capacity: usize) -> Self {
        self.measurement_capacity = capacity.max(1);
        self
    }

    /// Replaces the best-measurement heuristic.
    #[must_use]
    pub fn with_quality(mut self, quality: Arc<dyn MeasurementQuality>) -> Self {
        self.quality = quality;
        self
    }

    /// Replaces the id generator.
    #[must_use]
    pub fn with_id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    // -------------------------------------------------------------------------
    // Direct access (core loop and sensor modules)
    // -------------------------------------------------------------------------

    /// Looks up an entity.
    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<&Arc<Entity>> {
        self.entities.get(id)
    }

    /// Mutable access to an entity, cloning it first if a snapshot shares it.
    pub fn get_mut(&mut self, id: &EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id).map(Arc::make_mut)
    }

    /// Returns true if the entity exists.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if the store holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// All entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Entity>> + '_ {
        self.entities.values()
    }

    /// All ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &EntityId> + '_ {
        self.entities.keys()
    }

    /// Inserts (or replaces) an entity.
    pub fn insert(&mut self, entity: Entity) -> Option<Arc<Entity>> {
        self.entities.insert(entity.id().clone(), Arc::new(entity))
    }

    /// Returns the entity with `id`, creating an empty one if needed.
    pub fn create(&mut self, id: EntityId, now: f64) -> &mut Entity {
        let capacity = self.measurement_capacity;
        let entry = self
            .entities
            .entry(id)
            .or_insert_with_key(|id| Arc::new(Entity::with_capacity(id.clone(), "", capacity, now)));
        Arc::make_mut(entry)
    }

    /// Creates an empty entity under a freshly generated id.
    pub fn create_with_generated_id(&mut self, now: f64) -> EntityId {
        let id = self.generate_id();
        self.create(id.clone(), now);
        id
    }

    /// Draws a fresh id from the store's generator.
    pub fn generate_id(&mut self) -> EntityId {
        loop {
            let id = self.ids.next_id();
            if !self.entities.contains_key(&id) {
                return id;
            }
        }
    }

    /// Removes an entity.
    pub fn remove(&mut self, id: &EntityId) -> Option<Arc<Entity>> {
        self.entities.remove(id)
    }

    /// Appends a measurement using the store's quality heuristic.
    ///
    /// Returns false if the entity does not exist.
    pub fn add_measurement(&mut self, id: &EntityId, measurement: Arc<Measurement>) -> bool {
        match self.entities.get_mut(id) {
            Some(entity) => {
                Arc::make_mut(entity).add_measurement(measurement, self.quality.as_ref());
                true
            }
            None => false,
        }
    }

    /// The best-measurement heuristic.
    #[must_use]
    pub fn quality(&self) -> &dyn MeasurementQuality {
        self.quality.as_ref()
    }

    /// History capacity given to new entities.
    #[must_use]
    pub fn measurement_capacity(&self) -> usize {
        self.measurement_capacity
    }

    /// Builds an immutable snapshot sharing every entity.
    #[must_use]
    pub fn snapshot(&self, cycle: u64, time: f64) -> WorldModel {
        WorldModel::new(self.entities.clone(), cycle, time)
    }

    // -------------------------------------------------------------------------
    // Update requests
    // -------------------------------------------------------------------------

    /// Applies a single request.
    ///
    /// # Errors
    ///
    /// In atomic mode, returns [`SeerError::ApplyRejected`] if the request
    /// refers to unknown entities; the store is left untouched.
    pub fn apply(&mut self, request: &UpdateRequest, mode: ApplyMode, now: f64) -> Result<ApplyReport> {
        let mut report = self.apply_batch(std::slice::from_ref(request), mode, now);
        match report.rejected.pop() {
            Some(rejected) => Err(SeerError::ApplyRejected {
                missing: rejected.missing,
            }),
            None => Ok(report),
        }
    }

    /// Applies a batch of requests group by group.
    pub fn apply_batch(&mut self, requests: &[UpdateRequest], mode: ApplyMode, now: f64) -> ApplyReport {
        let mut report = ApplyReport::default();

        let accepted: Vec<(usize, &UpdateRequest)> = match mode {
            ApplyMode::BestEffort => requests
                .iter()
                .enumerate()
                .filter(|(_, r)| !r.is_empty())
                .collect(),
            ApplyMode::Atomic => self.validate(requests, &mut report),
        };

        for group in FieldGroups::APPLY_ORDER {
            for &(index, request) in &accepted {
                if request.touched().contains(group) {
                    self.apply_group(index, request, group, now, &mut report);
                }
            }
        }

        report.applied = accepted.len();

        for absorbed in &report.absorbed {
            tracing::debug!(
                request = absorbed.request,
                id = %absorbed.id,
                group = absorbed.group.label(),
                "absorbed mutation for unknown entity"
            );
        }
        if !report.absorbed.is_empty() {
            tracing::warn!(count = report.absorbed.len(), "update requests named unknown entities");
        }
        for rejected in &report.rejected {
            tracing::warn!(
                request = rejected.request,
                missing = ?rejected.missing,
                "update request rejected"
            );
        }

        report
    }

    fn validate<'r>(&self, requests: &'r [UpdateRequest], report: &mut ApplyReport) -> Vec<(usize, &'r UpdateRequest)> {
        let mut created: BTreeSet<&EntityId> = BTreeSet::new();
        let mut accepted = Vec::new();

        for (index, request) in requests.iter().enumerate() {
            if request.is_empty() {
                continue;
            }
            let missing: Vec<EntityId> = request
                .referenced_ids()
                .into_iter()
                .filter(|id| {
                    !self.entities.contains_key(*id)
                        && !request.creations().contains(*id)
                        && !created.contains(*id)
                })
                .cloned()
                .collect();

            if missing.is_empty() {
                created.extend(request.creations().iter());
                accepted.push((index, request));
            } else {
                report.rejected.push(RejectedRequest {
                    request: index,
                    missing,
                });
            }
        }

        accepted
    }

    fn apply_group(
        &mut self,
        index: usize,
        request: &UpdateRequest,
        group: FieldGroups,
        now: f64,
        report: &mut ApplyReport,
    ) {
        let capacity = self.measurement_capacity;
        let quality = Arc::clone(&self.quality);
        let entities = &mut self.entities;

        if group == FieldGroups::CREATIONS {
            for id in request.creations() {
                if !entities.contains_key(id) {
                    let entity = Entity::with_capacity(id.clone(), "", capacity, now);
                    entities.insert(id.clone(), Arc::new(entity));
                    report.created.push(id.clone());
                }
            }
        } else if group == FieldGroups::MEASUREMENTS {
            for (id, measurements) in request.measurements() {
                if let Some(entity) = resolve(entities, id, index, group, report) {
                    for m in measurements {
                        entity.add_measurement(Arc::clone(m), quality.as_ref());
                    }
                }
            }
        } else if group == FieldGroups::SHAPES {
            for (id, shape) in request.shapes() {
                if let Some(entity) = resolve(entities, id, index, group, report) {
                    entity.set_shape(Some(Arc::clone(shape)));
                }
            }
        } else if group == FieldGroups::HULLS {
            for (id, hull) in request.convex_hulls() {
                if let Some(entity) = resolve(entities, id, index, group, report) {
                    entity.set_convex_hull(hull.clone());
                }
            }
        } else if group == FieldGroups::TYPES {
            for (id, entity_type) in request.types() {
                if let Some(entity) = resolve(entities, id, index, group, report) {
                    entity.set_type(entity_type.clone());
                }
            }
        } else if group == FieldGroups::POSES {
            for (id, pose) in request.poses() {
                if let Some(entity) = resolve(entities, id, index, group, report) {
                    entity.set_pose(*pose);
                }
            }
        } else if group == FieldGroups::RELATIONS {
            for (from, targets) in request.relations() {
                if let Some(entity) = resolve(entities, from, index, group, report) {
                    for (to, relation) in targets {
                        entity.set_relation(to.clone(), relation.clone());
                    }
                }
            }
        } else if group == FieldGroups::DATA {
            for (id, doc) in request.data() {
                if let Some(entity) = resolve(entities, id, index, group, report) {
                    entity.merge_data(doc);
                }
            }
        } else if group == FieldGroups::PROPERTIES {
            for (id, values) in request.properties() {
                if let Some(entity) = resolve(entities, id, index, group, report) {
                    for (&idx, value) in values {
                        entity.set_property_value(idx, Arc::clone(value));
                    }
                }
            }
        } else if group == FieldGroups::REMOVALS {
            for id in request.removals() {
                if entities.remove(id).is_some() {
                    report.removed.push(id.clone());
                } else {
                    report.absorbed.push(AbsorbedMutation {
                        request: index,
                        id: id.clone(),
                        group,
                    });
                }
            }
        }
    }
}

fn resolve<'a>(
    entities: &'a mut BTreeMap<EntityId, Arc<Entity>>,
    id: &EntityId,
    request: usize,
    group: FieldGroups,
    report: &mut ApplyReport,
) -> Option<&'a mut Entity> {
    if !entities.contains_key(id) {
        report.absorbed.push(AbsorbedMutation {
            request,
            id: id.clone(),
            group,
        });
        return None;
    }
    entities.get_mut(id).map(Arc::make_mut)
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("entities", &self.entities.len())
            .field("measurement_capacity", &self.measurement_capacity)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
