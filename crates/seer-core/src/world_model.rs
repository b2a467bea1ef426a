//! Immutable point-in-time snapshots of the entity map.
//!
//! A [`WorldModel`] is built once per cycle by the core loop and handed to
//! every dispatched plugin through an `Arc`. Building one copies the id map
//! but shares the entities themselves by reference count, so a snapshot costs
//! one pointer copy per entity. The store mutates entities copy-on-write,
//! which means nothing a plugin can see ever changes underneath it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::entity::{Entity, EntityId};
use crate::error::Result;
use crate::serialization::world_to_json;

/// Read-only view of all entities at one instant.
#[derive(Debug, Clone, Default)]
pub struct WorldModel {
    entities: BTreeMap<EntityId, Arc<Entity>>,
    cycle: u64,
    time: f64,
}

impl WorldModel {
    /// Creates a snapshot from an id map.
    #[must_use]
    pub fn new(entities: BTreeMap<EntityId, Arc<Entity>>, cycle: u64, time: f64) -> Self {
        Self {
            entities,
            cycle,
            time,
        }
    }

    /// Looks up an entity.
    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<&Arc<Entity>> {
        self.entities.get(id)
    }

    /// Returns true if the entity exists in this snapshot.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// All entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Entity>> + '_ {
        self.entities.values()
    }

    /// All ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &EntityId> + '_ {
        self.entities.keys()
    }

    /// Entities whose type label equals `entity_type`.
    pub fn entities_of_type<'a>(&'a self, entity_type: &'a str) -> impl Iterator<Item = &'a Arc<Entity>> + 'a {
        self.entities
            .values()
            .filter(move |e| e.entity_type() == entity_type)
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if the snapshot holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Core-loop cycle that built the snapshot.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Time at which the snapshot was built, in seconds.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Exports the snapshot as JSON.
    ///
    /// # Errors
    ///
    /// Fails only if a geometry value cannot be represented in JSON.
    pub fn to_json(&self) -> Result<Value> {
        world_to_json(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> WorldModel {
        let mut map = BTreeMap::new();
        for (id, ty) in [("b", "chair"), ("a", "table"), ("c", "chair")] {
            let id = EntityId::from(id);
            map.insert(id.clone(), Arc::new(Entity::new(id, ty, 0.0)));
        }
        WorldModel::new(map, 3, 1.5)
    }

    #[test]
    fn iterates_in_id_order() {
        let world = snapshot();
        let ids: Vec<&str> = world.ids().map(EntityId::as_str).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn lookup_and_filter() {
        let world = snapshot();
        assert!(world.contains(&EntityId::from("a")));
        assert!(world.get(&EntityId::from("zz")).is_none());
        assert_eq!(world.entities_of_type("chair").count(), 2);
        assert_eq!(world.len(), 3);
        assert_eq!(world.cycle(), 3);
    }

    #[test]
    fn exports_all_entities() {
        let doc = snapshot().to_json().unwrap();
        assert_eq!(doc["cycle"], 3);
        assert_eq!(doc["time"]["sec"], 1);
        assert_eq!(doc["entities"].as_array().unwrap().len(), 3);
        assert_eq!(doc["entities"][0]["id"], "a");
    }
}
