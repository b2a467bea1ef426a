//! Snapshot isolation, identity and empty-value semantics.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use footprint::{ConvexHull2D, Pose};
use proptest::prelude::*;

use crate::config::ServerConfig;
use crate::entity::{Entity, EntityId, MaskArea};
use crate::plugin::{Plugin, PluginContext, PluginRegistry};
use crate::serialization::entity_to_json;
use crate::server::Server;
use crate::store::{ApplyMode, ApplyReport};
use crate::update_request::UpdateRequest;
use crate::world_model::WorldModel;

use super::helpers::{add_percept, mask_measurement, seeded_store, square};

// =============================================================================
// Snapshots
// =============================================================================

mod snapshot_tests {
    use super::*;

    #[test]
    fn snapshot_ignores_later_store_mutation() {
        let mut store = seeded_store();
        let a = add_percept(&mut store, "a", square(0.0, 0.0, 1.0), Some(1.0));
        let world = store.snapshot(0, 1.0);

        store.add_measurement(&a, mask_measurement(2.0, 20));
        store.get_mut(&a).unwrap().set_type("cup");
        add_percept(&mut store, "b", square(3.0, 0.0, 1.0), None);
        store.remove(&a);

        assert_eq!(world.len(), 1);
        let frozen = world.get(&a).unwrap();
        assert_eq!(frozen.measurement_count(), 1);
        assert_eq!(frozen.entity_type(), "");
        assert!(!world.contains(&EntityId::from("b")));
    }

    /// Blocks inside `process` until released, then reports what it saw.
    struct Gate {
        release: Receiver<()>,
        seen: Sender<(usize, usize)>,
    }

    impl Plugin for Gate {
        fn name(&self) -> &str {
            "gate"
        }

        fn process(&mut self, _ctx: &PluginContext, world: &WorldModel, _request: &mut UpdateRequest) {
            let _ = self.release.recv_timeout(Duration::from_secs(2));
            let count = world
                .get(&EntityId::from("a"))
                .map_or(0, |a| a.measurement_count());
            let _ = self.seen.send((world.len(), count));
        }
    }

    #[test]
    fn running_plugin_sees_dispatch_time_state() {
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        let (seen_tx, seen_rx) = crossbeam_channel::bounded(1);

        let mut server = Server::from_config(ServerConfig::default(), &PluginRegistry::new()).unwrap();
        add_percept(server.store_mut(), "a", square(0.0, 0.0, 1.0), Some(0.0));
        server
            .add_plugin(
                "gate",
                Box::new(Gate {
                    release: release_rx,
                    seen: seen_tx,
                }),
                &toml::Table::new(),
                0.0,
            )
            .unwrap();

        assert_eq!(server.step(0.0).dispatched, 1);

        // Mutate the live store while the plugin holds its snapshot.
        let a = EntityId::from("a");
        server.store_mut().add_measurement(&a, mask_measurement(0.5, 5));
        add_percept(server.store_mut(), "b", square(5.0, 5.0, 1.0), None);
        release_tx.send(()).unwrap();

        let seen = seen_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(seen, (1, 1));
        assert_eq!(server.store().len(), 2);
        assert!(server.shutdown().is_clean());
    }
}

// =============================================================================
// Identity and history
// =============================================================================

mod entity_tests {
    use super::*;

    #[test]
    fn id_survives_every_mutation() {
        let mut store = seeded_store();
        let id = add_percept(&mut store, "chair-1", square(0.0, 0.0, 1.0), Some(0.0));

        let mut request = UpdateRequest::new();
        request.set_type(id.clone(), "chair");
        request.set_pose(id.clone(), Pose::from_xyz_rpy(1.0, 2.0, 0.0, 0.0, 0.0, 0.5));
        request.set_convex_hull(id.clone(), square(1.0, 1.0, 2.0));
        request.add_data(id.clone(), serde_json::json!({"color": "red"}));
        request.add_measurement(id.clone(), mask_measurement(1.0, 3));
        let report = store.apply(&request, ApplyMode::Atomic, 1.0).unwrap();
        assert!(report.is_clean());

        let entity = store.get(&id).unwrap();
        assert_eq!(entity.id(), &id);
        assert_eq!(entity.id().as_str(), "chair-1");
        assert_eq!(entity.entity_type(), "chair");
        assert_eq!(store.ids().collect::<Vec<_>>(), vec![&id]);
    }

    #[test]
    fn history_is_bounded_and_evicts_oldest() {
        let mut entity = Entity::with_capacity(EntityId::from("e"), "", 3, 0.0);
        for t in 0..5 {
            entity.add_measurement(mask_measurement(f64::from(t), 1 + t as u32), &MaskArea);
        }
        assert_eq!(entity.measurement_count(), 3);
        assert_eq!(entity.measurement_seq(), 5);
        let stamps: Vec<f64> = entity.measurements().map(|m| m.timestamp()).collect();
        assert_eq!(stamps, vec![2.0, 3.0, 4.0]);
        assert_eq!(entity.last_update_time(), 4.0);
    }

    #[test]
    fn evicted_best_is_replaced() {
        let mut entity = Entity::with_capacity(EntityId::from("e"), "", 2, 0.0);
        entity.add_measurement(mask_measurement(0.0, 50), &MaskArea);
        entity.add_measurement(mask_measurement(1.0, 10), &MaskArea);
        assert_eq!(entity.best_measurement().unwrap().timestamp(), 0.0);

        // Evicts the best; the newcomer is scored against nothing.
        entity.add_measurement(mask_measurement(2.0, 5), &MaskArea);
        assert_eq!(entity.best_measurement().unwrap().timestamp(), 2.0);
    }

    proptest! {
        #[test]
        fn best_is_previous_best_or_newcomer(
            pixels in proptest::collection::vec(0u32..40, 1..30),
            capacity in 1usize..6,
        ) {
            let mut entity = Entity::with_capacity(EntityId::from("e"), "", capacity, 0.0);
            for (i, &n) in pixels.iter().enumerate() {
                let previous = entity.best_measurement().cloned();
                let newcomer = mask_measurement(i as f64, n);
                entity.add_measurement(Arc::clone(&newcomer), &MaskArea);

                prop_assert!(entity.measurement_count() <= capacity);
                if let Some(best) = entity.best_measurement() {
                    let is_previous = previous.as_ref().is_some_and(|p| Arc::ptr_eq(p, best));
                    prop_assert!(is_previous || Arc::ptr_eq(best, &newcomer));
                    prop_assert!(entity.measurements().any(|m| Arc::ptr_eq(m, best)));
                } else {
                    prop_assert_eq!(n, 0);
                }
            }
        }
    }
}

// =============================================================================
// Interchange
// =============================================================================

mod interchange_tests {
    use super::*;

    #[test]
    fn exported_pose_and_hull_read_back() {
        let mut store = seeded_store();
        let id = add_percept(&mut store, "a", square(0.0, 0.0, 2.0), None);
        let pose = Pose::from_xyz_rpy(1.0, -2.0, 0.5, 0.1, 0.2, 0.3);
        store.get_mut(&id).unwrap().set_pose(pose);

        let json = entity_to_json(store.get(&id).unwrap()).unwrap();
        let back: Pose = serde_json::from_value(json["pose"].clone()).unwrap();
        assert!(back.abs_diff_eq(&pose, 1e-12));

        let hull: ConvexHull2D = serde_json::from_value(json["convex_hull"].clone()).unwrap();
        let original = store.get(&id).unwrap().convex_hull();
        assert_eq!(hull.points(), original.points());
        assert!((hull.area() - 4.0).abs() < 1e-12);
    }
}

// =============================================================================
// Empty values
// =============================================================================

mod empty_tests {
    use super::*;

    #[test]
    fn new_request_is_empty_until_something_is_recorded() {
        let mut request = UpdateRequest::new();
        assert!(request.is_empty());
        assert!(request.touched().is_empty());
        request.remove_entity(EntityId::from("x"));
        assert!(!request.is_empty());
    }

    #[test]
    fn merging_empty_requests_stays_empty() {
        let mut request = UpdateRequest::new();
        request.extend(UpdateRequest::new());
        assert!(request.is_empty());
    }

    #[test]
    fn empty_batch_changes_nothing() {
        let mut store = seeded_store();
        add_percept(&mut store, "a", square(0.0, 0.0, 1.0), None);
        let report = store.apply_batch(&[], ApplyMode::Atomic, 0.0);
        assert_eq!(report, ApplyReport::default());
        assert!(report.is_clean());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn empty_world_and_store() {
        let store = seeded_store();
        assert!(store.is_empty());
        let world = store.snapshot(3, 1.5);
        assert!(world.is_empty());
        assert_eq!(world.cycle(), 3);
        assert_eq!(world.iter().count(), 0);
    }

    #[test]
    fn default_hull_is_empty() {
        let hull = ConvexHull2D::default();
        assert!(hull.is_empty());
        assert!(!hull.is_proper());
        assert_eq!(hull.area(), 0.0);
    }
}
