//! Merging of duplicate percepts.
//!
//! The same physical object is often perceived as several shapeless
//! entities, one per viewpoint. Once such entities stop receiving
//! measurements they are collapsed: a stale entity whose footprint overlaps
//! another stale entity's footprint by more than the threshold is absorbed
//! into it.
//!
//! # Algorithm
//!
//! 1. Candidates are shapeless entities with a proper hull whose last update
//!    is more than `stale_age` seconds old.
//! 2. Overlap fractions for all candidate pairs are computed in parallel.
//! 3. In id order, each candidate that has not been chosen as a target
//!    merges into the first other candidate (id order) that is neither
//!    chosen as a target nor already absorbed and whose overlap exceeds
//!    `overlap_threshold`.
//! 4. The target's hull becomes the union of both hulls, it inherits the
//!    source's best measurement if it has none, and the source is removed.
//!
//! A target is never modified twice in one pass, so fractions computed up
//! front stay exact for every pair the greedy step looks at.

use std::sync::Arc;

use footprint::{overlap, ConvexHull2D};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityId, Measurement};
use crate::store::EntityStore;

/// Default time without measurements before an entity may be merged.
pub const DEFAULT_STALE_AGE: f64 = 5.0;

/// Default overlap fraction required to merge.
pub const DEFAULT_OVERLAP_THRESHOLD: f64 = 0.5;

/// One absorption performed by a merge pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedPair {
    /// Entity removed by the merge.
    pub source: EntityId,
    /// Entity that absorbed it.
    pub target: EntityId,
}

/// Result of one merge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Absorptions in the order they were decided.
    pub merged: Vec<MergedPair>,
}

impl MergeReport {
    /// Returns true if nothing was merged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    /// Number of absorbed entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.merged.len()
    }
}

/// Collapses overlapping stale percepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeEngine {
    stale_age: f64,
    overlap_threshold: f64,
}

struct Plan {
    source: EntityId,
    target: EntityId,
    hull: ConvexHull2D,
    best: Option<Arc<Measurement>>,
}

impl MergeEngine {
    /// Creates an engine with the given parameters.
    #[must_use]
    pub fn new(stale_age: f64, overlap_threshold: f64) -> Self {
        Self {
            stale_age,
            overlap_threshold,
        }
    }

    /// Seconds without measurements before an entity is stale.
    #[must_use]
    pub fn stale_age(&self) -> f64 {
        self.stale_age
    }

    /// Overlap fraction that must be exceeded to merge.
    #[must_use]
    pub fn overlap_threshold(&self) -> f64 {
        self.overlap_threshold
    }

    fn is_candidate(&self, entity: &Entity, now: f64) -> bool {
        !entity.has_shape() && entity.convex_hull().is_proper() && now - entity.last_update_time() > self.stale_age
    }

    /// Runs one merge pass over the store.
    pub fn run(&self, store: &mut EntityStore, now: f64) -> MergeReport {
        let plans = self.plan(store, now);
        let mut report = MergeReport::default();

        for plan in plans {
            if let Some(target) = store.get_mut(&plan.target) {
                let union = target.convex_hull().union(&plan.hull);
                target.set_convex_hull(union);
            }
            if let Some(best) = plan.best {
                let target_has_best = store
                    .get(&plan.target)
                    .is_some_and(|t| t.best_measurement().is_some());
                if !target_has_best {
                    store.add_measurement(&plan.target, best);
                }
            }
            store.remove(&plan.source);
            report.merged.push(MergedPair {
                source: plan.source,
                target: plan.target,
            });
        }

        if !report.is_empty() {
            tracing::info!(merged = report.len(), "merged stale entities");
        }
        report
    }

    fn plan(&self, store: &EntityStore, now: f64) -> Vec<Plan> {
        let candidates: Vec<&Arc<Entity>> = store.iter().filter(|e| self.is_candidate(e, now)).collect();
        if candidates.len() < 2 {
            return Vec::new();
        }

        let threshold = self.overlap_threshold;
        let matches: Vec<Vec<usize>> = (0..candidates.len())
            .into_par_iter()
            .map(|i| {
                let hull = candidates[i].convex_hull();
                candidates
                    .iter()
                    .enumerate()
                    .filter(|&(j, other)| {
                        j != i && overlap(other.convex_hull(), hull).is_some_and(|fraction| fraction > threshold)
                    })
                    .map(|(j, _)| j)
                    .collect()
            })
            .collect();

        let mut absorbed = vec![false; candidates.len()];
        let mut targeted = vec![false; candidates.len()];
        let mut plans = Vec::new();

        for (i, targets) in matches.iter().enumerate() {
            if targeted[i] {
                continue;
            }
            let Some(&j) = targets.iter().find(|&&j| !absorbed[j] && !targeted[j]) else {
                continue;
            };
            absorbed[i] = true;
            targeted[j] = true;

            let source = candidates[i];
            plans.push(Plan {
                source: source.id().clone(),
                target: candidates[j].id().clone(),
                hull: source.convex_hull().clone(),
                best: source.best_measurement().cloned(),
            });
        }

        plans
    }
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AGE, DEFAULT_OVERLAP_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ImageMask, IdGenerator};
    use footprint::{Mesh, Pose};
    use glam::{DVec2, DVec3};
    use proptest::prelude::*;

    fn square(x: f64, y: f64, size: f64) -> ConvexHull2D {
        ConvexHull2D::from_points(
            [
                DVec2::new(x, y),
                DVec2::new(x + size, y),
                DVec2::new(x + size, y + size),
                DVec2::new(x, y + size),
            ],
            0.0,
            1.0,
        )
    }

    fn measurement(t: f64, pixels: u32) -> Arc<Measurement> {
        let mut mask = ImageMask::new(64, 64);
        for i in 0..pixels {
            mask.add_point(i % 64, i / 64);
        }
        Arc::new(Measurement::new(t, Pose::IDENTITY, mask, Vec::new()))
    }

    /// Adds a percept last measured at `t` (or never, if `t` is `None`).
    fn percept(store: &mut EntityStore, id: &str, hull: ConvexHull2D, t: Option<f64>) {
        store.create(EntityId::from(id), 0.0).set_convex_hull(hull);
        if let Some(t) = t {
            store.add_measurement(&EntityId::from(id), measurement(t, 10));
        }
    }

    fn store() -> EntityStore {
        EntityStore::new().with_id_generator(IdGenerator::seeded(9))
    }

    mod merge_tests {
        use super::*;

        #[test]
        fn disjoint_hulls_never_merge() {
            let mut store = store();
            percept(&mut store, "a", square(0.0, 0.0, 1.0), Some(1.0));
            percept(&mut store, "b", square(5.0, 5.0, 1.0), Some(1.0));

            let report = MergeEngine::default().run(&mut store, 100.0);
            assert!(report.is_empty());
            assert_eq!(store.len(), 2);
        }

        #[test]
        fn contained_hull_merges_into_container() {
            let mut store = store();
            // "a" sorts first and is contained in "b", which has no best.
            percept(&mut store, "a", square(0.25, 0.25, 0.5), Some(1.0));
            percept(&mut store, "b", square(0.0, 0.0, 1.0), None);

            let report = MergeEngine::default().run(&mut store, 100.0);
            assert_eq!(
                report.merged,
                vec![MergedPair {
                    source: EntityId::from("a"),
                    target: EntityId::from("b"),
                }]
            );
            assert!(!store.contains(&EntityId::from("a")));

            let b = store.get(&EntityId::from("b")).unwrap();
            let union = square(0.0, 0.0, 1.0).union(&square(0.25, 0.25, 0.5));
            assert_eq!(b.convex_hull().points(), union.points());
            assert_eq!(b.convex_hull().z_min(), union.z_min());
            assert_eq!(b.convex_hull().z_max(), union.z_max());
            assert!((b.convex_hull().area() - 1.0).abs() < 1e-9);
            assert_eq!(b.best_measurement().unwrap().timestamp(), 1.0);
        }

        #[test]
        fn union_covers_both_hulls() {
            let mut store = store();
            percept(&mut store, "a", square(0.0, 0.0, 1.0), Some(1.0));
            percept(&mut store, "b", square(0.2, 0.0, 1.0), Some(1.0));

            MergeEngine::default().run(&mut store, 100.0);
            let b = store.get(&EntityId::from("b")).unwrap();
            assert!((b.convex_hull().area() - 1.2).abs() < 1e-9);
            assert!(b.convex_hull().contains(DVec2::new(0.05, 0.5)));
        }

        #[test]
        fn existing_best_is_kept() {
            let mut store = store();
            percept(&mut store, "a", square(0.0, 0.0, 1.0), Some(1.0));
            percept(&mut store, "b", square(0.0, 0.0, 1.0), Some(2.0));

            MergeEngine::default().run(&mut store, 100.0);
            let b = store.get(&EntityId::from("b")).unwrap();
            assert_eq!(b.measurement_count(), 1);
            assert_eq!(b.best_measurement().unwrap().timestamp(), 2.0);
        }

        #[test]
        fn both_entities_must_be_stale() {
            let mut store = store();
            percept(&mut store, "a", square(0.0, 0.0, 1.0), Some(1.0));
            percept(&mut store, "b", square(0.0, 0.0, 1.0), Some(98.0));

            assert!(MergeEngine::default().run(&mut store, 100.0).is_empty());
            assert_eq!(store.len(), 2);
        }

        #[test]
        fn small_overlap_does_not_merge() {
            let mut store = store();
            percept(&mut store, "a", square(0.0, 0.0, 1.0), Some(1.0));
            percept(&mut store, "b", square(0.6, 0.0, 1.0), Some(1.0));
            assert!(MergeEngine::default().run(&mut store, 100.0).is_empty());
        }

        #[test]
        fn shaped_entities_are_ignored() {
            let mut store = store();
            percept(&mut store, "a", square(0.0, 0.0, 1.0), Some(1.0));
            store
                .create(EntityId::from("table"), 0.0)
                .set_shape(Some(Arc::new(Mesh::cuboid(DVec3::ZERO, DVec3::ONE))));

            assert!(MergeEngine::default().run(&mut store, 100.0).is_empty());
            assert_eq!(store.len(), 2);
        }

        #[test]
        fn targets_are_used_once_per_pass() {
            let mut store = store();
            for id in ["a", "b", "c"] {
                percept(&mut store, id, square(0.0, 0.0, 1.0), Some(1.0));
            }

            let report = MergeEngine::default().run(&mut store, 100.0);
            assert_eq!(report.len(), 1);
            assert_eq!(report.merged[0].source, EntityId::from("a"));
            assert_eq!(report.merged[0].target, EntityId::from("b"));
            assert!(store.contains(&EntityId::from("c")));

            // The next pass picks up the rest.
            let report = MergeEngine::default().run(&mut store, 100.0);
            assert_eq!(report.len(), 1);
            assert_eq!(store.len(), 1);
        }
    }

    proptest! {
        #[test]
        fn separated_percepts_never_merge(
            xs in proptest::collection::vec(0u32..20, 1..12),
        ) {
            let mut store = store();
            for (i, x) in xs.iter().enumerate() {
                // Unit squares on a grid with spacing 2 never touch.
                let hull = square(f64::from(*x) * 2.0, f64::from(u32::try_from(i).unwrap()) * 2.0, 1.0);
                percept(&mut store, &format!("e{i:02}"), hull, Some(0.0));
            }
            let before = store.len();
            let report = MergeEngine::default().run(&mut store, 100.0);
            prop_assert!(report.is_empty());
            prop_assert_eq!(store.len(), before);
        }
    }
}
