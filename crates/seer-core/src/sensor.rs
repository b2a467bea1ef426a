//! Sensor modules: the privileged write path into the store.
//!
//! Sensor modules run on the core-loop thread at the start of every cycle,
//! before any snapshot is built, and write to the [`EntityStore`] directly.
//! They turn incoming measurements into entity history, creating a new
//! entity whenever a measurement cannot be associated with an existing one.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use footprint::{overlap, Pose};

use crate::entity::{EntityId, Measurement};
use crate::store::EntityStore;

/// A writer that updates the store once per cycle.
pub trait SensorModule: Send {
    /// Module name, for logging.
    fn name(&self) -> &str;

    /// Applies pending sensor input to the store.
    fn update(&mut self, store: &mut EntityStore, now: f64);
}

/// Default overlap fraction above which a measurement joins an entity.
pub const DEFAULT_ASSOCIATION_THRESHOLD: f64 = 0.3;

/// Feeds measurements from a channel into the store.
///
/// Each measurement is associated with the first shapeless entity whose
/// hull contains the measurement centroid, or otherwise the one whose hull
/// overlaps the measurement footprint the most (above the association
/// threshold). Unassociated measurements create a new entity with a
/// generated id. The receiving entity's hull and position follow the
/// measurement footprint.
#[derive(Debug)]
pub struct MeasurementFeed {
    receiver: Receiver<Measurement>,
    association_threshold: f64,
    connected: bool,
}

impl MeasurementFeed {
    /// Creates a feed reading from `receiver`.
    #[must_use]
    pub fn new(receiver: Receiver<Measurement>) -> Self {
        Self {
            receiver,
            association_threshold: DEFAULT_ASSOCIATION_THRESHOLD,
            connected: true,
        }
    }

    /// Creates a feed together with the sender that drives it.
    #[must_use]
    pub fn channel() -> (Sender<Measurement>, Self) {
        let (sender, receiver) = unbounded();
        (sender, Self::new(receiver))
    }

    /// Sets the association overlap threshold.
    #[must_use]
    pub fn with_association_threshold(mut self, threshold: f64) -> Self {
        self.association_threshold = threshold;
        self
    }

    fn associate(&self, store: &EntityStore, measurement: &Measurement) -> Option<EntityId> {
        let footprint = measurement.footprint();
        let centroid = measurement.centroid().map(|c| c.truncate());

        let mut best: Option<(&EntityId, f64)> = None;
        for entity in store.iter().filter(|e| !e.has_shape()) {
            let hull = entity.convex_hull();
            if !hull.is_proper() {
                continue;
            }
            if centroid.is_some_and(|c| hull.contains(c)) {
                return Some(entity.id().clone());
            }
            let Some(fraction) = overlap(hull, &footprint) else {
                continue;
            };
            if fraction > self.association_threshold && best.map_or(true, |(_, top)| fraction > top) {
                best = Some((entity.id(), fraction));
            }
        }
        best.map(|(id, _)| id.clone())
    }
}

impl SensorModule for MeasurementFeed {
    fn name(&self) -> &str {
        "measurement_feed"
    }

    fn update(&mut self, store: &mut EntityStore, now: f64) {
        let mut associated = 0usize;
        let mut created = 0usize;

        loop {
            let measurement = match self.receiver.try_recv() {
                Ok(m) => m,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.connected {
                        tracing::info!(sensor = self.name(), "measurement source closed");
                        self.connected = false;
                    }
                    break;
                }
            };

            let id = match self.associate(store, &measurement) {
                Some(id) => {
                    associated += 1;
                    id
                }
                None => {
                    created += 1;
                    store.create_with_generated_id(now)
                }
            };

            let footprint = measurement.footprint();
            let centroid = measurement.centroid();
            store.add_measurement(&id, Arc::new(measurement));

            if let Some(entity) = store.get_mut(&id) {
                if footprint.is_proper() {
                    entity.set_convex_hull(footprint);
                }
                if let Some(centroid) = centroid {
                    entity.set_pose(Pose::from_translation(centroid));
                }
            }
        }

        if associated + created > 0 {
            tracing::debug!(sensor = self.name(), associated, created, "measurements ingested");
        }
    }
}
