//! Factories shared by the cross-module tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use footprint::{ConvexHull2D, Pose};
use glam::{DVec2, DVec3};

use crate::entity::{EntityId, IdGenerator, ImageMask, Measurement};
use crate::server::Server;
use crate::store::EntityStore;

/// Axis-aligned square footprint with its lower-left corner at `(x, y)`.
pub fn square(x: f64, y: f64, size: f64) -> ConvexHull2D {
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

/// Measurement at time `t` with `pixels` mask pixels and no points.
pub fn mask_measurement(t: f64, pixels: u32) -> Arc<Measurement> {
    let mut mask = ImageMask::new(64, 64);
    for i in 0..pixels {
        mask.add_point(i % 64, i / 64);
    }
    Arc::new(Measurement::new(t, Pose::IDENTITY, mask, Vec::new()))
}

/// Unit-square blob of points at `(x, y)`, half a metre tall.
pub fn blob(x: f64, y: f64, t: f64) -> Measurement {
    let points = vec![
        DVec3::new(x, y, 0.0),
        DVec3::new(x + 1.0, y, 0.0),
        DVec3::new(x + 1.0, y + 1.0, 0.5),
        DVec3::new(x, y + 1.0, 0.5),
    ];
    let mut mask = ImageMask::new(32, 32);
    for i in 0..16 {
        mask.add_point(i, i);
    }
    Measurement::new(t, Pose::IDENTITY, mask, points)
}

/// Store with deterministic ids.
pub fn seeded_store() -> EntityStore {
    EntityStore::new().with_id_generator(IdGenerator::seeded(11))
}

/// Adds a shapeless entity with `hull`, last measured at `t` if given.
pub fn add_percept(store: &mut EntityStore, id: &str, hull: ConvexHull2D, t: Option<f64>) -> EntityId {
    let id = EntityId::from(id);
    store.create(id.clone(), 0.0).set_convex_hull(hull);
    if let Some(t) = t {
        store.add_measurement(&id, mask_measurement(t, 10));
    }
    id
}

/// Steps `server` with a fixed `dt` until `done` holds or two seconds of
/// wall time pass. Returns the simulated time reached and whether `done`
/// held.
pub fn step_until(server: &mut Server, mut now: f64, dt: f64, done: impl Fn(&Server) -> bool) -> (f64, bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        server.step(now);
        if done(server) {
            return (now, true);
        }
        now += dt;
        std::thread::sleep(Duration::from_millis(2));
    }
    (now, false)
}
