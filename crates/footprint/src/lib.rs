//! # Footprint
//!
//! Planar footprint geometry for world-model entities.
//!
//! Entities without a known 3-D model are represented by a 2-D convex hull
//! extruded between a minimum and maximum height. This crate provides that
//! representation together with the rigid poses and triangle meshes it is
//! derived from:
//!
//! - **Poses**: rigid 3-D transforms (translation + unit quaternion)
//! - **Convex hulls**: ordered boundary polygons with height bounds
//! - **Collision**: separating-axis tests, clipped intersection area, overlap
//! - **Meshes**: immutable triangle meshes and their footprint under a pose
//!
//! All types serialize to the field layout used by world-model collaborators
//! (`x,y,z,qx,qy,qz,qw` for poses, `points`/`z_min`/`z_max` for hulls,
//! `vertices`/`triangles` for meshes).
//!
//! ## Quick Start
//!
//! ```
//! use footprint::{ConvexHull2D, overlap};
//! use glam::DVec2;
//!
//! let outer = ConvexHull2D::from_points(
//!     [DVec2::new(0.0, 0.0), DVec2::new(4.0, 0.0), DVec2::new(4.0, 4.0), DVec2::new(0.0, 4.0)],
//!     0.0,
//!     1.0,
//! );
//! let inner = ConvexHull2D::from_points(
//!     [DVec2::new(1.0, 1.0), DVec2::new(2.0, 1.0), DVec2::new(2.0, 2.0), DVec2::new(1.0, 2.0)],
//!     0.0,
//!     1.0,
//! );
//!
//! let fraction = overlap(&outer, &inner).unwrap();
//! assert!((fraction - 1.0).abs() < 1e-9);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod collision;
pub mod error;
pub mod hull;
pub mod mesh;
pub mod pose;

// Re-exports for convenience
pub use collision::{collides, intersection_area, overlap};
pub use error::GeometryError;
pub use hull::ConvexHull2D;
pub use mesh::{Mesh, Triangle};
pub use pose::Pose;

/// Tolerance used for degenerate-area and orientation tests.
pub const EPSILON: f64 = 1e-9;
