//! Planar convex hulls with height bounds.
//!
//! A [`ConvexHull2D`] is the footprint of an object projected onto the ground
//! plane, extruded between `z_min` and `z_max`. The boundary is stored as an
//! ordered point list; edges, outward normals, area and centroid are derived
//! once at construction and never edited afterwards. Operations that change a
//! hull (such as [`ConvexHull2D::union`]) return a new value.

use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::EPSILON;

/// Convex footprint polygon with height bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "HullRepr", into = "HullRepr")]
pub struct ConvexHull2D {
    points: Vec<DVec2>,
    z_min: f64,
    z_max: f64,
    // Derived
    edges: Vec<DVec2>,
    normals: Vec<DVec2>,
    area: f64,
    centroid: DVec2,
}

impl ConvexHull2D {
    /// Create a hull from an already ordered, convex boundary.
    ///
    /// The point order is preserved exactly; use [`ConvexHull2D::from_points`]
    /// for an unordered point set.
    #[must_use]
    pub fn from_boundary(points: Vec<DVec2>, z_min: f64, z_max: f64) -> Self {
        let n = points.len();
        let mut edges = Vec::with_capacity(n);
        let mut normals = Vec::with_capacity(n);

        let signed = signed_area(&points);
        // Outward normal side depends on winding.
        let orientation = if signed < 0.0 { -1.0 } else { 1.0 };

        if n >= 2 {
            for i in 0..n {
                let edge = points[(i + 1) % n] - points[i];
                edges.push(edge);
                let normal = DVec2::new(edge.y, -edge.x) * orientation;
                normals.push(normal.normalize_or_zero());
            }
        }

        let centroid = polygon_centroid(&points, signed);

        Self {
            points,
            z_min,
            z_max,
            edges,
            normals,
            area: signed.abs(),
            centroid,
        }
    }

    /// Compute the convex hull of an arbitrary point set.
    ///
    /// The boundary is counter-clockwise, starting from the lowest-x point.
    /// Collinear points are dropped.
    #[must_use]
    pub fn from_points(points: impl IntoIterator<Item = DVec2>, z_min: f64, z_max: f64) -> Self {
        let points: Vec<DVec2> = points.into_iter().collect();
        Self::from_boundary(monotone_chain(points), z_min, z_max)
    }

    /// Compute the footprint of a 3-D point set.
    ///
    /// The height bounds are the extreme `z` values of the input. An empty
    /// input produces an empty hull with zero height bounds.
    #[must_use]
    pub fn from_points_3d(points: impl IntoIterator<Item = DVec3>) -> Self {
        let mut z_min = f64::INFINITY;
        let mut z_max = f64::NEG_INFINITY;
        let planar: Vec<DVec2> = points
            .into_iter()
            .map(|p| {
                z_min = z_min.min(p.z);
                z_max = z_max.max(p.z);
                p.truncate()
            })
            .collect();

        if planar.is_empty() {
            return Self::default();
        }
        Self::from_points(planar, z_min, z_max)
    }

    /// Ordered boundary points.
    #[must_use]
    pub fn points(&self) -> &[DVec2] {
        &self.points
    }

    /// Lower height bound.
    #[must_use]
    pub fn z_min(&self) -> f64 {
        self.z_min
    }

    /// Upper height bound.
    #[must_use]
    pub fn z_max(&self) -> f64 {
        self.z_max
    }

    /// Edge vectors; edge `i` runs from point `i` to point `i + 1`.
    #[must_use]
    pub fn edges(&self) -> &[DVec2] {
        &self.edges
    }

    /// Unit outward normals, one per edge.
    #[must_use]
    pub fn normals(&self) -> &[DVec2] {
        &self.normals
    }

    /// Enclosed area.
    #[must_use]
    pub fn area(&self) -> f64 {
        self.area
    }

    /// Area centroid (vertex mean for degenerate hulls).
    #[must_use]
    pub fn centroid(&self) -> DVec2 {
        self.centroid
    }

    /// Whether the hull has no boundary points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether the hull encloses a positive area.
    #[must_use]
    pub fn is_proper(&self) -> bool {
        self.points.len() >= 3 && self.area > EPSILON
    }

    /// Whether the boundary winds counter-clockwise.
    #[must_use]
    pub fn is_counter_clockwise(&self) -> bool {
        signed_area(&self.points) >= 0.0
    }

    /// Whether `point` lies inside or on the boundary.
    #[must_use]
    pub fn contains(&self, point: DVec2) -> bool {
        if !self.is_proper() {
            return false;
        }
        self.points
            .iter()
            .zip(&self.normals)
            .all(|(p, n)| (point - *p).dot(*n) <= EPSILON)
    }

    /// Convex hull enclosing both footprints.
    ///
    /// Height bounds cover both inputs. An empty operand leaves the other
    /// unchanged.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        Self::from_points(
            self.points.iter().chain(&other.points).copied(),
            self.z_min.min(other.z_min),
            self.z_max.max(other.z_max),
        )
    }

    /// The same footprint shifted by `offset`.
    #[must_use]
    pub fn translated(&self, offset: DVec2) -> Self {
        Self::from_boundary(
            self.points.iter().map(|p| *p + offset).collect(),
            self.z_min,
            self.z_max,
        )
    }
}

impl Default for ConvexHull2D {
    fn default() -> Self {
        Self::from_boundary(Vec::new(), 0.0, 0.0)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn cross(o: DVec2, a: DVec2, b: DVec2) -> f64 {
    (a - o).perp_dot(b - o)
}

/// Signed shoelace area; positive for counter-clockwise boundaries.
pub(crate) fn signed_area(points: &[DVec2]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let twice: f64 = (0..n)
        .map(|i| points[i].perp_dot(points[(i + 1) % n]))
        .sum();
    twice * 0.5
}

fn polygon_centroid(points: &[DVec2], signed: f64) -> DVec2 {
    if points.is_empty() {
        return DVec2::ZERO;
    }
    if signed.abs() <= EPSILON {
        #[allow(clippy::cast_precision_loss)]
        let n = points.len() as f64;
        return points.iter().copied().sum::<DVec2>() / n;
    }
    let n = points.len();
    let mut acc = DVec2::ZERO;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        acc += (a + b) * a.perp_dot(b);
    }
    acc / (6.0 * signed)
}

/// Andrew's monotone chain; counter-clockwise, no collinear points.
fn monotone_chain(mut points: Vec<DVec2>) -> Vec<DVec2> {
    points.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    points.dedup_by(|a, b| a.abs_diff_eq(*b, EPSILON));

    if points.len() < 3 {
        return points;
    }

    let mut lower: Vec<DVec2> = Vec::with_capacity(points.len());
    for &p in &points {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= EPSILON {
            lower.pop();
        }
        lower.push(p);
    }

    let mut upper: Vec<DVec2> = Vec::with_capacity(points.len());
    for &p in points.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= EPSILON {
            upper.pop();
        }
        upper.push(p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

// =============================================================================
// Wire representation
// =============================================================================

#[derive(Clone, Copy, Serialize, Deserialize)]
struct XyRepr {
    x: f64,
    y: f64,
}

#[derive(Serialize, Deserialize)]
struct HullRepr {
    #[serde(default)]
    points: Vec<XyRepr>,
    #[serde(default)]
    z_min: f64,
    #[serde(default)]
    z_max: f64,
}

impl From<HullRepr> for ConvexHull2D {
    fn from(repr: HullRepr) -> Self {
        Self::from_boundary(
            repr.points.into_iter().map(|p| DVec2::new(p.x, p.y)).collect(),
            repr.z_min,
            repr.z_max,
        )
    }
}

impl From<ConvexHull2D> for HullRepr {
    fn from(hull: ConvexHull2D) -> Self {
        Self {
            points: hull.points.iter().map(|p| XyRepr { x: p.x, y: p.y }).collect(),
            z_min: hull.z_min,
            z_max: hull.z_max,
        }
    }
}
