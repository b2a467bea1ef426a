//! Footprint collision and overlap.
//!
//! Collision uses the separating-axis theorem over the edge normals of both
//! hulls. Overlap is measured as the clipped intersection area divided by the
//! area of the smaller footprint, so a footprint lying entirely inside another
//! has an overlap of `1.0` regardless of how much larger the other one is.
//!
//! Only the planar footprint takes part; height bounds are ignored.

use glam::DVec2;

use crate::hull::{signed_area, ConvexHull2D};
use crate::EPSILON;

/// Whether two footprints intersect or touch.
///
/// Degenerate hulls (fewer than three points or no area) never collide.
#[must_use]
pub fn collides(a: &ConvexHull2D, b: &ConvexHull2D) -> bool {
    if !a.is_proper() || !b.is_proper() {
        return false;
    }

    a.normals()
        .iter()
        .chain(b.normals())
        .all(|axis| !separated_along(*axis, a.points(), b.points()))
}

/// Area of the intersection of two convex footprints.
#[must_use]
pub fn intersection_area(a: &ConvexHull2D, b: &ConvexHull2D) -> f64 {
    if !a.is_proper() || !b.is_proper() {
        return 0.0;
    }
    signed_area(&clip(a.points(), b.points())).abs()
}

/// Fractional overlap of two footprints, or `None` if they do not collide.
///
/// The fraction is `intersection / min(area(a), area(b))`, clamped to
/// `[0, 1]`. Touching footprints collide with an overlap of `0.0`.
#[must_use]
pub fn overlap(a: &ConvexHull2D, b: &ConvexHull2D) -> Option<f64> {
    if !collides(a, b) {
        return None;
    }
    let smaller = a.area().min(b.area());
    if smaller <= EPSILON {
        return Some(0.0);
    }
    Some((intersection_area(a, b) / smaller).clamp(0.0, 1.0))
}

fn project(axis: DVec2, points: &[DVec2]) -> (f64, f64) {
    points.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
        let d = p.dot(axis);
        (lo.min(d), hi.max(d))
    })
}

fn separated_along(axis: DVec2, a: &[DVec2], b: &[DVec2]) -> bool {
    if axis == DVec2::ZERO {
        return false;
    }
    let (a_lo, a_hi) = project(axis, a);
    let (b_lo, b_hi) = project(axis, b);
    a_hi < b_lo - EPSILON || b_hi < a_lo - EPSILON
}

/// Sutherland-Hodgman clipping of `subject` against the convex `clipper`.
fn clip(subject: &[DVec2], clipper: &[DVec2]) -> Vec<DVec2> {
    let orientation = if signed_area(clipper) < 0.0 { -1.0 } else { 1.0 };
    let inside = |start: DVec2, end: DVec2, p: DVec2| (end - start).perp_dot(p - start) * orientation >= -EPSILON;

    let mut output: Vec<DVec2> = subject.to_vec();
    let n = clipper.len();

    for i in 0..n {
        if output.is_empty() {
            break;
        }
        let start = clipper[i];
        let end = clipper[(i + 1) % n];
        let input = std::mem::take(&mut output);

        for j in 0..input.len() {
            let current = input[j];
            let previous = input[(j + input.len() - 1) % input.len()];
            let current_in = inside(start, end, current);
            let previous_in = inside(start, end, previous);

            if current_in {
                if !previous_in {
                    output.extend(line_intersection(previous, current, start, end));
                }
                output.push(current);
            } else if previous_in {
                output.extend(line_intersection(previous, current, start, end));
            }
        }
    }

    output
}

/// Intersection of segment `p1-p2` with the infinite line through `q1-q2`.
fn line_intersection(p1: DVec2, p2: DVec2, q1: DVec2, q2: DVec2) -> Option<DVec2> {
    let r = p2 - p1;
    let s = q2 - q1;
    let denom = r.perp_dot(s);
    if denom.abs() <= EPSILON {
        return None;
    }
    let t = (q1 - p1).perp_dot(s) / denom;
    Some(p1 + r * t)
}
