//! Immutable triangle meshes.
//!
//! A [`Mesh`] is the known 3-D geometry of an entity (furniture, walls). It is
//! validated once at construction and then shared by reference; changing an
//! entity's geometry means attaching a different mesh.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::error::GeometryError;
use crate::hull::ConvexHull2D;
use crate::pose::Pose;

/// Vertex-index triple of one triangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triangle {
    /// First vertex index
    pub i1: u32,
    /// Second vertex index
    pub i2: u32,
    /// Third vertex index
    pub i3: u32,
}

impl Triangle {
    /// Create a triangle from three vertex indices.
    #[must_use]
    pub const fn new(i1: u32, i2: u32, i3: u32) -> Self {
        Self { i1, i2, i3 }
    }

    /// The three indices in order.
    #[must_use]
    pub const fn indices(&self) -> [u32; 3] {
        [self.i1, self.i2, self.i3]
    }
}

/// Validated triangle mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MeshRepr", into = "MeshRepr")]
pub struct Mesh {
    vertices: Vec<DVec3>,
    triangles: Vec<Triangle>,
}

impl Mesh {
    /// Create a mesh, checking that every triangle references existing vertices.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::VertexIndexOutOfRange`] for the first triangle
    /// referencing a missing vertex.
    pub fn new(vertices: Vec<DVec3>, triangles: Vec<Triangle>) -> Result<Self, GeometryError> {
        let vertex_count = vertices.len();
        for (triangle, t) in triangles.iter().enumerate() {
            if let Some(&index) = t.indices().iter().find(|&&i| i as usize >= vertex_count) {
                return Err(GeometryError::VertexIndexOutOfRange {
                    triangle,
                    index,
                    vertex_count,
                });
            }
        }
        Ok(Self {
            vertices,
            triangles,
        })
    }

    /// Axis-aligned box between two corners.
    #[must_use]
    pub fn cuboid(min: DVec3, max: DVec3) -> Self {
        let vertices = vec![
            DVec3::new(min.x, min.y, min.z),
            DVec3::new(max.x, min.y, min.z),
            DVec3::new(max.x, max.y, min.z),
            DVec3::new(min.x, max.y, min.z),
            DVec3::new(min.x, min.y, max.z),
            DVec3::new(max.x, min.y, max.z),
            DVec3::new(max.x, max.y, max.z),
            DVec3::new(min.x, max.y, max.z),
        ];
        let triangles = [
            [0, 2, 1],
            [0, 3, 2], // bottom
            [4, 5, 6],
            [4, 6, 7], // top
            [0, 1, 5],
            [0, 5, 4], // front
            [1, 2, 6],
            [1, 6, 5], // right
            [2, 3, 7],
            [2, 7, 6], // back
            [3, 0, 4],
            [3, 4, 7], // left
        ]
        .into_iter()
        .map(|[a, b, c]| Triangle::new(a, b, c))
        .collect();

        Self {
            vertices,
            triangles,
        }
    }

    /// Vertex positions in the mesh frame.
    #[must_use]
    pub fn vertices(&self) -> &[DVec3] {
        &self.vertices
    }

    /// Triangles as vertex-index triples.
    #[must_use]
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    /// Whether the mesh has no vertices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Distance of the farthest vertex from the mesh origin.
    #[must_use]
    pub fn max_radius(&self) -> f64 {
        self.vertices.iter().map(|v| v.length()).fold(0.0, f64::max)
    }

    /// Ground-plane footprint of the mesh placed at `pose`.
    #[must_use]
    pub fn footprint(&self, pose: &Pose) -> ConvexHull2D {
        if self.is_empty() {
            tracing::trace!("footprint of empty mesh requested");
        }
        ConvexHull2D::from_points_3d(self.vertices.iter().map(|v| pose.transform_point(*v)))
    }
}

// =============================================================================
// Wire representation
// =============================================================================

#[derive(Clone, Copy, Serialize, Deserialize)]
struct XyzRepr {
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Serialize, Deserialize)]
struct MeshRepr {
    vertices: Vec<XyzRepr>,
    triangles: Vec<Triangle>,
}

impl TryFrom<MeshRepr> for Mesh {
    type Error = GeometryError;

    fn try_from(repr: MeshRepr) -> Result<Self, Self::Error> {
        Mesh::new(
            repr.vertices
                .into_iter()
                .map(|v| DVec3::new(v.x, v.y, v.z))
                .collect(),
            repr.triangles,
        )
    }
}

impl From<Mesh> for MeshRepr {
    fn from(mesh: Mesh) -> Self {
        Self {
            vertices: mesh
                .vertices
                .iter()
                .map(|v| XyzRepr {
                    x: v.x,
                    y: v.y,
                    z: v.z,
                })
                .collect(),
            triangles: mesh.triangles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec2;

    #[test]
    fn test_rejects_out_of_range_index() {
        let err = Mesh::new(
            vec![DVec3::ZERO, DVec3::X, DVec3::Y],
            vec![Triangle::new(0, 1, 3)],
        )
        .unwrap_err();
        assert_eq!(
            err,
            GeometryError::VertexIndexOutOfRange {
                triangle: 0,
                index: 3,
                vertex_count: 3
            }
        );
    }

    #[test]
    fn test_cuboid_footprint_follows_pose() {
        let mesh = Mesh::cuboid(DVec3::new(-0.5, -0.5, 0.0), DVec3::new(0.5, 0.5, 0.8));
        let pose = Pose::from_translation(DVec3::new(3.0, 5.0, 0.0));
        let hull = mesh.footprint(&pose);

        assert_eq!(hull.points().len(), 4);
        assert!((hull.area() - 1.0).abs() < 1e-9);
        assert!(hull.centroid().abs_diff_eq(DVec2::new(3.0, 5.0), 1e-9));
        assert_eq!(hull.z_min(), 0.0);
        assert!((hull.z_max() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_wire_layout() {
        let mesh = Mesh::new(
            vec![DVec3::ZERO, DVec3::X, DVec3::Y],
            vec![Triangle::new(0, 1, 2)],
        )
        .unwrap();
        let json = serde_json::to_value(&mesh).unwrap();
        assert_eq!(json["vertices"][1]["x"], 1.0);
        assert_eq!(json["triangles"][0]["i1"], 0);
        assert_eq!(json["triangles"][0]["i3"], 2);

        let back: Mesh = serde_json::from_value(json).unwrap();
        assert_eq!(back, mesh);
    }

    #[test]
    fn test_invalid_wire_mesh_is_rejected() {
        let json = r#"{"vertices": [{"x": 0, "y": 0, "z": 0}], "triangles": [{"i1": 0, "i2": 1, "i3": 2}]}"#;
        assert!(serde_json::from_str::<Mesh>(json).is_err());
    }
}
