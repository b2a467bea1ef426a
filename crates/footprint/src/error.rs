//! Error types for geometry construction and decoding.

use thiserror::Error;

/// Errors produced while building or decoding geometry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// A triangle references a vertex that does not exist.
    #[error("triangle {triangle} references vertex {index}, but the mesh has {vertex_count} vertices")]
    VertexIndexOutOfRange {
        /// Position of the offending triangle.
        triangle: usize,
        /// The out-of-range vertex index.
        index: u32,
        /// Number of vertices in the mesh.
        vertex_count: usize,
    },

    /// A pose encoding carries neither `x` nor a `pos`/`t` group.
    #[error("pose has no position (expected `x,y,z` or a `pos`/`t` group)")]
    MissingPosition,

    /// A pose encoding carries neither `qx` nor a `rot`/`R` group.
    #[error("pose has no orientation (expected `qx,qy,qz,qw` or a `rot`/`R` group)")]
    MissingOrientation,

    /// A quaternion with zero length cannot describe a rotation.
    #[error("pose orientation quaternion has zero length")]
    DegenerateRotation,
}
