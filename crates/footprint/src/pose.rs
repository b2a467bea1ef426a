//! Rigid 3-D poses.
//!
//! A [`Pose`] is a translation plus a unit quaternion. Poses serialize as the
//! flat record `x, y, z, qx, qy, qz, qw`. Decoding additionally accepts the
//! nested form used by older collaborators: a `pos` (or `t`) group holding
//! `x, y, z` and a `rot` (or `R`) group holding the row-major rotation matrix
//! fields `xx .. zz`.

use std::ops::Mul;

use glam::{DMat3, DQuat, DVec3, EulerRot};
use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// Rigid transform: rotation followed by translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PoseRepr", into = "PoseWire")]
pub struct Pose {
    /// Translation in meters.
    pub translation: DVec3,
    /// Orientation as a unit quaternion.
    pub rotation: DQuat,
}

impl Pose {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        translation: DVec3::ZERO,
        rotation: DQuat::IDENTITY,
    };

    /// Create a pose from a translation and rotation.
    #[must_use]
    pub fn new(translation: DVec3, rotation: DQuat) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// Create a pure translation.
    #[must_use]
    pub fn from_translation(translation: DVec3) -> Self {
        Self::new(translation, DQuat::IDENTITY)
    }

    /// Create a pose from a position and roll/pitch/yaw angles (radians).
    ///
    /// The rotation is `Rz(yaw) * Ry(pitch) * Rx(roll)`.
    #[must_use]
    pub fn from_xyz_rpy(x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Self {
        Self::new(
            DVec3::new(x, y, z),
            DQuat::from_euler(EulerRot::ZYX, yaw, pitch, roll),
        )
    }

    /// Apply this transform to a point.
    #[must_use]
    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.rotation * point + self.translation
    }

    /// The inverse transform.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self::new(-(rotation * self.translation), rotation)
    }

    /// Rotation as a 3x3 matrix.
    #[must_use]
    pub fn rotation_matrix(&self) -> DMat3 {
        DMat3::from_quat(self.rotation)
    }

    /// Whether two poses agree component-wise within `epsilon`.
    ///
    /// Quaternions `q` and `-q` describe the same rotation and are treated
    /// as equal.
    #[must_use]
    pub fn abs_diff_eq(&self, other: &Self, epsilon: f64) -> bool {
        self.translation.abs_diff_eq(other.translation, epsilon)
            && (self.rotation.abs_diff_eq(other.rotation, epsilon)
                || self.rotation.abs_diff_eq(-other.rotation, epsilon))
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Pose {
    type Output = Pose;

    /// `self * rhs` maps points from `rhs`'s frame through `self`.
    fn mul(self, rhs: Pose) -> Pose {
        Pose::new(
            self.rotation * rhs.translation + self.translation,
            (self.rotation * rhs.rotation).normalize(),
        )
    }
}

// =============================================================================
// Wire representation
// =============================================================================

#[derive(Serialize)]
struct PoseWire {
    x: f64,
    y: f64,
    z: f64,
    qx: f64,
    qy: f64,
    qz: f64,
    qw: f64,
}

impl From<Pose> for PoseWire {
    fn from(pose: Pose) -> Self {
        Self {
            x: pose.translation.x,
            y: pose.translation.y,
            z: pose.translation.z,
            qx: pose.rotation.x,
            qy: pose.rotation.y,
            qz: pose.rotation.z,
            qw: pose.rotation.w,
        }
    }
}

#[derive(Deserialize)]
struct TranslationRepr {
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    z: f64,
}

#[derive(Deserialize)]
struct RotationRepr {
    #[serde(default = "one")]
    xx: f64,
    #[serde(default)]
    xy: f64,
    #[serde(default)]
    xz: f64,
    #[serde(default)]
    yx: f64,
    #[serde(default = "one")]
    yy: f64,
    #[serde(default)]
    yz: f64,
    #[serde(default)]
    zx: f64,
    #[serde(default)]
    zy: f64,
    #[serde(default = "one")]
    zz: f64,
}

impl RotationRepr {
    fn to_quat(&self) -> DQuat {
        // Fields are row-major; glam matrices are built from columns.
        let m = DMat3::from_cols(
            DVec3::new(self.xx, self.yx, self.zx),
            DVec3::new(self.xy, self.yy, self.zy),
            DVec3::new(self.xz, self.yz, self.zz),
        );
        DQuat::from_mat3(&m).normalize()
    }
}

#[derive(Deserialize)]
struct PoseRepr {
    x: Option<f64>,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    z: f64,
    #[serde(alias = "t")]
    pos: Option<TranslationRepr>,
    qx: Option<f64>,
    #[serde(default)]
    qy: f64,
    #[serde(default)]
    qz: f64,
    #[serde(default = "one")]
    qw: f64,
    #[serde(alias = "R")]
    rot: Option<RotationRepr>,
}

fn one() -> f64 {
    1.0
}

impl TryFrom<PoseRepr> for Pose {
    type Error = GeometryError;

    fn try_from(repr: PoseRepr) -> Result<Self, Self::Error> {
        let translation = match (repr.x, &repr.pos) {
            (Some(x), _) => DVec3::new(x, repr.y, repr.z),
            (None, Some(t)) => DVec3::new(t.x, t.y, t.z),
            (None, None) => return Err(GeometryError::MissingPosition),
        };

        let rotation = match (repr.qx, &repr.rot) {
            (Some(qx), _) => {
                let q = DQuat::from_xyzw(qx, repr.qy, repr.qz, repr.qw);
                if q.length_squared() <= f64::EPSILON {
                    return Err(GeometryError::DegenerateRotation);
                }
                q.normalize()
            }
            (None, Some(r)) => r.to_quat(),
            (None, None) => return Err(GeometryError::MissingOrientation),
        };

        Ok(Self::new(translation, rotation))
    }
}
