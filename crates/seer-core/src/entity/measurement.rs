//! Sensor measurements and the quality heuristic used to rank them.

use footprint::{ConvexHull2D, Pose};
use glam::{DVec3, UVec2};
use serde::{Deserialize, Serialize};

// =============================================================================
// Image Mask
// =============================================================================

/// Set of image pixels belonging to one segmented percept.
///
/// Pixels are stored as row-major indices into a `width x height` image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMask {
    width: u32,
    height: u32,
    #[serde(default)]
    pixels: Vec<u32>,
}

impl ImageMask {
    /// Creates an empty mask for an image of the given size.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: Vec::new(),
        }
    }

    /// Adds the pixel at `(x, y)`. Pixels outside the image are ignored.
    pub fn add_point(&mut self, x: u32, y: u32) {
        if x < self.width && y < self.height {
            self.pixels.push(y * self.width + x);
        }
    }

    /// Image width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of pixels in the mask.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// Returns true if no pixel is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Iterates over the `(x, y)` coordinates of the mask pixels.
    pub fn points(&self) -> impl Iterator<Item = UVec2> + '_ {
        let width = self.width.max(1);
        self.pixels.iter().map(move |&i| UVec2::new(i % width, i / width))
    }
}

// =============================================================================
// Measurement
// =============================================================================

/// One observation of an entity by a sensor.
///
/// Measurements are immutable once created and are shared between entity
/// histories and snapshots by reference count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    timestamp: f64,
    sensor_pose: Pose,
    #[serde(default)]
    mask: ImageMask,
    #[serde(default)]
    points: Vec<DVec3>,
}

impl Measurement {
    /// Creates a measurement.
    ///
    /// `points` are the segmented points of the percept in the world frame.
    #[must_use]
    pub fn new(timestamp: f64, sensor_pose: Pose, mask: ImageMask, points: Vec<DVec3>) -> Self {
        Self {
            timestamp,
            sensor_pose,
            mask,
            points,
        }
    }

    /// Acquisition time in seconds.
    #[must_use]
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Pose of the sensor at acquisition time.
    #[must_use]
    pub fn sensor_pose(&self) -> &Pose {
        &self.sensor_pose
    }

    /// Image mask of the percept.
    #[must_use]
    pub fn mask(&self) -> &ImageMask {
        &self.mask
    }

    /// Segmented points in the world frame.
    #[must_use]
    pub fn points(&self) -> &[DVec3] {
        &self.points
    }

    /// Mean of the segmented points, if there are any.
    #[must_use]
    pub fn centroid(&self) -> Option<DVec3> {
        if self.points.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.points.len() as f64;
        Some(self.points.iter().sum::<DVec3>() / n)
    }

    /// Ground-plane footprint of the segmented points.
    #[must_use]
    pub fn footprint(&self) -> ConvexHull2D {
        ConvexHull2D::from_points_3d(self.points.iter().copied())
    }
}

// =============================================================================
// Quality Heuristic
// =============================================================================

/// Ranks measurements to select an entity's best measurement.
///
/// A higher score is better. `None` means the measurement can never become
/// the best one (for instance an empty or fully occluded mask).
pub trait MeasurementQuality: Send + Sync {
    /// Scores a measurement.
    fn score(&self, measurement: &Measurement) -> Option<f64>;
}

/// Default heuristic: the number of unoccluded mask pixels.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaskArea;

impl MeasurementQuality for MaskArea {
    fn score(&self, measurement: &Measurement) -> Option<f64> {
        let mask = measurement.mask();
        if mask.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        Some(mask.len() as f64)
    }
}
