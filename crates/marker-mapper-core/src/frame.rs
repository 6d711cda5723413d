//! Per-frame marker observations.
//!
//! A [`FrameRecord`] is what an external detector + single-marker pose
//! estimator produce for one image: the visible marker ids in detection
//! order, their corner quadrilaterals, and a camera-to-marker pose for each.

use nalgebra::{Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::RigidTransform;

/// Marker identifier as printed on the fiducial.
pub type MarkerId = u32;

/// Corners of a square marker of side `size` in its own frame.
///
/// Order matches the detector: top-left, top-right, bottom-right, bottom-left
/// with +Y up and the marker in the `z = 0` plane.
pub fn marker_corners(size: f64) -> [Point3<f64>; 4] {
    let h = size / 2.0;
    [
        Point3::new(-h, h, 0.0),
        Point3::new(h, h, 0.0),
        Point3::new(h, -h, 0.0),
        Point3::new(-h, -h, 0.0),
    ]
}

/// Invalid frame data. Fatal for a run.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("frame {frame}: marker {id} has non-finite corners")]
    NonFiniteCorners { frame: usize, id: MarkerId },
    #[error("frame {frame}: marker {id} has a non-finite pose")]
    NonFinitePose { frame: usize, id: MarkerId },
}

/// One detected marker in one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerObservation {
    pub id: MarkerId,
    /// Pixel corners in detector order.
    pub corners: [Point2<f64>; 4],
    /// Axis-angle rotation of the camera-to-marker pose.
    pub rvec: Vector3<f64>,
    /// Translation of the camera-to-marker pose.
    pub tvec: Vector3<f64>,
}

impl MarkerObservation {
    /// Pose mapping marker-frame points into the camera frame.
    pub fn camera_to_marker(&self) -> RigidTransform {
        RigidTransform::from_vectors(&self.rvec, &self.tvec)
    }
}

/// Everything observed in one frame. Immutable once produced.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub markers: Vec<MarkerObservation>,
}

impl FrameRecord {
    pub fn new(markers: Vec<MarkerObservation>) -> Self {
        Self { markers }
    }

    /// Visible ids in detection order.
    pub fn ids(&self) -> impl Iterator<Item = MarkerId> + Clone + '_ {
        self.markers.iter().map(|m| m.id)
    }

    pub fn contains(&self, id: MarkerId) -> bool {
        self.markers.iter().any(|m| m.id == id)
    }

    /// First observation of `id` in detection order.
    pub fn observation(&self, id: MarkerId) -> Option<&MarkerObservation> {
        self.markers.iter().find(|m| m.id == id)
    }

    pub fn camera_to_marker(&self, id: MarkerId) -> Option<RigidTransform> {
        self.observation(id).map(MarkerObservation::camera_to_marker)
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Reject non-finite inputs; `index` is only used for the error message.
    pub fn validate(&self, index: usize) -> Result<(), FrameError> {
        for m in &self.markers {
            if m.corners.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
                return Err(FrameError::NonFiniteCorners {
                    frame: index,
                    id: m.id,
                });
            }
            if m.rvec.iter().chain(m.tvec.iter()).any(|v| !v.is_finite()) {
                return Err(FrameError::NonFinitePose {
                    frame: index,
                    id: m.id,
                });
            }
        }
        Ok(())
    }
}
