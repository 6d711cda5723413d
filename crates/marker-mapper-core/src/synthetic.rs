//! Synthetic marker scenes.
//!
//! Builds exact frame records from ground-truth marker and camera poses:
//! every observation carries the true camera-to-marker pose and the projected
//! corner pixels. Visibility is chosen explicitly per frame so tests can
//! shape the co-visibility graph.

use nalgebra::{Rotation3, Vector3};

use crate::{
    marker_corners, CameraIntrinsics, CameraModel, FrameRecord, MarkerId, MarkerMap,
    MarkerObservation, RigidTransform,
};

/// Ground truth for a set of markers and camera poses.
#[derive(Clone, Debug)]
pub struct SyntheticScene {
    pub camera: CameraModel,
    pub marker_size: f64,
    /// Base-to-marker poses; the first entry is the base marker at identity.
    pub markers: Vec<(MarkerId, RigidTransform)>,
    /// Per-frame transforms mapping base-frame points into the camera frame.
    pub camera_poses: Vec<RigidTransform>,
    /// Ids reported by the detector in each frame, in detection order.
    pub visibility: Vec<Vec<MarkerId>>,
}

impl SyntheticScene {
    pub fn marker_pose(&self, id: MarkerId) -> Option<&RigidTransform> {
        self.markers.iter().find(|(m, _)| *m == id).map(|(_, t)| t)
    }

    pub fn marker_ids(&self) -> Vec<MarkerId> {
        self.markers.iter().map(|(id, _)| *id).collect()
    }

    /// The exact map this scene should resolve to.
    pub fn ground_truth_map(&self) -> MarkerMap {
        let mut map = MarkerMap::new(self.markers[0].0);
        for (id, pose) in self.markers.iter().skip(1) {
            // ids in `markers` are unique by construction
            let _ = map.insert(*id, *pose);
        }
        map
    }

    /// Observation of one marker from one camera pose.
    ///
    /// `None` when the marker is unknown or any corner falls behind the camera.
    pub fn observe(&self, frame: usize, id: MarkerId) -> Option<MarkerObservation> {
        let base_to_marker = self.marker_pose(id)?;
        let camera_to_marker = self.camera_poses.get(frame)?.compose(base_to_marker);
        let cam_pts = camera_to_marker.transform_points(&marker_corners(self.marker_size));
        let projected = self.camera.project_points(&cam_pts)?;
        Some(MarkerObservation {
            id,
            corners: [projected[0], projected[1], projected[2], projected[3]],
            rvec: camera_to_marker.rvec(),
            tvec: camera_to_marker.translation(),
        })
    }

    pub fn frames(&self) -> Vec<FrameRecord> {
        self.visibility
            .iter()
            .enumerate()
            .map(|(f, ids)| {
                FrameRecord::new(ids.iter().filter_map(|&id| self.observe(f, id)).collect())
            })
            .collect()
    }

    /// Frames with deterministic pseudo-noise on corners and poses.
    ///
    /// Corner coordinates move by up to `pixel` pixels, rotation vectors by up
    /// to `angle` radians and translations by up to `offset` per component.
    pub fn noisy_frames(&self, pixel: f64, angle: f64, offset: f64) -> Vec<FrameRecord> {
        let mut frames = self.frames();
        for (f, frame) in frames.iter_mut().enumerate() {
            for (m, obs) in frame.markers.iter_mut().enumerate() {
                let seed = (f * 31 + m * 7) as f64;
                for (c, corner) in obs.corners.iter_mut().enumerate() {
                    corner.x += pixel * wobble(seed + c as f64);
                    corner.y += pixel * wobble(seed + 0.5 + c as f64);
                }
                for i in 0..3 {
                    obs.rvec[i] += angle * wobble(seed + 10.0 + i as f64);
                    obs.tvec[i] += offset * wobble(seed + 20.0 + i as f64);
                }
            }
        }
        frames
    }
}

/// Bounded, well-spread values in `[-1, 1]`.
fn wobble(x: f64) -> f64 {
    (x * 12.9898).sin()
}

/// Camera pose at distance `depth` in front of the base plane, looking at `(x, y)`.
///
/// `tilt` is a small extra rotation (axis-angle, camera frame).
pub fn camera_facing_plane(x: f64, y: f64, depth: f64, tilt: Vector3<f64>) -> RigidTransform {
    // camera z axis points towards -z of the base frame
    let flip = Rotation3::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI);
    let rot = Rotation3::new(tilt) * flip;
    let center = Vector3::new(x, y, depth);
    let t = -(rot * center);
    RigidTransform::from_parts(&rot, &t)
}

/// Five markers in a row where each one is only seen next to its neighbours.
///
/// Frame visibility forms a chain `0-1-2-3-4` plus one frame with `0, 1, 2`,
/// so marker 2 can be reached from the base directly while markers 3 and 4
/// need earlier resolutions.
pub fn chain_scene() -> SyntheticScene {
    let camera = CameraModel::pinhole(CameraIntrinsics {
        fx: 1000.0,
        fy: 1000.0,
        cx: 640.0,
        cy: 360.0,
    });
    let spacing = 0.3;
    let markers = (0..5u32)
        .map(|i| {
            let pose = if i == 0 {
                RigidTransform::identity()
            } else {
                let k = i as f64;
                RigidTransform::from_vectors(
                    &Vector3::new(0.05 * k, -0.04 * k, 0.15 * k),
                    &Vector3::new(spacing * k, 0.02 * k, 0.03 * k),
                )
            };
            (i, pose)
        })
        .collect::<Vec<_>>();

    let visibility: Vec<Vec<MarkerId>> = vec![
        vec![0, 1],
        vec![1, 0],
        vec![1, 2],
        vec![2, 3],
        vec![3, 4],
        vec![0, 1, 2],
        vec![4, 3],
        vec![2, 3, 4],
    ];
    let camera_poses = visibility
        .iter()
        .enumerate()
        .map(|(f, ids)| {
            let mean_x =
                ids.iter().map(|&id| id as f64 * spacing).sum::<f64>() / ids.len() as f64;
            let k = f as f64;
            camera_facing_plane(
                mean_x + 0.01 * k,
                0.05 - 0.02 * k,
                1.2 + 0.05 * k,
                Vector3::new(0.02 * k.sin(), -0.03 * k.cos(), 0.04 * k.sin()),
            )
        })
        .collect();

    SyntheticScene {
        camera,
        marker_size: 0.1,
        markers,
        camera_poses,
        visibility,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    #[test]
    fn camera_facing_plane_sees_target_on_axis() {
        let pose = camera_facing_plane(0.4, -0.1, 2.0, Vector3::zeros());
        let p = pose.transform_point(&Point3::new(0.4, -0.1, 0.0));
        assert_relative_eq!(p, Point3::new(0.0, 0.0, 2.0), epsilon = 1e-12);
    }

    #[test]
    fn observations_are_consistent_with_ground_truth() {
        let scene = chain_scene();
        let frames = scene.frames();
        assert_eq!(frames.len(), scene.visibility.len());
        for (f, frame) in frames.iter().enumerate() {
            assert_eq!(frame.ids().collect::<Vec<_>>(), scene.visibility[f]);
            for obs in &frame.markers {
                let expected = scene.camera_poses[f].compose(scene.marker_pose(obs.id).unwrap());
                assert_relative_eq!(
                    *obs.camera_to_marker().matrix(),
                    *expected.matrix(),
                    epsilon = 1e-9
                );
                for c in &obs.corners {
                    assert!(c.x > 0.0 && c.x < 1280.0 && c.y > 0.0 && c.y < 720.0);
                }
            }
        }
    }

    #[test]
    fn noise_is_bounded_and_nonzero() {
        let scene = chain_scene();
        let exact = scene.frames();
        let noisy = scene.noisy_frames(0.5, 0.01, 0.002);
        let mut moved = false;
        for (a, b) in exact.iter().zip(&noisy) {
            assert_eq!(a.ids().collect::<Vec<_>>(), b.ids().collect::<Vec<_>>());
            for (oa, ob) in a.markers.iter().zip(&b.markers) {
                for (ca, cb) in oa.corners.iter().zip(&ob.corners) {
                    assert!((ca.x - cb.x).abs() <= 0.5 && (ca.y - cb.y).abs() <= 0.5);
                    moved |= ca != cb;
                }
                assert!((oa.rvec - ob.rvec).amax() <= 0.01);
                assert!((oa.tvec - ob.tvec).amax() <= 0.002);
            }
        }
        assert!(moved);
    }
}
