//! Reprojection error of a candidate marker pose across all frames.

use marker_mapper_core::{
    marker_corners, CameraModel, FrameRecord, MarkerId, MarkerMap, RigidTransform,
};
use nalgebra::{Point2, Point3};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Scores candidate base-to-target poses against the observed corners.
///
/// Frame 0 is the map's defining observation and never contributes. In every
/// other frame that observes the target, each co-visible mapped marker acts as
/// a reference: the candidate is chained through it into the camera, the
/// target's corners are projected, and the squared pixel residuals are added.
#[derive(Clone, Debug)]
pub struct ReprojectionScorer<'a> {
    frames: &'a [FrameRecord],
    camera: &'a CameraModel,
    corners: [Point3<f64>; 4],
}

impl<'a> ReprojectionScorer<'a> {
    pub fn new(frames: &'a [FrameRecord], camera: &'a CameraModel, marker_size: f64) -> Self {
        Self {
            frames,
            camera,
            corners: marker_corners(marker_size),
        }
    }

    #[inline]
    pub fn frames(&self) -> &'a [FrameRecord] {
        self.frames
    }

    /// Total squared pixel error, or the first running total above `error_bound`.
    ///
    /// The returned value is exact whenever it is `<= error_bound`. A corner
    /// that projects at or behind the camera makes the total `+∞`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "trace", skip_all, fields(target = target_id, bound = error_bound))
    )]
    pub fn score(
        &self,
        candidate: &RigidTransform,
        map: &MarkerMap,
        target_id: MarkerId,
        error_bound: f64,
    ) -> f64 {
        let mut total = 0.0;
        for contribution in self.contributions(candidate, map, target_id) {
            total += contribution;
            if total > error_bound {
                return total;
            }
        }
        total
    }

    /// Per-reference error terms in evaluation order (frame, then map order).
    pub fn contributions<'s>(
        &'s self,
        candidate: &'s RigidTransform,
        map: &'s MarkerMap,
        target_id: MarkerId,
    ) -> impl Iterator<Item = f64> + 's {
        let frames: &'s [FrameRecord] = self.frames;
        let camera: &'s CameraModel = self.camera;
        let corners = self.corners;
        frames
            .iter()
            .skip(1)
            .filter_map(move |frame| Some((frame, frame.observation(target_id)?)))
            .flat_map(move |(frame, observed)| {
                map.iter()
                    .filter(move |entry| entry.id != target_id)
                    .filter_map(move |entry| {
                        let camera_to_ref = frame.camera_to_marker(entry.id)?;
                        let camera_to_target =
                            camera_to_ref * entry.base_to_marker.inverse() * *candidate;
                        Some(corner_error(
                            camera,
                            &corners,
                            &camera_to_target,
                            &observed.corners,
                        ))
                    })
            })
    }
}

fn corner_error(
    camera: &CameraModel,
    corners: &[Point3<f64>; 4],
    camera_to_target: &RigidTransform,
    observed: &[Point2<f64>; 4],
) -> f64 {
    let mut err = 0.0;
    for (corner, seen) in corners.iter().zip(observed) {
        match camera.project_point(&camera_to_target.transform_point(corner)) {
            Some(projected) => err += (projected - seen).norm_squared(),
            None => return f64::INFINITY,
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use marker_mapper_core::synthetic::chain_scene;
    use nalgebra::Vector3;

    fn nudged(t: &RigidTransform) -> RigidTransform {
        *t * RigidTransform::from_vectors(
            &Vector3::new(0.01, -0.02, 0.0),
            &Vector3::new(0.005, 0.0, -0.01),
        )
    }

    #[test]
    fn exact_pose_scores_near_zero() {
        let scene = chain_scene();
        let frames = scene.frames();
        let scorer = ReprojectionScorer::new(&frames, &scene.camera, scene.marker_size);
        let map = MarkerMap::new(0);

        let truth = scene.marker_pose(1).unwrap();
        let err = scorer.score(truth, &map, 1, f64::INFINITY);
        assert!(err < 1e-12, "err = {err}");
        assert!(scorer.score(&nudged(truth), &map, 1, f64::INFINITY) > 1.0);
    }

    #[test]
    fn frame_zero_never_contributes() {
        let scene = chain_scene();
        let frames = scene.frames();
        let map = MarkerMap::new(0);
        let candidate = nudged(scene.marker_pose(1).unwrap());

        // frame 0 alone: nothing to score
        let only_first = ReprojectionScorer::new(&frames[..1], &scene.camera, scene.marker_size);
        assert_eq!(only_first.score(&candidate, &map, 1, f64::INFINITY), 0.0);
        // frame 1 sees 1 together with 0
        let first_two = ReprojectionScorer::new(&frames[..2], &scene.camera, scene.marker_size);
        assert!(first_two.score(&candidate, &map, 1, f64::INFINITY) > 0.0);
    }

    #[test]
    fn total_is_monotone_in_processed_frames() {
        let scene = chain_scene();
        let frames = scene.frames();
        let mut map = MarkerMap::new(0);
        map.insert(2, *scene.marker_pose(2).unwrap()).unwrap();
        let candidate = nudged(scene.marker_pose(1).unwrap());

        let mut previous = 0.0;
        for n in 1..=frames.len() {
            let scorer = ReprojectionScorer::new(&frames[..n], &scene.camera, scene.marker_size);
            let err = scorer.score(&candidate, &map, 1, f64::INFINITY);
            assert!(err >= previous, "{err} < {previous} after {n} frames");
            previous = err;
        }
        assert!(previous > 0.0);
    }

    #[test]
    fn zero_bound_stops_at_first_nonzero_term() {
        let scene = chain_scene();
        let frames = scene.frames();
        let scorer = ReprojectionScorer::new(&frames, &scene.camera, scene.marker_size);
        let mut map = MarkerMap::new(0);
        map.insert(2, *scene.marker_pose(2).unwrap()).unwrap();
        let candidate = nudged(scene.marker_pose(1).unwrap());

        let terms: Vec<f64> = scorer.contributions(&candidate, &map, 1).collect();
        assert!(terms.len() > 1);
        let first = terms.iter().copied().find(|&t| t > 0.0).unwrap();

        let bounded = scorer.score(&candidate, &map, 1, 0.0);
        assert_eq!(bounded, first);
        let full = scorer.score(&candidate, &map, 1, f64::INFINITY);
        assert!(bounded < full);
    }

    #[test]
    fn corners_behind_camera_score_infinite() {
        let scene = chain_scene();
        let frames = scene.frames();
        let scorer = ReprojectionScorer::new(&frames, &scene.camera, scene.marker_size);
        let map = MarkerMap::new(0);

        // move the candidate far behind every camera
        let behind = RigidTransform::from_vectors(&Vector3::zeros(), &Vector3::new(0.3, 0.0, 10.0));
        let err = scorer.score(&behind, &map, 1, 1e7);
        assert!(err.is_infinite());
    }
}
