//! 2-D/3-D point pairs for one frame against a resolved map.

use marker_mapper_core::{FrameRecord, MarkerId, MarkerMap};
use nalgebra::{Point2, Point3};

use crate::convention::CoordinateConvention;

/// Matched image corners and base-frame object corners.
///
/// Four entries per marker, in detector corner order; markers follow the
/// frame's detection order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Correspondences {
    pub image: Vec<Point2<f64>>,
    pub object: Vec<Point3<f64>>,
    /// Markers that contributed, one id per four points.
    pub markers: Vec<MarkerId>,
}

impl Correspondences {
    pub fn len(&self) -> usize {
        self.image.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }
}

/// Collect corners of every mapped marker visible in `frame`.
///
/// Unmapped markers are skipped; a marker listed twice contributes once, from
/// its first observation.
pub fn build_correspondences(
    frame: &FrameRecord,
    map: &MarkerMap,
    marker_size: f64,
    convention: &CoordinateConvention,
) -> Correspondences {
    let mut out = Correspondences::default();
    for obs in &frame.markers {
        if out.markers.contains(&obs.id) {
            continue;
        }
        let Some(corners) = map.marker_corners_in_base(obs.id, marker_size) else {
            continue;
        };
        out.image.extend_from_slice(&obs.corners);
        out.object
            .extend(corners.iter().map(|p| convention.object_point(p)));
        out.markers.push(obs.id);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use marker_mapper_core::synthetic::chain_scene;

    #[test]
    fn follows_detection_order_and_skips_unmapped() {
        let scene = chain_scene();
        let frames = scene.frames();
        let map = scene.ground_truth_map();

        // frame 6 lists 4 before 3
        let c = build_correspondences(&frames[6], &map, scene.marker_size, &CoordinateConvention::IDENTITY);
        assert_eq!(c.markers, vec![4, 3]);
        assert_eq!(c.len(), 8);
        assert_eq!(c.image[..4], frames[6].markers[0].corners[..]);

        let mut partial = MarkerMap::new(0);
        partial.insert(3, *scene.marker_pose(3).unwrap()).unwrap();
        let c = build_correspondences(&frames[6], &partial, scene.marker_size, &CoordinateConvention::IDENTITY);
        assert_eq!(c.markers, vec![3]);
        assert_eq!(c.image[..], frames[6].markers[1].corners[..]);
    }

    #[test]
    fn object_points_project_onto_observed_corners() {
        let scene = chain_scene();
        let frames = scene.frames();
        let map = scene.ground_truth_map();
        let c = build_correspondences(&frames[5], &map, scene.marker_size, &CoordinateConvention::IDENTITY);
        assert_eq!(c.len(), 12);
        for (obj, img) in c.object.iter().zip(&c.image) {
            let cam = scene.camera_poses[5].transform_point(obj);
            let px = scene.camera.project_point(&cam).unwrap();
            assert_relative_eq!(px, *img, epsilon = 1e-8);
        }
    }

    #[test]
    fn default_convention_negates_object_y() {
        let scene = chain_scene();
        let frames = scene.frames();
        let map = scene.ground_truth_map();
        let raw = build_correspondences(&frames[2], &map, scene.marker_size, &CoordinateConvention::IDENTITY);
        let flipped = build_correspondences(&frames[2], &map, scene.marker_size, &CoordinateConvention::default());
        for (a, b) in raw.object.iter().zip(&flipped.object) {
            assert_eq!((a.x, -a.y, a.z), (b.x, b.y, b.z));
        }
        assert_eq!(raw.image, flipped.image);
    }

    #[test]
    fn nothing_mapped_means_no_points() {
        let scene = chain_scene();
        let frames = scene.frames();
        let map = MarkerMap::new(9);
        let c = build_correspondences(&frames[7], &map, scene.marker_size, &CoordinateConvention::default());
        assert!(c.is_empty());
        assert!(c.markers.is_empty());
    }
}
