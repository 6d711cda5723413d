use approx::assert_relative_eq;
use marker_mapper_core::synthetic::chain_scene;
use marker_mapper_core::{MarkerMap, RigidTransform};
use marker_mapper_solve::{MapResolver, ReprojectionScorer, ResolverParams, RngJitter};
use marker_mapper_track::{
    xyz_euler_to_matrix, CameraPoseExtractor, CoordinateConvention,
    TrackError,
};
use nalgebra::{Rotation3, Vector3};

fn resolved_map() -> (marker_mapper_core::synthetic::SyntheticScene, MarkerMap) {
    let scene = chain_scene();
    let frames = scene.frames();
    let mut map = MarkerMap::new(0);
    let report = MapResolver::new(
        ReprojectionScorer::new(&frames, &scene.camera, scene.marker_size),
        ResolverParams::default(),
    )
    .resolve(&mut map, &[1, 2, 3, 4], &mut RngJitter::seeded(17));
    assert!(report.unresolved.is_empty());
    (scene, map)
}

#[test]
fn raw_convention_recovers_every_camera_pose() {
    let (scene, map) = resolved_map();
    let frames = scene.frames();
    let extractor = CameraPoseExtractor::new(&map, &scene.camera, scene.marker_size)
        .with_convention(CoordinateConvention::IDENTITY);

    for (f, track) in extractor.track_all(&frames).iter().enumerate() {
        let record = track.record().expect("every frame sees a mapped marker");
        let truth = &scene.camera_poses[f];
        // compare matrices: tx sits next to ±π for a camera facing the plane
        assert_relative_eq!(
            xyz_euler_to_matrix(record.euler),
            truth.rotation_matrix(),
            epsilon = 1e-6
        );
        for k in 0..3 {
            assert_relative_eq!(record.translation[k], truth.translation()[k], epsilon = 1e-6);
        }
    }
}

#[test]
fn default_convention_on_the_base_plane() {
    let (scene, _) = resolved_map();
    let frames = scene.frames();
    // only the base marker: its corners lie in z = 0, where negating y is a
    // half turn about x
    let base_only = MarkerMap::new(0);
    let extractor = CameraPoseExtractor::new(&base_only, &scene.camera, scene.marker_size);

    let record = extractor.extract(0, &frames[0]).expect("base visible in frame 0");
    let half_turn = RigidTransform::from_parts(
        &Rotation3::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI),
        &Vector3::zeros(),
    );
    let expected = scene.camera_poses[0] * half_turn;
    let t = expected.translation();

    let [ex, ey, ez] = record.euler;
    assert_relative_eq!(
        xyz_euler_to_matrix([-ex, ey, -ez]),
        expected.rotation_matrix(),
        epsilon = 1e-6
    );
    assert_relative_eq!(record.translation[0], t.x, epsilon = 1e-6);
    assert_relative_eq!(record.translation[1], -t.y, epsilon = 1e-6);
    assert_relative_eq!(record.translation[2], -t.z, epsilon = 1e-6);
}

#[test]
fn frame_with_only_unmapped_markers_reports_failure() {
    let (scene, _) = resolved_map();
    let frames = scene.frames();
    let mut map = MarkerMap::new(10);
    map.insert(11, RigidTransform::identity()).unwrap();
    let extractor = CameraPoseExtractor::new(&map, &scene.camera, scene.marker_size);

    // frame 7 sees markers 2, 3 and 4, none of them mapped
    assert_eq!(frames[7].markers.len(), 3);
    let err = extractor.extract(7, &frames[7]).unwrap_err();
    assert_eq!(err, TrackError::NoCorrespondences { frame: 7, points: 0 });
}
