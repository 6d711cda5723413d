//! Closed-form base-to-marker candidates from a single frame.

use marker_mapper_core::{FrameRecord, MapEntry, MarkerId, MarkerMap, RigidTransform};

/// Camera-to-base transform implied by one mapped reference seen in `frame`.
///
/// `None` when the reference marker is not observed in the frame.
pub fn camera_to_base(frame: &FrameRecord, reference: &MapEntry) -> Option<RigidTransform> {
    let camera_to_ref = frame.camera_to_marker(reference.id)?;
    Some(camera_to_ref * reference.base_to_marker.inverse())
}

/// Base-to-target pose from the first mapped marker co-visible with the target.
///
/// The reference is picked with [`MarkerMap::find_reference`], i.e. the first
/// map entry in insertion order that the frame observes and that is not the
/// target itself. Returns `None` when there is no such reference or the target
/// is absent from the frame.
pub fn solve_base_to_target(
    frame: &FrameRecord,
    map: &MarkerMap,
    target_id: MarkerId,
) -> Option<RigidTransform> {
    let reference = map.find_reference(frame.ids(), target_id)?;
    let camera_to_target = frame.camera_to_marker(target_id)?;
    let camera_to_base = camera_to_base(frame, reference)?;
    Some(camera_to_base.inverse() * camera_to_target)
}
