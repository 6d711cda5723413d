//! The marker map: base-to-marker poses keyed by marker id.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::frame::{marker_corners, MarkerId};
use crate::RigidTransform;

/// Errors raised by map mutation or validation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MapError {
    #[error("marker {0} is already in the map")]
    DuplicateMarker(MarkerId),
    #[error("map has no entries")]
    Empty,
    #[error("base marker {0} must map to the identity transform")]
    BaseNotIdentity(MarkerId),
}

/// One resolved marker.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapEntry {
    pub id: MarkerId,
    pub base_to_marker: RigidTransform,
}

/// Insertion-ordered marker map seeded with the base marker at identity.
///
/// Entries are never overwritten or removed; the first entry is always the
/// base marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<MapEntry>", into = "Vec<MapEntry>")]
pub struct MarkerMap {
    entries: Vec<MapEntry>,
}

impl MarkerMap {
    pub fn new(base_id: MarkerId) -> Self {
        Self {
            entries: vec![MapEntry {
                id: base_id,
                base_to_marker: RigidTransform::identity(),
            }],
        }
    }

    /// Rebuild a map from stored entries (base first, unique ids).
    pub fn from_entries(entries: Vec<MapEntry>) -> Result<Self, MapError> {
        let base = entries.first().ok_or(MapError::Empty)?;
        let deviation = (base.base_to_marker.matrix() - nalgebra::Matrix4::identity()).amax();
        if deviation > crate::RIGID_TOLERANCE {
            return Err(MapError::BaseNotIdentity(base.id));
        }
        let mut map = Self::new(base.id);
        for entry in entries.into_iter().skip(1) {
            map.insert(entry.id, entry.base_to_marker)?;
        }
        Ok(map)
    }

    #[inline]
    pub fn base_id(&self) -> MarkerId {
        self.entries[0].id
    }

    /// Append a new entry. Existing ids are never replaced.
    pub fn insert(&mut self, id: MarkerId, base_to_marker: RigidTransform) -> Result<(), MapError> {
        if self.contains(id) {
            return Err(MapError::DuplicateMarker(id));
        }
        self.entries.push(MapEntry { id, base_to_marker });
        Ok(())
    }

    pub fn get(&self, id: MarkerId) -> Option<&RigidTransform> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| &e.base_to_marker)
    }

    #[inline]
    pub fn contains(&self, id: MarkerId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, MapEntry> {
        self.entries.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = MarkerId> + '_ {
        self.entries.iter().map(|e| e.id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`: the base entry is present from construction.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry in insertion order that is visible in the frame and is not `exclude_id`.
    pub fn find_reference<I>(&self, frame_ids: I, exclude_id: MarkerId) -> Option<&MapEntry>
    where
        I: IntoIterator<Item = MarkerId>,
        I::IntoIter: Clone,
    {
        let ids = frame_ids.into_iter();
        self.entries
            .iter()
            .find(|e| e.id != exclude_id && ids.clone().any(|id| id == e.id))
    }

    /// Corners of a mapped marker expressed in the base frame.
    pub fn marker_corners_in_base(&self, id: MarkerId, marker_size: f64) -> Option<[Point3<f64>; 4]> {
        let t = self.get(id)?;
        Some(marker_corners(marker_size).map(|p| t.transform_point(&p)))
    }
}

impl<'a> IntoIterator for &'a MarkerMap {
    type Item = &'a MapEntry;
    type IntoIter = std::slice::Iter<'a, MapEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl TryFrom<Vec<MapEntry>> for MarkerMap {
    type Error = MapError;

    fn try_from(entries: Vec<MapEntry>) -> Result<Self, Self::Error> {
        Self::from_entries(entries)
    }
}

impl From<MarkerMap> for Vec<MapEntry> {
    fn from(map: MarkerMap) -> Self {
        map.entries
    }
}
