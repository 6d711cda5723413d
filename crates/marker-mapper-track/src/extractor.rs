//! Per-frame camera poses against a fixed marker map.

use std::io::{self, Write};

use log::{debug, warn};
use marker_mapper_core::{CameraModel, FrameRecord, MarkerMap};
use serde::{Deserialize, Serialize};

use crate::convention::CoordinateConvention;
use crate::correspondence::build_correspondences;
use crate::euler::matrix_to_xyz_euler;
use crate::pnp::{IterativePnp, PnpError, PnpSolver, MIN_CORRESPONDENCES};

/// Camera orientation and position for one frame, convention applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub frame: usize,
    /// `[x, y, z]` Euler angles in radians.
    pub euler: [f64; 3],
    pub translation: [f64; 3],
}

impl TrackingRecord {
    /// `frame, ex, ey, ez, tx, ty, tz` as numbers.
    pub fn values(&self) -> [f64; 7] {
        [
            self.frame as f64,
            self.euler[0],
            self.euler[1],
            self.euler[2],
            self.translation[0],
            self.translation[1],
            self.translation[2],
        ]
    }

    /// One line of the tracking file: seven comma-separated values with eight
    /// decimals each, no trailing newline.
    pub fn to_line(&self) -> String {
        self.values()
            .iter()
            .map(|v| format!("{v:.8}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse a line produced by [`Self::to_line`].
    pub fn parse_line(line: &str) -> Option<Self> {
        let values = line
            .trim()
            .split(',')
            .map(|s| s.trim().parse::<f64>().ok())
            .collect::<Option<Vec<_>>>()?;
        let [frame, ex, ey, ez, tx, ty, tz] = values.as_slice() else {
            return None;
        };
        if *frame < 0.0 || frame.fract() != 0.0 {
            return None;
        }
        Some(Self {
            frame: *frame as usize,
            euler: [*ex, *ey, *ez],
            translation: [*tx, *ty, *tz],
        })
    }
}

/// Why a frame produced no pose. Never fatal for a run.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TrackError {
    #[error("frame {frame}: {points} mapped corners, at least 4 needed")]
    NoCorrespondences { frame: usize, points: usize },
    #[error("frame {frame}: pose estimation failed: {source}")]
    Pnp {
        frame: usize,
        #[source]
        source: PnpError,
    },
}

/// Outcome for one frame of a sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameTrack {
    pub frame: usize,
    pub result: Result<TrackingRecord, TrackError>,
}

impl FrameTrack {
    pub fn record(&self) -> Option<&TrackingRecord> {
        self.result.as_ref().ok()
    }
}

/// Turns frames into [`TrackingRecord`]s using a resolved map.
#[derive(Clone, Debug)]
pub struct CameraPoseExtractor<'a, S = IterativePnp> {
    pub map: &'a MarkerMap,
    pub camera: &'a CameraModel,
    pub marker_size: f64,
    pub convention: CoordinateConvention,
    pub solver: S,
}

impl<'a> CameraPoseExtractor<'a> {
    /// Extractor with the default convention and [`IterativePnp`].
    pub fn new(map: &'a MarkerMap, camera: &'a CameraModel, marker_size: f64) -> Self {
        Self {
            map,
            camera,
            marker_size,
            convention: CoordinateConvention::default(),
            solver: IterativePnp::default(),
        }
    }
}

impl<'a, S: PnpSolver> CameraPoseExtractor<'a, S> {
    pub fn with_convention(mut self, convention: CoordinateConvention) -> Self {
        self.convention = convention;
        self
    }

    pub fn with_solver<T: PnpSolver>(self, solver: T) -> CameraPoseExtractor<'a, T> {
        CameraPoseExtractor {
            map: self.map,
            camera: self.camera,
            marker_size: self.marker_size,
            convention: self.convention,
            solver,
        }
    }

    /// Pose of the camera in `frame`, or why there is none.
    pub fn extract(&self, frame_index: usize, frame: &FrameRecord) -> Result<TrackingRecord, TrackError> {
        let corr = build_correspondences(frame, self.map, self.marker_size, &self.convention);
        if corr.len() < MIN_CORRESPONDENCES {
            return Err(TrackError::NoCorrespondences {
                frame: frame_index,
                points: corr.len(),
            });
        }

        let pose = self
            .solver
            .solve(&corr.object, &corr.image, self.camera)
            .map_err(|source| TrackError::Pnp {
                frame: frame_index,
                source,
            })?;
        debug!(
            "frame {frame_index}: markers {:?}, rms {:.4}px",
            corr.markers, pose.rms_error
        );

        let transform = pose.transform();
        let euler = matrix_to_xyz_euler(&transform.rotation_matrix());
        Ok(TrackingRecord {
            frame: frame_index,
            euler: self.convention.euler(euler),
            translation: self.convention.translation(&transform.translation()),
        })
    }

    /// Extract every frame; failures are kept per frame and logged.
    pub fn track_all(&self, frames: &[FrameRecord]) -> Vec<FrameTrack> {
        frames
            .iter()
            .enumerate()
            .map(|(i, frame)| {
                let result = self.extract(i, frame);
                if let Err(err) = &result {
                    warn!("{err}");
                }
                FrameTrack { frame: i, result }
            })
            .collect()
    }
}

/// Write one line per tracked frame; failed frames leave a gap.
///
/// Returns the number of lines written.
pub fn write_tracking_lines<W: Write>(mut writer: W, tracks: &[FrameTrack]) -> io::Result<usize> {
    let mut written = 0;
    for record in tracks.iter().filter_map(FrameTrack::record) {
        writeln!(writer, "{}", record.to_line())?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}
