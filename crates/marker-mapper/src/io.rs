//! JSON configuration, frame store and report helpers.

use std::{
    fs,
    path::{Path, PathBuf},
};

use marker_mapper_core::{
    CameraIntrinsics, CameraModel, Distortion, FrameRecord, MapEntry, MapError, MarkerId,
    MarkerMap, RigidTransform,
};
use marker_mapper_solve::{PassReport, ResolveReport, ResolverParams};
use marker_mapper_track::{CoordinateConvention, FrameTrack, PnpParams, TrackingRecord};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A config that parsed but does not describe a usable run.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("marker_size must be finite and positive, got {0}")]
    InvalidMarkerSize(f64),
    #[error("camera needs exactly one of `intrinsics` or `sensor`")]
    AmbiguousCamera,
    #[error("invalid camera intrinsics: fx/fy must be finite and non-zero")]
    InvalidIntrinsics,
    #[error("invalid sensor geometry: sizes and focal length must be positive")]
    InvalidSensor,
    #[error("distortion coefficients must be finite")]
    InvalidDistortion,
    #[error("marker_ids is empty")]
    NoCandidates,
}

/// Physical sensor description; converted to square-pixel intrinsics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorGeometry {
    pub width_px: u32,
    pub height_px: u32,
    pub sensor_width_mm: f64,
    pub focal_mm: f64,
}

impl SensorGeometry {
    pub fn intrinsics(&self) -> Result<CameraIntrinsics, ConfigError> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if self.width_px == 0
            || self.height_px == 0
            || !positive(self.sensor_width_mm)
            || !positive(self.focal_mm)
        {
            return Err(ConfigError::InvalidSensor);
        }
        Ok(CameraIntrinsics::from_sensor(
            self.width_px,
            self.height_px,
            self.sensor_width_mm,
            self.focal_mm,
        ))
    }
}

/// Camera section of the run config.
///
/// Either `intrinsics` (pixel units) or `sensor` must be given.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intrinsics: Option<CameraIntrinsics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor: Option<SensorGeometry>,
    #[serde(default)]
    pub distortion: Distortion,
}

impl CameraConfig {
    pub fn build(&self) -> Result<CameraModel, ConfigError> {
        let intrinsics = match (&self.intrinsics, &self.sensor) {
            (Some(k), None) => *k,
            (None, Some(sensor)) => sensor.intrinsics()?,
            _ => return Err(ConfigError::AmbiguousCamera),
        };
        if !intrinsics.is_valid() {
            return Err(ConfigError::InvalidIntrinsics);
        }
        let d: [f64; 4] = self.distortion.into();
        if d.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::InvalidDistortion);
        }
        Ok(CameraModel::new(intrinsics, self.distortion))
    }
}

/// Everything one `marker-mapper run` needs.
///
/// Relative paths are resolved against a base directory chosen by the caller
/// (the CLI uses the config file's directory).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerMapperConfig {
    pub frames_path: String,
    pub camera: CameraConfig,
    /// Physical side length of every marker.
    pub marker_size: f64,
    pub base_marker_id: MarkerId,
    /// Markers to resolve, in resolution order.
    pub marker_ids: Vec<MarkerId>,
    #[serde(default)]
    pub resolver: ResolverParams,
    #[serde(default)]
    pub pnp: PnpParams,
    #[serde(default)]
    pub convention: CoordinateConvention,
    /// Seed for the perturbation generator.
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub map_path: Option<String>,
    #[serde(default)]
    pub tracking_path: Option<String>,
    #[serde(default)]
    pub report_path: Option<String>,
}

impl MarkerMapperConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.marker_size.is_finite() || self.marker_size <= 0.0 {
            return Err(ConfigError::InvalidMarkerSize(self.marker_size));
        }
        if self.marker_ids.is_empty() {
            return Err(ConfigError::NoCandidates);
        }
        self.camera.build().map(|_| ())
    }

    /// Validated camera model.
    pub fn build_camera(&self) -> Result<CameraModel, ConfigError> {
        self.camera.build()
    }

    pub fn frames_path(&self, base: &Path) -> PathBuf {
        resolve_path(base, &self.frames_path)
    }

    pub fn map_path(&self, base: &Path) -> PathBuf {
        resolve_path(base, self.map_path.as_deref().unwrap_or("marker_map.json"))
    }

    pub fn tracking_path(&self, base: &Path) -> PathBuf {
        resolve_path(base, self.tracking_path.as_deref().unwrap_or("tracking.txt"))
    }

    pub fn report_path(&self, base: &Path) -> PathBuf {
        resolve_path(base, self.report_path.as_deref().unwrap_or("run_report.json"))
    }
}

fn resolve_path(base: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

/// Detector output for a whole sequence, one record per frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStore {
    pub frames: Vec<FrameRecord>,
}

impl FrameStore {
    pub fn new(frames: Vec<FrameRecord>) -> Self {
        Self { frames }
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// One exported map entry with its corners in the base frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerMapRecord {
    pub id: MarkerId,
    pub base_to_marker: RigidTransform,
    pub corners: [Point3<f64>; 4],
}

/// On-disk form of a finished [`MarkerMap`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerMapFile {
    pub base_marker_id: MarkerId,
    pub marker_size: f64,
    /// Entries in insertion order, base first.
    pub markers: Vec<MarkerMapRecord>,
}

impl MarkerMapFile {
    pub fn from_map(map: &MarkerMap, marker_size: f64) -> Self {
        let markers = map
            .iter()
            .filter_map(|e| {
                Some(MarkerMapRecord {
                    id: e.id,
                    base_to_marker: e.base_to_marker,
                    corners: map.marker_corners_in_base(e.id, marker_size)?,
                })
            })
            .collect();
        Self {
            base_marker_id: map.base_id(),
            marker_size,
            markers,
        }
    }

    /// Rebuild the map; corners are informational and ignored.
    pub fn to_map(&self) -> Result<MarkerMap, MapError> {
        MarkerMap::from_entries(
            self.markers
                .iter()
                .map(|m| MapEntry {
                    id: m.id,
                    base_to_marker: m.base_to_marker,
                })
                .collect(),
        )
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Tracking outcome of one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameOutcome {
    pub frame: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<TrackingRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&FrameTrack> for FrameOutcome {
    fn from(track: &FrameTrack) -> Self {
        match &track.result {
            Ok(record) => Self {
                frame: track.frame,
                record: Some(record.clone()),
                error: None,
            },
            Err(err) => Self {
                frame: track.frame,
                record: None,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Summary of a run written next to the map and the tracking lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub base_marker_id: MarkerId,
    pub candidates: Vec<MarkerId>,
    /// New map entries per pass.
    pub passes: Vec<PassReport>,
    pub unresolved: Vec<MarkerId>,
    pub converged: bool,
    pub frames: Vec<FrameOutcome>,
}

impl RunReport {
    pub fn new(
        base_marker_id: MarkerId,
        candidates: &[MarkerId],
        resolve: &ResolveReport,
        tracks: &[FrameTrack],
    ) -> Self {
        Self {
            base_marker_id,
            candidates: candidates.to_vec(),
            passes: resolve.passes.clone(),
            unresolved: resolve.unresolved.clone(),
            converged: resolve.converged,
            frames: tracks.iter().map(FrameOutcome::from).collect(),
        }
    }

    pub fn tracked_frames(&self) -> usize {
        self.frames.iter().filter(|f| f.record.is_some()).count()
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
