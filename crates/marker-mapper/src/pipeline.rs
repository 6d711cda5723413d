//! End-to-end run: validate frames, resolve the map, track every frame.

use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use log::info;
use marker_mapper_core::{FrameError, FrameRecord, MarkerMap};
use marker_mapper_solve::{
    JitterSource, MapResolver, ReprojectionScorer, ResolveReport, RngJitter,
};
use marker_mapper_track::{write_tracking_lines, CameraPoseExtractor, FrameTrack, IterativePnp};
use rand::{rngs::StdRng, SeedableRng};

use crate::io::{ConfigError, IoError, MarkerMapFile, MarkerMapperConfig, RunReport};

/// Fatal run errors. Per-frame tracking failures and unresolved markers are
/// reported in [`PipelineOutput`] instead.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Io(#[from] IoError),
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(IoError::Io(err))
    }
}

#[derive(Clone, Debug)]
pub struct PipelineOutput {
    pub map: MarkerMap,
    pub resolve: ResolveReport,
    /// One entry per input frame, in order.
    pub tracks: Vec<FrameTrack>,
}

impl PipelineOutput {
    pub fn report(&self, config: &MarkerMapperConfig) -> RunReport {
        RunReport::new(
            config.base_marker_id,
            &config.marker_ids,
            &self.resolve,
            &self.tracks,
        )
    }

    pub fn tracked_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.result.is_ok()).count()
    }
}

/// Where [`write_outputs`] put its files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputPaths {
    pub map: PathBuf,
    pub tracking: PathBuf,
    pub report: PathBuf,
}

/// Run with a `StdRng` seeded from `config.seed`.
pub fn run(
    config: &MarkerMapperConfig,
    frames: &[FrameRecord],
) -> Result<PipelineOutput, PipelineError> {
    let mut jitter = RngJitter::new(StdRng::seed_from_u64(config.seed));
    run_with_jitter(config, frames, &mut jitter)
}

/// Run with an explicit perturbation source.
pub fn run_with_jitter<J: JitterSource + ?Sized>(
    config: &MarkerMapperConfig,
    frames: &[FrameRecord],
    jitter: &mut J,
) -> Result<PipelineOutput, PipelineError> {
    config.validate()?;
    let camera = config.build_camera()?;
    for (i, frame) in frames.iter().enumerate() {
        frame.validate(i)?;
    }
    info!(
        "{} frames, base marker {}, {} candidates",
        frames.len(),
        config.base_marker_id,
        config.marker_ids.len()
    );

    let mut map = MarkerMap::new(config.base_marker_id);
    let resolver = MapResolver::new(
        ReprojectionScorer::new(frames, &camera, config.marker_size),
        config.resolver.clone(),
    );
    let resolve = resolver.resolve(&mut map, &config.marker_ids, jitter);

    let tracks = CameraPoseExtractor::new(&map, &camera, config.marker_size)
        .with_convention(config.convention)
        .with_solver(IterativePnp::new(config.pnp.clone()))
        .track_all(frames);
    let tracked = tracks.iter().filter(|t| t.result.is_ok()).count();
    info!(
        "map has {} markers ({} unresolved), tracked {tracked}/{} frames",
        map.len(),
        resolve.unresolved.len(),
        frames.len()
    );

    Ok(PipelineOutput {
        map,
        resolve,
        tracks,
    })
}

/// Write the map JSON, tracking lines and run report; paths are resolved
/// against `base_dir`.
pub fn write_outputs(
    config: &MarkerMapperConfig,
    base_dir: &Path,
    output: &PipelineOutput,
) -> Result<OutputPaths, PipelineError> {
    let paths = OutputPaths {
        map: config.map_path(base_dir),
        tracking: config.tracking_path(base_dir),
        report: config.report_path(base_dir),
    };

    MarkerMapFile::from_map(&output.map, config.marker_size).write_json(&paths.map)?;
    let lines = write_tracking_lines(BufWriter::new(File::create(&paths.tracking)?), &output.tracks)?;
    output.report(config).write_json(&paths.report)?;

    info!(
        "wrote {} (map), {} ({lines} lines), {}",
        paths.map.display(),
        paths.tracking.display(),
        paths.report.display()
    );
    Ok(paths)
}
