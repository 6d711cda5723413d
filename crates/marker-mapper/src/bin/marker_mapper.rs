//! marker-mapper CLI: build a marker map from detector output and track the camera.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use marker_mapper::core::synthetic::chain_scene;
use marker_mapper::io::{CameraConfig, FrameStore, MarkerMapperConfig};
use marker_mapper::pipeline;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "marker-mapper")]
#[command(about = "Resolve a fiducial marker map from per-frame detections and track the camera")]
#[command(version)]
struct Cli {
    /// Log level: off, error, warn, info, debug or trace. With the `tracing`
    /// feature, `RUST_LOG` takes precedence when set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the map and track every frame described by a JSON config.
    Run(RunArgs),

    /// Write a synthetic frame store and a matching config.
    Synth(SynthArgs),
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Path to the run config (JSON). Relative paths inside it are resolved
    /// against its directory.
    #[arg(long)]
    config: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct SynthArgs {
    /// Output directory; created if missing.
    #[arg(long)]
    out: PathBuf,

    /// Corner noise amplitude in pixels.
    #[arg(long, default_value = "0.0")]
    pixel_noise: f64,

    /// Seed written into the generated config.
    #[arg(long, default_value = "0")]
    seed: u64,
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Run(args) => run(&args),
        Commands::Synth(args) => synth(&args),
    }
}

fn init_logging(level: &str) -> CliResult<()> {
    let level = marker_mapper::core::parse_level(level)
        .ok_or_else(|| format!("unknown log level: {level}"))?;
    #[cfg(feature = "tracing")]
    marker_mapper::init_tracing(false, level);
    #[cfg(not(feature = "tracing"))]
    marker_mapper::core::init_with_level(level).map_err(|e| e.to_string())?;
    Ok(())
}

fn run(args: &RunArgs) -> CliResult<()> {
    let config = MarkerMapperConfig::load_json(&args.config)?;
    let base_dir = args
        .config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let frames_path = config.frames_path(&base_dir);
    log::info!("Loading frames: {}", frames_path.display());
    let store = FrameStore::load_json(&frames_path)?;

    let output = pipeline::run(&config, &store.frames)?;
    let paths = pipeline::write_outputs(&config, &base_dir, &output)?;

    println!(
        "mapped {} markers ({} unresolved), tracked {}/{} frames",
        output.map.len(),
        output.resolve.unresolved.len(),
        output.tracked_count(),
        store.frames.len()
    );
    println!("map: {}", paths.map.display());
    println!("tracking: {}", paths.tracking.display());
    println!("report: {}", paths.report.display());
    Ok(())
}

fn synth(args: &SynthArgs) -> CliResult<()> {
    if !args.pixel_noise.is_finite() || args.pixel_noise < 0.0 {
        return Err(format!("pixel noise must be finite and non-negative: {}", args.pixel_noise).into());
    }
    std::fs::create_dir_all(&args.out)?;

    let scene = chain_scene();
    let frames = if args.pixel_noise > 0.0 {
        scene.noisy_frames(args.pixel_noise, 0.0, 0.0)
    } else {
        scene.frames()
    };
    FrameStore::new(frames).write_json(args.out.join("frames.json"))?;

    let config = MarkerMapperConfig {
        frames_path: "frames.json".into(),
        camera: CameraConfig {
            intrinsics: Some(scene.camera.intrinsics),
            sensor: None,
            distortion: scene.camera.distortion,
        },
        marker_size: scene.marker_size,
        base_marker_id: scene.markers[0].0,
        marker_ids: scene.marker_ids(),
        resolver: Default::default(),
        pnp: Default::default(),
        convention: Default::default(),
        seed: args.seed,
        map_path: None,
        tracking_path: None,
        report_path: None,
    };
    let config_path = args.out.join("config.json");
    config.write_json(&config_path)?;

    println!("wrote {}", config_path.display());
    Ok(())
}
