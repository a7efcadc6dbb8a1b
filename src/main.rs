use std::path::PathBuf;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

mod classifier;
mod clock_drift;
mod config;
mod error;
mod exiftool;
mod geocoder;
mod matcher;
mod reconcile;
mod renamer;
mod report;
mod telemetry;
mod time_resolver;
mod tolerant_gpx_reader;
mod tools;
mod track;

use classifier::ContentSniffer;
use config::RunConfig;
use exiftool::ExifTool;
use geocoder::{Geocoder, Nominatim};
use reconcile::Collaborators;
use telemetry::GpmfDecoder;
use time_resolver::TzfResolver;

#[derive(Parser)]
#[command(name = "gpx-media-sync")]
#[command(version)]
#[command(about = "Geotag photos and videos from GPX tracks and rename tracks by their start time")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Show what would change without touching any file
    #[arg(long, global = true)]
    dry_run: bool,

    /// Overwrite positions already stored in media files
    #[arg(long, global = true)]
    force: bool,

    /// Add a place name from OpenStreetMap
    #[arg(long, global = true)]
    geocode: bool,

    /// Country code left out of place names (e.g. ES)
    #[arg(long, global = true)]
    country: Option<String>,

    /// Worker threads (defaults to the number of CPUs)
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// GPX file or directory of GPX files
    #[arg(short, long, global = true)]
    track: Option<PathBuf>,

    /// Wide 500 s matching window and truncation of bad tracks
    #[arg(long, global = true)]
    loose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write track positions into the media files below a directory
    Media {
        dir: PathBuf,
        /// CSV file with one row per media file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Rename tracks after their start time and place
    Tracks {
        /// Store the old file name in the GPX metadata name
        #[arg(long)]
        update_header: bool,
    },
    /// Report camera clock drift against GPS time
    Drift { dir: PathBuf },
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

fn run_config(cli: &Cli) -> RunConfig {
    let mut config = if cli.loose { RunConfig::loose() } else { RunConfig::strict() };
    config.dry_run = cli.dry_run;
    config.force = cli.force;
    config.geocode = cli.geocode;
    config.default_country = cli.country.clone();
    if let Some(jobs) = cli.jobs {
        config.jobs = jobs.max(1);
    }
    match &cli.command {
        Commands::Media { report, .. } => config.report = report.clone(),
        Commands::Tracks { update_header } => config.update_header = *update_header,
        Commands::Drift { .. } => {}
    }
    config
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    let config = run_config(&cli);

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs)
        .build_global()
        .context("failed to start the worker pool")?;

    if config.dry_run {
        println!("{}", "Dry run: no file will be modified".yellow());
    }

    let exiftool = ExifTool::new();
    if !tools::is_available(&tools::exiftool_path(), "-ver") {
        log::warn!("exiftool not found, media metadata cannot be read or written");
    }
    let telemetry = GpmfDecoder::new();
    if !telemetry.is_available() {
        log::warn!("ffmpeg/ffprobe not found, video telemetry is disabled");
    }
    let timezone = TzfResolver::new();
    let classifier = ContentSniffer;

    let nominatim = if config.geocode {
        Some(Nominatim::new(config.default_country.clone())?)
    } else {
        None
    };
    let geocoder = nominatim.as_ref().map(|n| n as &dyn Geocoder);

    let services = Collaborators {
        metadata: &exiftool,
        telemetry: &telemetry,
        timezone: &timezone,
        classifier: &classifier,
        geocoder,
    };

    match &cli.command {
        Commands::Media { dir, .. } => {
            let tracks = load_tracks(&cli, &config, services)?;
            let context = reconcile::sync_media(dir, &tracks, &config, services)?;
            context.print_summary();
        }
        Commands::Tracks { .. } => {
            let tracks = load_tracks(&cli, &config, services)?;
            renamer::rename_tracks(&tracks, &config, geocoder);
        }
        Commands::Drift { dir } => {
            clock_drift::drift_report(dir, &config, services)?;
        }
    }

    Ok(())
}

fn load_tracks(cli: &Cli, config: &RunConfig, services: Collaborators<'_>) -> Result<track::TrackSet> {
    let Some(path) = &cli.track else {
        bail!("--track <path> is required for this command");
    };

    let (tracks, summary) = track::load_tracks(path, &config.track_validation(), services.timezone, services.classifier)
        .with_context(|| format!("cannot load tracks from {}", path.display()))?;

    println!("🛰️  Tracks: {} loaded, {} rejected", summary.loaded, summary.failed);
    Ok(tracks)
}
