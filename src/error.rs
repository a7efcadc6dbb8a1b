// Error types for track loading, metadata access and the sync run

use std::path::PathBuf;
use thiserror::Error;

/// Why a single GPX file was not accepted into the track set.
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("could not parse GPX: {0}")]
    Parse(String),

    #[error("time stamps out of order at point {index}")]
    OutOfOrder { index: usize },

    #[error("implausible jump of {meters:.0} m in {seconds} s at point {index}")]
    ImplausibleJump { index: usize, meters: f64, seconds: i64 },

    #[error("track has no time stamps")]
    NoTimestamps,
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path}: {source}")]
    Track {
        path: PathBuf,
        #[source]
        source: TrackError,
    },

    #[error("GPX error: {0}")]
    Gpx(#[from] gpx::errors::GpxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("ExifTool error: {0}")]
    ExifTool(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Geocoding error: {0}")]
    Geocode(String),

    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    #[error("There is no track processed")]
    NoTracks,

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl SyncError {
    pub fn track(path: impl Into<PathBuf>, source: TrackError) -> Self {
        SyncError::Track { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
