/// Track model and GPX loading.
///
/// A track is the flattened list of points of one GPX file. Point times are
/// rebased into the local civil time of their coordinates while loading, so
/// the rest of the program only ever compares local wall-clock times.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use chrono::{DateTime, NaiveDateTime, Utc};
use geo::{point, HaversineDistance};
use rayon::prelude::*;

use crate::classifier::{walk_files, MediaClassifier};
use crate::config::TrackValidation;
use crate::error::{Result, SyncError, TrackError};
use crate::time_resolver::{resolve_timezone, TimezoneResolver};
use crate::tolerant_gpx_reader::read_gpx_tolerantly;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
    /// Local wall-clock time at the point's coordinates
    pub timestamp: Option<NaiveDateTime>,
    pub utc: Option<DateTime<Utc>>,
}

impl TrackPoint {
    pub fn to_position(&self) -> Option<GeoPosition> {
        Some(GeoPosition {
            latitude: self.latitude,
            longitude: self.longitude,
            elevation: self.elevation,
            timestamp: self.timestamp?,
            utc: self.utc,
        })
    }
}

/// A location to attach to a media file or to name a track by
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
    pub timestamp: NaiveDateTime,
    pub utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub path: PathBuf,
    pub points: Vec<TrackPoint>,
    /// Cut short by non-strict validation
    pub suspect: bool,
}

impl Track {
    pub fn timed_points(&self) -> impl Iterator<Item = (&TrackPoint, NaiveDateTime)> {
        self.points.iter().filter_map(|p| p.timestamp.map(|t| (p, t)))
    }

    pub fn first_timed(&self) -> Option<&TrackPoint> {
        self.points.iter().find(|p| p.timestamp.is_some())
    }

    pub fn last_timed(&self) -> Option<&TrackPoint> {
        self.points.iter().rev().find(|p| p.timestamp.is_some())
    }

    /// (first, last) local time of the timestamped points
    pub fn time_span(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        Some((self.first_timed()?.timestamp?, self.last_timed()?.timestamp?))
    }
}

/// Loaded tracks keyed by path; iteration follows path order
pub type TrackSet = BTreeMap<PathBuf, Track>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub loaded: usize,
    pub failed: usize,
}

/// Parse, rebase and validate one GPX file.
pub fn load(
    path: &Path,
    validation: &TrackValidation,
    timezone: &dyn TimezoneResolver,
) -> std::result::Result<Track, TrackError> {
    let gpx = read_gpx_tolerantly(path)?;

    let mut points = Vec::new();
    for track in &gpx.tracks {
        for segment in &track.segments {
            for waypoint in &segment.points {
                let latitude = waypoint.point().y();
                let longitude = waypoint.point().x();
                let utc = waypoint
                    .time
                    .as_ref()
                    .and_then(|t| t.format().ok())
                    .and_then(|s| parse_utc(&s));

                points.push(TrackPoint {
                    latitude,
                    longitude,
                    elevation: waypoint.elevation.unwrap_or(0.0),
                    timestamp: utc.map(|u| resolve_timezone(timezone, latitude, longitude, u)),
                    utc,
                });
            }
        }
    }

    validate(path, points, validation)
}

/// Parse an RFC 3339 point time into a UTC instant
pub fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Single pass over the points checking ordering and spacing.
///
/// Checks run on the UTC instants: local time may jump back or forward at a
/// DST change or a zone border. In strict mode the first violation rejects
/// the whole track, otherwise the track is cut just before the offending
/// point and flagged as suspect.
pub fn validate(
    path: &Path,
    mut points: Vec<TrackPoint>,
    validation: &TrackValidation,
) -> std::result::Result<Track, TrackError> {
    let mut previous: Option<(DateTime<Utc>, f64, f64)> = None;
    let mut violation = None;

    for (index, pt) in points.iter().enumerate() {
        let Some(time) = pt.utc else { continue };

        if let Some((prev_time, prev_lat, prev_lon)) = previous {
            let seconds = (time - prev_time).num_seconds();
            if time < prev_time {
                violation = Some((index, TrackError::OutOfOrder { index }));
                break;
            }

            let a = point!(x: prev_lon, y: prev_lat);
            let b = point!(x: pt.longitude, y: pt.latitude);
            let meters = a.haversine_distance(&b);
            if is_implausible(meters, seconds, validation) {
                violation = Some((index, TrackError::ImplausibleJump { index, meters, seconds }));
                break;
            }
        }

        previous = Some((time, pt.latitude, pt.longitude));
    }

    let mut suspect = false;
    if let Some((index, error)) = violation {
        if validation.strict {
            return Err(error);
        }
        log::warn!("{}: {}, keeping the first {} points", path.display(), error, index);
        points.truncate(index);
        suspect = true;
    }

    if !points.iter().any(|p| p.timestamp.is_some()) {
        return Err(TrackError::NoTimestamps);
    }

    Ok(Track { path: path.to_path_buf(), points, suspect })
}

fn is_implausible(meters: f64, seconds: i64, validation: &TrackValidation) -> bool {
    if meters > validation.max_jump_meters && seconds < validation.min_jump_seconds {
        return true;
    }
    if seconds <= 0 {
        return false;
    }
    let kmh = meters / seconds as f64 * 3.6;
    kmh > validation.max_speed_kmh
}

/// Load a single GPX file or every GPX file below a directory.
///
/// Files that fail to load and unreadable directories are logged and counted;
/// only a missing or unreadable root or an empty result is an error.
pub fn load_tracks(
    root: &Path,
    validation: &TrackValidation,
    timezone: &dyn TimezoneResolver,
    classifier: &dyn MediaClassifier,
) -> Result<(TrackSet, LoadSummary)> {
    if !root.exists() {
        return Err(SyncError::NotFound(root.to_path_buf()));
    }

    let (candidates, unreadable) = if root.is_dir() {
        walk_files(root, |p| classifier.is_gpx(p))?
    } else {
        (vec![root.to_path_buf()], 0)
    };

    log::info!("Reading {} track file(s) from {}", candidates.len(), root.display());

    let results: Vec<(PathBuf, std::result::Result<Track, TrackError>)> = candidates
        .into_par_iter()
        .map(|path| {
            let result = load(&path, validation, timezone);
            (path, result)
        })
        .collect();

    let mut tracks = TrackSet::new();
    let mut summary = LoadSummary { loaded: 0, failed: unreadable };
    for (path, result) in results {
        match result {
            Ok(track) => {
                log::debug!("{}: {} points", path.display(), track.points.len());
                summary.loaded += 1;
                tracks.insert(path, track);
            }
            Err(e) => {
                log::warn!("{}", SyncError::track(&path, e));
                summary.failed += 1;
            }
        }
    }

    if tracks.is_empty() {
        return Err(SyncError::NoTracks);
    }

    Ok((tracks, summary))
}
