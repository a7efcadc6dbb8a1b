/// Time resolution for track points and media files.
///
/// Cameras store local wall-clock time without a reliable zone, so every
/// GPS-derived instant is rebased into the civil time of the place it was
/// recorded and the offset is dropped. All comparisons downstream are done
/// between these naive local timestamps.

use std::fs;
use std::path::Path;
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use chrono_tz::Tz;
use tzf_rs::DefaultFinder;

use crate::error::Result;
use crate::exiftool::{GpsFix, MetadataService};
use crate::telemetry::TelemetryDecoder;
use crate::track::GeoPosition;

/// atime vs etime disagreement shown as a warning
pub const CAMERA_DISAGREEMENT_SECONDS: i64 = 30;
/// camera time vs GPS time disagreement shown as a warning
pub const GPS_DISAGREEMENT_SECONDS: i64 = 80;

pub trait TimezoneResolver: Sync {
    fn zone_for(&self, latitude: f64, longitude: f64) -> Option<Tz>;
}

/// Offline lookup against the timezone polygons bundled with tzf-rs
pub struct TzfResolver {
    finder: DefaultFinder,
}

impl TzfResolver {
    pub fn new() -> Self {
        TzfResolver { finder: DefaultFinder::new() }
    }
}

impl Default for TzfResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TimezoneResolver for TzfResolver {
    fn zone_for(&self, latitude: f64, longitude: f64) -> Option<Tz> {
        let name = self.finder.get_tz_name(longitude, latitude);
        if name.is_empty() {
            return None;
        }
        name.parse::<Tz>().ok()
    }
}

/// Convert a UTC instant into the local wall clock at (latitude, longitude).
///
/// (0, 0) means "no fix" and an unknown zone leaves the UTC wall clock as is.
pub fn resolve_timezone(
    resolver: &dyn TimezoneResolver,
    latitude: f64,
    longitude: f64,
    instant: DateTime<Utc>,
) -> NaiveDateTime {
    if latitude == 0.0 && longitude == 0.0 {
        return instant.naive_utc();
    }

    match resolver.zone_for(latitude, longitude) {
        Some(tz) => instant.with_timezone(&tz).naive_local(),
        None => {
            log::debug!("no timezone for {:.5},{:.5}, keeping UTC", latitude, longitude);
            instant.naive_utc()
        }
    }
}

/// The three time sources a media file may carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaTimeCandidate {
    /// Filesystem modification time
    pub atime: Option<NaiveDateTime>,
    /// Capture time from embedded metadata
    pub etime: Option<NaiveDateTime>,
    /// GPS-derived time, already zone corrected
    pub gtime: Option<NaiveDateTime>,
}

impl MediaTimeCandidate {
    /// Camera clock: embedded capture time, else filesystem time
    pub fn camera_time(&self) -> Option<NaiveDateTime> {
        self.etime.or(self.atime)
    }

    /// atime and etime both present and further apart than tolerated
    pub fn camera_clock_disagrees(&self) -> bool {
        match (self.atime, self.etime) {
            (Some(a), Some(e)) => seconds_apart(a, e) > CAMERA_DISAGREEMENT_SECONDS,
            _ => false,
        }
    }

    /// Camera clock and GPS clock further apart than tolerated
    pub fn gps_clock_disagrees(&self) -> bool {
        match (self.camera_time(), self.gtime) {
            (Some(c), Some(g)) => seconds_apart(c, g) > GPS_DISAGREEMENT_SECONDS,
            _ => false,
        }
    }
}

/// gtime, then etime, then atime.
pub fn best_date(candidate: &MediaTimeCandidate) -> Option<NaiveDateTime> {
    candidate.gtime.or(candidate.etime).or(candidate.atime)
}

pub fn seconds_apart(a: NaiveDateTime, b: NaiveDateTime) -> i64 {
    (a - b).num_seconds().abs()
}

/// Everything learned about a media file's time and current location
#[derive(Debug, Clone, Default)]
pub struct MediaTimes {
    pub candidate: MediaTimeCandidate,
    pub existing_position: Option<GeoPosition>,
}

/// Collect the time candidates of one media file.
///
/// Video telemetry wins outright: when a GPS fix is found in the stream it
/// is the only time taken. The embedded tags are still read for the
/// position the file may already carry.
pub fn derive_candidates(
    path: &Path,
    is_video: bool,
    metadata: &dyn MetadataService,
    telemetry: &dyn TelemetryDecoder,
    timezone: &dyn TimezoneResolver,
) -> Result<MediaTimes> {
    let modified = fs::metadata(path)?.modified()?;
    let atime = DateTime::<Local>::from(modified).naive_local();
    let mut times = MediaTimes {
        candidate: MediaTimeCandidate {
            atime: Some(atime),
            ..Default::default()
        },
        existing_position: None,
    };

    if is_video {
        match telemetry.extract_track(path) {
            Ok(mut samples) => {
                if let Some(sample) = samples.find(|s| s.latitude != 0.0 && s.longitude != 0.0) {
                    times.candidate.gtime = Some(resolve_timezone(
                        timezone,
                        sample.latitude,
                        sample.longitude,
                        sample.timestamp,
                    ));
                }
            }
            Err(e) => log::debug!("{}: no telemetry ({})", path.display(), e),
        }
    }

    if let Some(gtime) = times.candidate.gtime {
        match metadata.read_tags(path) {
            Ok(tags) => {
                times.existing_position = tags
                    .gps
                    .filter(|f| f.latitude != 0.0 && f.longitude != 0.0)
                    .map(|fix| embedded_position(&fix, gtime, timezone));
            }
            Err(e) => log::debug!("{}: embedded position unreadable ({})", path.display(), e),
        }
        return Ok(times);
    }

    let tags = metadata.read_tags(path)?;
    times.candidate.etime = tags.capture_time;

    if let Some(fix) = tags.gps.filter(|f| f.latitude != 0.0 && f.longitude != 0.0) {
        let local = fix
            .timestamp
            .map(|utc| resolve_timezone(timezone, fix.latitude, fix.longitude, utc));
        times.candidate.gtime = local;
        times.existing_position = Some(embedded_position(
            &fix,
            local.or(times.candidate.etime).unwrap_or(atime),
            timezone,
        ));
    }

    Ok(times)
}

/// Position already stored in the file; `fallback` stands in for a missing
/// GPS time stamp
fn embedded_position(fix: &GpsFix, fallback: NaiveDateTime, timezone: &dyn TimezoneResolver) -> GeoPosition {
    GeoPosition {
        latitude: fix.latitude,
        longitude: fix.longitude,
        elevation: fix.elevation,
        timestamp: fix
            .timestamp
            .map(|utc| resolve_timezone(timezone, fix.latitude, fix.longitude, utc))
            .unwrap_or(fallback),
        utc: fix.timestamp,
    }
}

/// Resolver pinned to one zone, or to none
#[cfg(test)]
pub struct FixedZone(pub Option<Tz>);

#[cfg(test)]
impl TimezoneResolver for FixedZone {
    fn zone_for(&self, _latitude: f64, _longitude: f64) -> Option<Tz> {
        self.0
    }
}
