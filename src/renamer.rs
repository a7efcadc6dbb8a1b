/// Track renaming
///
/// Every track file is renamed after the local start time of its first
/// timestamped point, e.g. `2024_01_28_08_46_sun.gpx`, optionally followed by
/// a geocoded place name. The file times are then set to that instant; a
/// failure there is logged and the file still counts as renamed.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use colored::Colorize;
use filetime::FileTime;
use gpx::{write, Metadata};

use crate::config::RunConfig;
use crate::error::{Result, SyncError};
use crate::geocoder::{geoname_cleanup, Geocoder};
use crate::tolerant_gpx_reader::read_gpx_tolerantly;
use crate::track::{GeoPosition, Track, TrackSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenameSummary {
    pub renamed: usize,
    /// Names printed by a dry run
    pub proposed: usize,
    pub unchanged: usize,
    pub collisions: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameAction {
    Renamed(PathBuf),
    Proposed(String),
    Unchanged,
    Collision(PathBuf),
}

/// `YYYY_MM_DD_HH_MM_<weekday>[_<place>].gpx` in the point's local time
pub fn canonical_name(start: &GeoPosition, place: Option<&str>) -> String {
    let weekday = start.timestamp.format("%a").to_string().to_lowercase();
    let mut name = format!("{}_{}", start.timestamp.format("%Y_%m_%d_%H_%M"), weekday);
    if let Some(place) = place.map(geoname_cleanup).filter(|p| !p.is_empty()) {
        name.push('_');
        name.push_str(&place);
    }
    name.push_str(".gpx");
    name
}

pub fn rename_tracks(tracks: &TrackSet, config: &RunConfig, geocoder: Option<&dyn Geocoder>) -> RenameSummary {
    let mut summary = RenameSummary::default();

    for (path, track) in tracks {
        let basename = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        match rename_track(track, config, geocoder) {
            Ok(RenameAction::Renamed(target)) => {
                summary.renamed += 1;
                println!("[{}] -> {}", basename, target.display().to_string().green());
            }
            Ok(RenameAction::Proposed(name)) => {
                summary.proposed += 1;
                println!("[{}] -> {}", basename, name);
            }
            Ok(RenameAction::Unchanged) => {
                summary.unchanged += 1;
                println!("[{}] -> no update", basename);
            }
            Ok(RenameAction::Collision(target)) => {
                summary.collisions += 1;
                println!("[{}] -> {} already exists, skipped", basename, target.display().to_string().yellow());
            }
            Err(e) => {
                summary.errors += 1;
                println!("[{}] -> {}", basename, e.to_string().red());
            }
        }
    }

    let line = format!(
        "{} renamed, {} proposed, {} unchanged, {} collisions, {} errors",
        summary.renamed, summary.proposed, summary.unchanged, summary.collisions, summary.errors
    );
    println!("\n🎯 TRACK SUMMARY");
    println!("================");
    if summary.errors == 0 {
        println!("{}", line.green());
    } else {
        println!("{}", line.yellow());
    }

    summary
}

pub fn rename_track(track: &Track, config: &RunConfig, geocoder: Option<&dyn Geocoder>) -> Result<RenameAction> {
    let start = track
        .first_timed()
        .and_then(|p| p.to_position())
        .ok_or_else(|| SyncError::track(&track.path, crate::error::TrackError::NoTimestamps))?;

    let place = geocoder.and_then(|g| g.reverse_geocode(start.latitude, start.longitude));
    let name = canonical_name(&start, place.as_deref());

    let current = track.path.file_name().map(|n| n.to_string_lossy().into_owned());
    if current.as_deref() == Some(name.as_str()) {
        return Ok(RenameAction::Unchanged);
    }

    let target = track.path.with_file_name(&name);
    if target.exists() {
        return Ok(RenameAction::Collision(target));
    }

    if config.dry_run {
        return Ok(RenameAction::Proposed(name));
    }

    if config.update_header {
        store_previous_name(&track.path)?;
    }

    fs::rename(&track.path, &target)?;

    // the file is renamed at this point; a retime failure is only logged
    if let Some(utc) = start.utc {
        if let Err(e) = set_start_times(&target, utc) {
            log::warn!("{}: renamed, but file times not set: {}", target.display(), e);
        }
    }

    Ok(RenameAction::Renamed(target))
}

fn set_start_times(path: &Path, utc: DateTime<Utc>) -> Result<()> {
    let time = FileTime::from_unix_time(utc.timestamp(), utc.timestamp_subsec_nanos());
    filetime::set_file_times(path, time, time)?;
    Ok(())
}

/// Keep the current file name (without extension) in `metadata/name` unless
/// the track already has a name there.
pub fn store_previous_name(path: &Path) -> Result<bool> {
    let mut gpx = read_gpx_tolerantly(path).map_err(|e| SyncError::track(path, e))?;

    let metadata = gpx.metadata.get_or_insert_with(Metadata::default);
    if metadata.name.as_deref().map_or(false, |n| !n.is_empty()) {
        return Ok(false);
    }

    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    metadata.name = Some(stem);

    let writer = BufWriter::new(File::create(path)?);
    write(&gpx, writer)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackValidation;
    use crate::time_resolver::{FixedZone, TzfResolver};
    use crate::track::load;
    use crate::track::tests::{at, gpx_document};
    use std::time::UNIX_EPOCH;

    fn write_track(dir: &Path, name: &str, lat: f64, lon: f64, time: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, gpx_document(&[(lat, lon, None), (lat, lon, Some(time))])).unwrap();
        path
    }

    #[test]
    fn test_canonical_name_with_place() {
        let start = GeoPosition { latitude: 40.0, longitude: -1.0, elevation: 0.0, timestamp: at(8, 46, 21), utc: None };
        assert_eq!(canonical_name(&start, None), "2024_01_28_08_46_sun.gpx");
        assert_eq!(canonical_name(&start, Some(" Teruel/Aragón ")), "2024_01_28_08_46_sun_Teruel_Aragón.gpx");
        assert_eq!(canonical_name(&start, Some("  ")), "2024_01_28_08_46_sun.gpx");
    }

    #[test]
    fn test_rename_uses_local_time_and_sets_file_times() {
        let dir = tempfile::tempdir().unwrap();
        // New York, 07:46 UTC is 02:46 EST
        let path = write_track(dir.path(), "activity_123.gpx", 40.7128, -74.0060, "2024-01-28T07:46:21Z");
        let track = load(&path, &TrackValidation::default(), &TzfResolver::new()).unwrap();

        let action = rename_track(&track, &RunConfig::default(), None).unwrap();
        let target = dir.path().join("2024_01_28_02_46_sun.gpx");
        assert_eq!(action, RenameAction::Renamed(target.clone()));
        assert!(!path.exists());

        let modified = fs::metadata(&target).unwrap().modified().unwrap();
        let seconds = modified.duration_since(UNIX_EPOCH).unwrap().as_secs();
        assert_eq!(seconds, 1706427981);
    }

    #[test]
    fn test_retime_failure_is_reported_to_caller() {
        let dir = tempfile::tempdir().unwrap();
        let utc = at(7, 46, 21).and_utc();
        assert!(set_start_times(&dir.path().join("gone.gpx"), utc).is_err());

        let path = write_track(dir.path(), "kept.gpx", 40.0, -3.0, "2024-01-28T07:46:21Z");
        set_start_times(&path, utc).unwrap();
        let modified = fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(modified.duration_since(UNIX_EPOCH).unwrap().as_secs(), 1706427981);
    }

    #[test]
    fn test_dry_run_unchanged_and_collision() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig { dry_run: true, ..RunConfig::default() };

        let path = write_track(dir.path(), "walk.gpx", 40.0, -3.0, "2024-01-28T10:00:00Z");
        let track = load(&path, &TrackValidation::default(), &FixedZone(None)).unwrap();
        assert_eq!(
            rename_track(&track, &config, None).unwrap(),
            RenameAction::Proposed("2024_01_28_10_00_sun.gpx".to_string())
        );
        assert!(path.exists());

        let same = write_track(dir.path(), "2024_01_28_11_00_sun.gpx", 40.0, -3.0, "2024-01-28T11:00:00Z");
        let track = load(&same, &TrackValidation::default(), &FixedZone(None)).unwrap();
        assert_eq!(rename_track(&track, &config, None).unwrap(), RenameAction::Unchanged);

        let other = write_track(dir.path(), "copy.gpx", 40.0, -3.0, "2024-01-28T11:00:00Z");
        let track = load(&other, &TrackValidation::default(), &FixedZone(None)).unwrap();
        assert_eq!(rename_track(&track, &RunConfig::default(), None).unwrap(), RenameAction::Collision(same));
        assert!(other.exists());
    }

    #[test]
    fn test_store_previous_name_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_track(dir.path(), "morning_ride.gpx", 40.0, -3.0, "2024-01-28T10:00:00Z");

        assert!(store_previous_name(&path).unwrap());
        assert!(!store_previous_name(&path).unwrap());

        let gpx = read_gpx_tolerantly(&path).unwrap();
        assert_eq!(gpx.metadata.unwrap().name.as_deref(), Some("morning_ride"));
        assert_eq!(gpx.tracks[0].segments[0].points.len(), 2);
    }

    #[test]
    fn test_update_header_before_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_track(dir.path(), "morning_ride.gpx", 40.0, -3.0, "2024-01-28T10:00:00Z");
        let track = load(&path, &TrackValidation::default(), &FixedZone(None)).unwrap();
        let config = RunConfig { update_header: true, ..RunConfig::default() };

        let RenameAction::Renamed(target) = rename_track(&track, &config, None).unwrap() else {
            panic!("expected a rename");
        };
        let gpx = read_gpx_tolerantly(&target).unwrap();
        assert_eq!(gpx.metadata.unwrap().name.as_deref(), Some("morning_ride"));
    }
}
