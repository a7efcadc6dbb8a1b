// ExifTool wrapper for reading capture time / GPS tags and writing positions

use std::path::{Path, PathBuf};
use std::process::Command;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::track::GeoPosition;

/// Capture-time tags in order of preference
const DATE_TAGS: [&str; 4] = ["DateTimeOriginal", "DateTime", "DateTimeDigitized", "CreateDate"];

const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Tags of interest read from one media file. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaTags {
    pub capture_time: Option<NaiveDateTime>,
    pub gps: Option<GpsFix>,
}

/// Capture time and GPS position come back from a single read
pub trait MetadataService: Sync {
    fn read_tags(&self, path: &Path) -> Result<MediaTags>;
    fn write_position(&self, path: &Path, position: &GeoPosition, is_video: bool) -> Result<()>;
}

pub struct ExifTool {
    program: PathBuf,
}

impl ExifTool {
    pub fn new() -> Self {
        ExifTool { program: crate::tools::exiftool_path() }
    }
}

impl Default for ExifTool {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataService for ExifTool {
    fn read_tags(&self, path: &Path) -> Result<MediaTags> {
        let mut command = Command::new(&self.program);
        command.args(["-j", "-n"]);
        for tag in DATE_TAGS.iter().chain(["GPSLatitude", "GPSLongitude", "GPSAltitude", "GPSDateTime"].iter()) {
            command.arg(format!("-{}", tag));
        }

        let output = command
            .arg(path)
            .output()
            .map_err(|e| SyncError::ExifTool(format!("Failed to run exiftool: {}", e)))?;

        if !output.status.success() {
            return Err(SyncError::ExifTool(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }

        let raw: Value = serde_json::from_slice(&output.stdout)?;
        // exiftool returns an array; take the first element
        let dump = raw.as_array().and_then(|a| a.first()).cloned().unwrap_or(Value::Null);

        Ok(parse_tags(&dump))
    }

    fn write_position(&self, path: &Path, position: &GeoPosition, is_video: bool) -> Result<()> {
        let output = Command::new(&self.program)
            .args(["-overwrite_original", "-n"])
            .args(position_arguments(position, is_video))
            .arg(path)
            .output()
            .map_err(|e| SyncError::ExifTool(format!("Failed to run exiftool: {}", e)))?;

        if !output.status.success() {
            return Err(SyncError::ExifTool(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
        Ok(())
    }
}

fn parse_tags(dump: &Value) -> MediaTags {
    let capture_time = DATE_TAGS
        .iter()
        .filter_map(|tag| dump.get(*tag).and_then(Value::as_str))
        .find_map(parse_exif_date);

    let latitude = dump.get("GPSLatitude").and_then(Value::as_f64);
    let longitude = dump.get("GPSLongitude").and_then(Value::as_f64);
    let gps = match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(GpsFix {
            latitude,
            longitude,
            elevation: dump.get("GPSAltitude").and_then(Value::as_f64).unwrap_or(0.0),
            timestamp: dump
                .get("GPSDateTime")
                .and_then(Value::as_str)
                .and_then(parse_gps_date),
        }),
        _ => None,
    };

    MediaTags { capture_time, gps }
}

/// "2024:01:28 08:46:21", possibly followed by sub-seconds or an offset
fn parse_exif_date(raw: &str) -> Option<NaiveDateTime> {
    let head = raw.get(..19)?;
    NaiveDateTime::parse_from_str(head, EXIF_DATE_FORMAT).ok()
}

/// "2024:01:28 07:46:21Z" or "2024:01:28 07:46:21.5Z"
fn parse_gps_date(raw: &str) -> Option<DateTime<Utc>> {
    parse_exif_date(raw).map(|t| t.and_utc())
}

fn position_arguments(position: &GeoPosition, is_video: bool) -> Vec<String> {
    let lat_ref = if position.latitude >= 0.0 { "N" } else { "S" };
    let lon_ref = if position.longitude >= 0.0 { "E" } else { "W" };

    let mut args = vec![
        format!("-GPSLatitude={}", position.latitude.abs()),
        format!("-GPSLatitudeRef={}", lat_ref),
        format!("-GPSLongitude={}", position.longitude.abs()),
        format!("-GPSLongitudeRef={}", lon_ref),
        format!("-GPSAltitude={}", position.elevation.abs()),
        format!("-GPSAltitudeRef={}", if position.elevation >= 0.0 { 0 } else { 1 }),
    ];

    if let Some(utc) = position.utc {
        args.push(format!("-GPSDateStamp={}", utc.format("%Y:%m:%d")));
        args.push(format!("-GPSTimeStamp={}", utc.format("%H:%M:%S")));
    }

    if is_video {
        args.push(format!(
            "-Keys:GPSCoordinates={} {} {}",
            position.latitude, position.longitude, position.elevation
        ));
    }

    args
}
