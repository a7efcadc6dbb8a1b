// CSV report of a media run, one row per file

use std::path::Path;
use csv::Writer;
use serde::Serialize;

use crate::error::Result;
use crate::reconcile::{MediaRecord, PositionSource};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Serialize)]
struct MediaRow {
    file: String,
    file_time: String,
    capture_time: String,
    gps_time: String,
    resolved_time: String,
    source: PositionSource,
    latitude: Option<f64>,
    longitude: Option<f64>,
    elevation: Option<f64>,
    had_position: bool,
    place: String,
    outcome: String,
}

impl From<&MediaRecord> for MediaRow {
    fn from(record: &MediaRecord) -> Self {
        let format = |t: Option<chrono::NaiveDateTime>| {
            t.map(|t| t.format(TIME_FORMAT).to_string()).unwrap_or_default()
        };
        let position = record.matched_position;

        MediaRow {
            file: record.path.display().to_string(),
            file_time: format(record.candidate.atime),
            capture_time: format(record.candidate.etime),
            gps_time: format(record.candidate.gtime),
            resolved_time: format(record.resolved_time),
            source: record.source,
            latitude: position.map(|p| p.latitude),
            longitude: position.map(|p| p.longitude),
            elevation: position.map(|p| p.elevation),
            had_position: record.existing_position.is_some(),
            place: record.place.clone().unwrap_or_default(),
            outcome: record.outcome.to_string(),
        }
    }
}

pub fn write_media_report(output_path: &Path, records: &[MediaRecord]) -> Result<()> {
    let mut wtr = Writer::from_path(output_path)?;
    for record in records {
        wtr.serialize(MediaRow::from(record))?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::Outcome;
    use crate::time_resolver::MediaTimeCandidate;
    use crate::track::tests::at;
    use crate::track::GeoPosition;
    use std::fs;
    use std::path::PathBuf;

    #[test]
    fn test_report_rows() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("report.csv");

        let resolved = MediaRecord {
            path: PathBuf::from("a.jpg"),
            is_video: false,
            candidate: MediaTimeCandidate { etime: Some(at(10, 5, 0)), ..Default::default() },
            resolved_time: Some(at(10, 5, 0)),
            existing_position: None,
            matched_position: Some(GeoPosition {
                latitude: 40.1,
                longitude: -3.1,
                elevation: 650.0,
                timestamp: at(10, 10, 0),
                utc: None,
            }),
            source: PositionSource::Track,
            outcome: Outcome::Proposed,
            place: Some("Teruel".to_string()),
        };
        let unresolved = MediaRecord {
            path: PathBuf::from("b.jpg"),
            matched_position: None,
            source: PositionSource::Unresolved,
            outcome: Outcome::Unresolved,
            place: None,
            ..resolved.clone()
        };

        write_media_report(&output, &[resolved, unresolved]).unwrap();
        let text = fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("file,file_time,capture_time,gps_time,resolved_time,source"));
        assert_eq!(
            lines[1],
            "a.jpg,,2024-01-28 10:05:00,,2024-01-28 10:05:00,Track,40.1,-3.1,650.0,false,Teruel,proposed"
        );
        assert!(lines[2].starts_with("b.jpg,"));
        assert!(lines[2].ends_with(",Unresolved,,,,false,,unresolved"));
    }
}
