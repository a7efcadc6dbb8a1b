/// Clock drift report
///
/// Cameras that never sync their clock drift away from GPS time. Files are
/// taken in path order, which follows the camera's own numbering, and split
/// into segments wherever the camera time jumps back or leaves a long gap.
/// Each segment reports the mean offset of the camera clock against GPS time.

use std::path::{Path, PathBuf};
use chrono::{Duration, NaiveDateTime};
use colored::Colorize;
use rayon::prelude::*;

use crate::config::RunConfig;
use crate::error::Result;
use crate::reconcile::{collect_media, Collaborators};
use crate::time_resolver::{derive_candidates, MediaTimeCandidate};

#[derive(Debug, Clone, PartialEq)]
pub struct DriftSegment {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub files: Vec<PathBuf>,
    /// Files that also carry a GPS time
    pub samples: usize,
    /// Mean of camera time minus GPS time
    pub mean_drift: Option<Duration>,
}

impl DriftSegment {
    fn open(path: PathBuf, time: NaiveDateTime) -> Self {
        DriftSegment { start: time, end: time, files: vec![path], samples: 0, mean_drift: None }
    }
}

/// Split path-ordered files into segments and average their drift.
pub fn segment_drift(entries: &[(PathBuf, MediaTimeCandidate)], max_gap: Duration) -> Vec<DriftSegment> {
    let mut segments: Vec<DriftSegment> = Vec::new();
    let mut drift_sums: Vec<i64> = Vec::new();

    for (path, candidate) in entries {
        let Some(camera) = candidate.camera_time() else { continue };

        let continues = segments
            .last()
            .map_or(false, |s| camera >= s.end && camera - s.end <= max_gap);
        if continues {
            if let Some(segment) = segments.last_mut() {
                segment.end = camera;
                segment.files.push(path.clone());
            }
        } else {
            segments.push(DriftSegment::open(path.clone(), camera));
            drift_sums.push(0);
        }

        if let (Some(gps), Some(segment), Some(sum)) = (candidate.gtime, segments.last_mut(), drift_sums.last_mut()) {
            *sum += (camera - gps).num_milliseconds();
            segment.samples += 1;
        }
    }

    for (segment, sum) in segments.iter_mut().zip(drift_sums) {
        if segment.samples > 0 {
            segment.mean_drift = Some(Duration::milliseconds(sum / segment.samples as i64));
        }
    }

    segments
}

/// Read-only: derive times for every media file below `root` and print the
/// drift of each segment.
pub fn drift_report(root: &Path, config: &RunConfig, services: Collaborators<'_>) -> Result<Vec<DriftSegment>> {
    let (files, unreadable) = collect_media(root, config, services.classifier)?;
    if unreadable > 0 {
        log::warn!("{} unreadable entr(ies) below {} left out of the drift report", unreadable, root.display());
    }

    let entries: Vec<(PathBuf, MediaTimeCandidate)> = files
        .into_par_iter()
        .filter_map(|path| {
            let is_video = services.classifier.is_video(&path);
            match derive_candidates(&path, is_video, services.metadata, services.telemetry, services.timezone) {
                Ok(times) => Some((path, times.candidate)),
                Err(e) => {
                    log::warn!("{}: {}", path.display(), e);
                    None
                }
            }
        })
        .collect();

    let segments = segment_drift(&entries, Duration::minutes(config.max_segment_minutes));

    println!("\n⏱️  CLOCK DRIFT");
    println!("==============");
    for (index, segment) in segments.iter().enumerate() {
        println!(
            "Segment {}: {} -> {} ({} files, {} with GPS time)",
            index,
            segment.start.format("%d/%m/%Y %H:%M:%S"),
            segment.end.format("%d/%m/%Y %H:%M:%S"),
            segment.files.len(),
            segment.samples
        );
        match segment.mean_drift {
            Some(drift) => {
                let text = format!("   drift: {:+} s", drift.num_milliseconds() as f64 / 1000.0);
                if drift.num_seconds().abs() > crate::time_resolver::GPS_DISAGREEMENT_SECONDS {
                    println!("{}", text.yellow());
                } else {
                    println!("{}", text.green());
                }
            }
            None => println!("   drift: unknown"),
        }
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::tests::at;

    fn entry(name: &str, camera: NaiveDateTime, gps: Option<NaiveDateTime>) -> (PathBuf, MediaTimeCandidate) {
        (
            PathBuf::from(name),
            MediaTimeCandidate { atime: None, etime: Some(camera), gtime: gps },
        )
    }

    #[test]
    fn test_mean_drift_per_segment() {
        let entries = vec![
            entry("GX0001.MP4", at(10, 0, 0), Some(at(9, 59, 0))),
            entry("IMG_0002.JPG", at(10, 5, 0), None),
            entry("GX0003.MP4", at(10, 10, 0), Some(at(10, 8, 0))),
        ];

        let segments = segment_drift(&entries, Duration::minutes(240));
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].files.len(), 3);
        assert_eq!(segments[0].samples, 2);
        assert_eq!(segments[0].mean_drift, Some(Duration::seconds(90)));
        assert_eq!((segments[0].start, segments[0].end), (at(10, 0, 0), at(10, 10, 0)));
    }

    #[test]
    fn test_clock_reset_and_long_gap_split_segments() {
        let entries = vec![
            entry("IMG_0001.JPG", at(10, 0, 0), None),
            // camera clock reset
            entry("IMG_0002.JPG", at(1, 0, 0), Some(at(10, 1, 0))),
            // five hours later
            entry("IMG_0003.JPG", at(6, 0, 0), None),
        ];

        let segments = segment_drift(&entries, Duration::minutes(240));
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].mean_drift, None);
        assert_eq!(segments[1].mean_drift, Some(Duration::hours(-9) - Duration::minutes(1)));
    }

    #[test]
    fn test_files_without_camera_time_are_ignored() {
        let entries = vec![(PathBuf::from("a.jpg"), MediaTimeCandidate::default())];
        assert!(segment_drift(&entries, Duration::minutes(240)).is_empty());
    }
}
