/// Position matching of a local time against the loaded tracks.
///
/// A target that falls between two consecutive points of a track is
/// accepted at once with the closing point of that interval. Only when no
/// track brackets the target is the nearest point in time considered, and
/// then only within the configured tolerance.

use chrono::{Duration, NaiveDateTime};
use std::path::Path;

use crate::track::{GeoPosition, TrackSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Target bracketed by two consecutive points
    Interval,
    /// Nearest point within tolerance
    Nearest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome<'a> {
    pub position: Option<GeoPosition>,
    pub matched: bool,
    pub kind: Option<MatchKind>,
    /// Distance in time to the chosen (or best rejected) point
    pub distance: Option<Duration>,
    pub track: Option<&'a Path>,
}

impl MatchOutcome<'_> {
    fn unmatched(distance: Option<Duration>) -> Self {
        MatchOutcome { position: None, matched: false, kind: None, distance, track: None }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PositionMatcher {
    tolerance: Duration,
}

impl PositionMatcher {
    pub fn new(tolerance_seconds: i64) -> Self {
        PositionMatcher { tolerance: Duration::seconds(tolerance_seconds) }
    }

    /// Tracks are visited in path order; the first minimum wins ties.
    pub fn match_time<'a>(&self, target: NaiveDateTime, tracks: &'a TrackSet) -> MatchOutcome<'a> {
        let mut closest: Option<(GeoPosition, Duration, &'a Path)> = None;

        for (path, track) in tracks {
            let Some((first, last)) = track.time_span() else { continue };
            if target < first - self.tolerance || target > last + self.tolerance {
                continue;
            }

            let mut previous: Option<NaiveDateTime> = None;
            for (point, time) in track.timed_points() {
                let distance = (target - time).abs();
                if closest.as_ref().map_or(true, |(_, best, _)| distance < *best) {
                    if let Some(position) = point.to_position() {
                        closest = Some((position, distance, path.as_path()));
                    }
                }

                if let Some(prev) = previous {
                    if prev <= target && target <= time {
                        return MatchOutcome {
                            position: point.to_position(),
                            matched: true,
                            kind: Some(MatchKind::Interval),
                            distance: Some(distance),
                            track: Some(path.as_path()),
                        };
                    }
                }
                previous = Some(time);
            }
        }

        match closest {
            Some((position, distance, path)) if distance <= self.tolerance => MatchOutcome {
                position: Some(position),
                matched: true,
                kind: Some(MatchKind::Nearest),
                distance: Some(distance),
                track: Some(path),
            },
            Some((_, distance, _)) => MatchOutcome::unmatched(Some(distance)),
            None => MatchOutcome::unmatched(None),
        }
    }
}
