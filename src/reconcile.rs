/// Media reconciliation
///
/// Pass 1 resolves a capture time for every media file and looks it up in
/// the tracks. Pass 2 gives files that no track covers the position of the
/// closest resolved file in time. Only then are positions written, reported
/// and counted, in path order.

use std::fmt;
use std::path::{Path, PathBuf};
use chrono::{Duration, NaiveDateTime};
use colored::Colorize;
use rayon::prelude::*;
use serde::Serialize;

use crate::classifier::{walk_files, MediaClassifier};
use crate::config::RunConfig;
use crate::error::{Result, SyncError};
use crate::exiftool::MetadataService;
use crate::geocoder::Geocoder;
use crate::matcher::PositionMatcher;
use crate::telemetry::TelemetryDecoder;
use crate::time_resolver::{best_date, derive_candidates, MediaTimeCandidate, TimezoneResolver};
use crate::track::{GeoPosition, TrackSet};

/// The external services a run talks to
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub metadata: &'a dyn MetadataService,
    pub telemetry: &'a dyn TelemetryDecoder,
    pub timezone: &'a dyn TimezoneResolver,
    pub classifier: &'a dyn MediaClassifier,
    pub geocoder: Option<&'a dyn Geocoder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PositionSource {
    Track,
    Peer,
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Written,
    /// Would have been written without --dry-run
    Proposed,
    /// Position already present and --force not given
    Kept,
    Unresolved,
    Failed(String),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Written => write!(f, "written"),
            Outcome::Proposed => write!(f, "proposed"),
            Outcome::Kept => write!(f, "kept"),
            Outcome::Unresolved => write!(f, "unresolved"),
            Outcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaRecord {
    pub path: PathBuf,
    pub is_video: bool,
    pub candidate: MediaTimeCandidate,
    pub resolved_time: Option<NaiveDateTime>,
    pub existing_position: Option<GeoPosition>,
    pub matched_position: Option<GeoPosition>,
    pub source: PositionSource,
    pub outcome: Outcome,
    pub place: Option<String>,
}

impl MediaRecord {
    fn new(path: PathBuf, is_video: bool) -> Self {
        MediaRecord {
            path,
            is_video,
            candidate: MediaTimeCandidate::default(),
            resolved_time: None,
            existing_position: None,
            matched_position: None,
            source: PositionSource::Unresolved,
            outcome: Outcome::Unresolved,
            place: None,
        }
    }

    fn failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub total: usize,
    pub errors: usize,
    pub updated: usize,
    pub proposed: usize,
    pub unresolved: usize,
    pub skipped: usize,
}

/// State of one media run
#[derive(Debug, Default)]
pub struct RunContext {
    pub counters: RunCounters,
    pub records: Vec<MediaRecord>,
}

impl RunContext {
    pub fn print_summary(&self) {
        let c = &self.counters;
        let line = format!(
            "{} files, {} updated, {} proposed, {} kept, {} unresolved, {} errors",
            c.total, c.updated, c.proposed, c.skipped, c.unresolved, c.errors
        );
        println!("\n📊 MEDIA SUMMARY");
        println!("================");
        if c.errors == 0 {
            println!("{}", line.green());
        } else {
            println!("{}", line.yellow());
        }
    }
}

/// Media files below `root`, path sorted, deny-listed extensions left out,
/// plus the number of unreadable entries met on the way
pub fn collect_media(
    root: &Path,
    config: &RunConfig,
    classifier: &dyn MediaClassifier,
) -> Result<(Vec<PathBuf>, usize)> {
    if !root.exists() {
        return Err(SyncError::NotFound(root.to_path_buf()));
    }

    walk_files(root, |path| {
        if config.is_denied(path) {
            log::debug!("{}: deny-listed, skipped", path.display());
            return false;
        }
        classifier.is_media(path)
    })
}

/// Run both passes over the media below `root` and apply the update policy.
pub fn sync_media(
    root: &Path,
    tracks: &TrackSet,
    config: &RunConfig,
    services: Collaborators<'_>,
) -> Result<RunContext> {
    let (files, unreadable) = collect_media(root, config, services.classifier)?;
    log::info!("Reconciling {} media file(s) from {}", files.len(), root.display());

    let matcher = PositionMatcher::new(config.match_tolerance_seconds);
    let mut records: Vec<MediaRecord> = files
        .into_par_iter()
        .map(|path| resolve_from_tracks(path, tracks, &matcher, services))
        .collect();

    resolve_from_peers(&mut records, Duration::seconds(config.peer_fallback_tolerance_seconds));

    let mut context = RunContext::default();
    context.counters.total = unreadable;
    context.counters.errors = unreadable;
    for mut record in records {
        apply_update_policy(&mut record, config, services, &mut context.counters);
        print_record(&record);
        context.records.push(record);
    }

    if let Some(report) = &config.report {
        crate::report::write_media_report(report, &context.records)?;
        println!("📄 Report saved to: {}", report.display());
    }

    Ok(context)
}

fn resolve_from_tracks(
    path: PathBuf,
    tracks: &TrackSet,
    matcher: &PositionMatcher,
    services: Collaborators<'_>,
) -> MediaRecord {
    let is_video = services.classifier.is_video(&path);
    let mut record = MediaRecord::new(path, is_video);

    let times = match derive_candidates(
        &record.path,
        is_video,
        services.metadata,
        services.telemetry,
        services.timezone,
    ) {
        Ok(times) => times,
        Err(e) => {
            record.outcome = Outcome::Failed(e.to_string());
            return record;
        }
    };

    record.candidate = times.candidate;
    record.existing_position = times.existing_position;
    record.resolved_time = best_date(&times.candidate);

    if let Some(time) = record.resolved_time {
        let outcome = matcher.match_time(time, tracks);
        if outcome.matched {
            if let (Some(kind), Some(track)) = (outcome.kind, outcome.track) {
                log::debug!("{}: {:?} match on {}", record.path.display(), kind, track.display());
            }
            record.matched_position = outcome.position;
            record.source = PositionSource::Track;
        } else {
            log::debug!(
                "{}: no track point near {} (closest {:?})",
                record.path.display(),
                time,
                outcome.distance.map(|d| d.num_seconds())
            );
        }
    }

    record
}

/// Second pass: borrow the position of the nearest file resolved from a track.
///
/// The borrowed position keeps the pending file's own time; its UTC instant is
/// shifted by the same amount. Ties go to the earlier peer.
pub fn resolve_from_peers(records: &mut [MediaRecord], tolerance: Duration) {
    let peers: Vec<(NaiveDateTime, GeoPosition)> = records
        .iter()
        .filter(|r| r.source == PositionSource::Track)
        .filter_map(|r| Some((r.resolved_time?, r.matched_position?)))
        .collect();

    for record in records.iter_mut() {
        if record.source != PositionSource::Unresolved || record.failed() {
            continue;
        }
        let Some(time) = record.resolved_time else { continue };

        let nearest = peers
            .iter()
            .map(|(peer_time, position)| ((time - *peer_time).abs(), *peer_time, position))
            .min_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        if let Some((distance, _, peer)) = nearest {
            if distance <= tolerance {
                let shift = time - peer.timestamp;
                record.matched_position = Some(GeoPosition {
                    timestamp: time,
                    utc: peer.utc.map(|u| u + shift),
                    ..*peer
                });
                record.source = PositionSource::Peer;
            }
        }
    }
}

fn apply_update_policy(
    record: &mut MediaRecord,
    config: &RunConfig,
    services: Collaborators<'_>,
    counters: &mut RunCounters,
) {
    counters.total += 1;
    if record.failed() {
        counters.errors += 1;
        return;
    }

    if let (Some(geocoder), Some(position)) = (services.geocoder, record.matched_position) {
        record.place = geocoder.reverse_geocode(position.latitude, position.longitude);
    }

    // an embedded position is never replaced without --force, matched or not
    if record.existing_position.is_some() && !config.force {
        record.outcome = Outcome::Kept;
        counters.skipped += 1;
        return;
    }

    let Some(position) = record.matched_position else {
        record.outcome = Outcome::Unresolved;
        counters.unresolved += 1;
        return;
    };

    if config.dry_run {
        record.outcome = Outcome::Proposed;
        counters.proposed += 1;
    } else {
        match services.metadata.write_position(&record.path, &position, record.is_video) {
            Ok(()) => {
                record.outcome = Outcome::Written;
                counters.updated += 1;
            }
            Err(e) => {
                log::error!("{}: {}", record.path.display(), e);
                record.outcome = Outcome::Failed(e.to_string());
                counters.errors += 1;
            }
        }
    }
}

fn print_record(record: &MediaRecord) {
    let name = record
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let time = match record.resolved_time {
        Some(t) => {
            let text = t.format("%Y-%m-%d %H:%M:%S").to_string();
            if record.candidate.camera_clock_disagrees() || record.candidate.gps_clock_disagrees() {
                text.yellow()
            } else {
                text.normal()
            }
        }
        None => "no time".red(),
    };

    let shown = match record.outcome {
        Outcome::Kept => record.matched_position.or(record.existing_position),
        _ => record.matched_position,
    };
    let detail = match (&record.outcome, shown) {
        (Outcome::Failed(e), _) => format!("❌ {}", e).red(),
        (outcome, Some(p)) => {
            let mut text = format!("{:.6},{:.6} {:.0}m {:?} {}", p.latitude, p.longitude, p.elevation, record.source, outcome);
            if let Some(place) = &record.place {
                text.push_str(&format!(" {}", place));
            }
            match outcome {
                Outcome::Written | Outcome::Proposed => text.green(),
                _ => text.normal(),
            }
        }
        (outcome, None) => outcome.to_string().yellow(),
    };

    println!("{}  {}  {}", name, time, detail);
}
