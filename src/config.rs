use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Extensions skipped during media traversal (GoPro low-res proxies and thumbnails)
pub const DEFAULT_DENY_EXTENSIONS: [&str; 2] = ["LRV", "THM"];

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Compute everything, write nothing
    pub dry_run: bool,
    /// Overwrite positions already embedded in media files
    pub force: bool,
    /// Reject tracks that fail validation instead of truncating them
    pub strict_track_validation: bool,
    /// Max distance between media time and the nearest track point when no
    /// track interval brackets the media time
    pub match_tolerance_seconds: i64,
    /// Max distance between an unresolved media file and a resolved peer
    pub peer_fallback_tolerance_seconds: i64,
    /// Upper-case extensions, without the dot
    pub deny_extensions: BTreeSet<String>,
    /// Distance above which a short hop between points is treated as a glitch
    pub max_jump_meters: f64,
    /// Hops shorter than this in time are checked against `max_jump_meters`
    pub min_jump_seconds: i64,
    pub max_speed_kmh: f64,
    /// Ask the geocoding service for a place name
    pub geocode: bool,
    /// Country code left out of geocoded names
    pub default_country: Option<String>,
    /// Worker threads for track loading and the first media pass
    pub jobs: usize,
    /// Store the previous file name in the GPX metadata before renaming
    pub update_header: bool,
    /// CSV file receiving one row per media file
    pub report: Option<PathBuf>,
    /// Segment break used by the clock drift report
    pub max_segment_minutes: i64,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            dry_run: false,
            force: false,
            strict_track_validation: true,
            match_tolerance_seconds: 30,
            peer_fallback_tolerance_seconds: 180,
            deny_extensions: DEFAULT_DENY_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            max_jump_meters: 500.0,
            min_jump_seconds: 30,
            max_speed_kmh: 600.0,
            geocode: false,
            default_country: None,
            jobs: num_cpus::get(),
            update_header: false,
            report: None,
            max_segment_minutes: 4 * 60,
        }
    }
}

impl RunConfig {
    /// Nearest point must be within 30 s of the media time
    pub fn strict() -> Self {
        RunConfig::default()
    }

    /// Wide fallback window (500 s) and truncation instead of rejection
    pub fn loose() -> Self {
        RunConfig {
            strict_track_validation: false,
            match_tolerance_seconds: 500,
            ..Default::default()
        }
    }

    pub fn track_validation(&self) -> TrackValidation {
        TrackValidation {
            strict: self.strict_track_validation,
            max_jump_meters: self.max_jump_meters,
            min_jump_seconds: self.min_jump_seconds,
            max_speed_kmh: self.max_speed_kmh,
        }
    }

    pub fn is_denied(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.deny_extensions.contains(&e.to_uppercase()))
            .unwrap_or(false)
    }
}

/// Thresholds applied by the track loader
#[derive(Debug, Clone, Copy)]
pub struct TrackValidation {
    pub strict: bool,
    pub max_jump_meters: f64,
    pub min_jump_seconds: i64,
    pub max_speed_kmh: f64,
}

impl Default for TrackValidation {
    fn default() -> Self {
        RunConfig::default().track_validation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deny_list_ignores_case() {
        let config = RunConfig::default();
        assert!(config.is_denied(Path::new("/media/GL010203.LRV")));
        assert!(config.is_denied(Path::new("/media/gl010203.thm")));
        assert!(!config.is_denied(Path::new("/media/GX010203.MP4")));
        assert!(!config.is_denied(Path::new("/media/README")));
    }

    #[test]
    fn test_presets() {
        assert_eq!(RunConfig::strict().match_tolerance_seconds, 30);
        let loose = RunConfig::loose();
        assert_eq!(loose.match_tolerance_seconds, 500);
        assert!(!loose.track_validation().strict);
        assert_eq!(loose.peer_fallback_tolerance_seconds, 180);
    }
}
