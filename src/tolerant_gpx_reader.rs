/// Forgiving GPX reading.
///
/// Handheld loggers and phone apps often write files with a missing
/// declaration, no `version` attribute or a truncated tail after a crash.
/// The standard parser is tried first; if it fails a small set of repairs
/// that never touch coordinates or times is applied and parsing is retried.

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;
use gpx::{read, Gpx};

use crate::error::TrackError;

pub fn read_gpx_tolerantly(path: &Path) -> Result<Gpx, TrackError> {
    let mut content = String::new();
    File::open(path)
        .and_then(|mut f| f.read_to_string(&mut content))
        .map_err(|e| TrackError::Parse(e.to_string()))?;

    parse_tolerantly(&content)
}

pub fn parse_tolerantly(content: &str) -> Result<Gpx, TrackError> {
    let standard_error = match read(BufReader::new(Cursor::new(content.as_bytes()))) {
        Ok(gpx) => return Ok(gpx),
        Err(e) => e.to_string(),
    };

    let repaired = apply_minimal_safe_repairs(content);
    if repaired == content {
        return Err(TrackError::Parse(standard_error));
    }

    match read(BufReader::new(Cursor::new(repaired.as_bytes()))) {
        Ok(gpx) => {
            log::debug!("GPX parsed after repair (standard parse failed: {})", standard_error);
            Ok(gpx)
        }
        Err(e) => Err(TrackError::Parse(format!("{} (after repair: {})", standard_error, e))),
    }
}

/// Repairs limited to structure: coordinates and times are left untouched
fn apply_minimal_safe_repairs(content: &str) -> String {
    let mut repaired = remove_invalid_xml_chars(content.trim());

    if !repaired.starts_with("<?xml") {
        repaired = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", repaired);
    }

    if repaired.contains("<gpx") {
        repaired = add_gpx_version_safely(&repaired);
    }

    close_unclosed_tags_safely(&repaired)
}

fn add_gpx_version_safely(content: &str) -> String {
    let Some(gpx_start) = content.find("<gpx") else {
        return content.to_string();
    };
    let Some(gpx_end) = content[gpx_start..].find('>') else {
        return content.to_string();
    };

    let gpx_tag = &content[gpx_start..gpx_start + gpx_end + 1];
    if gpx_tag.contains("version=") {
        return content.to_string();
    }

    let new_tag = if gpx_tag.contains("xmlns=") {
        gpx_tag.replacen("<gpx", "<gpx version=\"1.1\"", 1)
    } else {
        gpx_tag.replacen(
            "<gpx",
            "<gpx version=\"1.1\" xmlns=\"http://www.topografix.com/GPX/1/1\"",
            1,
        )
    };

    format!(
        "{}{}{}",
        &content[..gpx_start],
        new_tag,
        &content[gpx_start + gpx_end + 1..]
    )
}

fn close_unclosed_tags_safely(content: &str) -> String {
    let mut repaired = content.to_string();

    if repaired.ends_with("</gpx>") || !repaired.contains("<gpx") {
        return repaired;
    }

    // a partially written point cannot be completed, drop it
    let open_pt = repaired.rfind("<trkpt");
    let close_pt = repaired.rfind("</trkpt>");
    if let Some(open) = open_pt {
        if close_pt.map_or(true, |close| close < open) {
            repaired.truncate(open);
        }
    }

    let open_trkseg = repaired.matches("<trkseg>").count();
    let close_trkseg = repaired.matches("</trkseg>").count();
    let open_trk = repaired.matches("<trk>").count();
    let close_trk = repaired.matches("</trk>").count();

    for _ in close_trkseg..open_trkseg {
        repaired.push_str("\n    </trkseg>");
    }
    for _ in close_trk..open_trk {
        repaired.push_str("\n  </trk>");
    }
    repaired.push_str("\n</gpx>");

    repaired
}

fn remove_invalid_xml_chars(content: &str) -> String {
    content
        .chars()
        .filter(|&c| {
            c == '\t' || c == '\n' || c == '\r' ||
            (' '..='~').contains(&c) ||
            (0x80..=0xD7FF).contains(&(c as u32)) ||
            (0xE000..=0xFFFD).contains(&(c as u32)) ||
            (c as u32) >= 0x10000
        })
        .collect()
}
