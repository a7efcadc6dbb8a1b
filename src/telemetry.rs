/// GoPro telemetry (GPMF) decoding.
///
/// Action cameras store their GPS log in a `gpmd` data track of the MP4
/// container. The track is pulled out with ffprobe/ffmpeg and walked as a
/// KLV tree: `DEVC` > `STRM` > (`GPSU`, `GPSF`, `SCAL`, `GPS5`).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Command;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
}

pub trait TelemetryDecoder: Sync {
    /// Lazy, finite, single-use sequence of GPS samples. A file without a
    /// telemetry track yields an empty sequence.
    fn extract_track(&self, path: &Path) -> Result<Box<dyn Iterator<Item = TelemetrySample>>>;
}

pub struct GpmfDecoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    available: bool,
}

impl GpmfDecoder {
    pub fn new() -> Self {
        let ffmpeg = crate::tools::ffmpeg_path();
        let ffprobe = crate::tools::ffprobe_path();
        let available = crate::tools::is_available(&ffmpeg, "-version")
            && crate::tools::is_available(&ffprobe, "-version");
        GpmfDecoder { ffmpeg, ffprobe, available }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    fn find_gpmd_stream(&self, path: &Path) -> Result<Option<usize>> {
        #[derive(Deserialize)]
        struct FfprobeOutput {
            #[serde(default)]
            streams: Vec<FfprobeStream>,
        }
        #[derive(Deserialize)]
        struct FfprobeStream {
            index: usize,
            #[serde(default)]
            codec_tag_string: String,
        }

        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-show_streams", "-of", "json"])
            .arg(path)
            .output()
            .map_err(|e| SyncError::Telemetry(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(SyncError::Telemetry(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }

        let listing: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
        Ok(listing
            .streams
            .into_iter()
            .find(|s| s.codec_tag_string == "gpmd")
            .map(|s| s.index))
    }

    fn extract_stream(&self, path: &Path, index: usize) -> Result<Vec<u8>> {
        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-i"])
            .arg(path)
            .args(["-map", &format!("0:{}", index), "-codec", "copy", "-f", "rawvideo", "-"])
            .output()
            .map_err(|e| SyncError::Telemetry(format!("Failed to run ffmpeg: {}", e)))?;

        if !output.status.success() {
            return Err(SyncError::Telemetry(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
        Ok(output.stdout)
    }
}

impl Default for GpmfDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryDecoder for GpmfDecoder {
    fn extract_track(&self, path: &Path) -> Result<Box<dyn Iterator<Item = TelemetrySample>>> {
        if !self.available {
            return Ok(Box::new(std::iter::empty()));
        }

        match self.find_gpmd_stream(path)? {
            Some(index) => Ok(Box::new(GpmfSamples::new(self.extract_stream(path, index)?))),
            None => Ok(Box::new(std::iter::empty())),
        }
    }
}

/// One key-length-value entry of a GPMF payload
struct Klv<'a> {
    key: [u8; 4],
    kind: u8,
    size: usize,
    repeat: usize,
    payload: &'a [u8],
}

/// Read the entry at `offset`, returning it and the offset of the next one
fn next_klv(data: &[u8], offset: usize) -> Option<(Klv<'_>, usize)> {
    let header = data.get(offset..offset + 8)?;
    let size = header[5] as usize;
    let repeat = u16::from_be_bytes([header[6], header[7]]) as usize;
    let length = size * repeat;
    let start = offset + 8;
    let payload = data.get(start..start + length)?;
    // payloads are padded to 32 bits
    let next = start + ((length + 3) & !3);

    Some((
        Klv {
            key: [header[0], header[1], header[2], header[3]],
            kind: header[4],
            size,
            repeat,
            payload,
        },
        next,
    ))
}

fn children(data: &[u8]) -> impl Iterator<Item = Klv<'_>> {
    let mut offset = 0;
    std::iter::from_fn(move || {
        let (klv, next) = next_klv(data, offset)?;
        offset = next;
        Some(klv)
    })
}

/// Numeric values of an entry, widened to f64
fn numbers(klv: &Klv) -> Vec<f64> {
    let width = match klv.kind {
        b'l' | b'L' => 4,
        b's' | b'S' => 2,
        b'b' | b'B' => 1,
        _ => return Vec::new(),
    };
    if klv.size == 0 || klv.size % width != 0 {
        return Vec::new();
    }

    klv.payload
        .chunks_exact(width)
        .map(|c| match klv.kind {
            b'l' => i32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64,
            b'L' => u32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64,
            b's' => i16::from_be_bytes([c[0], c[1]]) as f64,
            b'S' => u16::from_be_bytes([c[0], c[1]]) as f64,
            b'b' => c[0] as i8 as f64,
            _ => c[0] as f64,
        })
        .collect()
}

/// "yymmddhhmmss.sss"
fn parse_gpsu(payload: &[u8]) -> Option<DateTime<Utc>> {
    let text = std::str::from_utf8(payload).ok()?.trim_end_matches('\0');
    NaiveDateTime::parse_from_str(&format!("20{}", text), "%Y%m%d%H%M%S%.3f")
        .ok()
        .map(|t| t.and_utc())
}

/// Samples of one `STRM` holding GPS5 data; empty without a lock or a time
fn gps_stream_samples(strm: &[u8]) -> Vec<TelemetrySample> {
    let mut scale = vec![1.0];
    let mut start = None;
    let mut locked = true;
    let mut gps5 = None;

    for klv in children(strm) {
        let key = klv.key;
        match &key {
            b"SCAL" => {
                let values = numbers(&klv);
                if !values.is_empty() {
                    scale = values;
                }
            }
            b"GPSU" => start = parse_gpsu(klv.payload),
            b"GPSF" => locked = numbers(&klv).first().map_or(true, |&fix| fix >= 2.0),
            b"GPS5" => gps5 = Some(klv),
            _ => {}
        }
    }

    let (Some(gps5), Some(start)) = (gps5, start) else {
        return Vec::new();
    };
    if !locked || gps5.kind != b'l' || gps5.size != 20 {
        return Vec::new();
    }

    let lat_scale = scale[0];
    let lon_scale = scale.get(1).copied().unwrap_or(lat_scale);
    if lat_scale == 0.0 || lon_scale == 0.0 {
        return Vec::new();
    }

    // one payload covers about a second
    let step_ms = 1000 / gps5.repeat.max(1) as i64;

    gps5.payload
        .chunks_exact(20)
        .enumerate()
        .map(|(i, c)| TelemetrySample {
            timestamp: start + Duration::milliseconds(step_ms * i as i64),
            latitude: i32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64 / lat_scale,
            longitude: i32::from_be_bytes([c[4], c[5], c[6], c[7]]) as f64 / lon_scale,
        })
        .collect()
}

/// Iterator over the GPS samples of a raw GPMF track, decoded one `DEVC`
/// at a time.
pub struct GpmfSamples {
    data: Vec<u8>,
    offset: usize,
    pending: VecDeque<TelemetrySample>,
}

impl GpmfSamples {
    pub fn new(data: Vec<u8>) -> Self {
        GpmfSamples { data, offset: 0, pending: VecDeque::new() }
    }
}

impl Iterator for GpmfSamples {
    type Item = TelemetrySample;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(sample) = self.pending.pop_front() {
                return Some(sample);
            }

            let (devc, next) = next_klv(&self.data, self.offset)?;
            self.offset = next;
            if &devc.key != b"DEVC" || devc.kind != 0 {
                continue;
            }

            for strm in children(devc.payload) {
                if &strm.key == b"STRM" && strm.kind == 0 {
                    self.pending.extend(gps_stream_samples(strm.payload));
                }
            }
        }
    }
}
