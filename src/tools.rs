// External tool resolution for exiftool, ffmpeg and ffprobe
//
// Resolution order:
// 1) Environment variable override (GPX_MEDIA_SYNC_EXIFTOOL, etc.)
// 2) Program name, looked up in PATH by the OS

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

fn resolve_tool(env_key: &str, default_name: &str) -> PathBuf {
    if let Ok(v) = env::var(env_key) {
        let p = PathBuf::from(&v);
        if p.exists() {
            return p;
        }
        log::warn!("{} points to missing file {}, using {}", env_key, v, default_name);
    }

    let mut filename = default_name.to_string();
    if cfg!(windows) && !filename.to_lowercase().ends_with(".exe") {
        filename.push_str(".exe");
    }
    PathBuf::from(filename)
}

pub fn exiftool_path() -> PathBuf {
    resolve_tool("GPX_MEDIA_SYNC_EXIFTOOL", "exiftool")
}

pub fn ffmpeg_path() -> PathBuf {
    resolve_tool("GPX_MEDIA_SYNC_FFMPEG", "ffmpeg")
}

pub fn ffprobe_path() -> PathBuf {
    resolve_tool("GPX_MEDIA_SYNC_FFPROBE", "ffprobe")
}

/// True when the tool starts and exits cleanly with the given version flag
pub fn is_available(program: &Path, version_flag: &str) -> bool {
    Command::new(program)
        .arg(version_flag)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
