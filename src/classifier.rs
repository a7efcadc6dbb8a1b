// Content-based file classification and discovery

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::Result;

/// Media types whose location tags exiftool can write
pub const MEDIA_MIME_TYPES: [&str; 4] = ["image/jpeg", "image/heif", "video/mp4", "video/quicktime"];

/// Bytes inspected when looking for a GPX root element
const GPX_SNIFF_BYTES: usize = 4096;

pub trait MediaClassifier: Sync {
    fn is_media(&self, path: &Path) -> bool;
    fn is_video(&self, path: &Path) -> bool;
    fn is_gpx(&self, path: &Path) -> bool;
}

/// Classifies by magic bytes; file extensions are never consulted
pub struct ContentSniffer;

impl ContentSniffer {
    fn mime_type(path: &Path) -> Option<&'static str> {
        match infer::get_from_path(path) {
            Ok(kind) => kind.map(|k| k.mime_type()),
            Err(e) => {
                log::debug!("{}: cannot sniff content ({})", path.display(), e);
                None
            }
        }
    }
}

impl MediaClassifier for ContentSniffer {
    fn is_media(&self, path: &Path) -> bool {
        Self::mime_type(path).map_or(false, |m| MEDIA_MIME_TYPES.contains(&m))
    }

    fn is_video(&self, path: &Path) -> bool {
        Self::mime_type(path).map_or(false, |m| m.starts_with("video/"))
    }

    fn is_gpx(&self, path: &Path) -> bool {
        let Ok(file) = File::open(path) else {
            return false;
        };
        let mut head = Vec::with_capacity(GPX_SNIFF_BYTES);
        if file.take(GPX_SNIFF_BYTES as u64).read_to_end(&mut head).is_err() {
            return false;
        }
        String::from_utf8_lossy(&head).contains("<gpx")
    }
}

/// Regular files below `root` accepted by `keep`, in path order, plus the
/// number of entries that could not be read. Only an unreadable root is an
/// error.
pub fn walk_files(root: &Path, mut keep: impl FnMut(&Path) -> bool) -> Result<(Vec<PathBuf>, usize)> {
    let mut files = Vec::new();
    let mut unreadable = 0;

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                log::warn!("skipping unreadable entry: {}", e);
                unreadable += 1;
                continue;
            }
        };
        if entry.file_type().is_file() && keep(entry.path()) {
            files.push(entry.into_path());
        }
    }

    Ok((files, unreadable))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_jpeg_is_media_whatever_the_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.txt");
        fs::write(&path, [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00]).unwrap();

        assert!(ContentSniffer.is_media(&path));
        assert!(!ContentSniffer.is_video(&path));
        assert!(!ContentSniffer.is_gpx(&path));
    }

    #[test]
    fn test_gpx_detected_by_root_element() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.xml");
        fs::write(&path, "<?xml version=\"1.0\"?>\n<gpx version=\"1.1\"></gpx>").unwrap();
        assert!(ContentSniffer.is_gpx(&path));
        assert!(!ContentSniffer.is_media(&path));
    }

    #[test]
    fn test_unreadable_file_is_nothing() {
        let path = Path::new("/nonexistent/file.jpg");
        assert!(!ContentSniffer.is_media(path));
        assert!(!ContentSniffer.is_gpx(path));
    }

    #[cfg(unix)]
    #[test]
    fn test_walk_keeps_going_past_unreadable_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        fs::write(dir.path().join("notes.txt"), b"n").unwrap();
        let locked = lock_directory(dir.path(), "locked");
        // root ignores directory permissions
        let blocked = fs::read_dir(&locked).is_err();

        let result = walk_files(dir.path(), |p| p.extension().map_or(false, |e| e == "jpg"));
        unlock_directory(&locked);

        let (files, unreadable) = result.unwrap();
        if blocked {
            assert_eq!(files, vec![dir.path().join("a.jpg")]);
            assert_eq!(unreadable, 1);
        } else {
            assert_eq!(files, vec![dir.path().join("a.jpg"), locked.join("hidden.jpg")]);
            assert_eq!(unreadable, 0);
        }
    }

    #[test]
    fn test_walk_of_missing_root_fails() {
        assert!(walk_files(Path::new("/nonexistent/media"), |_| true).is_err());
    }

    /// A subdirectory holding one file, with all permissions removed
    #[cfg(unix)]
    pub fn lock_directory(parent: &Path, name: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let locked = parent.join(name);
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("hidden.jpg"), b"h").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        locked
    }

    #[cfg(unix)]
    pub fn unlock_directory(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}
