//! Track library: filesystem scan, tag metadata, playlist file.

pub mod search;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Accessor;
use walkdir::WalkDir;

/// Extensions the player accepts.
pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["mp3", "wav", "ogg", "flac", "m4a", "aac"];

/// One playable track. Identity is the absolute path; metadata is resolved
/// once at scan time and immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub path: PathBuf,
    pub artist: String,
    pub title: String,
    /// Seconds; 0.0 when the container does not carry a duration.
    pub duration: f64,
}

impl Track {
    /// Build a track from tags, falling back to the file stem for the title
    /// and "Unknown Artist" for the artist.
    pub fn from_path(path: &Path) -> Self {
        let (artist, title, duration) = read_tags(path);
        Self {
            path: path.to_path_buf(),
            artist,
            title,
            duration,
        }
    }

    /// "Artist - Title" as shown in search results.
    pub fn display(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn read_tags(path: &Path) -> (String, String, f64) {
    let tagged = match Probe::open(path).and_then(|p| p.read()) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!(target: "library", path = %path.display(), error = %e,
                "tag read failed, falling back to filename");
            return ("Unknown Artist".to_string(), file_stem(path), 0.0);
        }
    };

    let tag = tagged.primary_tag().or_else(|| tagged.first_tag());
    let artist = tag
        .and_then(|t| t.artist().map(|s| s.to_string()))
        .unwrap_or_else(|| "Unknown Artist".to_string());
    let title = tag
        .and_then(|t| t.title().map(|s| s.to_string()))
        .unwrap_or_else(|| file_stem(path));
    let duration = tagged.properties().duration().as_secs_f64();

    (artist, title, duration)
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Recursively scan `directories` for supported audio files.
///
/// Duplicate paths (directories that overlap) are collapsed. Missing
/// directories are skipped with a log line rather than failing the scan.
pub fn scan(directories: &[PathBuf]) -> Vec<Arc<Track>> {
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut tracks = Vec::new();

    for dir in directories {
        if !dir.exists() {
            tracing::warn!(target: "library", dir = %dir.display(), "scan directory missing");
            continue;
        }
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !is_supported(path) || !seen.insert(path.to_path_buf()) {
                continue;
            }
            tracks.push(Arc::new(Track::from_path(path)));
        }
    }

    tracing::info!(target: "library", count = tracks.len(), "library scan complete");
    tracks
}

/// Load playlist URLs from `Playlists.txt`: one URL per line, `#` comments
/// and blank lines ignored. Creates an empty file when missing.
pub fn load_playlists(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect(),
        Err(_) => {
            if let Err(e) = std::fs::write(path, "") {
                tracing::warn!(target: "library", error = %e, "could not create playlist file");
            }
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn scan_filters_and_dedups() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        File::create(root.join("song.mp3")).unwrap();
        File::create(root.join("music.flac")).unwrap();
        File::create(root.join("notes.txt")).unwrap();
        File::create(root.join("UPPER.OGG")).unwrap();

        let sub = root.join("sub");
        std::fs::create_dir(&sub).unwrap();
        File::create(sub.join("track.wav")).unwrap();

        // Overlapping roots must not duplicate entries
        let tracks = scan(&[root.to_path_buf(), sub.clone()]);
        assert_eq!(tracks.len(), 4);

        let names: Vec<String> = tracks
            .iter()
            .map(|t| t.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"song.mp3".to_string()));
        assert!(names.contains(&"UPPER.OGG".to_string()));
        assert!(!names.contains(&"notes.txt".to_string()));
    }

    #[test]
    fn scan_skips_missing_directory() {
        let tracks = scan(&[PathBuf::from("/nonexistent/music")]);
        assert!(tracks.is_empty());
    }

    #[test]
    fn untagged_file_falls_back_to_stem() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("My Cool Song.mp3");
        File::create(&path).unwrap();

        let track = Track::from_path(&path);
        assert_eq!(track.title, "My Cool Song");
        assert_eq!(track.artist, "Unknown Artist");
        assert_eq!(track.duration, 0.0);
    }

    #[test]
    fn playlists_parse_and_bootstrap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Playlists.txt");

        // Missing file: created empty, no entries
        assert!(load_playlists(&path).is_empty());
        assert!(path.exists());

        std::fs::write(
            &path,
            "# my lists\nhttps://a.example/one\n\n  https://b.example/two  \n",
        )
        .unwrap();
        let urls = load_playlists(&path);
        assert_eq!(urls, vec!["https://a.example/one", "https://b.example/two"]);
    }
}
