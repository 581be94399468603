//! Scored library search.
//!
//! Tiers: title substring (100), artist+title substring (75), artist
//! substring (50), filename substring (25), and a character-overlap fuzzy
//! pass (10) that only runs when nothing else matched. Results are capped at
//! 50 and stably ordered by descending score.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use super::Track;

const MAX_RESULTS: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// "Artist - Title" display line.
    pub display: String,
    pub path: PathBuf,
}

struct Scored {
    hit: SearchHit,
    score: u8,
}

pub fn search(cache: &[Arc<Track>], query: &str) -> Vec<SearchHit> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return Vec::new();
    }

    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut results: Vec<Scored> = Vec::new();

    fn add(
        results: &mut Vec<Scored>,
        seen: &mut HashSet<PathBuf>,
        track: &Arc<Track>,
        score: u8,
    ) {
        if seen.insert(track.path.clone()) {
            results.push(Scored {
                hit: SearchHit {
                    display: track.display(),
                    path: track.path.clone(),
                },
                score,
            });
        }
    }

    for track in cache {
        if results.len() >= MAX_RESULTS {
            break;
        }
        if track.title.to_lowercase().contains(&query) {
            add(&mut results, &mut seen, track, 100);
        }
    }

    if results.len() < MAX_RESULTS {
        for track in cache {
            if results.len() >= MAX_RESULTS {
                break;
            }
            let combined = format!("{} {}", track.artist, track.title).to_lowercase();
            if combined.contains(&query) {
                add(&mut results, &mut seen, track, 75);
            }
        }
    }

    if results.len() < MAX_RESULTS {
        for track in cache {
            if results.len() >= MAX_RESULTS {
                break;
            }
            if track.artist.to_lowercase().contains(&query) {
                add(&mut results, &mut seen, track, 50);
            }
        }
    }

    if results.len() < MAX_RESULTS {
        for track in cache {
            if results.len() >= MAX_RESULTS {
                break;
            }
            let name = track
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if name.contains(&query) {
                add(&mut results, &mut seen, track, 25);
            }
        }
    }

    // Fuzzy pass only when nothing concrete matched: at least 70% of the
    // query's characters appear in the title or artist.
    if results.is_empty() {
        let query_chars: HashSet<char> = query.chars().collect();
        let needed = (query_chars.len() as f64 * 0.7).ceil() as usize;
        for track in cache {
            if results.len() >= MAX_RESULTS {
                break;
            }
            let track_chars: HashSet<char> = track
                .title
                .to_lowercase()
                .chars()
                .chain(track.artist.to_lowercase().chars())
                .collect();
            if query_chars.intersection(&track_chars).count() >= needed {
                add(&mut results, &mut seen, track, 10);
            }
        }
    }

    results.sort_by(|a, b| b.score.cmp(&a.score));
    results.into_iter().map(|s| s.hit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(artist: &str, title: &str, path: &str) -> Arc<Track> {
        Arc::new(Track {
            path: PathBuf::from(path),
            artist: artist.to_string(),
            title: title.to_string(),
            duration: 180.0,
        })
    }

    fn cache() -> Vec<Arc<Track>> {
        vec![
            track("Radiohead", "Creep", "/m/creep.mp3"),
            track("Muse", "Radio Silence", "/m/silence.flac"),
            track("Creeper", "Hiding", "/m/hiding.ogg"),
            track("Unknown Artist", "ambient drones", "/m/creepy_dungeon.wav"),
        ]
    }

    #[test]
    fn empty_query_is_empty() {
        assert!(search(&cache(), "").is_empty());
        assert!(search(&cache(), "   ").is_empty());
    }

    #[test]
    fn title_match_outranks_artist_match() {
        let hits = search(&cache(), "creep");
        // "Creep" title (100) before "Creeper" artist (50) before path (25)
        assert_eq!(hits[0].path, PathBuf::from("/m/creep.mp3"));
        assert!(hits.iter().any(|h| h.path == PathBuf::from("/m/hiding.ogg")));
        assert!(
            hits.iter()
                .any(|h| h.path == PathBuf::from("/m/creepy_dungeon.wav"))
        );
    }

    #[test]
    fn no_duplicate_paths() {
        // "radio" hits both title and artist tiers for the same tracks
        let hits = search(&cache(), "radio");
        let mut paths: Vec<_> = hits.iter().map(|h| &h.path).collect();
        paths.dedup();
        assert_eq!(paths.len(), hits.len());
    }

    #[test]
    fn query_is_case_insensitive_and_trimmed() {
        let hits = search(&cache(), "  CREEP  ");
        assert!(!hits.is_empty());
        assert_eq!(hits[0].display, "Radiohead - Creep");
    }

    #[test]
    fn fuzzy_only_when_nothing_else() {
        // No substring hit anywhere, but chars of "repec" ⊂ "creep"
        let hits = search(&cache(), "repec");
        assert!(!hits.is_empty());

        // A substring match suppresses the fuzzy tier entirely
        let hits = search(&cache(), "muse");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn result_cap_holds() {
        let big: Vec<Arc<Track>> = (0..120)
            .map(|i| track("Artist", &format!("song {i}"), &format!("/m/{i}.mp3")))
            .collect();
        let hits = search(&big, "song");
        assert_eq!(hits.len(), 50);
    }
}
