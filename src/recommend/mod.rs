//! Listening-habit counters for recommendations.
//!
//! Tracks play counts per artist/title and word frequencies from search
//! queries. Mutations only flip a dirty flag; a periodic saver persists the
//! JSON document (temp file + rename) when something actually changed, and
//! [`Recommender::close`] does a final flush on shutdown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(300);

/// Words too generic to count from search queries.
const STOP_WORDS: [&str; 19] = [
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "for", "with", "about", "to", "from",
    "by", "of", "is", "it", "was",
];

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\w+\b").expect("static regex"))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecommendData {
    /// artist -> title -> play count
    song_plays: HashMap<String, HashMap<String, u64>>,
    search_word_counts: HashMap<String, u64>,
}

struct Inner {
    data: RecommendData,
    dirty: bool,
}

pub struct Recommender {
    filepath: PathBuf,
    save_interval: Duration,
    inner: Mutex<Inner>,
}

impl Recommender {
    pub fn open(filepath: PathBuf, save_interval: Duration) -> Self {
        let data = match std::fs::read_to_string(&filepath) {
            Ok(content) if !content.trim().is_empty() => {
                serde_json::from_str(&content).unwrap_or_else(|e| {
                    tracing::error!(target: "recommend", error = %e,
                        "data file unreadable, starting empty");
                    RecommendData::default()
                })
            }
            _ => RecommendData::default(),
        };
        Self {
            filepath,
            save_interval,
            inner: Mutex::new(Inner { data, dirty: false }),
        }
    }

    pub fn save_interval(&self) -> Duration {
        self.save_interval
    }

    /// Count one listen. "Unknown" artists are noise and ignored.
    pub fn log_song_play(&self, artist: &str, song: &str) {
        if artist.trim().is_empty() || song.trim().is_empty() {
            return;
        }
        let artist_norm = artist.trim().to_lowercase();
        let song_norm = song.trim().to_lowercase();
        if artist_norm.contains("unknown") {
            return;
        }

        let mut inner = self.inner.lock();
        *inner
            .data
            .song_plays
            .entry(artist_norm)
            .or_default()
            .entry(song_norm)
            .or_insert(0) += 1;
        inner.dirty = true;
    }

    /// Count the words of a search query, stop words removed.
    pub fn log_search(&self, query: &str) {
        let query_norm = query.trim().to_lowercase();
        if query_norm.is_empty() || query_norm.contains("unknown") {
            return;
        }
        let words: Vec<String> = word_regex()
            .find_iter(&query_norm)
            .map(|m| m.as_str().to_string())
            .filter(|w| !STOP_WORDS.contains(&w.as_str()))
            .collect();
        if words.is_empty() {
            return;
        }

        let mut inner = self.inner.lock();
        for word in words {
            *inner.data.search_word_counts.entry(word).or_insert(0) += 1;
        }
        inner.dirty = true;
    }

    /// `(artist, total plays)`, most played first.
    pub fn top_artists(&self, top_n: usize) -> Vec<(String, u64)> {
        let inner = self.inner.lock();
        let mut totals: Vec<(String, u64)> = inner
            .data
            .song_plays
            .iter()
            .map(|(artist, songs)| (artist.clone(), songs.values().sum()))
            .collect();
        totals.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        totals.truncate(top_n);
        totals
    }

    /// `(song, plays, artist)`, most played first.
    pub fn top_songs(&self, top_n: usize) -> Vec<(String, u64, String)> {
        let inner = self.inner.lock();
        let mut songs: Vec<(String, u64, String)> = inner
            .data
            .song_plays
            .iter()
            .flat_map(|(artist, songs)| {
                songs
                    .iter()
                    .map(move |(song, plays)| (song.clone(), *plays, artist.clone()))
            })
            .collect();
        songs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        songs.truncate(top_n);
        songs
    }

    /// Most frequent search words not already in `current_query`.
    pub fn suggest_terms(&self, current_query: &str, top_n: usize) -> Vec<String> {
        let current: Vec<String> = word_regex()
            .find_iter(&current_query.trim().to_lowercase())
            .map(|m| m.as_str().to_string())
            .collect();

        let inner = self.inner.lock();
        let mut counts: Vec<(&String, &u64)> = inner.data.search_word_counts.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        counts
            .into_iter()
            .filter(|(word, _)| !current.contains(word))
            .take(top_n)
            .map(|(word, _)| word.clone())
            .collect()
    }

    /// Persist if anything changed since the last save.
    pub fn save_if_dirty(&self) {
        let json = {
            let mut inner = self.inner.lock();
            if !inner.dirty {
                return;
            }
            inner.dirty = false;
            match serde_json::to_string_pretty(&inner.data) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!(target: "recommend", error = %e, "serialize failed");
                    return;
                }
            }
        };
        let tmp = self.filepath.with_extension("json.tmp");
        let result = std::fs::write(&tmp, json).and_then(|_| std::fs::rename(&tmp, &self.filepath));
        if let Err(e) = result {
            tracing::error!(target: "recommend", error = %e, "data save failed");
            self.inner.lock().dirty = true; // retry next cycle
        }
    }

    /// Final flush for shutdown.
    pub fn close(&self) {
        self.save_if_dirty();
    }
}
