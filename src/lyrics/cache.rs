//! On-disk lyric cache with TTL and batched atomic writes.
//!
//! One JSON document maps cache keys to `{lyrics, timestamp, hash_key}`.
//! Reads drop expired entries; writes accumulate and a background flusher
//! persists them once `batch_size` is pending or `flush_interval` has
//! passed. Every flush goes through a temp file and an atomic rename, so a
//! crash can lose recent lyrics but never corrupt the document.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::LyricLine;

const DEFAULT_TTL: Duration = Duration::from_secs(168 * 3600); // one week
const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// Keys longer than this are hashed to keep the document tidy.
const MAX_KEY_LEN: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    lyrics: Vec<LyricLine>,
    /// Unix seconds at insertion.
    timestamp: f64,
    hash_key: String,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    pending: usize,
    last_flush: Instant,
}

pub struct LyricCache {
    filepath: PathBuf,
    ttl: Duration,
    batch_size: usize,
    flush_interval: Duration,
    inner: Mutex<CacheInner>,
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn sha_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl LyricCache {
    pub fn open(filepath: PathBuf) -> Self {
        Self::with_options(
            filepath,
            DEFAULT_TTL,
            DEFAULT_BATCH_SIZE,
            DEFAULT_FLUSH_INTERVAL,
        )
    }

    pub fn with_options(
        filepath: PathBuf,
        ttl: Duration,
        batch_size: usize,
        flush_interval: Duration,
    ) -> Self {
        let entries = Self::load_entries(&filepath, ttl);
        Self {
            filepath,
            ttl,
            batch_size,
            flush_interval,
            inner: Mutex::new(CacheInner {
                entries,
                pending: 0,
                last_flush: Instant::now(),
            }),
        }
    }

    fn load_entries(filepath: &PathBuf, ttl: Duration) -> HashMap<String, CacheEntry> {
        let content = match std::fs::read_to_string(filepath) {
            Ok(c) => c,
            Err(_) => return HashMap::new(),
        };
        let raw: HashMap<String, CacheEntry> = match serde_json::from_str(&content) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(target: "lyrics::cache", error = %e,
                    "cache file corrupted, starting fresh");
                return HashMap::new();
            }
        };
        let now = unix_now();
        raw.into_iter()
            .filter(|(_, entry)| now - entry.timestamp < ttl.as_secs_f64())
            .collect()
    }

    fn make_key(artist: &str, title: &str) -> String {
        let normalized = format!(
            "{}|{}",
            artist.trim().to_lowercase(),
            title.trim().to_lowercase()
        );
        if normalized.len() > MAX_KEY_LEN {
            sha_hex(&normalized)
        } else {
            normalized
        }
    }

    /// Cached lyrics, TTL-validated. Expired entries are evicted on read.
    pub fn get(&self, artist: &str, title: &str) -> Option<Vec<LyricLine>> {
        let key = Self::make_key(artist, title);
        let mut inner = self.inner.lock();
        let entry = inner.entries.get(&key)?;
        if unix_now() - entry.timestamp > self.ttl.as_secs_f64() {
            inner.entries.remove(&key);
            return None;
        }
        Some(entry.lyrics.clone())
    }

    /// Insert lyrics and mark them pending for the next flush.
    pub fn add(&self, artist: &str, title: &str, lyrics: Vec<LyricLine>) {
        let key = Self::make_key(artist, title);
        let entry = CacheEntry {
            lyrics,
            timestamp: unix_now(),
            hash_key: sha_hex(&format!("{artist}|{title}")),
        };
        let mut inner = self.inner.lock();
        inner.entries.insert(key, entry);
        inner.pending += 1;
    }

    /// Flush when the pending batch is large or old enough. Called
    /// periodically by the service's background task.
    pub fn maybe_flush(&self) {
        let should = {
            let inner = self.inner.lock();
            inner.pending > 0
                && (inner.pending >= self.batch_size
                    || inner.last_flush.elapsed() > self.flush_interval)
        };
        if should {
            self.flush();
        }
    }

    /// Unconditional atomic flush. Idempotent.
    pub fn flush(&self) {
        let (snapshot, had_pending) = {
            let mut inner = self.inner.lock();
            let had = inner.pending > 0;
            inner.pending = 0;
            inner.last_flush = Instant::now();
            (inner.entries.clone(), had)
        };
        if !had_pending && self.filepath.exists() {
            return;
        }

        let json = match serde_json::to_string_pretty(&snapshot) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(target: "lyrics::cache", error = %e, "serialize failed");
                return;
            }
        };
        let tmp = self.filepath.with_extension("json.tmp");
        let result = std::fs::write(&tmp, json).and_then(|_| std::fs::rename(&tmp, &self.filepath));
        if let Err(e) = result {
            tracing::error!(target: "lyrics::cache", error = %e, "cache flush failed");
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn lines() -> Vec<LyricLine> {
        vec![
            LyricLine {
                timestamp: 1.0,
                text: "first".to_string(),
            },
            LyricLine {
                timestamp: 2.5,
                text: "second".to_string(),
            },
        ]
    }

    #[test]
    fn add_then_get() {
        let dir = tempdir().unwrap();
        let cache = LyricCache::open(dir.path().join(".lyricCache.json"));

        assert!(cache.get("Radiohead", "Creep").is_none());
        cache.add("Radiohead", "Creep", lines());
        assert_eq!(cache.get("Radiohead", "Creep"), Some(lines()));
        // Key normalization: case and whitespace insensitive
        assert_eq!(cache.get("  radiohead ", "CREEP"), Some(lines()));
    }

    #[test]
    fn flush_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".lyricCache.json");

        let cache = LyricCache::open(path.clone());
        cache.add("Radiohead", "Creep", lines());
        cache.flush();

        let reopened = LyricCache::open(path);
        assert_eq!(reopened.get("Radiohead", "Creep"), Some(lines()));
    }

    #[test]
    fn expired_entries_are_dropped_on_read_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".lyricCache.json");

        let cache = LyricCache::with_options(
            path.clone(),
            Duration::from_secs(0),
            50,
            Duration::from_secs(5),
        );
        cache.add("Radiohead", "Creep", lines());
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get("Radiohead", "Creep").is_none());

        cache.flush();
        let reopened = LyricCache::with_options(
            path,
            Duration::from_secs(0),
            50,
            Duration::from_secs(5),
        );
        assert!(reopened.is_empty());
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".lyricCache.json");
        std::fs::write(&path, "{{{ nope").unwrap();

        let cache = LyricCache::open(path);
        assert!(cache.is_empty());
    }

    #[test]
    fn long_keys_are_hashed() {
        let long_title = "t".repeat(400);
        let key = LyricCache::make_key("artist", &long_title);
        assert_eq!(key.len(), 64); // sha256 hex
    }

    #[test]
    fn maybe_flush_respects_batch_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".lyricCache.json");
        let cache = LyricCache::with_options(
            path.clone(),
            DEFAULT_TTL,
            2,
            Duration::from_secs(3600),
        );

        cache.add("A", "one", lines());
        cache.maybe_flush(); // 1 < batch, interval far away
        assert!(!path.exists());

        cache.add("A", "two", lines());
        cache.maybe_flush(); // batch reached
        assert!(path.exists());
    }

    #[test]
    fn flush_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".lyricCache.json");
        let cache = LyricCache::open(path.clone());
        cache.add("A", "b", lines());
        cache.flush();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
