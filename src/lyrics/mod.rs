//! Synced-lyric pipeline: rate-limited fetches, batched dispatch, TTL cache.
//!
//! Callers either block on [`LyricService::request_sync`] or queue a
//! `(artist, title, callback, song_id)` request. Queued requests are grouped
//! into small batches; cache hits fire immediately, misses go to a bounded
//! worker pool. Every callback fires exactly once — timeouts and failures
//! deliver an empty list — and carries the caller's song id so stale results
//! are trivially discarded.

pub mod cache;
pub mod clean;

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};

pub use cache::LyricCache;
pub use clean::TitleCleaner;

/// One timed lyric line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyricLine {
    /// Seconds into the song.
    pub timestamp: f64,
    pub text: String,
}

/// Placeholder for lines with timestamps but no text.
pub const PLACEHOLDER: &str = "🎵";

const DEFAULT_API_URL: &str = "https://lrclib.net/api/get";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Outer guard around one batched fetch, cancellation included.
const BATCH_FUTURE_TIMEOUT: Duration = Duration::from_secs(15 + 20);
const MAX_WORKERS: usize = 5;
const BATCH_SIZE: usize = 3;
const RATE_LIMIT_RPS: f64 = 3.0;
const MAX_RETRIES: u32 = 2;

pub type LyricCallback = Box<dyn FnOnce(Vec<LyricLine>, u64) + Send>;

struct LyricRequest {
    artist: String,
    title: String,
    callback: LyricCallback,
    song_id: u64,
}

/// Handle to the lyric pipeline. Cheap to clone.
#[derive(Clone)]
pub struct LyricService {
    inner: Arc<ServiceInner>,
    tx: mpsc::UnboundedSender<LyricRequest>,
}

struct ServiceInner {
    cache: Arc<LyricCache>,
    client: reqwest::Client,
    api_url: String,
    cleaner: TitleCleaner,
    /// Last request send time, for the min-interval rate limit.
    rate: tokio::sync::Mutex<Option<tokio::time::Instant>>,
    workers: Arc<Semaphore>,
}

impl LyricService {
    /// Start the pipeline on the current tokio runtime.
    pub fn start(cache: Arc<LyricCache>) -> Self {
        Self::start_with_api(cache, DEFAULT_API_URL.to_string())
    }

    pub fn start_with_api(cache: Arc<LyricCache>, api_url: String) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("wavecast/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        let inner = Arc::new(ServiceInner {
            cache: Arc::clone(&cache),
            client,
            api_url,
            cleaner: TitleCleaner::new(),
            rate: tokio::sync::Mutex::new(None),
            workers: Arc::new(Semaphore::new(MAX_WORKERS)),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(batch_loop(Arc::clone(&inner), rx));

        // Background cache flusher
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cache.maybe_flush();
            }
        });

        Self { inner, tx }
    }

    /// Queue a fetch; the callback fires exactly once, possibly with an
    /// empty list. Callable from any thread.
    pub fn request(&self, artist: &str, title: &str, song_id: u64, callback: LyricCallback) {
        let req = LyricRequest {
            artist: artist.to_string(),
            title: title.to_string(),
            callback,
            song_id,
        };
        if let Err(e) = self.tx.send(req) {
            tracing::error!(target: "lyrics", error = %e, "lyric queue closed");
            // Still honor exactly-once
            (e.0.callback)(Vec::new(), e.0.song_id);
        }
    }

    /// Blocking-style fetch: cache, then network.
    pub async fn request_sync(&self, artist: &str, title: &str) -> Vec<LyricLine> {
        if let Some(cached) = self.inner.cache.get(artist, title) {
            return cached;
        }
        match fetch_lyrics(&self.inner, artist, title).await {
            Some(lines) => {
                self.inner.cache.add(artist, title, lines.clone());
                lines
            }
            None => Vec::new(),
        }
    }

    pub fn cache(&self) -> Arc<LyricCache> {
        Arc::clone(&self.inner.cache)
    }

    /// Final flush; call before process exit.
    pub fn close(&self) {
        self.inner.cache.flush();
    }
}

async fn batch_loop(inner: Arc<ServiceInner>, mut rx: mpsc::UnboundedReceiver<LyricRequest>) {
    loop {
        let mut batch = Vec::with_capacity(BATCH_SIZE);
        match rx.recv().await {
            Some(req) => batch.push(req),
            None => return,
        }
        // Top the batch up without waiting long for stragglers
        while batch.len() < BATCH_SIZE {
            match tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
                Ok(Some(req)) => batch.push(req),
                Ok(None) => break,
                Err(_) => break,
            }
        }
        process_batch(&inner, batch).await;
    }
}

async fn process_batch(inner: &Arc<ServiceInner>, batch: Vec<LyricRequest>) {
    let mut misses = Vec::new();
    for req in batch {
        if let Some(cached) = inner.cache.get(&req.artist, &req.title) {
            (req.callback)(cached, req.song_id);
        } else {
            misses.push(req);
        }
    }

    for req in misses {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let _permit = inner.workers.acquire().await;
            let LyricRequest {
                artist,
                title,
                callback,
                song_id,
            } = req;

            let fetched = tokio::time::timeout(
                BATCH_FUTURE_TIMEOUT,
                fetch_lyrics(&inner, &artist, &title),
            )
            .await;

            let lines = match fetched {
                Ok(Some(lines)) => {
                    inner.cache.add(&artist, &title, lines.clone());
                    lines
                }
                Ok(None) => Vec::new(),
                Err(_) => {
                    tracing::warn!(target: "lyrics", %artist, %title,
                        "batched fetch timed out, delivering empty result");
                    Vec::new()
                }
            };
            callback(lines, song_id);
        });
    }
}

/// Fetch and parse synced lyrics.
///
/// Retry policy: timeouts get up to two retries with progressively longer
/// request timeouts and linear backoff; HTTP 429 backs off exponentially
/// (1, 2, 4 s); 404 means "no lyrics"; anything else gives up immediately.
async fn fetch_lyrics(inner: &ServiceInner, artist: &str, title: &str) -> Option<Vec<LyricLine>> {
    let (artist_clean, title_clean) = inner.cleaner.artist_title(artist, title);
    let url = format!(
        "{}?track_name={}&artist_name={}",
        inner.api_url,
        urlencoding::encode(&title_clean),
        urlencoding::encode(&artist_clean),
    );

    let min_interval = Duration::from_secs_f64(1.0 / RATE_LIMIT_RPS);

    for attempt in 0..=MAX_RETRIES {
        // Rate limit: enforce a minimum gap between requests process-wide
        {
            let mut last = inner.rate.lock().await;
            if let Some(prev) = *last {
                let since = prev.elapsed();
                if since < min_interval {
                    tokio::time::sleep(min_interval - since).await;
                }
            }
            *last = Some(tokio::time::Instant::now());
        }

        let timeout = REQUEST_TIMEOUT + Duration::from_secs(5 * attempt as u64);
        let response = inner.client.get(&url).timeout(timeout).send().await;

        match response {
            Ok(resp) => match resp.status() {
                reqwest::StatusCode::NOT_FOUND => return None,
                reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    if attempt < MAX_RETRIES {
                        let wait = Duration::from_secs(1 << attempt);
                        tracing::warn!(target: "lyrics", %artist, %title, wait = ?wait,
                            "rate limited, backing off");
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    tracing::error!(target: "lyrics", %artist, %title,
                        "rate limited, giving up");
                    return None;
                }
                status if status.is_success() => {
                    #[derive(Deserialize)]
                    struct ApiBody {
                        #[serde(rename = "syncedLyrics")]
                        synced_lyrics: Option<String>,
                    }
                    let body: ApiBody = resp.json().await.ok()?;
                    return body
                        .synced_lyrics
                        .filter(|s| !s.is_empty())
                        .map(|s| parse_lines(&s));
                }
                status => {
                    tracing::error!(target: "lyrics", %artist, %title, %status,
                        "lyric endpoint error");
                    return None;
                }
            },
            Err(e) if e.is_timeout() => {
                if attempt < MAX_RETRIES {
                    let wait = Duration::from_secs(1 + attempt as u64);
                    tracing::warn!(target: "lyrics", %artist, %title, attempt,
                        "timeout, retrying in {wait:?}");
                    tokio::time::sleep(wait).await;
                    continue;
                }
                tracing::error!(target: "lyrics", %artist, %title, "timed out, giving up");
                return None;
            }
            Err(e) => {
                tracing::error!(target: "lyrics", %artist, %title, error = %e,
                    "request failed");
                return None;
            }
        }
    }
    None
}

fn timestamp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[(\d+):(\d+(?:\.\d+)?)\](.*)$").expect("static regex"))
}

/// Parse `[MM:SS.ff]text` lines into sorted [`LyricLine`]s.
///
/// Non-matching lines are dropped; empty text becomes the placeholder.
pub fn parse_lines(raw: &str) -> Vec<LyricLine> {
    let re = timestamp_regex();
    let mut parsed: Vec<LyricLine> = raw
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            let minutes: u64 = caps[1].parse().ok()?;
            let seconds: f64 = caps[2].parse().ok()?;
            let text = caps[3].trim();
            Some(LyricLine {
                timestamp: minutes as f64 * 60.0 + seconds,
                text: if text.is_empty() {
                    PLACEHOLDER.to_string()
                } else {
                    text.to_string()
                },
            })
        })
        .collect();
    parsed.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    parsed
}

/// Render lines back to `[MM:SS.ss]text`, the inverse of [`parse_lines`].
pub fn format_lines(lines: &[LyricLine]) -> String {
    lines
        .iter()
        .map(|l| {
            let minutes = (l.timestamp / 60.0).floor() as u64;
            let seconds = l.timestamp - minutes as f64 * 60.0;
            format!("[{minutes:02}:{seconds:05.2}]{}", l.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_orders_and_fills_placeholder() {
        let raw = "[00:12.50]hello\n[00:03.00]world\nnot a lyric line\n[01:00.25]";
        let lines = parse_lines(raw);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].timestamp, 3.0);
        assert_eq!(lines[0].text, "world");
        assert_eq!(lines[1].timestamp, 12.5);
        assert_eq!(lines[2].timestamp, 60.25);
        assert_eq!(lines[2].text, PLACEHOLDER);

        // Strictly non-decreasing timestamps
        for w in lines.windows(2) {
            assert!(w[0].timestamp <= w[1].timestamp);
        }
    }

    #[test]
    fn parse_format_roundtrip() {
        let lines = vec![
            LyricLine {
                timestamp: 3.0,
                text: "world".to_string(),
            },
            LyricLine {
                timestamp: 12.5,
                text: "hello".to_string(),
            },
            LyricLine {
                timestamp: 83.25,
                text: "again".to_string(),
            },
        ];
        assert_eq!(parse_lines(&format_lines(&lines)), lines);
    }

    #[test]
    fn format_emits_expected_shape() {
        let lines = vec![LyricLine {
            timestamp: 75.5,
            text: "x".to_string(),
        }];
        assert_eq!(format_lines(&lines), "[01:15.50]x");
    }

    #[test]
    fn parse_ignores_garbage() {
        assert!(parse_lines("").is_empty());
        assert!(parse_lines("no timestamps here\nstill none").is_empty());
        assert!(parse_lines("[xx:yy]bad").is_empty());
    }

    #[tokio::test]
    async fn cached_request_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(LyricCache::open(dir.path().join(".lyricCache.json")));
        cache.add(
            "Radiohead",
            "Creep",
            vec![LyricLine {
                timestamp: 1.0,
                text: "line".to_string(),
            }],
        );

        // Unroutable API URL: any network attempt would fail loudly
        let service =
            LyricService::start_with_api(cache, "http://127.0.0.1:1/api/get".to_string());

        let lines = service.request_sync("Radiohead", "Creep").await;
        assert_eq!(lines.len(), 1);

        // Second call: still served, still no network involved
        let again = service.request_sync("Radiohead", "Creep").await;
        assert_eq!(again, lines);
    }

    #[tokio::test]
    async fn queued_callback_fires_once_with_song_id() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(LyricCache::open(dir.path().join(".lyricCache.json")));
        cache.add(
            "A",
            "b",
            vec![LyricLine {
                timestamp: 0.0,
                text: "x".to_string(),
            }],
        );
        let service =
            LyricService::start_with_api(cache, "http://127.0.0.1:1/api/get".to_string());

        let (tx, mut rx) = mpsc::unbounded_channel();
        service.request(
            "A",
            "b",
            42,
            Box::new(move |lines, song_id| {
                let _ = tx.send((lines.len(), song_id));
            }),
        );

        let (count, song_id) =
            tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("callback fired")
                .expect("channel open");
        assert_eq!(count, 1);
        assert_eq!(song_id, 42);

        // Exactly-once: the sender side is consumed, no second delivery
        assert!(rx.try_recv().is_err());
    }
}
