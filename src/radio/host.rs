//! Radio host: serves the current track and control surface over HTTP.
//!
//! Endpoints: `/` (status document), `/song` (audio body), `/lyrics`,
//! `/time` (wall-clock seconds for client sync), `/action` and `/search`
//! (remote control), `/logs/api` (line-ranged log slices). Every response
//! carries anti-cache headers; clients poll `/` twice a second and must
//! never see a stale body.
//!
//! The host knows nothing of the player beyond [`PlayerControl`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use lofty::file::AudioFile;
use lofty::probe::Probe;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;

use crate::logging;
use crate::player::{PlayerAction, PlayerControl};
use crate::radio::clock::wall_now;
use crate::radio::wire::render_status;

pub const DEFAULT_PORT: u16 = 8080;

pub struct RadioHost {
    player: Arc<dyn PlayerControl>,
    port: u16,
    local_ip: String,
    log_path: PathBuf,
    /// Duration of the last served song, keyed by path; refreshed on track
    /// change so `/` never probes the file per poll.
    duration_cache: Mutex<Option<(PathBuf, f64)>>,
}

impl RadioHost {
    pub fn new(
        player: Arc<dyn PlayerControl>,
        port: u16,
        local_ip: String,
        log_path: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            player,
            port,
            local_ip,
            log_path,
            duration_cache: Mutex::new(None),
        })
    }

    /// Bind and serve until the process exits.
    ///
    /// A port collision fails fast with a clear error; we do not try to
    /// evict whatever else is listening.
    pub async fn serve(self: Arc<Self>) -> anyhow::Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            anyhow::anyhow!("radio host cannot bind {addr}: {e} (is another instance hosting?)")
        })?;
        tracing::info!(target: "radio::host", ip = %self.local_ip, port = self.port, "radio host up");

        let app = Router::new()
            .route("/", get(status_body))
            .route("/song", get(song_body))
            .route("/lyrics", get(lyrics_body))
            .route("/time", get(time_body))
            .route("/action", post(action_body))
            .route("/search", post(search_body))
            .route("/logs/api", get(logs_body))
            .layer(middleware::from_fn(no_cache))
            .with_state(self);

        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Track duration via the tag library, cached per path.
    fn duration_for(&self, path: &Path, fallback: f64) -> f64 {
        {
            let cache = self.duration_cache.lock();
            if let Some((cached_path, duration)) = cache.as_ref() {
                if cached_path == path {
                    return *duration;
                }
            }
        }
        let duration = Probe::open(path)
            .and_then(|p| p.read())
            .map(|t| t.properties().duration().as_secs_f64())
            .unwrap_or_else(|e| {
                tracing::error!(target: "radio::host", path = %path.display(), error = %e,
                    "duration probe failed");
                fallback
            });
        *self.duration_cache.lock() = Some((path.to_path_buf(), duration));
        duration
    }
}

/// Anti-cache headers on every response; radio clients poll aggressively.
async fn no_cache(request: axum::extract::Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate, max-age=0"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    response
}

async fn status_body(State(host): State<Arc<RadioHost>>) -> Response {
    let status = host.player.status();
    let song_url = format!("http://{}:{}/song", host.local_ip, host.port);
    let duration = match &status.song_path {
        Some(path) => host.duration_for(path, status.duration),
        None => 0.0,
    };
    render_status(&status, &song_url, duration).into_response()
}

async fn song_body(State(host): State<Arc<RadioHost>>) -> Response {
    let Some(path) = host.player.status().song_path else {
        return (StatusCode::NOT_FOUND, "No song loaded").into_response();
    };
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(target: "radio::host", path = %path.display(), error = %e,
                "song read failed");
            return (StatusCode::NOT_FOUND, "No song loaded").into_response();
        }
    };
    ([(header::CONTENT_TYPE, mime_for(&path))], bytes).into_response()
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("m4a") | Some("aac") => "audio/mp4",
        _ => "application/octet-stream",
    }
}

async fn lyrics_body(State(host): State<Arc<RadioHost>>) -> String {
    let lyrics = host.player.status().lyrics_text;
    if lyrics.is_empty() {
        "No lyrics available".to_string()
    } else {
        lyrics
    }
}

/// Host wall-clock seconds, ASCII float. The clock-sync anchor; wall time
/// on purpose — clients compare it against their own wall clocks.
async fn time_body() -> String {
    format!("{:.6}", wall_now())
}

#[derive(Deserialize)]
struct ActionRequest {
    #[serde(default)]
    action: String,
    path: Option<PathBuf>,
}

async fn action_body(
    State(host): State<Arc<RadioHost>>,
    axum::Json(req): axum::Json<ActionRequest>,
) -> Response {
    let action = match req.action.to_lowercase().as_str() {
        "pause" => PlayerAction::Pause,
        "play" => PlayerAction::Play,
        "skip" => PlayerAction::Skip,
        "previous" => PlayerAction::Previous,
        "volume_up" => PlayerAction::VolumeUp,
        "volume_down" => PlayerAction::VolumeDown,
        "repeat" => PlayerAction::Repeat,
        "status" => PlayerAction::Status,
        "play_search" => match req.path {
            Some(path) => PlayerAction::PlaySearch(path),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    axum::Json(json!({"code": "error", "message": "No path provided"})),
                )
                    .into_response();
            }
        },
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(json!({"code": "error", "message": "Invalid action"})),
            )
                .into_response();
        }
    };

    let reply = host.player.action(action);
    axum::Json(json!({
        "code": "success",
        "title": reply.title,
        "position": reply.position,
        "paused": reply.paused,
        "repeat": reply.repeat,
        "volume": reply.volume,
    }))
    .into_response()
}

#[derive(Deserialize)]
struct SearchRequest {
    #[serde(default)]
    query: String,
}

async fn search_body(
    State(host): State<Arc<RadioHost>>,
    axum::Json(req): axum::Json<SearchRequest>,
) -> Response {
    let query = req.query.trim();
    if query.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({"code": "error", "message": "Empty search query"})),
        )
            .into_response();
    }

    let results: Vec<_> = host
        .player
        .search(query)
        .into_iter()
        .map(|hit| json!({"title": hit.display, "path": hit.path}))
        .collect();
    axum::Json(json!({"code": "success", "results": results})).into_response()
}

#[derive(Deserialize)]
struct LogsQuery {
    #[serde(default)]
    start: usize,
    #[serde(default = "default_log_count")]
    count: usize,
}

fn default_log_count() -> usize {
    100
}

async fn logs_body(
    State(host): State<Arc<RadioHost>>,
    Query(params): Query<LogsQuery>,
) -> Response {
    if params.count < 1 {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({"error": "Invalid start or count"})),
        )
            .into_response();
    }
    match logging::read_lines(&host.log_path, params.start, params.count) {
        Ok((lines, has_more)) => axum::Json(json!({
            "lines": lines,
            "start": params.start,
            "count": lines.len(),
            "has_more": has_more,
        }))
        .into_response(),
        Err(_) => (
            StatusCode::NOT_FOUND,
            axum::Json(json!({"error": "Log file not found"})),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::search::SearchHit;
    use crate::player::{ActionReply, StatusSnapshot};
    use parking_lot::Mutex as PMutex;

    /// Scripted player for endpoint tests.
    struct FakePlayer {
        status: PMutex<StatusSnapshot>,
        actions: PMutex<Vec<PlayerAction>>,
    }

    impl FakePlayer {
        fn new(status: StatusSnapshot) -> Arc<Self> {
            Arc::new(Self {
                status: PMutex::new(status),
                actions: PMutex::new(Vec::new()),
            })
        }
    }

    impl PlayerControl for FakePlayer {
        fn status(&self) -> StatusSnapshot {
            self.status.lock().clone()
        }

        fn action(&self, action: PlayerAction) -> ActionReply {
            self.actions.lock().push(action);
            ActionReply {
                title: "SongA".to_string(),
                position: 12.34,
                paused: false,
                repeat: false,
                volume: 0.5,
            }
        }

        fn search(&self, query: &str) -> Vec<SearchHit> {
            if query == "creep" {
                vec![SearchHit {
                    display: "Radiohead - Creep".to_string(),
                    path: PathBuf::from("/m/creep.mp3"),
                }]
            } else {
                Vec::new()
            }
        }
    }

    async fn spawn_host(status: StatusSnapshot, log_path: PathBuf) -> (String, Arc<FakePlayer>) {
        let player = FakePlayer::new(status);
        // Bind an ephemeral port by hand so tests never collide
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let host = RadioHost::new(
            Arc::clone(&player) as Arc<dyn PlayerControl>,
            port,
            "127.0.0.1".to_string(),
            log_path,
        );

        let app = Router::new()
            .route("/", get(status_body))
            .route("/song", get(song_body))
            .route("/lyrics", get(lyrics_body))
            .route("/time", get(time_body))
            .route("/action", post(action_body))
            .route("/search", post(search_body))
            .route("/logs/api", get(logs_body))
            .layer(middleware::from_fn(no_cache))
            .with_state(host);
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (format!("http://127.0.0.1:{port}"), player)
    }

    fn playing_status(song_path: Option<PathBuf>) -> StatusSnapshot {
        StatusSnapshot {
            artist: "Artist1".to_string(),
            title: "SongA".to_string(),
            display_title: "SongA".to_string(),
            paused: false,
            repeat: false,
            volume: 0.5,
            position: 42.0,
            duration: 200.0,
            eq: vec![(31, 0.0), (1000, 2.0)],
            song_path,
            lyrics_text: "[00:01.00]hello".to_string(),
            buffered_at: 1000.0,
        }
    }

    #[tokio::test]
    async fn status_endpoint_renders_wire_format() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = spawn_host(playing_status(None), dir.path().join(".logging.txt")).await;

        let resp = reqwest::get(format!("{base}/")).await.unwrap();
        assert_eq!(
            resp.headers().get("cache-control").unwrap(),
            "no-store, no-cache, must-revalidate, max-age=0"
        );
        let body = resp.text().await.unwrap();
        assert!(body.contains("<title>Artist1![]!SongA</title>"));
        assert!(body.contains("<location>42</location>"));
        assert!(body.contains("/song</url>"));
    }

    #[tokio::test]
    async fn time_endpoint_is_ascii_float() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = spawn_host(playing_status(None), dir.path().join(".logging.txt")).await;

        let body = reqwest::get(format!("{base}/time"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        let parsed: f64 = body.trim().parse().unwrap();
        assert!((parsed - wall_now()).abs() < 5.0);
    }

    #[tokio::test]
    async fn song_endpoint_serves_file_with_mime() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("track.wav");
        std::fs::write(&song, b"RIFFfake").unwrap();

        let (base, _) = spawn_host(
            playing_status(Some(song)),
            dir.path().join(".logging.txt"),
        )
        .await;

        let resp = reqwest::get(format!("{base}/song")).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers().get("content-type").unwrap(), "audio/wav");
        assert_eq!(resp.bytes().await.unwrap().as_ref(), b"RIFFfake");
    }

    #[tokio::test]
    async fn song_endpoint_404s_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = spawn_host(playing_status(None), dir.path().join(".logging.txt")).await;
        let resp = reqwest::get(format!("{base}/song")).await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn lyrics_endpoint_text_and_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = spawn_host(playing_status(None), dir.path().join(".logging.txt")).await;
        let body = reqwest::get(format!("{base}/lyrics"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "[00:01.00]hello");

        let mut idle = playing_status(None);
        idle.lyrics_text = String::new();
        let (base, _) = spawn_host(idle, dir.path().join(".logging.txt")).await;
        let body = reqwest::get(format!("{base}/lyrics"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "No lyrics available");
    }

    #[tokio::test]
    async fn action_endpoint_dispatches_and_replies() {
        let dir = tempfile::tempdir().unwrap();
        let (base, player) =
            spawn_host(playing_status(None), dir.path().join(".logging.txt")).await;

        let client = reqwest::Client::new();
        let resp: serde_json::Value = client
            .post(format!("{base}/action"))
            .json(&json!({"action": "pause"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp["code"], "success");
        assert_eq!(resp["position"], 12.34);
        assert_eq!(player.actions.lock().as_slice(), &[PlayerAction::Pause]);

        // play_search carries its path through
        client
            .post(format!("{base}/action"))
            .json(&json!({"action": "play_search", "path": "/m/creep.mp3"}))
            .send()
            .await
            .unwrap();
        assert_eq!(
            player.actions.lock().last(),
            Some(&PlayerAction::PlaySearch(PathBuf::from("/m/creep.mp3")))
        );

        let resp = client
            .post(format!("{base}/action"))
            .json(&json!({"action": "self_destruct"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn search_endpoint_shapes_results() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = spawn_host(playing_status(None), dir.path().join(".logging.txt")).await;

        let client = reqwest::Client::new();
        let resp: serde_json::Value = client
            .post(format!("{base}/search"))
            .json(&json!({"query": "creep"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp["code"], "success");
        assert_eq!(resp["results"][0]["title"], "Radiohead - Creep");

        let resp = client
            .post(format!("{base}/search"))
            .json(&json!({"query": "  "}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn logs_endpoint_serves_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join(".logging.txt");
        std::fs::write(&log_path, "one\ntwo\nthree\n").unwrap();

        let (base, _) = spawn_host(playing_status(None), log_path).await;
        let resp: serde_json::Value =
            reqwest::get(format!("{base}/logs/api?start=1&count=1"))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        assert_eq!(resp["lines"][0], "two");
        assert_eq!(resp["start"], 1);
        assert_eq!(resp["has_more"], true);
    }

    #[tokio::test]
    async fn logs_endpoint_404s_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) =
            spawn_host(playing_status(None), dir.path().join("missing.txt")).await;
        let resp = reqwest::get(format!("{base}/logs/api")).await.unwrap();
        assert_eq!(resp.status(), 404);
    }
}
