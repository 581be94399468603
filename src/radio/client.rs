//! Radio client: tune into a host and track it closely.
//!
//! The poll loop re-syncs the wall clock when stale, mirrors the host's
//! pause state in synced time, adopts the host's EQ and volume (after
//! snapshotting ours for exact restore), and watches for drift between the
//! expected and reported positions. Song changes download the track body to
//! `.cache.mp3` and join playback at `server_pos + transfer delay`; a
//! download finishing after the host already moved on is discarded via a
//! per-song generation tag.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;

use crate::audio::{AudioEngine, GAIN_LIMIT_DB, ISO_BANDS};
use crate::frontend::Frontend;
use crate::lyrics::parse_lines;
use crate::radio::clock::TimeSync;
use crate::radio::wire::{PAUSED_FRAGMENT, PeerStatus, parse_status};

/// Poll period for the host status document.
const UPDATE_INTERVAL: Duration = Duration::from_millis(500);
/// Drift below this is noise; above it gets logged.
pub const DRIFT_TOLERANCE: f64 = 0.1;
/// Drift above this triggers a stop + replay at the host position.
pub const RESYNC_THRESHOLD: f64 = 1.0;
/// EQ updates are skipped this long after a song start.
const EQ_GRACE_AFTER_START: Duration = Duration::from_millis(1500);
/// ... and this long after a download begins.
const EQ_GRACE_AFTER_DOWNLOAD: Duration = Duration::from_secs(2);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);
const DOWNLOAD_RETRIES: u32 = 3;

/// Transient download target for the current radio song.
pub const CACHE_FILE: &str = ".cache.mp3";

/// What to do about an observed position drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriftAction {
    None,
    Log,
    Resync,
}

/// Decide on drift handling. Near the end of the track a resync would
/// race the host's own track change, so large drift is tolerated there.
fn drift_action(expected: f64, server_pos: f64, duration: f64) -> DriftAction {
    let drift = (expected - server_pos).abs();
    if drift <= DRIFT_TOLERANCE {
        return DriftAction::None;
    }
    if duration > 0.0 && drift >= duration - 1.0 {
        return DriftAction::None;
    }
    if drift > RESYNC_THRESHOLD {
        DriftAction::Resync
    } else {
        DriftAction::Log
    }
}

/// Keep only bands at known ISO centers within the legal gain range.
fn validate_eq(eq: &[(u32, f64)]) -> Vec<(u32, f64)> {
    eq.iter()
        .copied()
        .filter(|(freq, gain)| {
            ISO_BANDS.contains(freq) && (-GAIN_LIMIT_DB..=GAIN_LIMIT_DB).contains(gain)
        })
        .collect()
}

/// Local EQ + volume captured before the host's settings were applied.
struct EqSnapshot {
    gains: Vec<(u32, f64)>,
    volume: f32,
}

/// Per-song timing, shared between the poll loop and download tasks.
#[derive(Default)]
struct SongTiming {
    /// Host position at which local playback started.
    start_server_pos: f64,
    /// Synced wall-clock seconds when local playback started.
    sync_start: Option<f64>,
    /// Monotonic instant of the local playback start (EQ grace).
    started_at: Option<Instant>,
    /// Monotonic instant the current download began (EQ grace).
    download_started_at: Option<Instant>,
    /// Synced time the current pause began.
    pause_start: Option<f64>,
    total_pause: f64,
}

pub struct RadioClient {
    engine: Arc<AudioEngine>,
    frontend: Arc<dyn Frontend>,
    http: reqwest::Client,
    temp_song_file: PathBuf,
    running: Arc<AtomicBool>,
    accept_host_eq: AtomicBool,
    /// Bumped per song change; stale downloads and lyric walkers bail.
    generation: Arc<AtomicU64>,
    snapshot: Mutex<Option<EqSnapshot>>,
    timing: Arc<Mutex<SongTiming>>,
}

impl RadioClient {
    pub fn new(
        engine: Arc<AudioEngine>,
        frontend: Arc<dyn Frontend>,
        data_dir: &std::path::Path,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            frontend,
            http: reqwest::Client::new(),
            temp_song_file: data_dir.join(CACHE_FILE),
            running: Arc::new(AtomicBool::new(false)),
            accept_host_eq: AtomicBool::new(true),
            generation: Arc::new(AtomicU64::new(0)),
            snapshot: Mutex::new(None),
            timing: Arc::new(Mutex::new(SongTiming::default())),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Toggle host-EQ acceptance; disabling restores the local settings.
    pub fn set_accept_host_eq(&self, accept: bool) {
        let was = self.accept_host_eq.swap(accept, Ordering::AcqRel);
        if was && !accept {
            self.restore_local_eq();
        }
    }

    /// Stop the poll loop and restore local EQ and volume exactly.
    pub fn stop_listening(&self) {
        if self.accept_host_eq.load(Ordering::Acquire) {
            self.restore_local_eq();
        }
        self.running.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(target: "radio::client", "stopped listening");
    }

    /// Tune into `host` and keep following it until stopped.
    pub fn listen_to(self: &Arc<Self>, host: String, port: u16) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = std::fs::remove_file(&self.temp_song_file);
        let client = Arc::clone(self);
        tokio::spawn(async move {
            client.update_loop(host, port).await;
        });
    }

    async fn update_loop(self: Arc<Self>, host: String, port: u16) {
        let mut time_sync = TimeSync::new();
        time_sync.sync_with_host(&self.http, &host, port).await;

        let mut paused = false;
        let mut repeat = false;
        let mut first_run = true;
        let mut current_title = String::new();

        while self.running.load(Ordering::Acquire) {
            if time_sync.is_stale() {
                time_sync.sync_with_host(&self.http, &host, port).await;
            }

            let status = match self.fetch_status(&host, port).await {
                Some(s) => s,
                None => {
                    tracing::warn!(target: "radio::client", host, "no status from host");
                    if !paused {
                        self.engine.pause();
                        paused = true;
                    }
                    tokio::time::sleep(UPDATE_INTERVAL).await;
                    continue;
                }
            };

            if self.accept_host_eq.load(Ordering::Acquire) {
                self.apply_host_eq(&status.eq, status.volume);
            }

            // The first poll's repeat flag belongs to a song we never
            // played; adopt it from the second poll on.
            if first_run {
                repeat = false;
                first_run = false;
            } else {
                repeat = status.repeat;
            }

            // Mirror pause transitions, accounting pause time in synced
            // wall-clock so it matches the host's bookkeeping.
            if status.paused && !paused {
                self.engine.pause();
                self.timing.lock().pause_start = Some(time_sync.now());
                paused = true;
            } else if !status.paused && paused {
                self.engine.unpause();
                {
                    let mut timing = self.timing.lock();
                    if let Some(start) = timing.pause_start.take() {
                        timing.total_pause += time_sync.now() - start;
                    }
                }
                paused = false;
            }

            // The paused fragment decorates the title without changing the
            // song's identity; strip it before the change comparison.
            let clean_title = status.title.replace(PAUSED_FRAGMENT, "");
            if clean_title != current_title {
                current_title = clean_title;
                paused = false;
                *self.timing.lock() = SongTiming::default();
                self.start_download(&status, time_sync.now(), host.clone(), port);
            }

            let shown_pos = self.track_position(&status, &time_sync, paused);

            let (artist, title) = status.artist_title();
            let mut display = title.clone();
            if paused {
                display.push_str(" *=*");
            }
            if repeat {
                display.push_str(" *+*");
            }
            self.frontend.screen(&artist, &display);
            self.frontend.duration(shown_pos, status.duration);

            tokio::time::sleep(UPDATE_INTERVAL).await;
        }
    }

    async fn fetch_status(&self, host: &str, port: u16) -> Option<PeerStatus> {
        let url = format!("http://{host}:{port}/");
        let response = self
            .http
            .get(&url)
            .timeout(UPDATE_INTERVAL)
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?;
        Some(parse_status(&response.text().await.ok()?))
    }

    /// Expected position from our own synced timeline, with drift
    /// detection against the host's report. Returns the position to show.
    fn track_position(&self, status: &PeerStatus, time_sync: &TimeSync, paused: bool) -> f64 {
        let (sync_start, start_pos) = {
            let timing = self.timing.lock();
            (timing.sync_start, timing.start_server_pos)
        };
        let Some(sync_start) = sync_start else {
            return status.location;
        };
        if paused {
            return status.location;
        }

        let total_pause = self.timing.lock().total_pause;
        let mut expected = start_pos + (time_sync.now() - sync_start) - total_pause;
        if status.duration > 0.0 {
            expected = expected.clamp(0.0, status.duration);
        }

        match drift_action(expected, status.location, status.duration) {
            DriftAction::None => expected,
            DriftAction::Log => {
                tracing::debug!(target: "radio::client",
                    expected, server = status.location,
                    drift = (expected - status.location).abs(),
                    "drift detected");
                expected
            }
            DriftAction::Resync => {
                tracing::info!(target: "radio::client",
                    expected, server = status.location, "resyncing playback");
                self.resync(status.location, time_sync);
                status.location
            }
        }
    }

    /// Stop and re-join at the host's reported position using the already
    /// downloaded temp file.
    fn resync(&self, server_pos: f64, time_sync: &TimeSync) {
        self.engine.stop();
        let started = self.engine.radio_play(&self.temp_song_file, server_pos, None);
        let mut timing = self.timing.lock();
        timing.total_pause = 0.0;
        timing.pause_start = None;
        timing.start_server_pos = server_pos;
        timing.sync_start = Some(time_sync.now());
        timing.started_at = started.map(|_| Instant::now());
    }

    /// Kick off the download of the new song. The generation tag makes a
    /// download finishing after another song change a no-op.
    fn start_download(
        self: &Arc<Self>,
        status: &PeerStatus,
        data_received_synced: f64,
        host: String,
        port: u16,
    ) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.timing.lock().download_started_at = Some(Instant::now());

        let url = if status.song_url.starts_with("http") {
            status.song_url.clone()
        } else {
            format!("http://{host}:{port}/song")
        };
        let server_pos = status.location;
        let client = Arc::clone(self);

        tokio::spawn(async move {
            if let Err(e) = client
                .download_and_play(&url, server_pos, data_received_synced, generation)
                .await
            {
                tracing::error!(target: "radio::client", error = %e, "song download failed");
            }
        });
    }

    async fn download_and_play(
        self: &Arc<Self>,
        url: &str,
        server_pos: f64,
        data_received_synced: f64,
        generation: u64,
    ) -> anyhow::Result<()> {
        let mut response = None;
        for attempt in 0..DOWNLOAD_RETRIES {
            match self
                .http
                .get(url)
                .timeout(DOWNLOAD_TIMEOUT)
                .send()
                .await
                .and_then(|r| r.error_for_status())
            {
                Ok(r) => {
                    response = Some(r);
                    break;
                }
                Err(e) => {
                    tracing::error!(target: "radio::client", attempt, error = %e,
                        "download attempt failed");
                    if attempt + 1 == DOWNLOAD_RETRIES {
                        return Err(e.into());
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        let response = response.expect("set on success");

        // Stream to disk, bailing if the client stops or the song changes
        let tmp_write = self.temp_song_file.with_extension("mp3.part");
        let mut file = tokio::fs::File::create(&tmp_write).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if !self.running.load(Ordering::Acquire)
                || self.generation.load(Ordering::Acquire) != generation
            {
                drop(file);
                let _ = tokio::fs::remove_file(&tmp_write).await;
                return Ok(());
            }
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp_write, &self.temp_song_file).await?;

        // A download that outlived its song must not clobber the newer one
        if self.generation.load(Ordering::Acquire) != generation
            || !self.running.load(Ordering::Acquire)
        {
            tracing::debug!(target: "radio::client", generation, "stale download discarded");
            return Ok(());
        }

        if self.engine.get_busy() {
            self.engine.stop();
        }

        // Everything that happened since the status poll (queueing, the
        // transfer itself) pushes our start position forward. The elapsed
        // monotonic time since the download kicked off equals the synced
        // delay exactly — the clock offset cancels in the difference.
        let transfer_delay = self
            .timing
            .lock()
            .download_started_at
            .map(|at| at.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let timing_now = data_received_synced + transfer_delay;
        let corrected_start = server_pos + transfer_delay;

        tracing::debug!(target: "radio::client",
            server_pos, corrected_start, "joining stream");

        let started = self
            .engine
            .radio_play(&self.temp_song_file, corrected_start, None);

        {
            let mut timing = self.timing.lock();
            timing.start_server_pos = corrected_start;
            timing.sync_start = Some(timing_now);
            timing.started_at = started.map(|_| Instant::now());
            timing.total_pause = 0.0;
            timing.pause_start = None;
        }

        self.spawn_lyric_walker(url, generation);
        Ok(())
    }

    /// Fetch the host's `/lyrics` and pace the lines with engine position.
    fn spawn_lyric_walker(self: &Arc<Self>, song_url: &str, generation: u64) {
        let lyrics_url = song_url.replace("/song", "/lyrics");
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let Ok(response) = client.http.get(&lyrics_url).send().await else {
                return;
            };
            let Ok(body) = response.text().await else {
                return;
            };
            let lines = parse_lines(&body);
            if lines.is_empty() {
                return;
            }

            client.frontend.lyrics(true, crate::lyrics::PLACEHOLDER);
            for line in &lines {
                loop {
                    if client.generation.load(Ordering::Acquire) != generation
                        || !client.running.load(Ordering::Acquire)
                    {
                        client.frontend.lyrics(false, "");
                        return;
                    }
                    if client.engine.get_pos() >= line.timestamp {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                client.frontend.lyrics(true, &line.text);
            }
            client.frontend.lyrics(false, "");
        });
    }

    // ------------------------------------------------------------------
    // Host EQ
    // ------------------------------------------------------------------

    fn apply_host_eq(&self, eq: &[(u32, f64)], volume: f64) {
        if eq.is_empty() {
            return;
        }

        // Grace periods: EQ churn right after a start or mid-download
        // produces audible glitches.
        {
            let timing = self.timing.lock();
            if let Some(at) = timing.started_at {
                if at.elapsed() < EQ_GRACE_AFTER_START {
                    return;
                }
            }
            if let Some(at) = timing.download_started_at {
                if at.elapsed() < EQ_GRACE_AFTER_DOWNLOAD {
                    return;
                }
            }
        }

        let validated = validate_eq(eq);
        if validated.is_empty() {
            return;
        }

        // First application: remember what we're overwriting
        {
            let mut snapshot = self.snapshot.lock();
            if snapshot.is_none() {
                *snapshot = Some(EqSnapshot {
                    gains: self.engine.eq_gains(),
                    volume: self.engine.volume(),
                });
                tracing::debug!(target: "radio::client", "stored local EQ snapshot");
            }
        }

        if (0.0..=1.0).contains(&volume) && (self.engine.volume() as f64 - volume).abs() > 1e-3 {
            self.engine.set_volume(volume as f32);
        }

        let current = self.engine.eq_gains();
        let unchanged = validated
            .iter()
            .all(|(freq, gain)| current.iter().any(|(f, g)| f == freq && g == gain));
        if unchanged {
            return;
        }
        for (freq, gain) in validated {
            self.engine.set_eq_gain(freq, gain);
        }
    }

    fn restore_local_eq(&self) {
        let Some(snapshot) = self.snapshot.lock().take() else {
            return;
        };
        for (freq, gain) in &snapshot.gains {
            self.engine.set_eq_gain(*freq, *gain);
        }
        self.engine.set_volume(snapshot.volume);
        tracing::debug!(target: "radio::client",
            bands = snapshot.gains.len(), volume = snapshot.volume,
            "restored local EQ and volume");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::LogFrontend;

    #[test]
    fn drift_decisions() {
        // Within tolerance
        assert_eq!(drift_action(42.05, 42.0, 200.0), DriftAction::None);
        // Log-worthy but below resync
        assert_eq!(drift_action(42.5, 42.0, 200.0), DriftAction::Log);
        // Above one second: resync
        assert_eq!(drift_action(44.0, 42.0, 200.0), DriftAction::Resync);
        // Huge drift near end of track is left alone
        assert_eq!(drift_action(199.5, 0.5, 200.0), DriftAction::None);
    }

    #[test]
    fn eq_validation_filters_junk() {
        let input = vec![
            (31, 3.0),
            (1000, -12.0),
            (999, 3.0),   // not an ISO center
            (4000, 40.0), // out of range
            (16000, 12.0),
        ];
        assert_eq!(
            validate_eq(&input),
            vec![(31, 3.0), (1000, -12.0), (16000, 12.0)]
        );
    }

    fn client_for_test(dir: &std::path::Path) -> Arc<RadioClient> {
        RadioClient::new(
            Arc::new(AudioEngine::new(true)),
            Arc::new(LogFrontend),
            dir,
        )
    }

    #[tokio::test]
    async fn snapshot_and_exact_restore() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_for_test(dir.path());
        let engine = Arc::clone(&client.engine);

        engine.set_eq_gain(1000, 5.0);
        engine.set_eq_gain(62, -2.5);
        engine.set_volume(0.7);

        // Pretend the host pushed different settings (no grace periods
        // apply because no song ever started)
        client.apply_host_eq(&[(1000, -6.0), (62, 3.0)], 0.2);

        assert_eq!(engine.eq_band(1000), Some(-6.0));
        assert_eq!(engine.eq_band(62), Some(3.0));
        assert_eq!(engine.volume(), 0.2);

        client.stop_listening();

        assert_eq!(engine.eq_band(1000), Some(5.0));
        assert_eq!(engine.eq_band(62), Some(-2.5));
        assert_eq!(engine.volume(), 0.7);
    }

    #[tokio::test]
    async fn eq_grace_period_blocks_application() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_for_test(dir.path());
        client.timing.lock().started_at = Some(Instant::now());

        client.apply_host_eq(&[(1000, -6.0)], 0.2);
        assert_eq!(client.engine.eq_band(1000), Some(0.0));
        // No snapshot was taken either
        assert!(client.snapshot.lock().is_none());
    }

    #[tokio::test]
    async fn disabling_accept_restores() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_for_test(dir.path());
        client.engine.set_volume(0.9);

        client.apply_host_eq(&[(500, 4.0)], 0.1);
        assert_eq!(client.engine.volume(), 0.1);

        client.set_accept_host_eq(false);
        assert_eq!(client.engine.volume(), 0.9);
        assert_eq!(client.engine.eq_band(500), Some(0.0));

        // Re-enabling does not resurrect the old snapshot
        client.set_accept_host_eq(true);
        assert!(client.snapshot.lock().is_none());
    }

    #[tokio::test]
    async fn listen_to_is_idempotent_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_for_test(dir.path());

        client.listen_to("127.0.0.1".to_string(), 1);
        assert!(client.is_running());
        // Second call is a no-op, not a second loop
        client.listen_to("127.0.0.1".to_string(), 1);

        client.stop_listening();
        assert!(!client.is_running());
    }
}
