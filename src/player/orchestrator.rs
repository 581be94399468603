//! Playback orchestrator: track lifecycle, navigation, persistence.
//!
//! One long-lived loop owns the current track. It pulls from the shuffler
//! (or the replay queue), kicks off the lyric fetch, starts the engine, and
//! ticks ~10x a second maintaining elapsed time as wall-clock-since-start
//! minus accumulated pause time. Navigation rewrites the history/forward
//! zipper and forces the next pick through the replay queue, so the loop
//! itself never special-cases skips.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::audio::AudioEngine;
use crate::frontend::Frontend;
use crate::library::search::{SearchHit, search};
use crate::library::Track;
use crate::lyrics::{LyricLine, LyricService, format_lines};
use crate::radio::clock::wall_now;
use crate::recommend::Recommender;

use super::shuffle::SmartShuffler;
use super::state::{
    ActionReply, PlayerAction, PlayerControl, SavedState, StatusSnapshot, load_state, save_state,
};

/// UI update / elapsed accounting tick.
const TICK: Duration = Duration::from_millis(100);
/// Persisted state is written at most this often while playing.
const SAVE_INTERVAL: Duration = Duration::from_secs(1);
/// Repeat is restored this long after navigation settles.
const NAV_SETTLE: Duration = Duration::from_millis(200);
/// Volume step for up/down.
const VOLUME_STEP: f64 = 0.05;

pub const STATE_FILE: &str = ".musicapp_state.json";

/// Marker appended to the display title while repeating.
pub const REPEAT_MARKER: &str = " *+*";
/// Marker appended to the display title while paused.
pub const PAUSE_MARKER: &str = " *=*";

struct CoreState {
    current: Option<Arc<Track>>,
    elapsed: f64,
    /// Cursor into the shuffler history; -1 before anything played.
    current_index: i64,
    /// Paths skipped back over, popped by skip-next.
    forward_stack: Vec<std::path::PathBuf>,
    volume: f64,
    navigating: bool,
    /// `(elapsed, paused)` to restore once the next session starts.
    resume: Option<(f64, bool)>,
    lyrics_text: String,
    buffered_at: f64,
    song_id: u64,
}

pub struct Player {
    pub engine: Arc<AudioEngine>,
    shuffler: Mutex<SmartShuffler>,
    core: Mutex<CoreState>,
    paused: AtomicBool,
    repeat: AtomicBool,
    skip: AtomicBool,
    /// Navigation re-entrancy guard.
    moving: AtomicBool,
    cached_repeat: AtomicBool,
    radio_mode: AtomicBool,
    /// Where to pick local playback back up after leaving radio mode.
    radio_return: Mutex<Option<(Arc<Track>, f64, bool)>>,
    song_counter: AtomicU64,
    frontend: Arc<dyn Frontend>,
    lyrics: LyricService,
    recommend: Arc<Recommender>,
    data_dir: std::path::PathBuf,
}

impl Player {
    pub fn new(
        engine: Arc<AudioEngine>,
        tracks: Vec<Arc<Track>>,
        history_size: usize,
        artist_spacing: usize,
        volume: f64,
        frontend: Arc<dyn Frontend>,
        lyrics: LyricService,
        recommend: Arc<Recommender>,
        data_dir: std::path::PathBuf,
    ) -> Arc<Self> {
        let player = Arc::new(Self {
            engine,
            shuffler: Mutex::new(SmartShuffler::new(tracks, history_size, artist_spacing)),
            core: Mutex::new(CoreState {
                current: None,
                elapsed: 0.0,
                current_index: -1,
                forward_stack: Vec::new(),
                volume: volume.clamp(0.0, 1.0),
                navigating: false,
                resume: None,
                lyrics_text: String::new(),
                buffered_at: 0.0,
                song_id: 0,
            }),
            paused: AtomicBool::new(false),
            repeat: AtomicBool::new(false),
            skip: AtomicBool::new(false),
            moving: AtomicBool::new(false),
            cached_repeat: AtomicBool::new(false),
            radio_mode: AtomicBool::new(false),
            radio_return: Mutex::new(None),
            song_counter: AtomicU64::new(0),
            frontend,
            lyrics,
            recommend,
            data_dir,
        });
        player.engine.set_volume(volume as f32);
        player.load_playback_state();
        player
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    fn state_file(&self) -> std::path::PathBuf {
        self.data_dir.join(STATE_FILE)
    }

    /// Restore the previous run: force-queue the saved track at the saved
    /// position, started paused iff it was paused.
    fn load_playback_state(&self) {
        let Some(saved) = load_state(&self.state_file()) else {
            return;
        };
        if !saved.path.exists() {
            tracing::info!(target: "player", path = %saved.path.display(),
                "saved track no longer exists, starting clean");
            return;
        }

        let track = {
            let mut sh = self.shuffler.lock();
            match sh.find(&saved.path) {
                Some(t) => t,
                None => {
                    // Track from outside the scanned directories
                    let t = Arc::new(Track::from_path(&saved.path));
                    sh.cache.push(Arc::clone(&t));
                    sh.refill_upcoming();
                    t
                }
            }
        };

        self.repeat.store(saved.repeat, Ordering::Relaxed);
        {
            let mut core = self.core.lock();
            core.resume = Some((saved.elapsed, saved.paused));
        }
        self.shuffler.lock().enqueue_replay(track);
        tracing::info!(target: "player", path = %saved.path.display(),
            elapsed = saved.elapsed, paused = saved.paused, "resuming previous session");
    }

    /// Persist the resume document. At most one writer at a time (the core
    /// lock), temp-file + rename on disk.
    pub fn save_playback_state(&self) {
        let state = {
            let core = self.core.lock();
            let Some(current) = &core.current else {
                return;
            };
            SavedState {
                path: current.path.clone(),
                elapsed: core.elapsed,
                paused: self.paused.load(Ordering::Relaxed),
                repeat: self.repeat.load(Ordering::Relaxed),
            }
        };
        if let Err(e) = save_state(&self.state_file(), &state) {
            tracing::error!(target: "player", error = %e, "failed to save playback state");
        }
    }

    // ------------------------------------------------------------------
    // Controls
    // ------------------------------------------------------------------

    /// Toggle pause, or force a state: `Some(true)` unpauses, `Some(false)`
    /// pauses.
    pub fn pause(&self, forced: Option<bool>) {
        let should_unpause = forced.unwrap_or_else(|| self.paused.load(Ordering::Relaxed));
        if should_unpause {
            self.paused.store(false, Ordering::Relaxed);
            self.engine.unpause();
        } else {
            self.paused.store(true, Ordering::Relaxed);
            self.engine.pause();
        }
        self.refresh_screen();
    }

    /// Toggle repeat; ignored while paused or navigating.
    pub fn toggle_repeat(&self) {
        if self.paused.load(Ordering::Relaxed) || self.moving.load(Ordering::Relaxed) {
            return;
        }
        self.repeat.fetch_xor(true, Ordering::Relaxed);
        self.refresh_screen();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn is_repeat(&self) -> bool {
        self.repeat.load(Ordering::Relaxed)
    }

    /// Step volume by `direction` (±[`VOLUME_STEP`] from the public
    /// helpers), saturating at [0, 1].
    pub fn step_volume(&self, direction: f64) {
        let mut core = self.core.lock();
        core.volume = ((core.volume + direction).clamp(0.0, 1.0) * 100.0).round() / 100.0;
        self.engine.set_volume(core.volume as f32);
        tracing::debug!(target: "player", volume = core.volume, "volume changed");
    }

    pub fn up_volume(&self) {
        self.step_volume(VOLUME_STEP);
    }

    pub fn dwn_volume(&self) {
        self.step_volume(-VOLUME_STEP);
    }

    pub fn volume(&self) -> f64 {
        self.core.lock().volume
    }

    fn before_move(&self) -> bool {
        if self.moving.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Repeat would re-feed the old track mid-navigation; stash it
        self.cached_repeat
            .store(self.repeat.swap(false, Ordering::Relaxed), Ordering::Relaxed);
        true
    }

    fn after_move(&self) {
        std::thread::sleep(NAV_SETTLE);
        if self.cached_repeat.swap(false, Ordering::Relaxed) {
            self.repeat.store(true, Ordering::Relaxed);
        }
        self.moving.store(false, Ordering::Release);
    }

    /// Skip forward: pop the forward stack if we navigated back earlier,
    /// otherwise draw a fresh track and branch history here.
    pub fn skip_next(&self) {
        if !self.before_move() {
            return;
        }
        let from_stack = {
            let mut core = self.core.lock();
            core.forward_stack.pop().map(|path| {
                core.current_index += 1;
                core.navigating = true;
                path
            })
        };

        if let Some(path) = from_stack {
            let track = self.shuffler.lock().find(&path);
            if let Some(track) = track {
                self.queue_song(track);
            }
            self.core.lock().navigating = false;
        } else {
            self.clear_for_new_track();
            let next = self.shuffler.lock().get_unique_song();
            if let Some(track) = next {
                let mut core = self.core.lock();
                let mut sh = self.shuffler.lock();
                truncate_history(&mut sh.history, core.current_index);
                if sh.history.last() != Some(&track.path) {
                    sh.history.push(track.path.clone());
                }
                core.current_index = sh.history.len() as i64 - 1;
                core.forward_stack.clear();
                drop(sh);
                drop(core);
                self.queue_song(track);
            }
        }
        self.after_move();
    }

    /// Skip backward through history; at the start, replay the current
    /// track without decrementing.
    pub fn skip_previous(&self) {
        if !self.before_move() {
            return;
        }
        let target = {
            let mut core = self.core.lock();
            let mut sh = self.shuffler.lock();
            let idx = core.current_index;
            if idx > 0 {
                core.navigating = true;
                if let Some(current) = sh.history.get(idx as usize) {
                    core.forward_stack.push(current.clone());
                }
                core.current_index = idx - 1;
                sh.history.get((idx - 1) as usize).cloned()
            } else {
                sh.history.first().cloned()
            }
        };

        if let Some(path) = target {
            let track = self.shuffler.lock().find(&path);
            if let Some(track) = track {
                self.queue_song(track);
            }
        }
        self.core.lock().navigating = false;
        self.after_move();
    }

    /// Play a specific track now (search result, remote action).
    pub fn play_path(&self, path: &Path) {
        let track = self.shuffler.lock().find(path);
        let Some(track) = track else {
            tracing::warn!(target: "player", path = %path.display(), "track not in cache");
            return;
        };
        let already = {
            let core = self.core.lock();
            core.current.as_ref().map(|c| c.path == track.path) == Some(true)
        };
        if !already {
            self.queue_song(track);
        }
    }

    fn queue_song(&self, track: Arc<Track>) {
        self.skip.store(true, Ordering::Release);
        self.engine.stop();
        self.shuffler.lock().enqueue_replay(track);
    }

    fn clear_for_new_track(&self) {
        self.skip.store(true, Ordering::Release);
        self.engine.stop();
        let mut core = self.core.lock();
        let mut sh = self.shuffler.lock();
        core.forward_stack.clear();
        sh.clear_replay();
        truncate_history(&mut sh.history, core.current_index);
    }

    // ------------------------------------------------------------------
    // Radio handoff
    // ------------------------------------------------------------------

    /// Switch between local playback and radio listening. Entering radio
    /// pauses the local loop; leaving re-queues the current track at its
    /// elapsed position via the resume machinery.
    pub fn set_radio_mode(&self, radio: bool) {
        let was = self.radio_mode.swap(radio, Ordering::AcqRel);
        if was == radio {
            return;
        }
        if radio {
            // Capture the return point before the loop tears the track down
            {
                let core = self.core.lock();
                *self.radio_return.lock() = core.current.clone().map(|track| {
                    (track, core.elapsed, self.paused.load(Ordering::Relaxed))
                });
            }
            self.skip.store(true, Ordering::Release);
            if !self.paused.load(Ordering::Relaxed) {
                self.engine.pause();
            }
            self.frontend.lyrics(false, "");
            tracing::info!(target: "player", "switched to radio mode");
        } else {
            self.engine.stop();
            if let Some((track, elapsed, paused)) = self.radio_return.lock().take() {
                self.core.lock().resume = Some((elapsed, paused));
                self.shuffler.lock().enqueue_replay(track);
            }
            self.skip.store(true, Ordering::Release);
            tracing::info!(target: "player", "switched to local mode");
        }
    }

    pub fn in_radio_mode(&self) -> bool {
        self.radio_mode.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Display helpers
    // ------------------------------------------------------------------

    /// Title with repeat / pause markers applied.
    pub fn display_title(&self) -> String {
        let core = self.core.lock();
        let Some(current) = &core.current else {
            return String::new();
        };
        let mut title = current.title.clone();
        if self.repeat.load(Ordering::Relaxed) {
            title.push_str(REPEAT_MARKER);
        }
        if self.paused.load(Ordering::Relaxed) {
            title.push_str(PAUSE_MARKER);
        }
        title
    }

    fn refresh_screen(&self) {
        let artist = {
            let core = self.core.lock();
            match &core.current {
                Some(t) => t.artist.clone(),
                None => return,
            }
        };
        self.frontend.screen(&artist, &self.display_title());
    }

    pub fn elapsed(&self) -> f64 {
        self.core.lock().elapsed
    }

    pub fn current_track(&self) -> Option<Arc<Track>> {
        self.core.lock().current.clone()
    }

    pub fn current_song_id(&self) -> u64 {
        self.core.lock().song_id
    }

    // ------------------------------------------------------------------
    // Lyrics
    // ------------------------------------------------------------------

    fn on_lyrics(self: &Arc<Self>, lines: Vec<LyricLine>, song_id: u64) {
        {
            let mut core = self.core.lock();
            if core.song_id != song_id {
                return; // stale fetch for a song we already left
            }
            core.lyrics_text = format_lines(&lines);
        }
        if lines.is_empty() {
            self.frontend.lyrics(false, "");
            return;
        }

        // Walk the lines in step with elapsed time on a throwaway thread.
        let player = Arc::clone(self);
        std::thread::spawn(move || {
            player.frontend.lyrics(true, crate::lyrics::PLACEHOLDER);
            for line in &lines {
                loop {
                    if player.current_song_id() != song_id {
                        player.frontend.lyrics(false, "");
                        return;
                    }
                    if player.elapsed() >= line.timestamp {
                        break;
                    }
                    std::thread::sleep(TICK);
                }
                player.frontend.lyrics(true, &line.text);
            }
            player.frontend.lyrics(false, "");
        });
    }

    // ------------------------------------------------------------------
    // Main loop
    // ------------------------------------------------------------------

    /// Run until `shutdown`. Call from a dedicated thread.
    pub fn run(self: Arc<Self>, shutdown: Arc<AtomicBool>) {
        let mut prev: Option<Arc<Track>> = None;
        while !shutdown.load(Ordering::Acquire) {
            if self.radio_mode.load(Ordering::Relaxed) {
                std::thread::sleep(TICK);
                continue;
            }
            self.skip.store(false, Ordering::Release);

            let song = {
                let mut sh = self.shuffler.lock();
                if sh.has_replay() || !self.repeat.load(Ordering::Relaxed) || prev.is_none() {
                    sh.get_unique_song()
                } else {
                    prev.clone()
                }
            };
            let Some(song) = song else {
                std::thread::sleep(Duration::from_millis(500));
                continue;
            };
            prev = Some(Arc::clone(&song));

            self.activate(&song);
            self.play_track(&song, &shutdown);

            let mut core = self.core.lock();
            core.current = None;
            core.elapsed = 0.0;
        }
        self.save_playback_state();
    }

    /// Make `song` current: history bookkeeping, song id, lyric kickoff.
    fn activate(self: &Arc<Self>, song: &Arc<Track>) {
        let song_id = self.song_counter.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut core = self.core.lock();
            let mut sh = self.shuffler.lock();
            if !core.navigating {
                truncate_history(&mut sh.history, core.current_index);
                if sh.history.last() != Some(&song.path) {
                    sh.history.push(song.path.clone());
                }
                core.current_index = sh.history.len() as i64 - 1;
            }
            core.current = Some(Arc::clone(song));
            core.song_id = song_id;
            core.lyrics_text.clear();
            // A pending resume starts mid-track; report that position from
            // the first tick on.
            core.elapsed = core.resume.map(|(elapsed, _)| elapsed).unwrap_or(0.0);
            core.buffered_at = wall_now();
        }

        self.refresh_screen();
        self.recommend.log_song_play(&song.artist, &song.title);

        let player = Arc::clone(self);
        self.lyrics.request(
            &song.artist,
            &song.title,
            song_id,
            Box::new(move |lines, id| player.on_lyrics(lines, id)),
        );
    }

    /// Drive one track from start to end-of-track, skip, or shutdown.
    fn play_track(&self, song: &Arc<Track>, shutdown: &AtomicBool) {
        let volume = self.core.lock().volume;
        self.engine.set_volume(volume as f32);

        let resume = self.core.lock().resume.take();
        let start_pos = match &resume {
            Some((elapsed, _)) => *elapsed,
            None => 0.0,
        };
        let resume_paused = matches!(resume, Some((_, true)));

        // A paused resume must never emit audio, so the session is prepared
        // paused and repositioned instead of played.
        let mut started = if resume_paused {
            self.paused.store(true, Ordering::Relaxed);
            self.engine.load(&song.path) && self.engine.set_pos(start_pos)
        } else {
            self.engine.play(Some(&song.path), start_pos)
        };

        if !started && start_pos > 0.0 {
            // Seek failure: retry from the top rather than dying
            tracing::warn!(target: "player", path = %song.path.display(),
                start_pos, "offset start failed, playing from 0");
            self.paused.store(false, Ordering::Relaxed);
            started = self.engine.play(Some(&song.path), 0.0);
        }
        if !started {
            tracing::error!(target: "player", path = %song.path.display(), "could not start track");
            std::thread::sleep(Duration::from_secs(1));
            return;
        }

        if !self.paused.load(Ordering::Relaxed) {
            self.hold_until_busy(Duration::from_secs(2));
        }
        self.refresh_screen();

        let total = if song.duration > 0.0 {
            song.duration
        } else {
            self.engine.get_duration()
        };

        let start_time = Instant::now();
        let mut paused_duration = Duration::ZERO;
        let mut last_save = Instant::now() - SAVE_INTERVAL;

        loop {
            if self.skip.load(Ordering::Acquire)
                || shutdown.load(Ordering::Acquire)
                || self.radio_mode.load(Ordering::Relaxed)
            {
                break;
            }

            let elapsed = start_pos + (start_time.elapsed() - paused_duration).as_secs_f64();
            self.core.lock().elapsed = elapsed;
            if total > 0.0 && elapsed >= total {
                break;
            }
            if total <= 0.0 && !self.engine.get_busy() && !self.paused.load(Ordering::Relaxed) {
                break; // unknown duration: trust the engine
            }

            if self.paused.load(Ordering::Relaxed) {
                let pause_start = Instant::now();
                self.engine.pause();
                self.save_playback_state();
                while self.paused.load(Ordering::Relaxed)
                    && !self.skip.load(Ordering::Acquire)
                    && !shutdown.load(Ordering::Acquire)
                {
                    std::thread::sleep(TICK);
                }
                paused_duration += pause_start.elapsed();
                if !self.skip.load(Ordering::Acquire) {
                    self.engine.unpause();
                }
                continue;
            }

            self.frontend.duration(elapsed, total);

            if last_save.elapsed() > SAVE_INTERVAL {
                self.save_playback_state();
                last_save = Instant::now();
            }
            std::thread::sleep(TICK);
        }

        self.engine.stop();
    }

    fn hold_until_busy(&self, timeout: Duration) {
        let started = Instant::now();
        while !self.engine.get_busy() && started.elapsed() < timeout {
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

/// Truncate `history` to end at `index` (inclusive), dropping any forward
/// entries from an earlier back-navigation.
fn truncate_history(history: &mut Vec<std::path::PathBuf>, index: i64) {
    let keep = (index + 1).max(0) as usize;
    if keep < history.len() {
        history.truncate(keep);
    }
}

// ----------------------------------------------------------------------
// Capability surface for the radio host
// ----------------------------------------------------------------------

impl PlayerControl for Player {
    fn status(&self) -> StatusSnapshot {
        let core = self.core.lock();
        let (artist, title, song_path, duration) = match &core.current {
            Some(t) => (
                t.artist.clone(),
                t.title.clone(),
                Some(t.path.clone()),
                t.duration,
            ),
            None => (String::new(), String::new(), None, 0.0),
        };
        let paused = self.paused.load(Ordering::Relaxed);
        let repeat = self.repeat.load(Ordering::Relaxed);

        let mut display_title = title.clone();
        if repeat {
            display_title.push_str(REPEAT_MARKER);
        }
        if paused {
            display_title.push_str(PAUSE_MARKER);
        }

        StatusSnapshot {
            artist,
            title,
            display_title,
            paused,
            repeat,
            volume: core.volume,
            position: self.engine.get_pos(),
            duration,
            eq: self.engine.eq_gains(),
            song_path,
            lyrics_text: core.lyrics_text.clone(),
            buffered_at: core.buffered_at,
        }
    }

    fn action(&self, action: PlayerAction) -> ActionReply {
        match &action {
            PlayerAction::Pause => self.pause(None),
            PlayerAction::Play => self.pause(Some(true)),
            PlayerAction::Skip => self.skip_next(),
            PlayerAction::Previous => self.skip_previous(),
            PlayerAction::VolumeUp => self.up_volume(),
            PlayerAction::VolumeDown => self.dwn_volume(),
            PlayerAction::Repeat => self.toggle_repeat(),
            PlayerAction::PlaySearch(path) => self.play_path(path),
            PlayerAction::Status => {}
        }

        let core = self.core.lock();
        ActionReply {
            title: core
                .current
                .as_ref()
                .map(|t| t.title.clone())
                .unwrap_or_default(),
            position: (self.engine.get_pos() * 100.0).round() / 100.0,
            paused: self.paused.load(Ordering::Relaxed),
            repeat: self.repeat.load(Ordering::Relaxed),
            volume: (core.volume * 100.0).round() / 100.0,
        }
    }

    fn search(&self, query: &str) -> Vec<SearchHit> {
        self.recommend.log_search(query);
        let sh = self.shuffler.lock();
        search(&sh.cache, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::LogFrontend;
    use crate::lyrics::LyricCache;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn track(artist: &str, title: &str, dir: &Path) -> Arc<Track> {
        let path = dir.join(format!("{artist}-{title}.flac"));
        std::fs::write(&path, b"").unwrap();
        Arc::new(Track {
            path,
            artist: artist.to_string(),
            title: title.to_string(),
            duration: 200.0,
        })
    }

    async fn player_with(tracks: Vec<Arc<Track>>, data_dir: PathBuf) -> Arc<Player> {
        let cache = Arc::new(LyricCache::open(data_dir.join(".lyricCache.json")));
        let lyrics = LyricService::start_with_api(cache, "http://127.0.0.1:1/api".to_string());
        let recommend = Arc::new(Recommender::open(
            data_dir.join(".player_recommend_data.json"),
            Duration::from_secs(3600),
        ));
        Player::new(
            Arc::new(AudioEngine::new(true)),
            tracks,
            50,
            2,
            0.1,
            Arc::new(LogFrontend),
            lyrics,
            recommend,
            data_dir,
        )
    }

    #[tokio::test]
    async fn volume_steps_clamp_and_round() {
        let dir = tempdir().unwrap();
        let player = player_with(Vec::new(), dir.path().to_path_buf()).await;

        assert_eq!(player.volume(), 0.1);
        for _ in 0..30 {
            player.up_volume();
        }
        assert_eq!(player.volume(), 1.0);
        for _ in 0..40 {
            player.dwn_volume();
        }
        assert_eq!(player.volume(), 0.0);
        player.up_volume();
        assert_eq!(player.volume(), 0.05);
    }

    #[tokio::test]
    async fn display_title_markers() {
        let dir = tempdir().unwrap();
        let t = track("Artist1", "SongA", dir.path());
        let player = player_with(vec![Arc::clone(&t)], dir.path().to_path_buf()).await;

        player.core.lock().current = Some(t);
        assert_eq!(player.display_title(), "SongA");

        player.repeat.store(true, Ordering::Relaxed);
        player.paused.store(true, Ordering::Relaxed);
        assert_eq!(player.display_title(), "SongA *+* *=*");
    }

    #[tokio::test]
    async fn saved_state_resumes_paused_at_elapsed() {
        let dir = tempdir().unwrap();
        let t = track("Artist1", "SongA", dir.path());

        save_state(
            &dir.path().join(STATE_FILE),
            &SavedState {
                path: t.path.clone(),
                elapsed: 37.5,
                paused: true,
                repeat: false,
            },
        )
        .unwrap();

        let player = player_with(vec![Arc::clone(&t)], dir.path().to_path_buf()).await;

        // The saved track is force-queued with the resume marker set
        assert!(player.shuffler.lock().has_replay());
        let resume = player.core.lock().resume;
        assert_eq!(resume, Some((37.5, true)));
        assert!(!player.is_repeat());
    }

    #[tokio::test]
    async fn missing_saved_track_starts_clean() {
        let dir = tempdir().unwrap();
        save_state(
            &dir.path().join(STATE_FILE),
            &SavedState {
                path: PathBuf::from("/gone/track.flac"),
                elapsed: 10.0,
                paused: false,
                repeat: true,
            },
        )
        .unwrap();

        let player = player_with(Vec::new(), dir.path().to_path_buf()).await;
        assert!(!player.shuffler.lock().has_replay());
        assert!(player.core.lock().resume.is_none());
    }

    #[tokio::test]
    async fn skip_prev_at_history_start_replays_without_decrement() {
        let dir = tempdir().unwrap();
        let a = track("X", "a", dir.path());
        let player =
            player_with(vec![Arc::clone(&a)], dir.path().to_path_buf()).await;

        {
            let mut core = player.core.lock();
            core.current = Some(Arc::clone(&a));
            core.current_index = 0;
            player.shuffler.lock().history.push(a.path.clone());
        }

        player.skip_previous();

        let core = player.core.lock();
        assert_eq!(core.current_index, 0);
        assert!(core.forward_stack.is_empty());
        // Current track was re-queued for replay
        assert!(player.shuffler.lock().has_replay());
    }

    #[tokio::test]
    async fn skip_prev_then_next_walks_the_zipper() {
        let dir = tempdir().unwrap();
        let a = track("X", "a", dir.path());
        let b = track("Y", "b", dir.path());
        let player = player_with(
            vec![Arc::clone(&a), Arc::clone(&b)],
            dir.path().to_path_buf(),
        )
        .await;

        {
            let mut core = player.core.lock();
            let mut sh = player.shuffler.lock();
            sh.history.push(a.path.clone());
            sh.history.push(b.path.clone());
            core.current = Some(Arc::clone(&b));
            core.current_index = 1;
        }

        player.skip_previous();
        {
            let core = player.core.lock();
            assert_eq!(core.current_index, 0);
            assert_eq!(core.forward_stack, vec![b.path.clone()]);
        }

        player.skip_next();
        {
            let core = player.core.lock();
            assert_eq!(core.current_index, 1);
            assert!(core.forward_stack.is_empty());
        }
    }

    #[tokio::test]
    async fn navigation_suppresses_and_restores_repeat() {
        let dir = tempdir().unwrap();
        let a = track("X", "a", dir.path());
        let player =
            player_with(vec![Arc::clone(&a)], dir.path().to_path_buf()).await;
        player.repeat.store(true, Ordering::Relaxed);

        {
            let mut core = player.core.lock();
            core.current = Some(Arc::clone(&a));
            core.current_index = 0;
            player.shuffler.lock().history.push(a.path.clone());
        }

        player.skip_previous(); // navigation settles inside
        assert!(player.is_repeat(), "repeat restored after settle");
    }

    #[tokio::test]
    async fn status_snapshot_reflects_state() {
        let dir = tempdir().unwrap();
        let t = track("Artist1", "SongA", dir.path());
        let player = player_with(vec![Arc::clone(&t)], dir.path().to_path_buf()).await;

        {
            let mut core = player.core.lock();
            core.current = Some(Arc::clone(&t));
            core.buffered_at = 123.0;
        }
        player.paused.store(true, Ordering::Relaxed);

        let status = player.status();
        assert_eq!(status.artist, "Artist1");
        assert_eq!(status.title, "SongA");
        assert_eq!(status.display_title, "SongA *=*");
        assert!(status.paused);
        assert_eq!(status.duration, 200.0);
        assert_eq!(status.eq.len(), 10);
        assert_eq!(status.song_path, Some(t.path.clone()));
        assert_eq!(status.buffered_at, 123.0);
    }

    #[tokio::test]
    async fn action_reply_carries_rounded_state() {
        let dir = tempdir().unwrap();
        let t = track("Artist1", "SongA", dir.path());
        let player = player_with(vec![Arc::clone(&t)], dir.path().to_path_buf()).await;
        player.core.lock().current = Some(Arc::clone(&t));

        let reply = player.action(PlayerAction::Status);
        assert_eq!(reply.title, "SongA");
        assert!(!reply.paused);

        let reply = player.action(PlayerAction::VolumeUp);
        assert_eq!(reply.volume, 0.15);
    }

    #[tokio::test]
    async fn stale_lyrics_are_dropped() {
        let dir = tempdir().unwrap();
        let t = track("Artist1", "SongA", dir.path());
        let player = player_with(vec![Arc::clone(&t)], dir.path().to_path_buf()).await;

        player.core.lock().song_id = 7;
        player.on_lyrics(
            vec![LyricLine {
                timestamp: 0.0,
                text: "stale".to_string(),
            }],
            3, // song id from a previous track
        );
        assert!(player.core.lock().lyrics_text.is_empty());
    }

    #[test]
    fn truncate_history_respects_cursor() {
        let mut h = vec![
            PathBuf::from("/a"),
            PathBuf::from("/b"),
            PathBuf::from("/c"),
        ];
        truncate_history(&mut h, 0);
        assert_eq!(h, vec![PathBuf::from("/a")]);

        let mut h = vec![PathBuf::from("/a")];
        truncate_history(&mut h, -1);
        assert!(h.is_empty());

        let mut h = vec![PathBuf::from("/a")];
        truncate_history(&mut h, 5);
        assert_eq!(h.len(), 1);
    }
}
