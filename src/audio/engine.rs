//! Session lifecycle and the real-time output callback.

use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

use super::decoder::{AudioInfo, NativeDecoder, probe};
use super::dsp::DspChain;
use super::ring::ChunkRing;
use super::state::EngineShared;
use super::transcode::{TranscodedPcm, kill_child, needs_transcode};
use super::AudioError;

/// Frames per ring chunk.
const CHUNK_FRAMES: usize = 8192;
/// Seconds of audio the ring buffers ahead of the device.
const BUFFER_SECONDS: f64 = 10.0;
/// Reader waits for this fill before local playback starts.
const MIN_BUFFER_RATIO: f32 = 0.2;
const BUFFER_READY_TIMEOUT: Duration = Duration::from_secs(5);
/// How long the movement flag suppresses redundant stops after navigation.
const MOVEMENT_SETTLE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy)]
struct EchoSettings {
    enabled: bool,
    delay_ms: f64,
    feedback: f32,
    wet: f32,
}

impl Default for EchoSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_ms: 350.0,
            feedback: 0.35,
            wet: 0.5,
        }
    }
}

struct Session {
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    stream_thread: Option<JoinHandle<()>>,
    stream_stop_tx: Sender<()>,
    child: Arc<Mutex<Option<Child>>>,
    ring: Arc<ChunkRing>,
}

#[derive(Default)]
struct EngineState {
    filepath: Option<PathBuf>,
    info: Option<AudioInfo>,
    session: Option<Session>,
}

/// The playback engine. One per process; cheap handles via `Arc`.
pub struct AudioEngine {
    shared: Arc<EngineShared>,
    /// EQ + echo for the active session; rebuilt at session start with the
    /// previous gains so the curve survives track changes.
    dsp: Arc<Mutex<DspChain>>,
    echo_settings: Mutex<EchoSettings>,
    state: Mutex<EngineState>,
}

impl AudioEngine {
    pub fn new(gaming_mode: bool) -> Self {
        let shared = EngineShared::new();
        shared.set_gaming_mode(gaming_mode);
        Self {
            shared,
            dsp: Arc::new(Mutex::new(DspChain::new(44100, 2, [0.0; 10]))),
            echo_settings: Mutex::new(EchoSettings::default()),
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn shared(&self) -> Arc<EngineShared> {
        Arc::clone(&self.shared)
    }

    // ------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------

    /// Probe `path` and prepare a paused session. Returns false when the
    /// session could not be prepared; probe failures degrade to the
    /// fallback format and still return true.
    pub fn load(&self, path: &Path) -> bool {
        self.start_session(path, 0.0, false, None, false).is_ok()
    }

    /// Start playback, or resume the current file.
    ///
    /// With `path` set, a new session starts at `start_pos`. Without one,
    /// a paused session resumes; otherwise the loaded file restarts.
    pub fn play(&self, path: Option<&Path>, start_pos: f64) -> bool {
        if let Some(path) = path {
            return self.start_session(path, start_pos, true, None, false).is_ok();
        }
        let current = self.state.lock().filepath.clone();
        match current {
            Some(current) => {
                if self.shared.is_paused() && self.shared.is_playing() {
                    self.unpause();
                    true
                } else {
                    self.start_session(&current, start_pos, true, None, false)
                        .is_ok()
                }
            }
            None => {
                tracing::warn!(target: "audio::engine", "play with no file loaded");
                false
            }
        }
    }

    /// Radio entry: joins a stream already in flight.
    ///
    /// When `buffer_time` (a monotonic instant recorded when the host data
    /// was captured) is given, the start position is advanced by the time
    /// elapsed since, so playback lands where the host is now. Returns the
    /// instant playback actually began, which callers use for lyric timing.
    pub fn radio_play(
        &self,
        path: &Path,
        start_pos: f64,
        buffer_time: Option<Instant>,
    ) -> Option<Instant> {
        self.start_session(path, start_pos, true, buffer_time, true)
            .ok()
    }

    pub fn pause(&self) {
        self.shared.set_paused(true);
    }

    pub fn unpause(&self) {
        self.shared.set_paused(false);
    }

    /// Seek by tearing the session down and starting over at `seconds`.
    /// The pause state is preserved across the restart.
    pub fn set_pos(&self, seconds: f64) -> bool {
        let current = self.state.lock().filepath.clone();
        let Some(path) = current else {
            tracing::warn!(target: "audio::engine", "set_pos with no file loaded");
            return false;
        };
        let was_paused = self.shared.is_paused();
        self.start_session(&path, seconds, !was_paused, None, false)
            .is_ok()
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared.set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.shared.volume()
    }

    pub fn get_pos(&self) -> f64 {
        self.shared.position_seconds()
    }

    pub fn get_duration(&self) -> f64 {
        self.state.lock().info.map(|i| i.duration).unwrap_or(0.0)
    }

    pub fn get_busy(&self) -> bool {
        self.shared.is_playing() && !self.shared.is_paused()
    }

    pub fn get_movement(&self) -> bool {
        self.shared.movement()
    }

    pub fn underruns(&self) -> u32 {
        self.shared.underruns()
    }

    pub fn filepath(&self) -> Option<PathBuf> {
        self.state.lock().filepath.clone()
    }

    /// Drop the loaded file after stopping.
    pub fn unload(&self) {
        self.stop();
        let mut st = self.state.lock();
        st.filepath = None;
        st.info = None;
    }

    // ------------------------------------------------------------------
    // DSP controls
    // ------------------------------------------------------------------

    pub fn set_eq_gain(&self, freq_hz: u32, gain_db: f64) -> bool {
        self.dsp.lock().eq.set_gain(freq_hz, gain_db)
    }

    pub fn eq_gains(&self) -> Vec<(u32, f64)> {
        self.dsp.lock().eq.gains()
    }

    pub fn eq_band(&self, freq_hz: u32) -> Option<f64> {
        self.dsp.lock().eq.band_gain(freq_hz)
    }

    pub fn set_gaming_mode(&self, enabled: bool) {
        self.shared.set_gaming_mode(enabled);
    }

    pub fn enable_echo(&self, delay_ms: f64, feedback: f32, wet: f32) {
        {
            let mut settings = self.echo_settings.lock();
            settings.enabled = true;
            settings.delay_ms = delay_ms;
            settings.feedback = feedback;
            settings.wet = wet;
        }
        let mut dsp = self.dsp.lock();
        if dsp.echo.is_none() {
            let (sr, ch) = self.session_format();
            dsp.echo = Some(super::dsp::Echo::new(sr, ch, delay_ms, feedback, wet));
        }
    }

    pub fn disable_echo(&self) {
        self.echo_settings.lock().enabled = false;
        self.dsp.lock().echo = None;
    }

    pub fn set_echo(&self, delay_ms: Option<f64>, feedback: Option<f32>, wet: Option<f32>) {
        {
            let mut settings = self.echo_settings.lock();
            if let Some(d) = delay_ms {
                settings.delay_ms = d;
            }
            if let Some(f) = feedback {
                settings.feedback = f;
            }
            if let Some(w) = wet {
                settings.wet = w;
            }
        }
        if let Some(echo) = self.dsp.lock().echo.as_mut() {
            echo.set_params(delay_ms, feedback, wet);
        }
    }

    fn session_format(&self) -> (u32, usize) {
        self.state
            .lock()
            .info
            .map(|i| (i.sample_rate, i.channels))
            .unwrap_or((44100, 2))
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Tear down the current session.
    ///
    /// Ordering matters: the transcoder child dies first (unblocking a
    /// reader mid-transcode), then the stop flag lands, the reader joins
    /// (so nothing touches the mmap again), the stream thread joins (device
    /// closed), and only then is the ring cleared and position reset.
    pub fn stop(&self) {
        if self.get_movement() {
            return;
        }
        self.shared.set_movement(true);
        self.stop_inner();
        self.shared.set_movement(false);
    }

    fn stop_inner(&self) {
        let session = self.state.lock().session.take();
        let Some(mut session) = session else {
            return;
        };

        kill_child(&session.child);
        session.stop.store(true, Ordering::Release);
        self.shared.set_paused(true);

        if let Some(reader) = session.reader.take() {
            if reader.join().is_err() {
                tracing::error!(target: "audio::engine", "reader thread panicked");
            }
        }

        let _ = session.stream_stop_tx.send(());
        if let Some(stream_thread) = session.stream_thread.take() {
            if stream_thread.join().is_err() {
                tracing::error!(target: "audio::engine", "stream thread panicked");
            }
        }

        session.ring.clear();
        self.shared.set_playing(false);
        self.shared.set_paused(false);
        self.shared.set_position_frames(0);
    }

    fn start_session(
        &self,
        path: &Path,
        start_pos: f64,
        play_immediately: bool,
        buffer_time: Option<Instant>,
        radio_mode: bool,
    ) -> Result<Instant, AudioError> {
        // Clean shutdown of the previous session, bypassing the movement
        // guard (we set it ourselves around the whole restart).
        self.shared.set_movement(true);
        self.stop_inner();

        let info = probe(path);

        let final_position = match buffer_time {
            // Radio join: account for the time the status data spent in
            // flight so we land where the host is now.
            Some(buffered) => start_pos + buffered.elapsed().as_secs_f64(),
            None => start_pos,
        };
        if radio_mode {
            tracing::debug!(target: "audio::engine",
                start_pos, final_position, "radio session timing");
        }

        {
            let mut st = self.state.lock();
            st.filepath = Some(path.to_path_buf());
            st.info = Some(info);
        }

        self.shared.set_sample_rate(info.sample_rate);
        self.shared
            .set_position_frames((final_position * info.sample_rate as f64) as u64);
        self.shared.set_paused(!play_immediately);

        // Fresh DSP chain at the session format, carrying the EQ curve and
        // echo settings forward.
        {
            let gains = self.dsp.lock().eq.gains_array();
            let echo = *self.echo_settings.lock();
            let mut chain = DspChain::new(info.sample_rate, info.channels, gains);
            if echo.enabled {
                chain.echo = Some(super::dsp::Echo::new(
                    info.sample_rate,
                    info.channels,
                    echo.delay_ms,
                    echo.feedback,
                    echo.wet,
                ));
            }
            *self.dsp.lock() = chain;
        }

        let max_chunks =
            (((info.sample_rate as f64 * BUFFER_SECONDS) / CHUNK_FRAMES as f64) as usize).max(2);
        let ring = Arc::new(ChunkRing::new(max_chunks, CHUNK_FRAMES, info.channels));
        let stop = Arc::new(AtomicBool::new(false));
        let child: Arc<Mutex<Option<Child>>> = Arc::new(Mutex::new(None));
        let (stream_stop_tx, stream_stop_rx) = bounded::<()>(1);

        let reader = {
            let ring = Arc::clone(&ring);
            let stop = Arc::clone(&stop);
            let child = Arc::clone(&child);
            let shared = Arc::clone(&self.shared);
            let stream_stop_tx = stream_stop_tx.clone();
            let path = path.to_path_buf();
            thread::Builder::new()
                .name("wavecast-reader".to_string())
                .spawn(move || {
                    reader_main(
                        path,
                        final_position,
                        info,
                        ring,
                        stop,
                        child,
                        shared,
                        stream_stop_tx,
                    );
                })
                .map_err(|e| AudioError::Device(e.to_string()))?
        };

        let stream_thread = {
            let ring = Arc::clone(&ring);
            let stop = Arc::clone(&stop);
            let shared = Arc::clone(&self.shared);
            let dsp = Arc::clone(&self.dsp);
            thread::Builder::new()
                .name("wavecast-stream".to_string())
                .spawn(move || {
                    stream_main(info, ring, stop, shared, dsp, stream_stop_rx, radio_mode);
                })
                .map_err(|e| AudioError::Device(e.to_string()))?
        };

        self.state.lock().session = Some(Session {
            stop: Arc::clone(&stop),
            reader: Some(reader),
            stream_thread: Some(stream_thread),
            stream_stop_tx,
            child,
            ring: Arc::clone(&ring),
        });

        // Local playback waits for a minimum buffer fill; radio joins
        // immediately to keep the sync correction tight.
        if !radio_mode {
            let started = Instant::now();
            while ring.fill_ratio() < MIN_BUFFER_RATIO
                && !stop.load(Ordering::Acquire)
                && started.elapsed() < BUFFER_READY_TIMEOUT
            {
                thread::sleep(Duration::from_millis(10));
            }
        }

        if play_immediately {
            self.shared.set_paused(false);
        }

        // Release the movement guard shortly after, letting fast
        // navigation coalesce instead of stacking redundant stops.
        let shared = Arc::clone(&self.shared);
        thread::spawn(move || {
            thread::sleep(MOVEMENT_SETTLE);
            shared.set_movement(false);
        });

        Ok(Instant::now())
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.shared.set_movement(false);
        self.stop_inner();
    }
}

// ----------------------------------------------------------------------
// Reader thread
// ----------------------------------------------------------------------

/// Adapt a decoded chunk's channel count to the session's: mono is
/// broadcast, extra channels are clipped.
fn adapt_channels(input: &[f32], in_ch: usize, out_ch: usize, scratch: &mut Vec<f32>) {
    scratch.clear();
    if in_ch == out_ch {
        scratch.extend_from_slice(input);
        return;
    }
    let frames = input.len() / in_ch;
    for frame in 0..frames {
        for ch in 0..out_ch {
            let src = frame * in_ch + ch.min(in_ch - 1);
            scratch.push(input[src]);
        }
    }
}

/// Push `pending` into the ring in chunk-size slices, backing off while the
/// ring is full. Returns false when stopped.
fn drain_pending(
    pending: &mut Vec<f32>,
    channels: usize,
    ring: &ChunkRing,
    stop: &AtomicBool,
    flush: bool,
) -> bool {
    let slice_len = CHUNK_FRAMES * channels;
    loop {
        let available = pending.len();
        if available == 0 || (!flush && available < slice_len) {
            return true;
        }
        let take = available.min(slice_len);
        loop {
            if stop.load(Ordering::Acquire) {
                return false;
            }
            if ring.fill_ratio() > 0.8 {
                thread::sleep(Duration::from_millis(5));
                continue;
            }
            if ring.append(&pending[..take]) {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        pending.drain(..take);
    }
}

#[allow(clippy::too_many_arguments)]
fn reader_main(
    path: PathBuf,
    start_seconds: f64,
    info: AudioInfo,
    ring: Arc<ChunkRing>,
    stop: Arc<AtomicBool>,
    child: Arc<Mutex<Option<Child>>>,
    shared: Arc<EngineShared>,
    stream_stop_tx: Sender<()>,
) {
    let result = if needs_transcode(&path) {
        read_transcoded(&path, start_seconds, info, &ring, &stop, &child)
    } else {
        read_native(&path, start_seconds, info, &ring, &stop)
    };

    if let Err(e) = result {
        if stop.load(Ordering::Acquire) {
            tracing::debug!(target: "audio::reader", path = %path.display(), error = %e,
                "decode session cancelled");
        } else {
            tracing::error!(target: "audio::reader", path = %path.display(), error = %e,
                "decode session failed");
        }
    }

    // Natural end of file: let the ring drain, then shut the session down
    // so get_busy() flips once the last chunk has played out.
    if !stop.load(Ordering::Acquire) {
        while !ring.is_empty() && !stop.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(10));
        }
        if !stop.swap(true, Ordering::AcqRel) {
            shared.set_playing(false);
            let _ = stream_stop_tx.try_send(());
        }
    }
}

fn read_native(
    path: &Path,
    start_seconds: f64,
    info: AudioInfo,
    ring: &ChunkRing,
    stop: &AtomicBool,
) -> Result<(), AudioError> {
    let mut decoder = NativeDecoder::open(path, start_seconds)?;
    let in_ch = decoder.channels();
    let out_ch = info.channels;

    let mut packet = Vec::new();
    let mut adapted = Vec::new();
    let mut pending: Vec<f32> = Vec::with_capacity(CHUNK_FRAMES * out_ch * 2);

    while !stop.load(Ordering::Acquire) {
        if !decoder.next_interleaved(&mut packet)? {
            break;
        }
        adapt_channels(&packet, in_ch, out_ch, &mut adapted);
        pending.extend_from_slice(&adapted);
        if !drain_pending(&mut pending, out_ch, ring, stop, false) {
            return Ok(());
        }
    }
    drain_pending(&mut pending, out_ch, ring, stop, true);
    Ok(())
}

fn read_transcoded(
    path: &Path,
    start_seconds: f64,
    info: AudioInfo,
    ring: &ChunkRing,
    stop: &AtomicBool,
    child: &Arc<Mutex<Option<Child>>>,
) -> Result<(), AudioError> {
    let mut pcm = TranscodedPcm::prepare(
        path,
        start_seconds,
        info.sample_rate,
        info.channels,
        child,
    )?;

    let mut chunk = Vec::with_capacity(CHUNK_FRAMES * info.channels);
    while !stop.load(Ordering::Acquire) {
        if ring.is_full() {
            thread::sleep(Duration::from_millis(20));
            continue;
        }
        if !pcm.next_chunk(CHUNK_FRAMES, &mut chunk) {
            break;
        }
        while !ring.append(&chunk) {
            if stop.load(Ordering::Acquire) {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Stream thread
// ----------------------------------------------------------------------

fn stream_main(
    info: AudioInfo,
    ring: Arc<ChunkRing>,
    stop: Arc<AtomicBool>,
    shared: Arc<EngineShared>,
    dsp: Arc<Mutex<DspChain>>,
    stream_stop_rx: Receiver<()>,
    radio_mode: bool,
) {
    // Give the reader a head start locally; radio joins hot.
    if !radio_mode {
        let started = Instant::now();
        while ring.is_empty()
            && !stop.load(Ordering::Acquire)
            && started.elapsed() < BUFFER_READY_TIMEOUT
        {
            thread::sleep(Duration::from_millis(1));
        }
    }
    if stop.load(Ordering::Acquire) {
        return;
    }

    let stream = match build_stream(info, ring, Arc::clone(&shared), dsp) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(target: "audio::stream", error = %e, "failed to open output stream");
            stop.store(true, Ordering::Release);
            return;
        }
    };
    if let Err(e) = stream.play() {
        tracing::error!(target: "audio::stream", error = %e, "failed to start output stream");
        stop.store(true, Ordering::Release);
        return;
    }
    shared.set_playing(true);

    // Park until stop; dropping the stream closes the device.
    let _ = stream_stop_rx.recv();
    shared.set_playing(false);
}

fn build_stream(
    info: AudioInfo,
    ring: Arc<ChunkRing>,
    shared: Arc<EngineShared>,
    dsp: Arc<Mutex<DspChain>>,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::Device("no output device found".to_string()))?;

    let config = StreamConfig {
        channels: info.channels as u16,
        sample_rate: SampleRate(info.sample_rate),
        buffer_size: BufferSize::Fixed(CHUNK_FRAMES as u32),
    };

    let err_fn = |err| {
        tracing::error!(target: "audio::stream", error = %err, "stream error");
    };

    let callback = make_callback(
        info.channels,
        Arc::clone(&ring),
        Arc::clone(&shared),
        Arc::clone(&dsp),
    );
    match device.build_output_stream(&config, callback, err_fn, None) {
        Ok(stream) => Ok(stream),
        Err(e) => {
            // Some backends refuse a fixed buffer size; retry with the
            // device default.
            tracing::debug!(target: "audio::stream", error = %e,
                "fixed buffer size rejected, retrying with device default");
            let fallback = StreamConfig {
                buffer_size: BufferSize::Default,
                ..config
            };
            let callback = make_callback(info.channels, ring, shared, dsp);
            device
                .build_output_stream(&fallback, callback, err_fn, None)
                .map_err(|e| AudioError::Device(e.to_string()))
        }
    }
}

fn make_callback(
    channels: usize,
    ring: Arc<ChunkRing>,
    shared: Arc<EngineShared>,
    dsp: Arc<Mutex<DspChain>>,
) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) {
    // Callback-owned scratch: one ring chunk plus a cursor, so device
    // buffers that do not line up with chunk boundaries never drop frames.
    let mut pending = vec![0.0f32; CHUNK_FRAMES * channels];
    let mut pending_len = 0usize;
    let mut pending_pos = 0usize;

    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        if shared.is_paused() || !shared.is_playing() {
            data.fill(0.0);
            return;
        }

        let volume = shared.volume();
        let gaming = shared.gaming_mode();
        let frames_out = data.len() / channels;
        let mut filled = 0usize; // frames written so far

        while filled < frames_out {
            if pending_pos >= pending_len {
                match ring.pop_into(&mut pending) {
                    Some(frames) => {
                        if !gaming {
                            dsp.lock().process(&mut pending[..frames * channels]);
                        }
                        pending_len = frames * channels;
                        pending_pos = 0;
                    }
                    None => {
                        // Underrun: pad the rest with silence
                        data[filled * channels..].fill(0.0);
                        shared.increment_underruns();
                        break;
                    }
                }
            }
            let avail = (pending_len - pending_pos) / channels;
            let take = avail.min(frames_out - filled);
            let src = &pending[pending_pos..pending_pos + take * channels];
            let dst = &mut data[filled * channels..(filled + take) * channels];
            for (d, s) in dst.iter_mut().zip(src) {
                *d = s * volume;
            }
            pending_pos += take * channels;
            filled += take;
        }

        shared.advance_position(frames_out as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapt_channels_broadcast_mono() {
        let mono = [0.1f32, 0.2, 0.3];
        let mut out = Vec::new();
        adapt_channels(&mono, 1, 2, &mut out);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn adapt_channels_clips_extras() {
        // 3-channel frames down to stereo: third channel dropped
        let three = [0.1f32, 0.2, 0.3, 0.4, 0.5, 0.6];
        let mut out = Vec::new();
        adapt_channels(&three, 3, 2, &mut out);
        assert_eq!(out, vec![0.1, 0.2, 0.4, 0.5]);
    }

    #[test]
    fn adapt_channels_passthrough() {
        let stereo = [0.1f32, 0.2, 0.3, 0.4];
        let mut out = Vec::new();
        adapt_channels(&stereo, 2, 2, &mut out);
        assert_eq!(out, stereo.to_vec());
    }

    #[test]
    fn drain_pending_slices_and_flushes() {
        let ring = ChunkRing::new(8, 4, 1);
        let stop = AtomicBool::new(false);

        let mut pending: Vec<f32> = (0..10).map(|i| i as f32).collect();
        assert!(drain_pending(&mut pending, 1, &ring, &stop, false));
        // Two full chunks drained, 2 samples held back
        assert_eq!(ring.len(), 2);
        assert_eq!(pending.len(), 2);

        assert!(drain_pending(&mut pending, 1, &ring, &stop, true));
        assert_eq!(ring.len(), 3);
        assert!(pending.is_empty());

        let mut out = vec![0.0; 4];
        assert_eq!(ring.pop_into(&mut out), Some(4));
        assert_eq!(out, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(ring.pop_into(&mut out), Some(4));
        assert_eq!(ring.pop_into(&mut out), Some(2)); // flushed remainder
    }

    #[test]
    fn drain_pending_bails_on_stop() {
        let ring = ChunkRing::new(1, 4, 1);
        ring.append(&[0.0; 4]);
        let stop = AtomicBool::new(true);

        let mut pending = vec![0.0f32; 4];
        assert!(!drain_pending(&mut pending, 1, &ring, &stop, false));
    }

    #[test]
    fn engine_queries_without_session() {
        let engine = AudioEngine::new(false);
        assert_eq!(engine.get_pos(), 0.0);
        assert_eq!(engine.get_duration(), 0.0);
        assert!(!engine.get_busy());
        assert!(!engine.get_movement());
        assert!(engine.filepath().is_none());
        assert!(!engine.play(None, 0.0));
        assert!(!engine.set_pos(10.0));
    }

    #[test]
    fn eq_controls_reach_chain() {
        let engine = AudioEngine::new(false);
        assert!(engine.set_eq_gain(1000, 6.0));
        assert!(!engine.set_eq_gain(999, 6.0));
        assert_eq!(engine.eq_band(1000), Some(6.0));

        let gains = engine.eq_gains();
        assert_eq!(gains.len(), 10);
        assert_eq!(gains[5], (1000, 6.0));
    }

    #[test]
    fn echo_settings_survive_toggle() {
        let engine = AudioEngine::new(false);
        engine.enable_echo(200.0, 0.4, 0.6);
        engine.set_echo(Some(300.0), None, None);
        engine.disable_echo();
        engine.enable_echo(300.0, 0.4, 0.6);
        assert!(engine.dsp.lock().echo.is_some());
    }

    #[test]
    fn volume_is_clamped_through_engine() {
        let engine = AudioEngine::new(false);
        engine.set_volume(2.0);
        assert_eq!(engine.volume(), 1.0);
        engine.set_volume(-1.0);
        assert_eq!(engine.volume(), 0.0);
    }
}
