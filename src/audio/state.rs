//! Lock-free state shared with the real-time audio callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Atomic engine state.
///
/// The cpal callback runs on a high-priority device thread and must never
/// block, so everything it reads or writes lives here as an atomic. The
/// chunk ring has its own short-held mutex; this struct covers the rest.
#[derive(Debug)]
pub struct EngineShared {
    /// Volume as f32 bits (`f32::to_bits` / `f32::from_bits`).
    volume_bits: AtomicU32,
    /// Pause gate checked first thing in the callback.
    paused: AtomicBool,
    /// Set once the output stream is started, cleared on stop.
    playing: AtomicBool,
    /// Bypass EQ/echo entirely when set.
    gaming_mode: AtomicBool,
    /// Frames delivered to the device since session start (includes the
    /// session's start offset).
    position_frames: AtomicU64,
    /// Sample rate of the active session; 0 when idle.
    sample_rate: AtomicU32,
    /// Callback underrun count.
    underruns: AtomicU32,
    /// A seek/stop transition is in flight.
    movement: AtomicBool,
}

impl Default for EngineShared {
    fn default() -> Self {
        Self {
            volume_bits: AtomicU32::new(0.1_f32.to_bits()),
            paused: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            gaming_mode: AtomicBool::new(false),
            position_frames: AtomicU64::new(0),
            sample_rate: AtomicU32::new(0),
            underruns: AtomicU32::new(0),
            movement: AtomicBool::new(false),
        }
    }
}

impl EngineShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[inline]
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set_volume(&self, volume: f32) {
        self.volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Relaxed);
    }

    #[inline]
    pub fn gaming_mode(&self) -> bool {
        self.gaming_mode.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_gaming_mode(&self, enabled: bool) {
        self.gaming_mode.store(enabled, Ordering::Relaxed);
    }

    #[inline]
    pub fn position_frames(&self) -> u64 {
        self.position_frames.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_position_frames(&self, frames: u64) {
        self.position_frames.store(frames, Ordering::Relaxed);
    }

    #[inline]
    pub fn advance_position(&self, frames: u64) {
        self.position_frames.fetch_add(frames, Ordering::Relaxed);
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_sample_rate(&self, rate: u32) {
        self.sample_rate.store(rate, Ordering::Relaxed);
    }

    /// Position in seconds; 0.0 when no session is active.
    pub fn position_seconds(&self) -> f64 {
        let rate = self.sample_rate();
        if rate == 0 {
            return 0.0;
        }
        self.position_frames() as f64 / rate as f64
    }

    #[inline]
    pub fn underruns(&self) -> u32 {
        self.underruns.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn increment_underruns(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn movement(&self) -> bool {
        self.movement.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_movement(&self, active: bool) {
        self.movement.store(active, Ordering::Release);
    }
}
