//! Audio playback engine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │            AudioEngine (any thread, Send + Sync)             │
//! │   load / play / radio_play / pause / seek / stop / volume    │
//! └──────────────┬────────────────────────────┬──────────────────┘
//!                │ spawns per session         │ atomics + mutexes
//!                ▼                            ▼
//! ┌───────────────────────────┐   ┌──────────────────────────────┐
//! │       Reader thread       │   │     Stream thread (cpal)     │
//! │ symphonia or ffmpeg+mmap  │──▶│  callback: ring → EQ → out   │
//! │ decodes into the ring     │   │  owns the device stream      │
//! └───────────────────────────┘   └──────────────────────────────┘
//! ```
//!
//! A "session" is one (file, start position) playback. Seeking tears the
//! session down and starts a new one at the target offset; `stop()` follows
//! a strict order (kill transcoder → stop flag → join reader → close stream
//! → clear ring) so the memory-mapped PCM file is never read after unmap.

mod decoder;
mod dsp;
mod engine;
mod ring;
mod state;
mod transcode;

pub use decoder::{AudioInfo, NativeDecoder, probe};
pub use dsp::{DspChain, Echo, Equalizer, GAIN_LIMIT_DB, ISO_BANDS};
pub use engine::AudioEngine;
pub use ring::ChunkRing;
pub use state::EngineShared;
pub use transcode::needs_transcode;

/// Engine errors.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("format probe failed: {0}")]
    Probe(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("transcoder failed: {0}")]
    Transcoder(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
