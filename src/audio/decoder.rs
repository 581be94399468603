//! In-process decoding via symphonia.
//!
//! Handles every format the engine does not hand to the external transcoder
//! (flac, ogg, wav, ...). A session-scoped [`NativeDecoder`] is opened at a
//! start offset; seeking mid-track tears the session down and opens a new
//! decoder at the target, so there is no in-place seek here.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use super::AudioError;

/// Stream parameters resolved by probing a file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: usize,
    /// Total duration in seconds; 0.0 when the container does not say.
    pub duration: f64,
}

impl AudioInfo {
    /// Defaults used when probing fails outright, so a bad file degrades to
    /// a silent zero-length session instead of killing the player.
    pub fn fallback() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            duration: 0.0,
        }
    }
}

fn open_reader(path: &Path) -> Result<Box<dyn FormatReader>, AudioError> {
    let file = File::open(path)
        .map_err(|e| AudioError::FileNotFound(format!("{}: {}", path.display(), e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension() {
        hint.with_extension(&ext.to_string_lossy());
    }

    let format_opts = FormatOptions {
        enable_gapless: true,
        ..Default::default()
    };
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &MetadataOptions::default())
        .map_err(|e| AudioError::Probe(e.to_string()))?;
    Ok(probed.format)
}

/// Probe sample rate, channel count and duration.
///
/// Never fails: unreadable or unsupported files fall back to
/// (44100 Hz, 2 ch, 0.0 s) and log the reason.
pub fn probe(path: &Path) -> AudioInfo {
    match try_probe(path) {
        Ok(info) => info,
        Err(e) => {
            tracing::error!(target: "audio::decoder", path = %path.display(), error = %e,
                "probe failed, using fallback format");
            AudioInfo::fallback()
        }
    }
}

fn try_probe(path: &Path) -> Result<AudioInfo, AudioError> {
    let reader = open_reader(path)?;
    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioError::Probe("no audio track found".to_string()))?;

    let params = &track.codec_params;
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| AudioError::Probe("unknown sample rate".to_string()))?;
    let channels = params.channels.map(|c| c.count()).unwrap_or(2);

    let duration = match (params.n_frames, params.time_base) {
        (Some(n), Some(tb)) => {
            let t = tb.calc_time(n);
            t.seconds as f64 + t.frac
        }
        (Some(n), None) => n as f64 / sample_rate as f64,
        _ => 0.0,
    };

    Ok(AudioInfo {
        sample_rate,
        channels,
        duration,
    })
}

/// Streaming decoder for one playback session.
pub struct NativeDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    sample_buf: Option<SampleBuffer<f32>>,
}

impl NativeDecoder {
    /// Open `path` and position the stream at `start_seconds`.
    pub fn open(path: &Path, start_seconds: f64) -> Result<Self, AudioError> {
        let mut reader = open_reader(path)?;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AudioError::Probe("no audio track found".to_string()))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| AudioError::Decode("unknown sample rate".to_string()))?;
        let channels = codec_params.channels.map(|c| c.count()).unwrap_or(2);

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| AudioError::Decode(e.to_string()))?;

        let mut this = Self {
            reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            sample_buf: None,
        };

        if start_seconds > 0.0 {
            this.seek_to(start_seconds)?;
        }
        Ok(this)
    }

    fn seek_to(&mut self, seconds: f64) -> Result<(), AudioError> {
        self.reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::from(seconds),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| AudioError::Decode(format!("seek to {seconds:.2}s failed: {e}")))?;
        self.decoder.reset();
        Ok(())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Decode the next packet as interleaved f32 into `out` (cleared first).
    ///
    /// Returns `Ok(false)` at end of stream. Corrupt packets are skipped.
    pub fn next_interleaved(&mut self, out: &mut Vec<f32>) -> Result<bool, AudioError> {
        out.clear();
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(AudioError::Decode(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(_)) => continue, // skip bad frame
                Err(e) => return Err(AudioError::Decode(e.to_string())),
            };

            let buf = self.sample_buf.get_or_insert_with(|| {
                SampleBuffer::new(decoded.capacity() as u64, *decoded.spec())
            });
            buf.copy_interleaved_ref(decoded);
            out.extend_from_slice(buf.samples());
            return Ok(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_falls_back_for_missing_file() {
        let info = probe(Path::new("/nonexistent/track.flac"));
        assert_eq!(info, AudioInfo::fallback());
    }

    #[test]
    fn open_fails_for_missing_file() {
        let result = NativeDecoder::open(Path::new("/nonexistent/track.flac"), 0.0);
        assert!(matches!(result, Err(AudioError::FileNotFound(_))));
    }

    #[test]
    fn probe_decodes_generated_wav() {
        // Minimal 16-bit PCM WAV, 0.5s of silence at 8 kHz mono
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wav");
        write_silent_wav(&path, 8000, 1, 4000);

        let info = probe(&path);
        assert_eq!(info.sample_rate, 8000);
        assert_eq!(info.channels, 1);
        assert!((info.duration - 0.5).abs() < 0.01);

        let mut dec = NativeDecoder::open(&path, 0.0).unwrap();
        let mut chunk = Vec::new();
        let mut total = 0usize;
        while dec.next_interleaved(&mut chunk).unwrap() {
            assert!(chunk.iter().all(|s| s.abs() < 1e-3));
            total += chunk.len();
        }
        assert_eq!(total, 4000);
    }

    fn write_silent_wav(path: &Path, sample_rate: u32, channels: u16, frames: u32) {
        use std::io::Write;
        let data_len = frames * channels as u32 * 2;
        let byte_rate = sample_rate * channels as u32 * 2;
        let block_align = channels * 2;

        let mut f = File::create(path).unwrap();
        f.write_all(b"RIFF").unwrap();
        f.write_all(&(36 + data_len).to_le_bytes()).unwrap();
        f.write_all(b"WAVEfmt ").unwrap();
        f.write_all(&16u32.to_le_bytes()).unwrap();
        f.write_all(&1u16.to_le_bytes()).unwrap(); // PCM
        f.write_all(&channels.to_le_bytes()).unwrap();
        f.write_all(&sample_rate.to_le_bytes()).unwrap();
        f.write_all(&byte_rate.to_le_bytes()).unwrap();
        f.write_all(&block_align.to_le_bytes()).unwrap();
        f.write_all(&16u16.to_le_bytes()).unwrap();
        f.write_all(b"data").unwrap();
        f.write_all(&data_len.to_le_bytes()).unwrap();
        f.write_all(&vec![0u8; data_len as usize]).unwrap();
    }
}
