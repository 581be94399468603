//! Equalizer and echo processing for the audio callback.
//!
//! Ten peaking biquads at the ISO graphic-EQ centers, chained in series per
//! channel, plus an optional one-tap feedback delay. Coefficients use the RBJ
//! Audio EQ Cookbook peaking formula and are computed in f64 for stability;
//! filter state is Direct Form II Transposed and carried across chunks.
//!
//! The engine wraps the whole chain in a mutex: gain writes land between
//! chunks and the next callback picks up the new coefficients.

/// Fixed center frequencies of the graphic EQ, in Hz.
pub const ISO_BANDS: [u32; 10] = [31, 62, 125, 250, 500, 1000, 2000, 4000, 8000, 16000];

/// Band gains are clamped to this range, in dB.
pub const GAIN_LIMIT_DB: f64 = 12.0;

const DEFAULT_Q: f64 = 1.1;

/// One RBJ peaking biquad with per-channel DF2T state.
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    /// (z1, z2) per channel.
    z: Vec<[f64; 2]>,
}

impl Biquad {
    fn peaking(sample_rate: u32, f0: f64, gain_db: f64, q: f64, channels: usize) -> Self {
        let mut f = Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z: vec![[0.0; 2]; channels],
        };
        f.set_peaking(sample_rate, f0, gain_db, q);
        f
    }

    /// Recompute coefficients; state is kept so a live gain change does not
    /// discontinue the output.
    fn set_peaking(&mut self, sample_rate: u32, f0: f64, gain_db: f64, q: f64) {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let w0 = std::f64::consts::TAU * f0 / sample_rate as f64;
        let alpha = w0.sin() / (2.0 * q);
        let cw = w0.cos();

        let b0 = 1.0 + alpha * a;
        let b1 = -2.0 * cw;
        let b2 = 1.0 - alpha * a;
        let a0 = 1.0 + alpha / a;
        let a1 = -2.0 * cw;
        let a2 = 1.0 - alpha / a;

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
    }

    fn process(&mut self, buf: &mut [f32], channels: usize) {
        let frames = buf.len() / channels;
        for ch in 0..channels {
            let [mut z1, mut z2] = self.z[ch];
            for frame in 0..frames {
                let i = frame * channels + ch;
                let x = buf[i] as f64;
                let y = self.b0 * x + z1;
                z1 = self.b1 * x - self.a1 * y + z2;
                z2 = self.b2 * x - self.a2 * y;
                buf[i] = y as f32;
            }
            // Denormal protection for the carried state
            if z1.abs() < 1e-15 {
                z1 = 0.0;
            }
            if z2.abs() < 1e-15 {
                z2 = 0.0;
            }
            self.z[ch] = [z1, z2];
        }
    }
}

/// 10-band constant-Q graphic equalizer, ±12 dB.
pub struct Equalizer {
    sample_rate: u32,
    channels: usize,
    q: f64,
    gains_db: [f64; 10],
    bands: Vec<Biquad>,
}

impl Equalizer {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self::with_gains(sample_rate, channels, [0.0; 10])
    }

    /// Build with preset gains, e.g. when a new session inherits the
    /// previous session's EQ curve.
    pub fn with_gains(sample_rate: u32, channels: usize, gains_db: [f64; 10]) -> Self {
        let q = DEFAULT_Q;
        let bands = ISO_BANDS
            .iter()
            .zip(gains_db.iter())
            .map(|(&f0, &g)| Biquad::peaking(sample_rate, f0 as f64, g, q, channels))
            .collect();
        Self {
            sample_rate,
            channels,
            q,
            gains_db,
            bands,
        }
    }

    /// Set the gain for the band centered at `freq_hz`.
    ///
    /// Unrecognized frequencies are ignored and leave every band unchanged;
    /// returns whether the band was recognized. Gain saturates at ±12 dB.
    pub fn set_gain(&mut self, freq_hz: u32, gain_db: f64) -> bool {
        let Some(idx) = ISO_BANDS.iter().position(|&f| f == freq_hz) else {
            return false;
        };
        let gain_db = gain_db.clamp(-GAIN_LIMIT_DB, GAIN_LIMIT_DB);
        self.gains_db[idx] = gain_db;
        self.bands[idx].set_peaking(self.sample_rate, freq_hz as f64, gain_db, self.q);
        true
    }

    /// Gain of one band, or `None` for an unrecognized frequency.
    pub fn band_gain(&self, freq_hz: u32) -> Option<f64> {
        ISO_BANDS
            .iter()
            .position(|&f| f == freq_hz)
            .map(|idx| self.gains_db[idx])
    }

    /// `(center_freq, gain_db)` for all ten bands, in ascending frequency.
    pub fn gains(&self) -> Vec<(u32, f64)> {
        ISO_BANDS.iter().copied().zip(self.gains_db).collect()
    }

    pub fn gains_array(&self) -> [f64; 10] {
        self.gains_db
    }

    /// Run the full chain over an interleaved buffer and clip to [-1, 1].
    pub fn process(&mut self, buf: &mut [f32]) {
        if buf.is_empty() {
            return;
        }
        for band in &mut self.bands {
            band.process(buf, self.channels);
        }
        for s in buf.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }
    }
}

/// One-tap echo / delay line.
///
/// `delay_ms` sets the tap distance (floor 10 ms), `feedback` how much of the
/// delayed signal is written back (0..0.95), `wet` the dry/echo mix (0..1).
/// Changing the delay reallocates the line; the other parameters are cheap.
pub struct Echo {
    sample_rate: u32,
    channels: usize,
    delay_ms: f64,
    feedback: f32,
    wet: f32,
    buf: Vec<f32>,
    idx: usize,
}

impl Echo {
    pub fn new(sample_rate: u32, channels: usize, delay_ms: f64, feedback: f32, wet: f32) -> Self {
        let mut echo = Self {
            sample_rate,
            channels,
            delay_ms: 0.0,
            feedback: 0.0,
            wet: 0.0,
            buf: Vec::new(),
            idx: 0,
        };
        echo.set_params(Some(delay_ms), Some(feedback), Some(wet));
        echo
    }

    pub fn set_params(&mut self, delay_ms: Option<f64>, feedback: Option<f32>, wet: Option<f32>) {
        if let Some(d) = delay_ms {
            self.delay_ms = d.max(10.0);
        }
        if let Some(f) = feedback {
            self.feedback = f.clamp(0.0, 0.95);
        }
        if let Some(w) = wet {
            self.wet = w.clamp(0.0, 1.0);
        }

        let delay_frames = ((self.sample_rate as f64 * self.delay_ms / 1000.0) as usize).max(1);
        if delay_frames * self.channels != self.buf.len() {
            self.buf = vec![0.0; delay_frames * self.channels];
            self.idx = 0;
        }
    }

    pub fn process(&mut self, buf: &mut [f32]) {
        if buf.is_empty() {
            return;
        }
        let channels = self.channels;
        let frames = buf.len() / channels;
        let delay_frames = self.buf.len() / channels;
        for frame in 0..frames {
            for ch in 0..channels {
                let i = frame * channels + ch;
                let t = self.idx * channels + ch;
                let x = buf[i];
                let echo = self.buf[t];
                self.buf[t] = x + echo * self.feedback;
                buf[i] = x * (1.0 - self.wet) + echo * self.wet;
            }
            self.idx = (self.idx + 1) % delay_frames;
        }
    }
}

/// The processing chain owned by an engine session.
pub struct DspChain {
    pub eq: Equalizer,
    pub echo: Option<Echo>,
}

impl DspChain {
    pub fn new(sample_rate: u32, channels: usize, gains_db: [f64; 10]) -> Self {
        Self {
            eq: Equalizer::with_gains(sample_rate, channels, gains_db),
            echo: None,
        }
    }

    pub fn process(&mut self, buf: &mut [f32]) {
        self.eq.process(buf);
        if let Some(echo) = &mut self.echo {
            echo.process(buf);
        }
    }
}
