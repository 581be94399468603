//! Configuration: `config.toml` in the data directory.
//!
//! Loading is lenient — a missing or unparseable file yields defaults with
//! a logged warning, so a bad edit never bricks startup. Saving writes a
//! temp file and renames over the real one.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub library: LibraryConfig,
    pub audio: AudioConfig,
    pub shuffle: ShuffleConfig,
    pub radio: RadioConfig,
}

/// Library scan settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Directories swept for audio files.
    pub paths: Vec<PathBuf>,
}

/// Engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Startup volume (0.0 - 1.0).
    pub volume: f64,
    /// Bypass EQ/echo in the callback for minimum latency.
    pub gaming_mode: bool,
    /// Saved EQ curve, low band to high.
    pub eq_gains: [f64; 10],
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            volume: 0.1,
            gaming_mode: false,
            eq_gains: [0.0; 10],
        }
    }
}

/// Shuffler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuffleConfig {
    /// Tracks remembered before one may repeat.
    pub history_size: usize,
    /// Minimum distance between same-artist tracks.
    pub artist_spacing: usize,
}

impl Default for ShuffleConfig {
    fn default() -> Self {
        Self {
            history_size: 50,
            artist_spacing: 2,
        }
    }
}

/// Radio host + client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub port: u16,
    /// Adopt a host's EQ and volume while tuned in.
    pub accept_host_eq: bool,
    /// Seconds between full /24 sweeps.
    pub scan_interval_secs: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            accept_host_eq: true,
            scan_interval_secs: 60,
        }
    }
}

/// Load configuration, falling back to defaults on any failure.
pub fn load(data_dir: &Path) -> Config {
    let path = data_dir.join(CONFIG_FILE);
    if !path.exists() {
        tracing::info!(target: "config", path = %path.display(), "no config file, using defaults");
        return Config::default();
    }
    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!(target: "config", path = %path.display(), "config loaded");
                config
            }
            Err(e) => {
                tracing::error!(target: "config", error = %e, "config unparseable, using defaults");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!(target: "config", error = %e, "config unreadable, using defaults");
            Config::default()
        }
    }
}

/// Save configuration atomically.
pub fn save(data_dir: &Path, config: &Config) -> Result<()> {
    let path = data_dir.join(CONFIG_FILE);
    let contents = toml::to_string_pretty(config)?;
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}
