//! Playback state types, the persisted resume document, and the capability
//! surface the radio host talks to.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::library::search::SearchHit;

/// `.musicapp_state.json`: enough to resume where the process left off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedState {
    pub path: PathBuf,
    pub elapsed: f64,
    pub paused: bool,
    pub repeat: bool,
}

/// Write the resume document atomically (temp file + rename).
pub fn save_state(file: &Path, state: &SavedState) -> std::io::Result<()> {
    let json = serde_json::to_string(state)?;
    let tmp = file.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, file)?;
    Ok(())
}

/// Load the resume document; corrupt or missing files start clean.
pub fn load_state(file: &Path) -> Option<SavedState> {
    let content = std::fs::read_to_string(file).ok()?;
    match serde_json::from_str(&content) {
        Ok(state) => Some(state),
        Err(e) => {
            tracing::warn!(target: "player", error = %e,
                "saved state unreadable, starting clean");
            None
        }
    }
}

/// Control verbs accepted over `/action`.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerAction {
    Pause,
    /// Explicit unpause (distinct from toggle).
    Play,
    Skip,
    Previous,
    VolumeUp,
    VolumeDown,
    Repeat,
    PlaySearch(PathBuf),
    /// No-op; the reply carries the current state.
    Status,
}

/// Reply payload for `/action`.
#[derive(Debug, Clone, Serialize)]
pub struct ActionReply {
    pub title: String,
    pub position: f64,
    pub paused: bool,
    pub repeat: bool,
    pub volume: f64,
}

/// Point-in-time view of the player, consumed by the radio host.
#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub artist: String,
    /// Raw title without markers.
    pub title: String,
    /// Title with ` *+*` / ` *=*` markers applied.
    pub display_title: String,
    pub paused: bool,
    pub repeat: bool,
    pub volume: f64,
    pub position: f64,
    pub duration: f64,
    /// `(center_freq_hz, gain_db)` for all bands.
    pub eq: Vec<(u32, f64)>,
    /// File backing `/song`.
    pub song_path: Option<PathBuf>,
    /// Formatted synced lyrics for `/lyrics`; empty when none arrived yet.
    pub lyrics_text: String,
    /// Wall-clock seconds at which the current track was activated.
    pub buffered_at: f64,
}

/// What the radio host needs from the player — nothing more.
///
/// The orchestrator, host and engine otherwise form a diamond; this seam
/// keeps the host ignorant of everything but status and actions.
pub trait PlayerControl: Send + Sync {
    fn status(&self) -> StatusSnapshot;
    fn action(&self, action: PlayerAction) -> ActionReply;
    fn search(&self, query: &str) -> Vec<SearchHit>;
}
