//! Playback orchestration: shuffle, navigation, persisted state.

mod orchestrator;
mod shuffle;
mod state;

pub use orchestrator::{PAUSE_MARKER, Player, REPEAT_MARKER, STATE_FILE};
pub use shuffle::SmartShuffler;
pub use state::{
    ActionReply, PlayerAction, PlayerControl, SavedState, StatusSnapshot, load_state, save_state,
};
