//! Smart shuffle with artist spacing.
//!
//! The upcoming queue is a random permutation of the cache, repaired so two
//! tracks by the same artist never sit within `artist_spacing` of each other
//! (best effort: when no later different-artist track exists, the clump
//! stays). A replay queue overrides everything for forced-next plays, and a
//! bounded history keeps recent tracks from coming back too soon.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::prelude::*;

use crate::library::Track;

pub struct SmartShuffler {
    pub cache: Vec<Arc<Track>>,
    history_size: usize,
    artist_spacing: usize,
    /// Served paths, oldest first, truncated to `history_size`.
    pub history: Vec<PathBuf>,
    upcoming: VecDeque<Arc<Track>>,
    replay_queue: VecDeque<Arc<Track>>,
}

impl SmartShuffler {
    pub fn new(cache: Vec<Arc<Track>>, history_size: usize, artist_spacing: usize) -> Self {
        Self {
            cache,
            history_size,
            artist_spacing,
            history: Vec::new(),
            upcoming: VecDeque::new(),
            replay_queue: VecDeque::new(),
        }
    }

    pub fn find(&self, path: &Path) -> Option<Arc<Track>> {
        self.cache.iter().find(|t| t.path == path).cloned()
    }

    /// Queue a track to play next, bypassing shuffle and spacing rules.
    pub fn enqueue_replay(&mut self, track: Arc<Track>) {
        self.replay_queue.push_front(track);
    }

    pub fn has_replay(&self) -> bool {
        !self.replay_queue.is_empty()
    }

    pub fn clear_replay(&mut self) {
        self.replay_queue.clear();
    }

    /// Rebuild the upcoming queue: shuffle, then repair artist clumps.
    pub fn refill_upcoming(&mut self) {
        let mut songs = self.cache.clone();
        songs.shuffle(&mut rand::rng());

        for i in 0..songs.len() {
            for j in 1..=self.artist_spacing {
                if i + j < songs.len() && songs[i].artist == songs[i + j].artist {
                    // Swap the offender with the nearest later track by a
                    // different artist, if one exists.
                    for k in (i + self.artist_spacing + 1)..songs.len() {
                        if songs[k].artist != songs[i].artist {
                            songs.swap(i + j, k);
                            break;
                        }
                    }
                }
            }
        }
        self.upcoming = songs.into();
    }

    /// Next track to play.
    ///
    /// Replay queue first; otherwise the upcoming queue is drained past
    /// anything still in history (refilled once when empty). Falls back to
    /// a uniform pick when the whole cache is inside the history window.
    pub fn get_unique_song(&mut self) -> Option<Arc<Track>> {
        if let Some(track) = self.replay_queue.pop_front() {
            self.remember(&track.path);
            return Some(track);
        }

        for _ in 0..2 {
            if self.upcoming.is_empty() {
                self.refill_upcoming();
            }
            if let Some(pos) = self
                .upcoming
                .iter()
                .position(|t| !self.history.contains(&t.path))
            {
                // Keep the skipped prefix at the back so it resurfaces once
                // its history entries age out.
                for _ in 0..pos {
                    let skipped = self.upcoming.pop_front().expect("prefix exists");
                    self.upcoming.push_back(skipped);
                }
                let track = self.upcoming.pop_front().expect("position exists");
                self.remember(&track.path);
                return Some(track);
            }
            self.upcoming.clear();
        }

        let track = self.cache.choose(&mut rand::rng()).cloned();
        if let Some(t) = &track {
            self.remember(&t.path);
        }
        track
    }

    fn remember(&mut self, path: &Path) {
        self.history.push(path.to_path_buf());
        if self.history.len() > self.history_size {
            let overflow = self.history.len() - self.history_size;
            self.history.drain(..overflow);
        }
    }

    /// Snapshot of the repaired upcoming queue, for tests and debugging.
    pub fn upcoming_artists(&self) -> Vec<&str> {
        self.upcoming.iter().map(|t| t.artist.as_str()).collect()
    }
}
