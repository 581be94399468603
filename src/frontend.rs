//! Seam to the external overlay/GUI layer.
//!
//! The overlay itself is out of scope; the core only ever talks to this
//! trait, mirroring the callback quartet the UI wires in. The default
//! implementation just logs, which keeps headless runs and tests honest.

/// Callbacks the player drives as playback progresses.
pub trait Frontend: Send + Sync {
    /// Artist + (marker-decorated) title for the now-playing line.
    fn screen(&self, artist: &str, title: &str);
    /// Elapsed / total seconds, ticked ~10x per second while playing.
    fn duration(&self, elapsed: f64, total: f64);
    /// Show or hide the lyric line.
    fn lyrics(&self, show: bool, line: &str);
    /// Discovered radio peers changed.
    fn peers(&self, ips: &[String]);
}

/// Tracing-backed frontend for headless operation.
pub struct LogFrontend;

impl Frontend for LogFrontend {
    fn screen(&self, artist: &str, title: &str) {
        tracing::debug!(target: "frontend", %artist, %title, "screen");
    }

    fn duration(&self, elapsed: f64, total: f64) {
        tracing::trace!(target: "frontend", elapsed, total, "duration");
    }

    fn lyrics(&self, show: bool, line: &str) {
        if show {
            tracing::debug!(target: "frontend", %line, "lyric");
        }
    }

    fn peers(&self, ips: &[String]) {
        tracing::info!(target: "frontend", ?ips, "radio peers updated");
    }
}
