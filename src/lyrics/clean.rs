//! Title cleaning for lyric lookups and display.
//!
//! Maps raw titles to a canonical `"Artist - Title"`: status suffixes are
//! stripped and reattached, `" - "` segments are disambiguated, and
//! parenthetical / bracketed / piped tails are cut from the track name.

use regex::Regex;
use std::sync::OnceLock;

/// `(needle, replacement)` rules. The needle doubles as a strippable suffix.
pub type ReplaceRule = (&'static str, &'static str);

const DEFAULT_RULES: [ReplaceRule; 2] = [("*=*", " -[Paused]-"), ("*+*", " -[Repeat]-")];

fn split_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?: - |\(|\||\[)").expect("static regex"))
}

pub struct TitleCleaner {
    rules: Vec<ReplaceRule>,
}

impl Default for TitleCleaner {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES.to_vec(),
        }
    }
}

impl TitleCleaner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clean(&self, raw: &str) -> String {
        let mut core = raw.trim().to_string();

        // Strip the first matching suffix rule; reattached below.
        let suffix = self
            .rules
            .iter()
            .find(|(old, _)| core.ends_with(old))
            .map(|(old, _)| *old)
            .unwrap_or("");
        if !suffix.is_empty() {
            core = core[..core.len() - suffix.len()].trim().to_string();
        }

        let parts: Vec<&str> = core
            .split(" - ")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        let (artist, track) = match parts.len() {
            0 => (String::new(), String::new()),
            1 => (String::new(), parts[0].to_string()),
            2 => (parts[0].to_string(), parts[1].to_string()),
            n if parts[0].eq_ignore_ascii_case(parts[n - 1]) => {
                // "Artist - Title - Artist": collapse the echo
                (parts[0].to_string(), parts[1..n - 1].join(" - "))
            }
            3 => {
                // "Context - Artist - Title": drop the leading context
                (parts[1].to_string(), parts[2].to_string())
            }
            _ => (parts[0].to_string(), parts[1..].join(" - ")),
        };

        // Cut "(feat. X)" / "[Remix]" / "| channel" tails from the track.
        let main_title = if track.is_empty() {
            String::new()
        } else {
            let head = split_pattern()
                .splitn(&track, 2)
                .next()
                .unwrap_or("")
                .trim()
                .to_string();
            if head.is_empty() { track } else { head }
        };

        let mut out = [artist.trim(), main_title.trim()]
            .iter()
            .filter(|p| !p.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" - ");
        out.push_str(suffix);

        for (old, new) in &self.rules {
            out = out.replace(old, new);
        }
        out.trim().to_string()
    }

    /// Split a cleaned combination back into `(artist, title)` for a lyric
    /// query. A single segment is all title.
    pub fn artist_title(&self, artist: &str, title: &str) -> (String, String) {
        let combined = if artist.trim().is_empty() {
            self.clean(title)
        } else {
            self.clean(&format!("{artist} - {title}"))
        };
        let mut parts = combined.splitn(2, " - ");
        let first = parts.next().unwrap_or("").trim();
        match parts.next() {
            Some(second) if !first.is_empty() => (first.to_string(), second.trim().to_string()),
            _ if !first.is_empty() => (String::new(), first.to_string()),
            _ => (artist.trim().to_string(), title.trim().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_artist_title_passes_through() {
        let c = TitleCleaner::new();
        assert_eq!(c.clean("Radiohead - Creep"), "Radiohead - Creep");
    }

    #[test]
    fn bare_title_stays_bare() {
        let c = TitleCleaner::new();
        assert_eq!(c.clean("Creep"), "Creep");
    }

    #[test]
    fn parenthetical_tail_is_cut() {
        let c = TitleCleaner::new();
        assert_eq!(
            c.clean("Radiohead - Creep (Acoustic Version)"),
            "Radiohead - Creep"
        );
        assert_eq!(c.clean("Muse - Uprising [Live]"), "Muse - Uprising");
    }

    #[test]
    fn artist_echo_collapses() {
        let c = TitleCleaner::new();
        assert_eq!(c.clean("Muse - Starlight - Muse"), "Muse - Starlight");
        assert_eq!(c.clean("muse - Starlight - MUSE"), "muse - Starlight");
    }

    #[test]
    fn leading_context_is_dropped_for_three_parts() {
        let c = TitleCleaner::new();
        assert_eq!(
            c.clean("Official Channel - Muse - Starlight"),
            "Muse - Starlight"
        );
    }

    #[test]
    fn status_suffix_maps_to_readable_marker() {
        let c = TitleCleaner::new();
        assert_eq!(c.clean("Radiohead - Creep *=*"), "Radiohead - Creep -[Paused]-");
        assert_eq!(c.clean("Radiohead - Creep *+*"), "Radiohead - Creep -[Repeat]-");
    }

    #[test]
    fn track_that_is_only_a_bracket_survives() {
        let c = TitleCleaner::new();
        assert_eq!(c.clean("Artist - (Interlude)"), "Artist - (Interlude)");
    }

    #[test]
    fn lyric_query_split() {
        let c = TitleCleaner::new();
        assert_eq!(
            c.artist_title("Radiohead", "Creep (Remastered)"),
            ("Radiohead".to_string(), "Creep".to_string())
        );
        assert_eq!(
            c.artist_title("", "Creep"),
            (String::new(), "Creep".to_string())
        );
    }
}
