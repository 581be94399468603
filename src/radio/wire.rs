//! Status document wire format.
//!
//! The host's `/` endpoint returns a flat concatenation of pseudo-XML tags
//! (no enclosing root); clients extract fields by tag. The title field packs
//! `ARTIST![]!TITLE`, with `***[]*Paused` appended while the host is paused.

use std::sync::OnceLock;

use regex::Regex;

use crate::player::StatusSnapshot;

/// Separator between artist and title inside `<title>`.
pub const TITLE_SEP: &str = "![]!";
/// Fragment appended to the title while the host is paused.
pub const PAUSED_FRAGMENT: &str = "***[]*Paused";

/// Everything a client learns from one status poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerStatus {
    /// Full title field, `ARTIST![]!TITLE` plus any fragments.
    pub title: String,
    pub paused: bool,
    pub repeat: bool,
    pub eq: Vec<(u32, f64)>,
    pub volume: f64,
    /// Seconds into the song (host-side position).
    pub location: f64,
    pub duration: f64,
    pub song_url: String,
    /// Host wall-clock seconds when the track was buffered.
    pub buffered_at: f64,
}

impl PeerStatus {
    /// Split the packed title into `(artist, title)`.
    pub fn artist_title(&self) -> (String, String) {
        match self.title.split_once(TITLE_SEP) {
            Some((artist, title)) => (artist.to_string(), title.to_string()),
            None => (String::new(), self.title.clone()),
        }
    }
}

/// Python-style booleans used on the wire.
fn render_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

/// Render the host status body.
///
/// `song_url` is the absolute URL of `/song` on this host; `position` and
/// `duration` come from the live engine rather than the snapshot's cached
/// values when the host has fresher numbers.
pub fn render_status(status: &StatusSnapshot, song_url: &str, duration: f64) -> String {
    let mut title = if status.title.is_empty() {
        String::new()
    } else {
        format!("{}{}{}", status.artist, TITLE_SEP, status.title)
    };
    if status.paused && !title.is_empty() {
        title.push_str(PAUSED_FRAGMENT);
    }

    let eq = status
        .eq
        .iter()
        .map(|(freq, gain)| format!("{freq}:{gain}"))
        .collect::<Vec<_>>()
        .join(",");

    format!(
        "<title>{title}</title>\
         <paused>{}</paused>\
         <repeat>{}</repeat>\
         <eq>{eq}</eq>\
         <volume>{}</volume>\
         <location>{}</location>\
         <duration>{duration}</duration>\
         <url>{song_url}</url>\
         <buffered_at>{}</buffered_at>",
        render_bool(status.paused),
        render_bool(status.repeat),
        status.volume,
        status.position,
        status.buffered_at,
    )
}

fn tag_regex(tag: &str) -> Regex {
    Regex::new(&format!(r"<{tag}>(.*?)</{tag}>")).expect("static tag regex")
}

fn extract<'a>(body: &'a str, re: &Regex) -> Option<&'a str> {
    re.captures(body).map(|c| c.get(1).map_or("", |m| m.as_str()))
}

struct TagSet {
    title: Regex,
    paused: Regex,
    repeat: Regex,
    eq: Regex,
    volume: Regex,
    location: Regex,
    duration: Regex,
    url: Regex,
    buffered_at: Regex,
}

fn tags() -> &'static TagSet {
    static TAGS: OnceLock<TagSet> = OnceLock::new();
    TAGS.get_or_init(|| TagSet {
        title: tag_regex("title"),
        paused: tag_regex("paused"),
        repeat: tag_regex("repeat"),
        eq: tag_regex("eq"),
        volume: tag_regex("volume"),
        location: tag_regex("location"),
        duration: tag_regex("duration"),
        url: tag_regex("url"),
        buffered_at: tag_regex("buffered_at"),
    })
}

fn parse_f64(value: Option<&str>, default: f64) -> f64 {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse a status body. Missing tags take defaults; malformed EQ pairs are
/// skipped individually so one bad band never poisons the rest.
pub fn parse_status(body: &str) -> PeerStatus {
    let t = tags();

    let eq = extract(body, &t.eq)
        .unwrap_or("")
        .split(',')
        .filter_map(|pair| {
            let (freq, gain) = pair.split_once(':')?;
            match (freq.trim().parse(), gain.trim().parse()) {
                (Ok(f), Ok(g)) => Some((f, g)),
                _ => {
                    tracing::debug!(target: "radio::wire", pair, "skipping malformed eq band");
                    None
                }
            }
        })
        .collect();

    PeerStatus {
        title: extract(body, &t.title).unwrap_or("Unknown Song").to_string(),
        paused: extract(body, &t.paused) == Some("True"),
        repeat: extract(body, &t.repeat) == Some("True"),
        eq,
        volume: parse_f64(extract(body, &t.volume), 1.0),
        location: parse_f64(extract(body, &t.location), 0.0),
        duration: parse_f64(extract(body, &t.duration), 0.0),
        song_url: extract(body, &t.url).unwrap_or("/song").to_string(),
        buffered_at: parse_f64(extract(body, &t.buffered_at), 0.0),
    }
}

/// Extract `(title, location)` from a status body, the scanner's cheap path.
pub fn parse_probe(body: &str) -> Option<(String, String)> {
    let t = tags();
    let title = extract(body, &t.title)?.to_string();
    let location = extract(body, &t.location).unwrap_or("0").to_string();
    Some((title, location))
}
