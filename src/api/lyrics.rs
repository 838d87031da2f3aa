// TuneVault - Music Library Downloader
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Lyric block decoding and `.lrc` composition
//!
//! The backend returns lyric blocks in two line formats mixed freely:
//!
//! - legacy LRC lines such as `[00:12.34]text`, kept as they are
//! - JSON lines such as `{"t":65000,"c":[{"tx":"hello "},{"tx":"world"}]}`,
//!   rendered to `[01:05.00]hello world`
//!
//! A JSON-looking line that fails to parse is kept verbatim.

use crate::api::models::Track;
use serde::Deserialize;
use std::fmt::Write as _;

/// One word-timed JSON lyric line
#[derive(Debug, Deserialize)]
struct TimedLine {
    /// Start offset in milliseconds
    t: u64,
    #[serde(default)]
    c: Vec<TimedChunk>,
}

#[derive(Debug, Deserialize)]
struct TimedChunk {
    #[serde(default)]
    tx: String,
}

/// Render a millisecond offset as an LRC time code `[mm:ss.cc]`
pub fn format_time_code(millis: u64) -> String {
    let minutes = millis / 60_000;
    let seconds = (millis % 60_000) / 1_000;
    let centis = (millis % 1_000) / 10;
    format!("[{minutes:02}:{seconds:02}.{centis:02}]")
}

/// Decode a single line, returning it unchanged unless it is a JSON timed line
pub fn decode_line(line: &str) -> String {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return line.to_string();
    }

    match serde_json::from_str::<TimedLine>(trimmed) {
        Ok(timed) => {
            let mut rendered = format_time_code(timed.t);
            for chunk in &timed.c {
                rendered.push_str(&chunk.tx);
            }
            rendered
        }
        Err(_) => line.to_string(),
    }
}

/// Decode a whole lyric block
///
/// Lines are decoded independently, joined with `\n`, and blank lines at the
/// start and end of the block are dropped. Interior blank lines are kept.
pub fn decode_block(raw: &str) -> String {
    let lines: Vec<String> = raw
        .lines()
        .map(|line| decode_line(line.trim_end_matches('\r')))
        .collect();

    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());

    match (first, last) {
        (Some(first), Some(last)) => lines[first..=last].join("\n"),
        _ => String::new(),
    }
}

/// The six decoded lyric blocks of a track; any of them may be empty
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LyricBundle {
    pub primary: String,
    pub translated: String,
    pub romanized: String,
    pub enhanced_primary: String,
    pub enhanced_translated: String,
    pub enhanced_romanized: String,
}

/// Which blocks end up in a composed lyric file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LyricSelection {
    pub translated: bool,
    pub romanized: bool,
    pub prefer_enhanced: bool,
}

impl LyricBundle {
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
            && self.translated.is_empty()
            && self.romanized.is_empty()
            && self.enhanced_primary.is_empty()
            && self.enhanced_translated.is_empty()
            && self.enhanced_romanized.is_empty()
    }

    /// Whether there is anything to build a lyric file from
    pub fn has_primary(&self) -> bool {
        !self.primary.is_empty() || !self.enhanced_primary.is_empty()
    }

    /// Compose a lyric file for `track`
    ///
    /// Returns `None` when neither primary block has content. The header
    /// carries `[ti:]`, `[ar:]` and `[al:]`, followed by the primary body and
    /// the translated and romanized bodies when selected and non-empty.
    pub fn compose(
        &self,
        track: &Track,
        artist_delimiter: &str,
        selection: LyricSelection,
    ) -> Option<String> {
        if !self.has_primary() {
            return None;
        }

        let prefer = selection.prefer_enhanced;
        let mut sections: Vec<&str> = vec![pick(&self.primary, &self.enhanced_primary, prefer)];
        if selection.translated {
            sections.push(pick(&self.translated, &self.enhanced_translated, prefer));
        }
        if selection.romanized {
            sections.push(pick(&self.romanized, &self.enhanced_romanized, prefer));
        }

        let mut text = String::new();
        let _ = writeln!(text, "[ti:{}]", track.title);
        let _ = writeln!(text, "[ar:{}]", track.joined_artists(artist_delimiter));
        let _ = writeln!(text, "[al:{}]", track.album.name);
        for body in sections.into_iter().filter(|s| !s.is_empty()) {
            text.push_str(body);
            text.push('\n');
        }

        Some(text)
    }
}

/// Enhanced block when preferred and present, else the plain block, else
/// whatever is available
fn pick<'a>(plain: &'a str, enhanced: &'a str, prefer_enhanced: bool) -> &'a str {
    if prefer_enhanced && !enhanced.is_empty() {
        enhanced
    } else if !plain.is_empty() {
        plain
    } else {
        enhanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{Album, Artist};

    fn track() -> Track {
        Track {
            id: 7,
            title: "Song".to_string(),
            artists: vec![
                Artist { name: "A".to_string(), id: 1 },
                Artist { name: "B".to_string(), id: 2 },
            ],
            album: Album {
                name: "Record".to_string(),
                id: 3,
                cover_url: None,
            },
        }
    }

    #[test]
    fn test_json_line_renders_time_code() {
        assert_eq!(
            decode_line(r#"{"t":65000,"c":[{"tx":"hello "},{"tx":"world"}]}"#),
            "[01:05.00]hello world"
        );
    }

    #[test]
    fn test_legacy_line_passes_through() {
        assert_eq!(decode_line("[00:12.34]text"), "[00:12.34]text");
    }

    #[test]
    fn test_malformed_json_line_is_kept() {
        assert_eq!(decode_line("{not json"), "{not json");
        assert_eq!(decode_line(r#"{"c":[]}"#), r#"{"c":[]}"#);
    }

    #[test]
    fn test_time_code_rounding() {
        assert_eq!(format_time_code(0), "[00:00.00]");
        assert_eq!(format_time_code(1_239), "[00:01.23]");
        assert_eq!(format_time_code(61 * 60_000), "[61:00.00]");
    }

    #[test]
    fn test_block_trims_outer_blank_lines() {
        let raw = "\n\n{\"t\":1000,\"c\":[{\"tx\":\"a\"}]}\n\n[00:02.00]b\n  \n";
        assert_eq!(decode_block(raw), "[00:01.00]a\n\n[00:02.00]b");
        assert_eq!(decode_block("\n \n"), "");
    }

    #[test]
    fn test_compose_requires_primary() {
        let bundle = LyricBundle {
            translated: "[00:01.00]x".to_string(),
            ..Default::default()
        };
        assert!(bundle
            .compose(&track(), ", ", LyricSelection::default())
            .is_none());
    }

    #[test]
    fn test_compose_header_and_selection() {
        let bundle = LyricBundle {
            primary: "[00:01.00]plain".to_string(),
            enhanced_primary: "[00:01.00]rich".to_string(),
            translated: "[00:01.00]trans".to_string(),
            romanized: "[00:01.00]roma".to_string(),
            ..Default::default()
        };
        let selection = LyricSelection {
            translated: true,
            romanized: false,
            prefer_enhanced: true,
        };

        let text = bundle.compose(&track(), ", ", selection).unwrap();
        assert_eq!(
            text,
            "[ti:Song]\n[ar:A, B]\n[al:Record]\n[00:01.00]rich\n[00:01.00]trans\n"
        );
    }

    #[test]
    fn test_compose_falls_back_to_plain() {
        let bundle = LyricBundle {
            primary: "[00:01.00]plain".to_string(),
            ..Default::default()
        };
        let selection = LyricSelection {
            prefer_enhanced: true,
            ..Default::default()
        };
        let text = bundle.compose(&track(), "/", selection).unwrap();
        assert!(text.ends_with("[00:01.00]plain\n"));
        assert!(text.contains("[ar:A/B]"));
    }
}
