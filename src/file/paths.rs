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


//! File naming templates
//!
//! A template is plain text with `${placeholder}` markers:
//!
//! | placeholder  | value                                  |
//! |--------------|----------------------------------------|
//! | `${level}`   | quality label (`[HQ]`, ...), may be "" |
//! | `${name}`    | track title                            |
//! | `${id}`      | track id                               |
//! | `${artists}` | artist names joined by the delimiter   |
//! | `${album}`   | album name                             |
//! | `${albumId}` | album id                               |
//!
//! Text coming from the backend is sanitized before substitution; the
//! template's own literal text is kept as written. Unknown placeholders are
//! left untouched.

use crate::api::models::Track;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Template used when the caller does not supply one
pub const DEFAULT_TEMPLATE: &str = "${name} - ${artists}";

/// Characters that are invalid in file names on at least one platform
const UNSAFE_CHARS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Replacement for unsafe characters
const REPLACEMENT: char = '_';

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\$\{([A-Za-z]+)\}").expect("placeholder pattern is valid");
}

/// Values a template is rendered from
#[derive(Debug, Clone, Copy)]
pub struct NameContext<'a> {
    pub track: &'a Track,
    /// Quality label, empty when unknown
    pub level_label: &'a str,
    pub artist_delimiter: &'a str,
}

/// File base-name template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileNameTemplate {
    template: String,
}

impl Default for FileNameTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

impl FileNameTemplate {
    pub fn new<S: Into<String>>(template: S) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Render the file base name (no extension)
    ///
    /// The whole result is sanitized, so neither the artist delimiter nor
    /// literal template text can introduce a path separator. Falls back to
    /// the track id if the result would be empty.
    pub fn render(&self, ctx: &NameContext<'_>) -> String {
        let track = ctx.track;
        let rendered = PLACEHOLDER.replace_all(&self.template, |caps: &regex::Captures<'_>| {
            match &caps[1] {
                "level" => ctx.level_label.to_string(),
                "name" => track.title.clone(),
                "id" => track.id.to_string(),
                "artists" => track.joined_artists(ctx.artist_delimiter),
                "album" => track.album.name.clone(),
                "albumId" => track.album.id.to_string(),
                _ => caps[0].to_string(),
            }
        });

        let sanitized = sanitize_filename(&rendered);
        let name = sanitized.trim().trim_end_matches('.').trim_end();
        if name.is_empty() {
            track.id.to_string()
        } else {
            name.to_string()
        }
    }
}

/// Replace characters that are unsafe in file names with `_`
///
/// Control characters are replaced as well.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if UNSAFE_CHARS.contains(&c) || c.is_control() {
                REPLACEMENT
            } else {
                c
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{Album, Artist};

    fn track(title: &str, artists: &[&str]) -> Track {
        Track {
            id: 1001,
            title: title.to_string(),
            artists: artists
                .iter()
                .enumerate()
                .map(|(i, name)| Artist {
                    name: name.to_string(),
                    id: i as i64,
                })
                .collect(),
            album: Album {
                name: "Best: Of".to_string(),
                id: 77,
                cover_url: None,
            },
        }
    }

    #[test]
    fn test_render_level_name_artists() {
        let track = track("AC/DC Song", &["A", "B"]);
        let ctx = NameContext {
            track: &track,
            level_label: "[HQ]",
            artist_delimiter: ", ",
        };
        let template = FileNameTemplate::new("${level}${name} - ${artists}");
        assert_eq!(template.render(&ctx), "[HQ]AC_DC Song - A, B");
    }

    #[test]
    fn test_render_all_placeholders() {
        let track = track("Song", &["A/B"]);
        let ctx = NameContext {
            track: &track,
            level_label: "",
            artist_delimiter: "; ",
        };
        let template = FileNameTemplate::new("${albumId}-${album}-${id}-${artists}-${unknown}");
        assert_eq!(template.render(&ctx), "77-Best_ Of-1001-A_B-${unknown}");
    }

    #[test]
    fn test_unsafe_delimiter_and_literal_text_are_sanitized() {
        let track = track("Song", &["A", "B"]);
        let ctx = NameContext {
            track: &track,
            level_label: "",
            artist_delimiter: "/",
        };
        assert_eq!(FileNameTemplate::default().render(&ctx), "Song - A_B");

        let template = FileNameTemplate::new("mix/${name}: ${id}");
        assert_eq!(template.render(&ctx), "mix_Song_ 1001");
    }

    #[test]
    fn test_empty_render_falls_back_to_id() {
        let track = track("", &[]);
        let ctx = NameContext {
            track: &track,
            level_label: "",
            artist_delimiter: ", ",
        };
        assert_eq!(FileNameTemplate::new("${level}${name}").render(&ctx), "1001");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename(r#"a\b/c:d*e?f"g<h>i|j"#), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_filename("tab\there"), "tab_here");
        assert_eq!(sanitize_filename("ünïcödé"), "ünïcödé");
    }

    #[test]
    fn test_template_serde_is_plain_string() {
        let template: FileNameTemplate = serde_json::from_str(r#""${id}""#).unwrap();
        assert_eq!(template.as_str(), "${id}");
    }
}
