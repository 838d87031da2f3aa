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


//! Domain models decoded from API responses
//!
//! Tracks are immutable once decoded. Two notions of equality are supported:
//! structural (`PartialEq`, for diffing displayed lists) and identity
//! (`TrackKey` / `Track::same_identity`, for selection sets and the
//! one-task-per-track rule).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Credited artist
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artist {
    pub name: String,
    pub id: i64,
}

/// Album a track belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Album {
    pub name: String,
    pub id: i64,
    pub cover_url: Option<String>,
}

/// A single song's identity and display metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub title: String,
    /// Credit order; the same artist may appear more than once
    pub artists: Vec<Artist>,
    pub album: Album,
}

impl Track {
    /// Identity comparison (ignores display metadata)
    pub fn same_identity(&self, other: &Track) -> bool {
        self.id == other.id
    }

    /// Identity key for sets and maps
    pub fn key(&self) -> TrackKey {
        TrackKey(self.id)
    }

    /// Artist names in credit order
    pub fn artist_names(&self) -> Vec<&str> {
        self.artists.iter().map(|a| a.name.as_str()).collect()
    }

    /// Artist names joined with `delimiter`
    pub fn joined_artists(&self, delimiter: &str) -> String {
        self.artist_names().join(delimiter)
    }
}

/// Identity of a track, equal when the ids are equal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackKey(pub i64);

impl From<&Track> for TrackKey {
    fn from(track: &Track) -> Self {
        track.key()
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stream quality levels offered by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    #[default]
    Standard,
    #[serde(rename = "exhigh")]
    High,
    Lossless,
    #[serde(rename = "hires")]
    HiRes,
}

impl QualityLevel {
    /// Name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::High => "exhigh",
            Self::Lossless => "lossless",
            Self::HiRes => "hires",
        }
    }

    /// Parse a wire name; `None` for values this client does not know
    pub fn from_wire(level: &str) -> Option<Self> {
        match level {
            "standard" => Some(Self::Standard),
            "exhigh" => Some(Self::High),
            "lossless" => Some(Self::Lossless),
            "hires" => Some(Self::HiRes),
            _ => None,
        }
    }

    /// Parse a wire name, treating unknown values as standard
    pub fn from_wire_lenient(level: &str) -> Self {
        Self::from_wire(level).unwrap_or_default()
    }

    /// Label substituted for `${level}` in file names
    pub fn label(&self) -> &'static str {
        match self {
            Self::Standard => "[LQ]",
            Self::High => "[HQ]",
            Self::Lossless => "[SQ]",
            Self::HiRes => "[HR]",
        }
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved audio stream for a track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamResolution {
    pub url: String,
    /// Normalized level (unknown values become `Standard`)
    pub level: QualityLevel,
    /// Level string exactly as returned by the backend
    pub raw_level: String,
}

impl StreamResolution {
    pub fn new(url: String, raw_level: String) -> Self {
        Self {
            url,
            level: QualityLevel::from_wire_lenient(&raw_level),
            raw_level,
        }
    }

    /// File-name label; empty when the backend level is not recognized
    pub fn quality_label(&self) -> &'static str {
        QualityLevel::from_wire(&self.raw_level)
            .map(|level| level.label())
            .unwrap_or("")
    }
}

/// Playlist or album listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackList {
    pub id: i64,
    pub name: String,
    pub cover_url: Option<String>,
    pub tracks: Vec<Track>,
}

/// Signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub avatar_url: Option<String>,
}
