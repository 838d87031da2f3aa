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


//! Music service API client
//!
//! Request signing, the encrypted transport, and decoding of the backend's
//! nested JSON into domain models.
//!
//! - `request` - typed request bodies and the signer
//! - `response` - envelope check and typed extraction
//! - `lyrics` - mixed-format lyric decoding and `.lrc` composition
//! - `client` - HTTP transport and the `TrackSource` seam

pub mod client;
pub mod lyrics;
pub mod models;
pub mod request;
pub mod response;

// Re-export commonly used types
pub use client::{AudioStream, ClientConfig, Credentials, MusicClient, TrackSource};
pub use lyrics::{LyricBundle, LyricSelection};
pub use models::{Album, Artist, QualityLevel, StreamResolution, Track, TrackKey, TrackList, UserProfile};
pub use response::ResponseFormat;
