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


//! Audio container detection and tag embedding
//!
//! ## decoder
//! Signature-based container detection (`AudioFormat`, `detect_format`).
//!
//! ## metadata
//! `TagWriter` trait and the lofty-backed `LoftyTagWriter`.

pub mod decoder;
pub mod metadata;

// Re-export commonly used types for convenience
pub use decoder::{detect_format, detect_format_from_bytes, AudioFormat};
pub use metadata::{LoftyTagWriter, TagWriter, TrackTags};
