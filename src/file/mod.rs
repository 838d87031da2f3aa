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


//! File naming, staging and commit
//!
//! - `paths` - `${placeholder}` file name templates and sanitization
//! - `staging` - private temp files removed on drop
//! - `destination` - the `Destination` trait, `commit`, and `LocalDirectory`

pub mod destination;
pub mod paths;
pub mod staging;

// Re-export commonly used types
pub use destination::{commit, Destination, DestinationEntry, LocalDirectory, Overwrite, Payload};
pub use paths::{sanitize_filename, FileNameTemplate, NameContext};
pub use staging::{StagedFile, StagingArea};
