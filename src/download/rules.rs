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


//! Per-batch download rules
//!
//! Supplied by the caller with every batch and never persisted by this
//! crate. The CLI loads them from JSON; any field left out takes its default.

use crate::api::lyrics::LyricSelection;
use crate::api::models::QualityLevel;
use crate::error::{Result, TuneVaultError};
use crate::file::paths::FileNameTemplate;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

/// Default number of tasks running at once within a batch
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

/// Text encoding of the `.lrc` sidecar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextEncoding {
    #[default]
    #[serde(rename = "UTF-8")]
    Utf8,
    #[serde(rename = "UTF-8-BOM")]
    Utf8Bom,
    #[serde(rename = "UTF-16LE")]
    Utf16Le,
    #[serde(rename = "UTF-16BE")]
    Utf16Be,
}

impl TextEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Utf8Bom => "UTF-8-BOM",
            Self::Utf16Le => "UTF-16LE",
            Self::Utf16Be => "UTF-16BE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Some(Self::Utf8),
            "UTF-8-BOM" | "UTF8-BOM" => Some(Self::Utf8Bom),
            "UTF-16LE" | "UTF16LE" => Some(Self::Utf16Le),
            "UTF-16BE" | "UTF16BE" => Some(Self::Utf16Be),
            _ => None,
        }
    }

    /// Encode `text`; everything except plain UTF-8 starts with a BOM
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::Utf8Bom => {
                let mut bytes = vec![0xEF, 0xBB, 0xBF];
                bytes.extend_from_slice(text.as_bytes());
                bytes
            }
            Self::Utf16Le => {
                let mut bytes = vec![0xFF, 0xFE];
                bytes.extend(text.encode_utf16().flat_map(u16::to_le_bytes));
                bytes
            }
            Self::Utf16Be => {
                let mut bytes = vec![0xFE, 0xFF];
                bytes.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
                bytes
            }
        }
    }
}

impl std::str::FromStr for TextEncoding {
    type Err = TuneVaultError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
            .ok_or_else(|| TuneVaultError::invalid_input(format!("Unknown text encoding: {}", s)))
    }
}

/// How a batch is downloaded, named and saved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadRules {
    /// Write a `.lrc` sidecar next to the audio file
    pub save_lyrics_file: bool,
    pub save_translated_lyrics: bool,
    pub save_romanized_lyrics: bool,
    /// Use word-timed lyric blocks when the backend has them
    pub prefer_enhanced_lyrics: bool,
    pub file_name_template: FileNameTemplate,
    pub artist_delimiter: String,
    pub text_encoding: TextEncoding,
    pub max_concurrency: usize,
    pub quality: QualityLevel,
}

impl Default for DownloadRules {
    fn default() -> Self {
        Self {
            save_lyrics_file: true,
            save_translated_lyrics: false,
            save_romanized_lyrics: false,
            prefer_enhanced_lyrics: false,
            file_name_template: FileNameTemplate::default(),
            artist_delimiter: ", ".to_string(),
            text_encoding: TextEncoding::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            quality: QualityLevel::default(),
        }
    }
}

impl DownloadRules {
    /// Reject rules no batch can run with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(TuneVaultError::invalid_input(
                "max_concurrency must be at least 1",
            ));
        }
        if self.max_concurrency > Semaphore::MAX_PERMITS {
            return Err(TuneVaultError::invalid_input(format!(
                "max_concurrency must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.file_name_template.as_str().trim().is_empty() {
            return Err(TuneVaultError::invalid_input("file_name_template is empty"));
        }
        Ok(())
    }

    pub fn lyric_selection(&self) -> LyricSelection {
        LyricSelection {
            translated: self.save_translated_lyrics,
            romanized: self.save_romanized_lyrics,
            prefer_enhanced: self.prefer_enhanced_lyrics,
        }
    }
}
