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


//! Container detection by file signature
//!
//! The backend does not say which container a stream URL serves, so the
//! extension of the committed file is chosen from the first bytes of the
//! downloaded data.
//!
//! | signature                         | format |
//! |-----------------------------------|--------|
//! | `ID3`, or MPEG frame sync         | mp3    |
//! | ADTS sync (`FF F1` / `FF F9`)     | aac    |
//! | `RIFF` .... `WAVE`                | wav    |
//! | `fLaC`                            | flac   |
//! | `OggS`                            | ogg    |
//! | .... `ftyp`                       | m4a    |
//!
//! Anything else is `Unknown`, which is not an error.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Number of leading bytes the detector looks at
pub const SIGNATURE_LEN: usize = 12;

/// Audio container of a downloaded stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Aac,
    Wav,
    Flac,
    Ogg,
    M4a,
    Unknown,
}

impl AudioFormat {
    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::Wav => "wav",
            Self::Flac => "flac",
            Self::Ogg => "ogg",
            Self::M4a => "m4a",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" => Self::Mp3,
            "aac" => Self::Aac,
            "wav" => Self::Wav,
            "flac" => Self::Flac,
            "ogg" => Self::Ogg,
            "m4a" | "mp4" => Self::M4a,
            _ => Self::Unknown,
        }
    }

    /// Whether tags can be written into this container
    pub fn is_taggable(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Detect the container from leading bytes
///
/// ADTS is checked before the generic MPEG frame sync because both start
/// with `0xFFF`; ADTS has the layer bits set to zero.
pub fn detect_format_from_bytes(bytes: &[u8]) -> AudioFormat {
    if bytes.len() >= 3 && &bytes[0..3] == b"ID3" {
        return AudioFormat::Mp3;
    }

    if bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xF6) == 0xF0 {
        return AudioFormat::Aac;
    }

    // MPEG audio frame sync (11 bits set)
    if bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0 {
        return AudioFormat::Mp3;
    }

    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        return AudioFormat::Wav;
    }

    if bytes.len() >= 4 && &bytes[0..4] == b"fLaC" {
        return AudioFormat::Flac;
    }

    if bytes.len() >= 4 && &bytes[0..4] == b"OggS" {
        return AudioFormat::Ogg;
    }

    if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
        return AudioFormat::M4a;
    }

    AudioFormat::Unknown
}

/// Detect the container of a file on disk
pub async fn detect_format(path: &Path) -> Result<AudioFormat> {
    let mut file = File::open(path).await?;
    let mut header = [0u8; SIGNATURE_LEN];
    let mut filled = 0;

    // Short files are fine; read until EOF or the buffer is full
    while filled < SIGNATURE_LEN {
        let n = file.read(&mut header[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    Ok(detect_format_from_bytes(&header[..filled]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_detect_id3() {
        let header = b"ID3\x04\x00\x00\x00\x00\x00\x00\x00\x00";
        assert_eq!(detect_format_from_bytes(header), AudioFormat::Mp3);
    }

    #[test]
    fn test_detect_flac() {
        assert_eq!(detect_format_from_bytes(b"fLaC\x00\x00\x00\x22"), AudioFormat::Flac);
    }

    #[test]
    fn test_detect_empty_is_unknown() {
        assert_eq!(detect_format_from_bytes(&[]), AudioFormat::Unknown);
        assert_eq!(detect_format_from_bytes(b"hello world!"), AudioFormat::Unknown);
    }

    #[test]
    fn test_adts_before_frame_sync() {
        assert_eq!(detect_format_from_bytes(b"\xFF\xF1\x50\x80"), AudioFormat::Aac);
        assert_eq!(detect_format_from_bytes(b"\xFF\xF9\x50\x80"), AudioFormat::Aac);
        assert_eq!(detect_format_from_bytes(b"\xFF\xFB\x90\x00"), AudioFormat::Mp3);
        assert_eq!(detect_format_from_bytes(b"\xFF\xF3\x90\x00"), AudioFormat::Mp3);
    }

    #[test]
    fn test_detect_containers() {
        assert_eq!(detect_format_from_bytes(b"RIFF\x24\x00\x00\x00WAVE"), AudioFormat::Wav);
        assert_eq!(detect_format_from_bytes(b"OggS\x00\x02"), AudioFormat::Ogg);
        assert_eq!(detect_format_from_bytes(b"\x00\x00\x00\x20ftypM4A "), AudioFormat::M4a);
        assert_eq!(detect_format_from_bytes(b"RIFF\x24\x00\x00\x00AVI "), AudioFormat::Unknown);
    }

    #[tokio::test]
    async fn test_detect_short_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short");
        tokio::fs::write(&path, b"fLaC").await.unwrap();
        assert_eq!(detect_format(&path).await.unwrap(), AudioFormat::Flac);
    }
}
