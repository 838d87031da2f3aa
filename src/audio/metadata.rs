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


//! Tag embedding
//!
//! Only five things are ever written: title, artist, album, unsynchronized
//! lyrics and the front cover. Existing tags of the primary tag type are
//! kept and updated in place; other fields are left alone.
//!
//! Files are opened by content rather than extension because staged files
//! carry no extension.

use crate::audio::decoder::AudioFormat;
use crate::error::{Result, TuneVaultError};
use async_trait::async_trait;
use lofty::config::WriteOptions;
use lofty::picture::{Picture, PictureType};
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Values written into an audio file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackTags {
    pub title: String,
    /// Artists already joined with the configured delimiter
    pub artist: String,
    pub album: String,
    pub lyrics: Option<String>,
    /// Image file to embed as the front cover
    pub cover: Option<PathBuf>,
}

/// Writes tags into a file in place
#[async_trait]
pub trait TagWriter: Send + Sync {
    async fn write_tags(&self, path: &Path, format: AudioFormat, tags: &TrackTags) -> Result<()>;
}

/// `TagWriter` backed by lofty
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyTagWriter;

impl LoftyTagWriter {
    pub fn new() -> Self {
        Self
    }

    fn write_blocking(path: &Path, tags: &TrackTags) -> Result<()> {
        let probe = Probe::open(path)
            .map_err(|e| TuneVaultError::TagWrite(format!("Failed to open audio file: {}", e)))?;
        let mut tagged_file = probe
            .guess_file_type()
            .map_err(|e| TuneVaultError::TagWrite(format!("Failed to probe audio file: {}", e)))?
            .read()?;

        let tag_type = tagged_file.primary_tag_type();
        let mut tag = tagged_file
            .primary_tag()
            .cloned()
            .unwrap_or_else(|| Tag::new(tag_type));

        tag.set_title(tags.title.clone());
        tag.set_artist(tags.artist.clone());
        tag.set_album(tags.album.clone());

        if let Some(lyrics) = tags.lyrics.as_deref().filter(|l| !l.is_empty()) {
            tag.remove_key(&ItemKey::Lyrics);
            tag.insert_text(ItemKey::Lyrics, lyrics.to_string());
        }

        if let Some(cover) = &tags.cover {
            match read_picture(cover) {
                Ok(picture) => {
                    tag.remove_picture_type(PictureType::CoverFront);
                    tag.push_picture(picture);
                }
                // Cover art is optional; the rest of the tags still go in
                Err(e) => tracing::warn!(cover = %cover.display(), error = %e, "Skipping unreadable cover"),
            }
        }

        tagged_file.insert_tag(tag);
        tagged_file.save_to_path(path, WriteOptions::default())?;
        Ok(())
    }
}

fn read_picture(path: &Path) -> Result<Picture> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut picture = Picture::from_reader(&mut reader)?;
    picture.set_pic_type(PictureType::CoverFront);
    Ok(picture)
}

#[async_trait]
impl TagWriter for LoftyTagWriter {
    async fn write_tags(&self, path: &Path, format: AudioFormat, tags: &TrackTags) -> Result<()> {
        if !format.is_taggable() {
            return Err(TuneVaultError::TagWrite(format!(
                "Unsupported container: {}",
                format
            )));
        }

        let path = path.to_path_buf();
        let tags = tags.clone();
        tokio::task::spawn_blocking(move || Self::write_blocking(&path, &tags))
            .await
            .map_err(|e| TuneVaultError::InternalError(format!("Tag writer task failed: {}", e)))?
    }
}
