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


//! Commit targets
//!
//! The pipeline never writes into the destination until a task's audio is
//! fully downloaded and tagged. `commit` then places one named file:
//!
//! - if an entry with that name exists, overwrite it in place; a destination
//!   that cannot overwrite answers `Overwrite::Unsupported` and the entry is
//!   deleted and created again
//! - otherwise create it
//!
//! `LocalDirectory` writes through a hidden sibling temp file and renames,
//! so readers never see a half-written file.

use crate::error::{Result, TuneVaultError};
use async_trait::async_trait;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Content to place in the destination
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    /// Copy from a local file
    File(&'a Path),
    /// Write these bytes
    Bytes(&'a [u8]),
}

/// A named entry inside a destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationEntry {
    pub name: String,
    /// Destination-specific locator (a path for `LocalDirectory`)
    pub locator: String,
}

/// Result of an in-place overwrite attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overwrite {
    Written,
    Unsupported,
}

/// A caller-supplied place finished files are committed to
#[async_trait]
pub trait Destination: Send + Sync + Debug {
    /// Look up an entry by file name
    async fn find(&self, name: &str) -> Result<Option<DestinationEntry>>;

    /// Create a new entry with the given content
    async fn create(&self, name: &str, payload: Payload<'_>) -> Result<DestinationEntry>;

    /// Replace an existing entry's content
    async fn overwrite(&self, entry: &DestinationEntry, payload: Payload<'_>) -> Result<Overwrite>;

    async fn delete(&self, entry: &DestinationEntry) -> Result<()>;
}

/// Place `payload` under `name`, replacing any existing entry
pub async fn commit(
    destination: &dyn Destination,
    name: &str,
    payload: Payload<'_>,
) -> Result<DestinationEntry> {
    match destination.find(name).await? {
        Some(existing) => match destination.overwrite(&existing, payload).await? {
            Overwrite::Written => Ok(existing),
            Overwrite::Unsupported => {
                tracing::debug!(name, "Overwrite unsupported, recreating entry");
                destination.delete(&existing).await?;
                destination.create(name, payload).await
            }
        },
        None => destination.create(name, payload).await,
    }
}

/// A directory on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    root: PathBuf,
    overwrite_in_place: bool,
}

impl LocalDirectory {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            overwrite_in_place: true,
        }
    }

    /// Report `Overwrite::Unsupported` for existing entries, forcing
    /// delete-then-create
    pub fn without_overwrite(mut self) -> Self {
        self.overwrite_in_place = false;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf> {
        let candidate = Path::new(name);
        if name.is_empty()
            || candidate.components().count() != 1
            || candidate.file_name().is_none()
        {
            return Err(TuneVaultError::invalid_input(format!(
                "Not a plain file name: {:?}",
                name
            )));
        }
        Ok(self.root.join(name))
    }

    /// Write `payload` to a hidden sibling, then rename over `target`
    async fn atomic_write(&self, target: &Path, payload: Payload<'_>) -> Result<()> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            TuneVaultError::destination(format!(
                "Failed to create directory {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let file_name = target
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("file");
        let temp_path = self.root.join(format!(".{}.tmp", file_name));

        let result = Self::write_temp(&temp_path, payload).await;
        let result = match result {
            Ok(()) => fs::rename(&temp_path, target).await.map_err(|e| {
                TuneVaultError::destination(format!(
                    "Failed to rename {} -> {}: {}",
                    temp_path.display(),
                    target.display(),
                    e
                ))
            }),
            Err(e) => Err(e),
        };

        if result.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        result
    }

    async fn write_temp(temp_path: &Path, payload: Payload<'_>) -> Result<()> {
        let write_err = |e: std::io::Error| {
            TuneVaultError::destination(format!(
                "Failed to write {}: {}",
                temp_path.display(),
                e
            ))
        };

        match payload {
            Payload::File(source) => {
                fs::copy(source, temp_path).await.map_err(write_err)?;
            }
            Payload::Bytes(bytes) => {
                let mut file = fs::File::create(temp_path).await.map_err(write_err)?;
                file.write_all(bytes).await.map_err(write_err)?;
                file.sync_all().await.map_err(write_err)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Destination for LocalDirectory {
    async fn find(&self, name: &str) -> Result<Option<DestinationEntry>> {
        let path = self.entry_path(name)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(DestinationEntry {
                name: name.to_string(),
                locator: path.to_string_lossy().into_owned(),
            })),
            Ok(_) => Err(TuneVaultError::destination(format!(
                "{} exists and is not a file",
                path.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TuneVaultError::destination(format!(
                "Failed to inspect {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn create(&self, name: &str, payload: Payload<'_>) -> Result<DestinationEntry> {
        let path = self.entry_path(name)?;
        self.atomic_write(&path, payload).await?;
        Ok(DestinationEntry {
            name: name.to_string(),
            locator: path.to_string_lossy().into_owned(),
        })
    }

    async fn overwrite(&self, entry: &DestinationEntry, payload: Payload<'_>) -> Result<Overwrite> {
        if !self.overwrite_in_place {
            return Ok(Overwrite::Unsupported);
        }
        self.atomic_write(Path::new(&entry.locator), payload).await?;
        Ok(Overwrite::Written)
    }

    async fn delete(&self, entry: &DestinationEntry) -> Result<()> {
        match fs::remove_file(&entry.locator).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TuneVaultError::destination(format!(
                "Failed to delete {}: {}",
                entry.locator,
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_commit_creates_file() {
        let dir = TempDir::new().unwrap();
        let destination = LocalDirectory::new(dir.path().join("music"));

        let entry = commit(&destination, "song.mp3", Payload::Bytes(b"abc"))
            .await
            .unwrap();
        assert_eq!(entry.name, "song.mp3");
        assert_eq!(std::fs::read(dir.path().join("music/song.mp3")).unwrap(), b"abc");
        assert!(!dir.path().join("music/.song.mp3.tmp").exists());
    }

    #[tokio::test]
    async fn test_commit_overwrites_existing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("song.lrc"), b"old old old").unwrap();
        let destination = LocalDirectory::new(dir.path());

        commit(&destination, "song.lrc", Payload::Bytes(b"new"))
            .await
            .unwrap();
        assert_eq!(std::fs::read(dir.path().join("song.lrc")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_commit_falls_back_to_delete_then_create() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("song.flac"), b"old").unwrap();
        let source = dir.path().join("staged");
        std::fs::write(&source, b"fresh").unwrap();
        let destination = LocalDirectory::new(dir.path()).without_overwrite();

        commit(&destination, "song.flac", Payload::File(&source))
            .await
            .unwrap();
        assert_eq!(std::fs::read(dir.path().join("song.flac")).unwrap(), b"fresh");
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_rejects_nested_names() {
        let dir = TempDir::new().unwrap();
        let destination = LocalDirectory::new(dir.path());
        assert!(destination.find("../escape.mp3").await.is_err());
        assert!(destination.find("a/b.mp3").await.is_err());
        assert!(destination.find("").await.is_err());
    }

    #[tokio::test]
    async fn test_find_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let destination = LocalDirectory::new(dir.path());
        assert!(destination.find("nope.mp3").await.unwrap().is_none());
    }
}
