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


//! Private staging area for in-flight downloads
//!
//! Every staged file is a `tempfile::TempPath`: it is removed when dropped,
//! so an executor that fails or is cancelled at any point leaves nothing
//! behind without explicit cleanup code on each error path.

use crate::error::{Result, TuneVaultError};
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempPath};

/// Directory staged files are created in
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl Default for StagingArea {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir(),
        }
    }
}

impl StagingArea {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create an empty staged file and open it for async writing
    pub async fn create(&self, prefix: &str) -> Result<(StagedFile, tokio::fs::File)> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            TuneVaultError::staging(format!(
                "Failed to create staging directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let named = Builder::new()
            .prefix(prefix)
            .suffix(".part")
            .tempfile_in(&self.dir)
            .map_err(|e| TuneVaultError::staging(format!("Failed to create staged file: {}", e)))?;

        let (file, path) = named.into_parts();
        Ok((StagedFile { path }, tokio::fs::File::from_std(file)))
    }

    /// Stage an in-memory payload
    pub async fn stage_bytes(&self, prefix: &str, bytes: &[u8]) -> Result<StagedFile> {
        let (staged, mut file) = self.create(prefix).await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, bytes)
            .await
            .map_err(|e| TuneVaultError::staging(format!("Failed to write staged file: {}", e)))?;
        tokio::io::AsyncWriteExt::flush(&mut file)
            .await
            .map_err(|e| TuneVaultError::staging(format!("Failed to flush staged file: {}", e)))?;
        Ok(staged)
    }
}

/// A file in the staging area, deleted on drop
#[derive(Debug)]
pub struct StagedFile {
    path: TempPath,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete now, reporting failures instead of ignoring them
    pub fn remove(self) -> Result<()> {
        let display = self.path.display().to_string();
        self.path
            .close()
            .map_err(|e| TuneVaultError::staging(format!("Failed to delete {}: {}", display, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_staged_file_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let area = StagingArea::new(dir.path().join("staging"));

        let staged = area.stage_bytes("audio-", b"data").await.unwrap();
        let path = staged.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"data");

        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_remove_deletes_file() {
        let dir = TempDir::new().unwrap();
        let area = StagingArea::new(dir.path());

        let staged = area.stage_bytes("cover-", b"img").await.unwrap();
        let path = staged.path().to_path_buf();
        staged.remove().unwrap();
        assert!(!path.exists());
    }
}
