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


//! Streaming audio into the staging area
//!
//! Reads the response body chunk by chunk, polling the cancellation token
//! between chunks. A chunk that does not arrive within the read timeout
//! fails the download; there is no resume.

use crate::api::client::AudioStream;
use crate::download::progress::PercentMeter;
use crate::error::{Result, TransportError, TuneVaultError};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

/// Longest wait for the next chunk of a download
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(20);

/// Write buffer in front of the staged file
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Copy `stream` into `file`, reporting whole percentages through
/// `on_progress`
///
/// Returns the number of bytes written. Fails with `Cancelled` as soon as
/// `cancel` fires.
pub async fn download_to_file<F>(
    stream: AudioStream,
    file: File,
    cancel: &CancellationToken,
    chunk_timeout: Duration,
    mut on_progress: F,
) -> Result<u64>
where
    F: FnMut(u8) + Send,
{
    let AudioStream {
        content_length,
        mut chunks,
    } = stream;
    let mut meter = PercentMeter::new(content_length);
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TuneVaultError::Cancelled),
            next = tokio::time::timeout(chunk_timeout, chunks.next()) => next,
        };

        let chunk = match next {
            Ok(Some(chunk)) => chunk?,
            Ok(None) => break,
            Err(_) => {
                return Err(TransportError::Timeout {
                    endpoint: "audio stream".to_string(),
                }
                .into())
            }
        };

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| TuneVaultError::staging(format!("Failed to write audio: {}", e)))?;

        if let Some(percent) = meter.advance(chunk.len() as u64) {
            on_progress(percent);
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| TuneVaultError::staging(format!("Failed to flush audio: {}", e)))?;

    if let Some(expected) = content_length {
        if meter.bytes_read() < expected {
            return Err(TransportError::Network {
                message: format!(
                    "stream ended after {} of {} bytes",
                    meter.bytes_read(),
                    expected
                ),
            }
            .into());
        }
    }

    if let Some(percent) = meter.finish() {
        on_progress(percent);
    }

    Ok(meter.bytes_read())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::stream;
    use tempfile::TempDir;

    fn audio(chunks: Vec<Result<Bytes>>, length: Option<u64>) -> AudioStream {
        AudioStream {
            content_length: length,
            chunks: stream::iter(chunks).boxed(),
        }
    }

    async fn staged(dir: &TempDir) -> (std::path::PathBuf, File) {
        let path = dir.path().join("staged");
        let file = File::create(&path).await.unwrap();
        (path, file)
    }

    #[tokio::test]
    async fn test_progress_with_known_length() {
        let dir = TempDir::new().unwrap();
        let (path, file) = staged(&dir).await;
        let chunks = vec![Ok(Bytes::from(vec![1u8; 50])), Ok(Bytes::from(vec![2u8; 50]))];

        let mut seen = Vec::new();
        let written = download_to_file(
            audio(chunks, Some(100)),
            file,
            &CancellationToken::new(),
            DEFAULT_CHUNK_TIMEOUT,
            |p| seen.push(p),
        )
        .await
        .unwrap();

        assert_eq!(written, 100);
        assert_eq!(seen, vec![50, 100]);
        assert_eq!(std::fs::read(&path).unwrap().len(), 100);
    }

    #[tokio::test]
    async fn test_unknown_length_reports_only_completion() {
        let dir = TempDir::new().unwrap();
        let (_, file) = staged(&dir).await;
        let chunks = vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"def"))];

        let mut seen = Vec::new();
        download_to_file(
            audio(chunks, None),
            file,
            &CancellationToken::new(),
            DEFAULT_CHUNK_TIMEOUT,
            |p| seen.push(p),
        )
        .await
        .unwrap();
        assert_eq!(seen, vec![100]);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_chunk() {
        let dir = TempDir::new().unwrap();
        let (_, file) = staged(&dir).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = download_to_file(
            audio(vec![Ok(Bytes::from_static(b"abc"))], Some(3)),
            file,
            &cancel,
            DEFAULT_CHUNK_TIMEOUT,
            |_| {},
        )
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_times_out() {
        let dir = TempDir::new().unwrap();
        let (_, file) = staged(&dir).await;
        let stalled = AudioStream {
            content_length: Some(10),
            chunks: stream::pending().boxed(),
        };

        let err = download_to_file(
            stalled,
            file,
            &CancellationToken::new(),
            Duration::from_secs(20),
            |_| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            TuneVaultError::Transport(TransportError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_short_stream_is_error() {
        let dir = TempDir::new().unwrap();
        let (_, file) = staged(&dir).await;
        let err = download_to_file(
            audio(vec![Ok(Bytes::from_static(b"abc"))], Some(10)),
            file,
            &CancellationToken::new(),
            DEFAULT_CHUNK_TIMEOUT,
            |_| {},
        )
        .await
        .unwrap_err();
        assert!(err.is_retryable());
    }
}
