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


//! Per-task download pipeline
//!
//! ```text
//! ResolvingUrl -> Downloading -> DetectingFormat -> FetchingArt
//!   -> FetchingLyrics -> WritingTags -> Committing
//! ```
//!
//! Every stage runs through `run_step`. A failure in a stage where
//! `PipelineStage::is_fatal` holds ends the task with `ExecutionError::Fatal`;
//! any other stage degrades to `StepOutcome::Degraded` and the pipeline
//! carries on without the missing piece. Everything is staged privately
//! until `Committing`, and staged files are dropped (and deleted) on every
//! exit path.

use crate::api::client::{Credentials, TrackSource};
use crate::api::lyrics::LyricBundle;
use crate::api::models::Track;
use crate::audio::decoder::{detect_format, AudioFormat};
use crate::audio::metadata::{TagWriter, TrackTags};
use crate::download::progress::PipelineStage;
use crate::download::rules::DownloadRules;
use crate::download::stream::{download_to_file, DEFAULT_CHUNK_TIMEOUT};
use crate::error::TuneVaultError;
use crate::file::destination::{commit, Destination, DestinationEntry, Payload};
use crate::file::paths::NameContext;
use crate::file::staging::{StagedFile, StagingArea};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why an execution did not complete
#[derive(Debug)]
pub enum ExecutionError {
    /// The cancellation token fired
    Cancelled,
    /// A fatal stage failed
    Fatal {
        stage: PipelineStage,
        error: TuneVaultError,
    },
    /// The pipeline task panicked
    Panicked(String),
}

impl ExecutionError {
    /// One-line reason recorded on the failed task
    pub fn reason(&self) -> String {
        match self {
            Self::Cancelled => "Cancelled".to_string(),
            Self::Fatal { stage, error } => format!("{}: {}", stage, error.user_message()),
            Self::Panicked(message) => format!("Internal error: {}", message),
        }
    }
}

/// Result of a best-effort stage
#[derive(Debug)]
pub enum StepOutcome<T> {
    Done(T),
    /// The stage failed; the task continues without its output
    Degraded {
        stage: PipelineStage,
        error: TuneVaultError,
    },
}

impl<T> StepOutcome<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            Self::Degraded { .. } => None,
        }
    }

    /// Value of a stage the task cannot go on without
    pub fn required(self) -> Result<T, ExecutionError> {
        match self {
            Self::Done(value) => Ok(value),
            Self::Degraded { stage, error } => Err(ExecutionError::Fatal { stage, error }),
        }
    }
}

/// What a successful execution committed
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub audio: DestinationEntry,
    pub lyrics: Option<DestinationEntry>,
    pub format: AudioFormat,
    /// Best-effort stages that failed
    pub degraded: Vec<PipelineStage>,
}

/// Everything one task execution needs
#[derive(Debug, Clone)]
pub struct TaskJob {
    pub track: Track,
    pub rules: DownloadRules,
    pub credentials: Credentials,
    pub destination: Arc<dyn Destination>,
}

/// Runs the pipeline for one track at a time; shared by all workers
pub struct TaskExecutor {
    source: Arc<dyn TrackSource>,
    tag_writer: Arc<dyn TagWriter>,
    staging: StagingArea,
    chunk_timeout: Duration,
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("staging", &self.staging)
            .field("chunk_timeout", &self.chunk_timeout)
            .finish_non_exhaustive()
    }
}

impl TaskExecutor {
    pub fn new(
        source: Arc<dyn TrackSource>,
        tag_writer: Arc<dyn TagWriter>,
        staging: StagingArea,
    ) -> Self {
        Self {
            source,
            tag_writer,
            staging,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
        }
    }

    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    /// Run every stage for `job`
    ///
    /// `on_progress` receives download percentages. The destination is only
    /// touched in the final stage. If the `.lrc` sidecar cannot be committed,
    /// an audio entry this execution created is deleted again; an entry that
    /// already existed has been overwritten by then and stays.
    pub async fn execute<F>(
        &self,
        job: &TaskJob,
        cancel: &CancellationToken,
        on_progress: F,
    ) -> Result<ExecutionReport, ExecutionError>
    where
        F: FnMut(u8) + Send,
    {
        let track = &job.track;
        let rules = &job.rules;
        let mut degraded = Vec::new();

        // Resolve
        checkpoint(cancel)?;
        let resolution = run_step(
            PipelineStage::ResolvingUrl,
            track.id,
            self.source
                .resolve_stream(track, rules.quality, &job.credentials),
        )
        .await?
        .required()?;
        debug!(track_id = track.id, level = %resolution.raw_level, "Resolved stream");

        let base_name = rules.file_name_template.render(&NameContext {
            track,
            level_label: resolution.quality_label(),
            artist_delimiter: &rules.artist_delimiter,
        });

        // Download
        checkpoint(cancel)?;
        let audio = run_step(
            PipelineStage::Downloading,
            track.id,
            self.download(&resolution.url, track.id, cancel, on_progress),
        )
        .await?
        .required()?;

        // Detect
        let format = match run_step(
            PipelineStage::DetectingFormat,
            track.id,
            detect_format(audio.path()),
        )
        .await?
        {
            StepOutcome::Done(format) => format,
            StepOutcome::Degraded { stage, .. } => {
                degraded.push(stage);
                AudioFormat::Unknown
            }
        };

        // Cover art
        checkpoint(cancel)?;
        let cover = match track.album.cover_url.as_deref() {
            Some(url) => {
                let outcome = run_step(
                    PipelineStage::FetchingArt,
                    track.id,
                    self.stage_cover(url),
                )
                .await?;
                take(outcome, &mut degraded)
            }
            None => None,
        };

        // Lyrics
        checkpoint(cancel)?;
        let bundle = take(
            run_step(
                PipelineStage::FetchingLyrics,
                track.id,
                self.source.fetch_lyrics(track.id, &job.credentials),
            )
            .await?,
            &mut degraded,
        )
        .unwrap_or_else(LyricBundle::default);
        let lyric_text = bundle.compose(track, &rules.artist_delimiter, rules.lyric_selection());

        // Tags
        checkpoint(cancel)?;
        if format.is_taggable() {
            let tags = TrackTags {
                title: track.title.clone(),
                artist: track.joined_artists(&rules.artist_delimiter),
                album: track.album.name.clone(),
                lyrics: lyric_text.clone(),
                cover: cover.as_ref().map(|c| c.path().to_path_buf()),
            };
            run_step(
                PipelineStage::WritingTags,
                track.id,
                self.tag_writer.write_tags(audio.path(), format, &tags),
            )
            .await?
            .required()?;
        } else {
            warn!(track_id = track.id, "Unrecognized container, committing without tags");
        }

        if let Some(cover) = cover {
            if let Err(e) = cover.remove() {
                warn!(track_id = track.id, error = %e, "Failed to delete staged cover");
            }
        }

        // Commit
        checkpoint(cancel)?;
        let destination = job.destination.as_ref();
        let audio_name = format!("{}.{}", base_name, format.extension());
        let audio_existed = run_step(
            PipelineStage::Committing,
            track.id,
            destination.find(&audio_name),
        )
        .await?
        .required()?
        .is_some();
        let audio_entry = run_step(
            PipelineStage::Committing,
            track.id,
            commit(destination, &audio_name, Payload::File(audio.path())),
        )
        .await?
        .required()?;

        let lyrics_entry = match lyric_text.filter(|_| rules.save_lyrics_file) {
            Some(text) => {
                let encoded = rules.text_encoding.encode(&text);
                let lrc_name = format!("{}.lrc", base_name);
                let committed = run_step(
                    PipelineStage::Committing,
                    track.id,
                    commit(destination, &lrc_name, Payload::Bytes(&encoded)),
                )
                .await
                .and_then(StepOutcome::required);

                match committed {
                    Ok(entry) => Some(entry),
                    Err(failure) => {
                        if !audio_existed {
                            if let Err(e) = destination.delete(&audio_entry).await {
                                warn!(track_id = track.id, error = %e, "Failed to roll back committed audio");
                            }
                        }
                        return Err(failure);
                    }
                }
            }
            None => None,
        };

        if let Err(e) = audio.remove() {
            warn!(track_id = track.id, error = %e, "Failed to delete staged audio");
        }

        info!(track_id = track.id, file = %audio_entry.name, "Track committed");

        Ok(ExecutionReport {
            audio: audio_entry,
            lyrics: lyrics_entry,
            format,
            degraded,
        })
    }

    async fn download<F>(
        &self,
        url: &str,
        track_id: i64,
        cancel: &CancellationToken,
        on_progress: F,
    ) -> crate::error::Result<StagedFile>
    where
        F: FnMut(u8) + Send,
    {
        let stream = self.source.open_stream(url).await?;
        let (staged, file) = self.staging.create(&format!("track-{}-", track_id)).await?;
        let bytes = download_to_file(stream, file, cancel, self.chunk_timeout, on_progress).await?;
        debug!(track_id, bytes, "Audio staged");
        Ok(staged)
    }

    async fn stage_cover(&self, url: &str) -> crate::error::Result<StagedFile> {
        let bytes = self.source.fetch_cover(url).await?;
        self.staging.stage_bytes("cover-", &bytes).await
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), ExecutionError> {
    if cancel.is_cancelled() {
        Err(ExecutionError::Cancelled)
    } else {
        Ok(())
    }
}

/// Run one stage; the stage decides whether a failure ends the task
///
/// Best-effort failures are logged at `warn` and returned as `Degraded`.
async fn run_step<T, Fut>(
    stage: PipelineStage,
    track_id: i64,
    step: Fut,
) -> Result<StepOutcome<T>, ExecutionError>
where
    Fut: Future<Output = crate::error::Result<T>>,
{
    match step.await {
        Ok(value) => Ok(StepOutcome::Done(value)),
        Err(error) if error.is_cancelled() => Err(ExecutionError::Cancelled),
        Err(error) if stage.is_fatal() => Err(ExecutionError::Fatal { stage, error }),
        Err(error) => {
            warn!(track_id, stage = %stage, error = %error, "Best-effort stage failed");
            Ok(StepOutcome::Degraded { stage, error })
        }
    }
}

fn take<T>(outcome: StepOutcome<T>, degraded: &mut Vec<PipelineStage>) -> Option<T> {
    if let StepOutcome::Degraded { stage, .. } = &outcome {
        degraded.push(*stage);
    }
    outcome.ok()
}
