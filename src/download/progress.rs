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


//! Task states, pipeline stages and progress events

use crate::api::models::TrackKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one `submit` or retry call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a download task
///
/// `Queued -> Running -> Completed | Failed`, and `Failed -> Queued` on an
/// explicit retry. Cancelled tasks are removed rather than given a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }
}

/// Steps of the per-task pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    ResolvingUrl,
    Downloading,
    DetectingFormat,
    FetchingArt,
    FetchingLyrics,
    WritingTags,
    Committing,
}

impl PipelineStage {
    /// Whether a failure in this stage fails the task
    ///
    /// The other stages degrade: the task still completes without the
    /// missing piece.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ResolvingUrl | Self::Downloading | Self::WritingTags | Self::Committing
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolvingUrl => "resolving-url",
            Self::Downloading => "downloading",
            Self::DetectingFormat => "detecting-format",
            Self::FetchingArt => "fetching-art",
            Self::FetchingLyrics => "fetching-lyrics",
            Self::WritingTags => "writing-tags",
            Self::Committing => "committing",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events published by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadEvent {
    /// Monotonic per task execution
    Progress { track_id: TrackKey, percent: u8 },
    Completed { track_id: TrackKey },
    Failed { track_id: TrackKey, reason: String },
    /// Removed by `cancel_all` before reaching a terminal state
    Cancelled { track_id: TrackKey },
    /// Every task started by the batch is terminal or removed
    BatchFinished { batch_id: BatchId },
}

impl DownloadEvent {
    pub fn track_id(&self) -> Option<TrackKey> {
        match self {
            Self::Progress { track_id, .. }
            | Self::Completed { track_id }
            | Self::Failed { track_id, .. }
            | Self::Cancelled { track_id } => Some(*track_id),
            Self::BatchFinished { .. } => None,
        }
    }
}

/// Converts streamed byte counts into whole percentages
///
/// `advance` only returns a value when the percentage grows. With no known
/// length nothing is reported until `finish`.
#[derive(Debug, Clone)]
pub struct PercentMeter {
    total: Option<u64>,
    read: u64,
    reported: Option<u8>,
}

impl PercentMeter {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            read: 0,
            reported: None,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    /// Record `n` more bytes; returns the new percentage if it increased
    pub fn advance(&mut self, n: u64) -> Option<u8> {
        self.read += n;
        let total = self.total?;
        let percent = ((self.read.min(total) as u128 * 100) / total as u128) as u8;
        self.report(percent)
    }

    /// Mark the stream complete; returns 100 unless already reported
    pub fn finish(&mut self) -> Option<u8> {
        self.report(100)
    }

    fn report(&mut self, percent: u8) -> Option<u8> {
        match self.reported {
            Some(last) if last >= percent => None,
            _ => {
                self.reported = Some(percent);
                Some(percent)
            }
        }
    }
}
