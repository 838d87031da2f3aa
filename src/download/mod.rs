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


//! Download orchestration and the per-task pipeline
//!
//! - `rules` - per-batch `DownloadRules` and lyric `TextEncoding`
//! - `progress` - task states, pipeline stages, events
//! - `stream` - chunked copy of an audio stream into staging
//! - `executor` - the staged download/tag/commit pipeline for one track
//! - `manager` - `DownloadOrchestrator`: admission, concurrency, retry, cancel
//! - `host` - `OrchestrationHost` actor with event and progress channels

pub mod executor;
pub mod host;
pub mod manager;
pub mod progress;
pub mod rules;
pub mod stream;

// Re-export commonly used types
pub use executor::{ExecutionError, ExecutionReport, StepOutcome, TaskExecutor, TaskJob};
pub use host::{AggregateProgress, HostConfig, OrchestrationHost};
pub use manager::{DownloadOrchestrator, TaskSnapshot};
pub use progress::{BatchId, DownloadEvent, PipelineStage, TaskState};
pub use rules::{DownloadRules, TextEncoding};
