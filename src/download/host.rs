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


//! Long-lived orchestration host
//!
//! Runs the orchestrator inside an actor task. Callers talk to it through
//! `OrchestrationHost`, which sends commands over a channel and exposes:
//!
//! - `subscribe()` - every `DownloadEvent`, via broadcast
//! - `progress()` - `AggregateProgress` over all tasks, via watch
//!
//! `shutdown` cancels all in-flight work and waits for the workers to exit.

use crate::api::client::{Credentials, TrackSource};
use crate::api::models::{Track, TrackKey};
use crate::audio::metadata::TagWriter;
use crate::download::executor::TaskExecutor;
use crate::download::manager::{DownloadOrchestrator, TaskSnapshot};
use crate::download::progress::{BatchId, DownloadEvent, TaskState};
use crate::download::rules::DownloadRules;
use crate::download::stream::DEFAULT_CHUNK_TIMEOUT;
use crate::error::{Result, TuneVaultError};
use crate::file::destination::Destination;
use crate::file::staging::StagingArea;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Host tuning
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Events buffered per subscriber before slow ones start lagging
    pub event_buffer: usize,
    /// Commands buffered before callers wait
    pub command_buffer: usize,
    /// Where in-flight downloads are staged; the system temp dir if unset
    pub staging_dir: Option<PathBuf>,
    pub chunk_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            event_buffer: 256,
            command_buffer: 32,
            staging_dir: None,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
        }
    }
}

/// Counts over every task in the table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateProgress {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    /// Mean progress with terminal tasks counted as 100
    pub overall_percent: u8,
}

impl AggregateProgress {
    pub fn from_snapshots(snapshots: &[TaskSnapshot]) -> Self {
        let mut aggregate = Self::default();
        let mut percent_sum: u64 = 0;

        for task in snapshots {
            match task.state {
                TaskState::Queued => aggregate.queued += 1,
                TaskState::Running => aggregate.running += 1,
                TaskState::Completed => aggregate.completed += 1,
                TaskState::Failed => aggregate.failed += 1,
            }
            percent_sum += if task.state.is_terminal() {
                100
            } else {
                u64::from(task.progress_percent)
            };
        }

        if !snapshots.is_empty() {
            aggregate.overall_percent = (percent_sum / snapshots.len() as u64) as u8;
        }
        aggregate
    }

    pub fn total(&self) -> usize {
        self.queued + self.running + self.completed + self.failed
    }

    pub fn in_flight(&self) -> usize {
        self.queued + self.running
    }
}

enum Command {
    Submit {
        tracks: Vec<Track>,
        rules: DownloadRules,
        credentials: Credentials,
        destination: Arc<dyn Destination>,
        reply: oneshot::Sender<Result<BatchId>>,
    },
    Retry {
        track_id: TrackKey,
        reply: oneshot::Sender<Result<BatchId>>,
    },
    RetryAllFailed {
        reply: oneshot::Sender<Option<BatchId>>,
    },
    DeleteFailed {
        track_id: TrackKey,
        reply: oneshot::Sender<Result<()>>,
    },
    DeleteAllFailed {
        reply: oneshot::Sender<usize>,
    },
    DeleteCompleted {
        track_id: TrackKey,
        reply: oneshot::Sender<Result<()>>,
    },
    DeleteAllCompleted {
        reply: oneshot::Sender<usize>,
    },
    CancelAll {
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<TaskSnapshot>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the running host
#[derive(Debug)]
pub struct OrchestrationHost {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<DownloadEvent>,
    progress: watch::Receiver<AggregateProgress>,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl OrchestrationHost {
    /// Start the host on the current tokio runtime
    pub fn spawn(
        source: Arc<dyn TrackSource>,
        tag_writer: Arc<dyn TagWriter>,
        config: HostConfig,
    ) -> Self {
        let staging = config
            .staging_dir
            .clone()
            .map(StagingArea::new)
            .unwrap_or_default();
        let executor =
            TaskExecutor::new(source, tag_writer, staging).with_chunk_timeout(config.chunk_timeout);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let orchestrator = DownloadOrchestrator::new(executor, event_tx);

        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (broadcast_tx, _) = broadcast::channel(config.event_buffer.max(1));
        let (progress_tx, progress_rx) = watch::channel(AggregateProgress::default());

        let actor = tokio::spawn(run_actor(
            orchestrator,
            command_rx,
            event_rx,
            broadcast_tx.clone(),
            progress_tx,
        ));

        Self {
            commands: command_tx,
            events: broadcast_tx,
            progress: progress_rx,
            actor: Mutex::new(Some(actor)),
        }
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    /// Latest aggregate progress, updated after every event and command
    pub fn progress(&self) -> watch::Receiver<AggregateProgress> {
        self.progress.clone()
    }

    pub async fn submit(
        &self,
        tracks: Vec<Track>,
        rules: DownloadRules,
        credentials: Credentials,
        destination: Arc<dyn Destination>,
    ) -> Result<BatchId> {
        self.request(|reply| Command::Submit {
            tracks,
            rules,
            credentials,
            destination,
            reply,
        })
        .await?
    }

    pub async fn retry(&self, track_id: TrackKey) -> Result<BatchId> {
        self.request(|reply| Command::Retry { track_id, reply }).await?
    }

    pub async fn retry_all_failed(&self) -> Result<Option<BatchId>> {
        self.request(|reply| Command::RetryAllFailed { reply }).await
    }

    pub async fn delete_failed(&self, track_id: TrackKey) -> Result<()> {
        self.request(|reply| Command::DeleteFailed { track_id, reply }).await?
    }

    pub async fn delete_all_failed(&self) -> Result<usize> {
        self.request(|reply| Command::DeleteAllFailed { reply }).await
    }

    pub async fn delete_completed(&self, track_id: TrackKey) -> Result<()> {
        self.request(|reply| Command::DeleteCompleted { track_id, reply }).await?
    }

    pub async fn delete_all_completed(&self) -> Result<usize> {
        self.request(|reply| Command::DeleteAllCompleted { reply }).await
    }

    pub async fn cancel_all(&self) -> Result<usize> {
        self.request(|reply| Command::CancelAll { reply }).await
    }

    pub async fn snapshot(&self) -> Result<Vec<TaskSnapshot>> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Cancel all work, stop the actor and wait for it to exit
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(actor) = self.actor.lock().await.take() else {
            return Ok(());
        };

        // The actor may already be gone; joining it below is what matters
        let _ = self.request(|reply| Command::Shutdown { reply }).await;
        actor
            .await
            .map_err(|e| TuneVaultError::InternalError(format!("Host task failed: {}", e)))
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| TuneVaultError::invalid_state("Host has shut down"))?;
        response
            .await
            .map_err(|_| TuneVaultError::invalid_state("Host has shut down"))
    }
}

async fn run_actor(
    orchestrator: DownloadOrchestrator,
    mut commands: mpsc::Receiver<Command>,
    mut events: mpsc::UnboundedReceiver<DownloadEvent>,
    broadcast: broadcast::Sender<DownloadEvent>,
    progress: watch::Sender<AggregateProgress>,
) {
    info!("Orchestration host started");

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                publish_progress(&orchestrator, &progress);
                // No subscribers is fine
                let _ = broadcast.send(event);
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("All host handles dropped");
                    orchestrator.shutdown().await;
                    break;
                };
                if let Some(reply) = handle(&orchestrator, command) {
                    orchestrator.shutdown().await;
                    drain(&mut events, &broadcast);
                    publish_progress(&orchestrator, &progress);
                    let _ = reply.send(());
                    break;
                }
                publish_progress(&orchestrator, &progress);
            }
        }
    }

    info!("Orchestration host stopped");
}

/// Apply one command; returns the reply channel for `Shutdown`
fn handle(orchestrator: &DownloadOrchestrator, command: Command) -> Option<oneshot::Sender<()>> {
    match command {
        Command::Submit {
            tracks,
            rules,
            credentials,
            destination,
            reply,
        } => {
            let _ = reply.send(orchestrator.submit(tracks, rules, credentials, destination));
        }
        Command::Retry { track_id, reply } => {
            let _ = reply.send(orchestrator.retry(track_id));
        }
        Command::RetryAllFailed { reply } => {
            let _ = reply.send(orchestrator.retry_all_failed());
        }
        Command::DeleteFailed { track_id, reply } => {
            let _ = reply.send(orchestrator.delete_failed(track_id));
        }
        Command::DeleteAllFailed { reply } => {
            let _ = reply.send(orchestrator.delete_all_failed());
        }
        Command::DeleteCompleted { track_id, reply } => {
            let _ = reply.send(orchestrator.delete_completed(track_id));
        }
        Command::DeleteAllCompleted { reply } => {
            let _ = reply.send(orchestrator.delete_all_completed());
        }
        Command::CancelAll { reply } => {
            let _ = reply.send(orchestrator.cancel_all());
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(orchestrator.snapshot());
        }
        Command::Shutdown { reply } => return Some(reply),
    }
    None
}

/// Forward events still queued after shutdown
fn drain(
    events: &mut mpsc::UnboundedReceiver<DownloadEvent>,
    broadcast: &broadcast::Sender<DownloadEvent>,
) {
    while let Ok(event) = events.try_recv() {
        let _ = broadcast.send(event);
    }
}

fn publish_progress(orchestrator: &DownloadOrchestrator, progress: &watch::Sender<AggregateProgress>) {
    let aggregate = AggregateProgress::from_snapshots(&orchestrator.snapshot());
    progress.send_if_modified(|current| {
        if *current == aggregate {
            false
        } else {
            *current = aggregate;
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{Album, Artist, QualityLevel};
    use chrono::Utc;

    fn snapshot(id: i64, state: TaskState, percent: u8) -> TaskSnapshot {
        TaskSnapshot {
            track: Track {
                id,
                title: "T".to_string(),
                artists: vec![Artist {
                    name: "A".to_string(),
                    id: 1,
                }],
                album: Album {
                    name: "R".to_string(),
                    id: 2,
                    cover_url: None,
                },
            },
            batch_id: BatchId::new(),
            quality: QualityLevel::Standard,
            state,
            progress_percent: percent,
            failure_reason: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_aggregate_counts_and_percent() {
        let snapshots = vec![
            snapshot(1, TaskState::Queued, 0),
            snapshot(2, TaskState::Running, 50),
            snapshot(3, TaskState::Completed, 100),
            snapshot(4, TaskState::Failed, 40),
        ];
        let aggregate = AggregateProgress::from_snapshots(&snapshots);
        assert_eq!(aggregate.queued, 1);
        assert_eq!(aggregate.running, 1);
        assert_eq!(aggregate.completed, 1);
        assert_eq!(aggregate.failed, 1);
        assert_eq!(aggregate.overall_percent, 62);
        assert_eq!(aggregate.in_flight(), 2);
    }

    #[test]
    fn test_empty_aggregate() {
        assert_eq!(AggregateProgress::from_snapshots(&[]), AggregateProgress::default());
    }
}
