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


//! Download orchestration
//!
//! `DownloadOrchestrator` owns the task table and fans each submitted batch
//! out to one spawned worker per track. Workers wait for a permit from the
//! batch's semaphore, so `submit` never blocks and at most
//! `rules.max_concurrency` tasks of a batch run at once.
//!
//! # Task table
//! - One record per track id. Submitting a track that is `Queued` or
//!   `Running` is a no-op; submitting a terminal track replaces its record
//!   with a fresh execution.
//! - Every state change goes through `TaskTable::transition`, which only
//!   applies when the record still belongs to the calling execution and is
//!   in the expected state.
//! - Terminal records stay until deleted.
//!
//! # Cancellation
//! `cancel_all` fires the current token, installs a fresh one for later
//! submissions, and removes every in-flight record. Their workers emit
//! `Cancelled`, never `Failed`.

use crate::api::client::Credentials;
use crate::api::models::{QualityLevel, Track, TrackKey};
use crate::download::executor::{ExecutionError, TaskExecutor, TaskJob};
use crate::download::progress::{BatchId, DownloadEvent, TaskState};
use crate::download::rules::DownloadRules;
use crate::error::{Result, TuneVaultError};
use crate::file::destination::Destination;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Configuration shared by every task of one `submit` call, kept for retries
#[derive(Debug)]
struct BatchContext {
    id: BatchId,
    rules: DownloadRules,
    credentials: Credentials,
    destination: Arc<dyn Destination>,
    semaphore: Arc<Semaphore>,
}

/// Completion counter for one `submit` or retry call
#[derive(Debug)]
struct Round {
    id: BatchId,
    remaining: AtomicUsize,
}

#[derive(Debug, Clone)]
struct TaskRecord {
    track: Track,
    batch: Arc<BatchContext>,
    /// Distinguishes executions of the same track across retries
    execution: u64,
    state: TaskState,
    progress_percent: u8,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
}

/// Read-only view of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub track: Track,
    pub batch_id: BatchId,
    pub quality: QualityLevel,
    pub state: TaskState,
    pub progress_percent: u8,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&TaskRecord> for TaskSnapshot {
    fn from(record: &TaskRecord) -> Self {
        Self {
            track: record.track.clone(),
            batch_id: record.batch.id,
            quality: record.batch.rules.quality,
            state: record.state,
            progress_percent: record.progress_percent,
            failure_reason: record.failure_reason.clone(),
            created_at: record.created_at,
        }
    }
}

/// The single owner of task records
#[derive(Debug, Default)]
struct TaskTable {
    records: Mutex<HashMap<TrackKey, TaskRecord>>,
}

impl TaskTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<TrackKey, TaskRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a fresh `Queued` record unless the track is already in flight
    fn admit(&self, record: TaskRecord) -> bool {
        let mut records = self.lock();
        let key = record.track.key();
        if records.get(&key).is_some_and(|r| r.state.is_in_flight()) {
            return false;
        }
        records.insert(key, record);
        true
    }

    /// Move `key` from `from` to `to` if it still belongs to `execution`
    fn transition(
        &self,
        key: TrackKey,
        execution: u64,
        from: TaskState,
        to: TaskState,
        apply: impl FnOnce(&mut TaskRecord),
    ) -> bool {
        let mut records = self.lock();
        match records.get_mut(&key) {
            Some(record) if record.execution == execution && record.state == from => {
                record.state = to;
                apply(record);
                true
            }
            _ => false,
        }
    }

    /// Raise the progress of a running execution; false if not raised
    fn raise_progress(&self, key: TrackKey, execution: u64, percent: u8) -> bool {
        let mut records = self.lock();
        match records.get_mut(&key) {
            Some(record)
                if record.execution == execution
                    && record.state == TaskState::Running
                    && percent > record.progress_percent =>
            {
                record.progress_percent = percent;
                true
            }
            _ => false,
        }
    }

    fn get(&self, key: TrackKey) -> Option<TaskRecord> {
        self.lock().get(&key).cloned()
    }

    fn remove_if(&self, key: TrackKey, state: TaskState) -> bool {
        let mut records = self.lock();
        if records.get(&key).is_some_and(|r| r.state == state) {
            records.remove(&key);
            true
        } else {
            false
        }
    }

    fn remove_all(&self, predicate: impl Fn(&TaskRecord) -> bool) -> usize {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, r| !predicate(r));
        before - records.len()
    }

    fn snapshot(&self) -> Vec<TaskSnapshot> {
        let mut snapshots: Vec<TaskSnapshot> = self.lock().values().map(TaskSnapshot::from).collect();
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.track.id.cmp(&b.track.id)));
        snapshots
    }
}

struct Inner {
    executor: Arc<TaskExecutor>,
    table: TaskTable,
    events: mpsc::UnboundedSender<DownloadEvent>,
    cancel: Mutex<CancellationToken>,
    next_execution: AtomicU64,
    workers: TaskTracker,
}

impl Inner {
    fn emit(&self, event: DownloadEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.events.send(event);
    }

    fn current_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn finish_one(&self, round: &Round) {
        if round.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            info!(batch_id = %round.id, "Batch finished");
            self.emit(DownloadEvent::BatchFinished { batch_id: round.id });
        }
    }
}

/// Bounded-concurrency download scheduler
#[derive(Clone)]
pub struct DownloadOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("executor", &self.inner.executor)
            .finish_non_exhaustive()
    }
}

impl DownloadOrchestrator {
    /// Create an orchestrator publishing events on `events`
    ///
    /// Must be called within a tokio runtime; workers are spawned on it.
    pub fn new(executor: TaskExecutor, events: mpsc::UnboundedSender<DownloadEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor: Arc::new(executor),
                table: TaskTable::default(),
                events,
                cancel: Mutex::new(CancellationToken::new()),
                next_execution: AtomicU64::new(1),
                workers: TaskTracker::new(),
            }),
        }
    }

    /// Queue `tracks` for download into `destination`
    ///
    /// Returns immediately. Tracks already queued or running are skipped;
    /// `BatchFinished` is still emitted once the rest are done.
    pub fn submit(
        &self,
        tracks: Vec<Track>,
        rules: DownloadRules,
        credentials: Credentials,
        destination: Arc<dyn Destination>,
    ) -> Result<BatchId> {
        rules.validate()?;

        let batch = Arc::new(BatchContext {
            id: BatchId::new(),
            semaphore: Arc::new(Semaphore::new(rules.max_concurrency)),
            rules,
            credentials,
            destination,
        });

        let now = Utc::now();
        let mut admitted = Vec::with_capacity(tracks.len());
        for track in tracks {
            let execution = self.inner.next_execution.fetch_add(1, Ordering::Relaxed);
            let record = TaskRecord {
                track: track.clone(),
                batch: Arc::clone(&batch),
                execution,
                state: TaskState::Queued,
                progress_percent: 0,
                failure_reason: None,
                created_at: now,
            };
            if self.inner.table.admit(record) {
                admitted.push((track.key(), execution));
            } else {
                debug!(track_id = track.id, "Already in flight, skipping");
            }
        }

        info!(batch_id = %batch.id, tasks = admitted.len(), max_concurrency = batch.rules.max_concurrency, "Batch submitted");
        Ok(self.launch(batch.id, admitted))
    }

    /// Run a failed task again with its original rules and destination
    pub fn retry(&self, track_id: TrackKey) -> Result<BatchId> {
        let record = self
            .inner
            .table
            .get(track_id)
            .ok_or_else(|| TuneVaultError::not_found(format!("task {}", track_id)))?;
        if record.state != TaskState::Failed {
            return Err(TuneVaultError::invalid_state(format!(
                "task {} is {:?}, only failed tasks can be retried",
                track_id, record.state
            )));
        }

        let round_id = BatchId::new();
        let requeued = self.requeue(&record).into_iter().collect();
        Ok(self.launch(round_id, requeued))
    }

    /// Retry every failed task; `None` when nothing has failed
    pub fn retry_all_failed(&self) -> Option<BatchId> {
        let failed: Vec<TaskRecord> = self
            .inner
            .table
            .lock()
            .values()
            .filter(|r| r.state == TaskState::Failed)
            .cloned()
            .collect();
        if failed.is_empty() {
            return None;
        }

        let requeued = failed.iter().filter_map(|r| self.requeue(r)).collect();
        Some(self.launch(BatchId::new(), requeued))
    }

    /// `Failed -> Queued` with a new execution id and cleared progress
    fn requeue(&self, record: &TaskRecord) -> Option<(TrackKey, u64)> {
        let key = record.track.key();
        let execution = self.inner.next_execution.fetch_add(1, Ordering::Relaxed);
        let requeued = self.inner.table.transition(
            key,
            record.execution,
            TaskState::Failed,
            TaskState::Queued,
            |r| {
                r.execution = execution;
                r.progress_percent = 0;
                r.failure_reason = None;
            },
        );
        requeued.then_some((key, execution))
    }

    pub fn delete_failed(&self, track_id: TrackKey) -> Result<()> {
        self.delete(track_id, TaskState::Failed)
    }

    pub fn delete_completed(&self, track_id: TrackKey) -> Result<()> {
        self.delete(track_id, TaskState::Completed)
    }

    fn delete(&self, track_id: TrackKey, state: TaskState) -> Result<()> {
        if self.inner.table.remove_if(track_id, state) {
            return Ok(());
        }
        match self.inner.table.get(track_id) {
            Some(record) => Err(TuneVaultError::invalid_state(format!(
                "task {} is {:?}, not {:?}",
                track_id, record.state, state
            ))),
            None => Err(TuneVaultError::not_found(format!("task {}", track_id))),
        }
    }

    /// Remove every failed record; returns how many were removed
    pub fn delete_all_failed(&self) -> usize {
        self.inner
            .table
            .remove_all(|r| r.state == TaskState::Failed)
    }

    /// Remove every completed record; returns how many were removed
    pub fn delete_all_completed(&self) -> usize {
        self.inner
            .table
            .remove_all(|r| r.state == TaskState::Completed)
    }

    /// Cancel and remove every queued or running task
    pub fn cancel_all(&self) -> usize {
        let old = {
            let mut token = self.inner.cancel.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *token, CancellationToken::new())
        };
        old.cancel();

        let removed = self.inner.table.remove_all(|r| r.state.is_in_flight());
        info!(removed, "Cancelled all in-flight tasks");
        removed
    }

    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.inner.table.snapshot()
    }

    pub fn task(&self, track_id: TrackKey) -> Option<TaskSnapshot> {
        self.inner.table.get(track_id).as_ref().map(TaskSnapshot::from)
    }

    /// Cancel everything and wait for all workers to exit
    pub async fn shutdown(&self) {
        self.cancel_all();
        self.inner.workers.close();
        self.inner.workers.wait().await;
    }

    /// Spawn one worker per admitted task under a new round
    fn launch(&self, round_id: BatchId, tasks: Vec<(TrackKey, u64)>) -> BatchId {
        let round = Arc::new(Round {
            id: round_id,
            remaining: AtomicUsize::new(tasks.len()),
        });

        if tasks.is_empty() {
            self.inner.emit(DownloadEvent::BatchFinished { batch_id: round_id });
            return round_id;
        }

        let cancel = self.inner.current_token();
        for (key, execution) in tasks {
            let inner = Arc::clone(&self.inner);
            let round = Arc::clone(&round);
            let cancel = cancel.clone();
            self.inner.workers.spawn(async move {
                run_worker(&inner, key, execution, cancel).await;
                inner.finish_one(&round);
            });
        }
        round_id
    }
}

/// One task execution from permit to terminal state
async fn run_worker(inner: &Arc<Inner>, key: TrackKey, execution: u64, cancel: CancellationToken) {
    let Some(record) = inner.table.get(key).filter(|r| r.execution == execution) else {
        return;
    };
    let batch = Arc::clone(&record.batch);

    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            inner.emit(DownloadEvent::Cancelled { track_id: key });
            return;
        }
        permit = Arc::clone(&batch.semaphore).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                error!(track_id = %key, "Batch semaphore closed");
                return;
            }
        },
    };

    if !inner
        .table
        .transition(key, execution, TaskState::Queued, TaskState::Running, |_| {})
    {
        // Removed by cancel_all between admission and permit
        inner.emit(DownloadEvent::Cancelled { track_id: key });
        return;
    }
    debug!(track_id = %key, batch_id = %batch.id, "Task running");

    let job = TaskJob {
        track: record.track.clone(),
        rules: batch.rules.clone(),
        credentials: batch.credentials.clone(),
        destination: Arc::clone(&batch.destination),
    };

    // The pipeline runs in its own task so a panic only fails this track
    let executor = Arc::clone(&inner.executor);
    let progress_inner = Arc::clone(inner);
    let run_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        executor
            .execute(&job, &run_cancel, |percent| {
                if progress_inner.table.raise_progress(key, execution, percent) {
                    progress_inner.emit(DownloadEvent::Progress {
                        track_id: key,
                        percent,
                    });
                }
            })
            .await
    });

    let outcome = match handle.await {
        Ok(result) => result,
        Err(join_error) => {
            error!(track_id = %key, error = %join_error, "Pipeline panicked");
            Err(ExecutionError::Panicked(join_error.to_string()))
        }
    };

    match outcome {
        Ok(report) => {
            let mut needs_final_progress = false;
            let completed = inner.table.transition(
                key,
                execution,
                TaskState::Running,
                TaskState::Completed,
                |r| {
                    needs_final_progress = r.progress_percent < 100;
                    r.progress_percent = 100;
                },
            );
            if completed {
                debug!(track_id = %key, format = %report.format, degraded = report.degraded.len(), "Task completed");
                if needs_final_progress {
                    inner.emit(DownloadEvent::Progress {
                        track_id: key,
                        percent: 100,
                    });
                }
                inner.emit(DownloadEvent::Completed { track_id: key });
            } else {
                inner.emit(DownloadEvent::Cancelled { track_id: key });
            }
        }
        Err(ExecutionError::Cancelled) => {
            inner.emit(DownloadEvent::Cancelled { track_id: key });
        }
        Err(failure) => {
            let reason = failure.reason();
            warn!(track_id = %key, reason = %reason, "Task failed");
            let failed = inner.table.transition(
                key,
                execution,
                TaskState::Running,
                TaskState::Failed,
                |r| r.failure_reason = Some(reason.clone()),
            );
            if failed {
                inner.emit(DownloadEvent::Failed {
                    track_id: key,
                    reason,
                });
            } else {
                inner.emit(DownloadEvent::Cancelled { track_id: key });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{Album, Artist};
    use crate::file::destination::LocalDirectory;

    fn record(id: i64, execution: u64, state: TaskState) -> TaskRecord {
        TaskRecord {
            track: Track {
                id,
                title: format!("Track {id}"),
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
            batch: Arc::new(BatchContext {
                id: BatchId::new(),
                rules: DownloadRules::default(),
                credentials: Credentials::anonymous(),
                destination: Arc::new(LocalDirectory::new(std::env::temp_dir())),
                semaphore: Arc::new(Semaphore::new(1)),
            }),
            execution,
            state,
            progress_percent: 0,
            failure_reason: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_admit_skips_in_flight() {
        let table = TaskTable::default();
        assert!(table.admit(record(1, 1, TaskState::Queued)));
        assert!(!table.admit(record(1, 2, TaskState::Queued)));
        assert_eq!(table.get(TrackKey(1)).unwrap().execution, 1);
    }

    #[test]
    fn test_admit_replaces_terminal() {
        let table = TaskTable::default();
        assert!(table.admit(record(1, 1, TaskState::Failed)));
        assert!(table.admit(record(1, 2, TaskState::Queued)));
        let current = table.get(TrackKey(1)).unwrap();
        assert_eq!(current.execution, 2);
        assert_eq!(current.state, TaskState::Queued);
    }

    #[test]
    fn test_transition_requires_matching_execution_and_state() {
        let table = TaskTable::default();
        table.admit(record(1, 5, TaskState::Queued));

        assert!(!table.transition(TrackKey(1), 4, TaskState::Queued, TaskState::Running, |_| {}));
        assert!(!table.transition(TrackKey(1), 5, TaskState::Running, TaskState::Completed, |_| {}));
        assert!(table.transition(TrackKey(1), 5, TaskState::Queued, TaskState::Running, |_| {}));
        assert_eq!(table.get(TrackKey(1)).unwrap().state, TaskState::Running);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let table = TaskTable::default();
        table.admit(record(1, 1, TaskState::Running));

        assert!(table.raise_progress(TrackKey(1), 1, 30));
        assert!(!table.raise_progress(TrackKey(1), 1, 30));
        assert!(!table.raise_progress(TrackKey(1), 1, 10));
        assert!(!table.raise_progress(TrackKey(1), 2, 90));
        assert_eq!(table.get(TrackKey(1)).unwrap().progress_percent, 30);
    }

    #[test]
    fn test_remove_all_in_flight() {
        let table = TaskTable::default();
        table.admit(record(1, 1, TaskState::Queued));
        table.admit(record(2, 2, TaskState::Running));
        table.admit(record(3, 3, TaskState::Completed));

        assert_eq!(table.remove_all(|r| r.state.is_in_flight()), 2);
        assert_eq!(table.snapshot().len(), 1);
    }
}
