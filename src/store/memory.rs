//! In-memory [`ProcessStore`], optionally backed by a JSON snapshot file.
//!
//! Without a snapshot every operation runs under one async mutex, which makes
//! multi-record writes atomic and the claim a true compare-and-swap.
//!
//! With a snapshot the file is the source of truth, so several processes
//! (a running worker and the CLI, or several workers) can share it. Every
//! operation takes an advisory lock on a sidecar `.lock` file (shared for
//! reads, exclusive for writes), reloads the file, and writes updates back
//! through a temp file and a rename before the lock is released.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ProcessStore, StoreError};
use crate::audit::{DecisionRecord, EventRecord};
use crate::state_machine::{ProcessState, StageStatus};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    processes: HashMap<Uuid, ProcessState>,
    decisions: Vec<DecisionRecord>,
    events: Vec<EventRecord>,
}

#[derive(Debug, Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct Snapshot {
    path: PathBuf,
    lock_path: PathBuf,
}

impl Snapshot {
    fn new(path: PathBuf) -> Self {
        Self {
            lock_path: path.with_extension("lock"),
            path,
        }
    }

    /// Blocks (off the runtime) until the lock is held; released on drop.
    async fn lock(&self, mode: LockMode) -> Result<File, StoreError> {
        let lock_path = self.lock_path.clone();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&lock_path)?;
            match mode {
                LockMode::Shared => FileExt::lock_shared(&file)?,
                LockMode::Exclusive => FileExt::lock_exclusive(&file)?,
            }
            Ok(file)
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(file)
    }

    async fn load(&self) -> Result<Tables, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Tables::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, tables: &Tables) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(tables)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    snapshot: Option<Snapshot>,
}

impl MemoryStore {
    /// A store that lives only as long as the process.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store backed by the JSON snapshot at `path`. The file is created on
    /// the first write; an existing file must parse.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let snapshot = Snapshot::new(path.as_ref().to_path_buf());
        let tables = {
            let _lock = snapshot.lock(LockMode::Shared).await?;
            snapshot.load().await?
        };
        tracing::debug!(
            path = %snapshot.path.display(),
            processes = tables.processes.len(),
            "opened process store snapshot"
        );
        Ok(Self {
            tables: Mutex::new(tables),
            snapshot: Some(snapshot),
        })
    }

    /// Run `write` against the current tables and persist the result. A
    /// failed write leaves both the file and the local copy untouched.
    async fn write<T>(
        &self,
        write: impl FnOnce(&mut Tables) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(snapshot) = &self.snapshot else {
            return write(&mut *tables);
        };

        let _lock = snapshot.lock(LockMode::Exclusive).await?;
        let mut current = snapshot.load().await?;
        let out = write(&mut current)?;
        if let Err(e) = snapshot.save(&current).await {
            tracing::error!(path = %snapshot.path.display(), error = %e, "snapshot write failed");
            return Err(e);
        }
        *tables = current;
        Ok(out)
    }

    async fn read<T>(&self, read: impl FnOnce(&Tables) -> T) -> Result<T, StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(snapshot) = &self.snapshot {
            let _lock = snapshot.lock(LockMode::Shared).await?;
            *tables = snapshot.load().await?;
        }
        Ok(read(&*tables))
    }
}

fn expect_status(
    tables: &Tables,
    id: Uuid,
    expected: StageStatus,
) -> Result<(), StoreError> {
    let stored = tables.processes.get(&id).ok_or(StoreError::NotFound(id))?;
    if stored.stage_status != expected {
        return Err(StoreError::Conflict {
            id,
            expected,
            found: stored.stage_status,
        });
    }
    Ok(())
}

/// The stored process, if it is still held under `claim`.
fn claimed_mut(tables: &mut Tables, id: Uuid, claim: Uuid) -> Result<&mut ProcessState, StoreError> {
    let stored = tables.processes.get_mut(&id).ok_or(StoreError::NotFound(id))?;
    if stored.stage_status != StageStatus::InProgress || stored.claim_token != Some(claim) {
        return Err(StoreError::ClaimLost(id));
    }
    Ok(stored)
}

fn sorted_by_time<T: Clone>(
    records: &[T],
    keep: impl Fn(&T) -> bool,
    at: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    let mut out: Vec<T> = records.iter().filter(|r| keep(*r)).cloned().collect();
    // Stable: records with equal timestamps keep insertion order.
    out.sort_by_key(|r| at(r));
    out
}

#[async_trait]
impl ProcessStore for MemoryStore {
    async fn create(&self, state: &ProcessState, event: &EventRecord) -> Result<(), StoreError> {
        self.write(|t| {
            if t.processes.contains_key(&state.id) {
                return Err(StoreError::Duplicate(state.id));
            }
            t.processes.insert(state.id, state.clone());
            t.events.push(event.clone());
            Ok(())
        })
        .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<ProcessState>, StoreError> {
        self.read(|t| t.processes.get(&id).cloned()).await
    }

    async fn try_claim(
        &self,
        id: Uuid,
        expected: StageStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<ProcessState>, StoreError> {
        self.write(|t| {
            let Some(stored) = t.processes.get_mut(&id) else {
                return Err(StoreError::NotFound(id));
            };
            // A step committed since the scan leaves the process either in
            // another status or scheduled in the future.
            if stored.stage_status != expected || !stored.is_due(now) {
                return Ok(None);
            }
            stored.claim(now);
            Ok(Some(stored.clone()))
        })
        .await
    }

    async fn commit_step(
        &self,
        claim: Uuid,
        state: &ProcessState,
        decision: Option<&DecisionRecord>,
        event: &EventRecord,
    ) -> Result<(), StoreError> {
        self.write(|t| {
            let stored = claimed_mut(t, state.id, claim)?;
            *stored = ProcessState {
                claim_token: None,
                ..state.clone()
            };
            if let Some(decision) = decision {
                t.decisions.push(decision.clone());
            }
            t.events.push(event.clone());
            Ok(())
        })
        .await
    }

    async fn release_claim(
        &self,
        id: Uuid,
        claim: Uuid,
        reason: &str,
        retry_at: DateTime<Utc>,
        event: &EventRecord,
    ) -> Result<(), StoreError> {
        self.write(|t| {
            claimed_mut(t, id, claim)?.block(reason, retry_at, event.created_at);
            t.events.push(event.clone());
            Ok(())
        })
        .await
    }

    async fn replace_if(
        &self,
        state: &ProcessState,
        expected: StageStatus,
        event: &EventRecord,
    ) -> Result<(), StoreError> {
        self.write(|t| {
            if expected == StageStatus::InProgress {
                let found = t
                    .processes
                    .get(&state.id)
                    .map(|p| p.stage_status)
                    .ok_or(StoreError::NotFound(state.id))?;
                return Err(StoreError::Conflict {
                    id: state.id,
                    expected,
                    found,
                });
            }
            expect_status(t, state.id, expected)?;
            t.processes.insert(state.id, state.clone());
            t.events.push(event.clone());
            Ok(())
        })
        .await
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ProcessState>, StoreError> {
        self.read(|t| {
            let mut due: Vec<ProcessState> = t
                .processes
                .values()
                .filter(|p| p.is_due(now))
                .cloned()
                .collect();
            due.sort_by_key(|p| (p.next_scheduled_action, p.created_at));
            due.truncate(limit);
            due
        })
        .await
    }

    async fn stale_claims(&self, before: DateTime<Utc>) -> Result<Vec<ProcessState>, StoreError> {
        self.read(|t| {
            t.processes
                .values()
                .filter(|p| p.stage_status == StageStatus::InProgress && p.updated_at < before)
                .cloned()
                .collect()
        })
        .await
    }

    async fn escalated(&self) -> Result<Vec<ProcessState>, StoreError> {
        self.read(|t| {
            let mut out: Vec<ProcessState> = t
                .processes
                .values()
                .filter(|p| p.stage_status == StageStatus::Escalated && p.requires_human_review)
                .cloned()
                .collect();
            out.sort_by_key(|p| p.updated_at);
            out
        })
        .await
    }

    async fn active(&self) -> Result<Vec<ProcessState>, StoreError> {
        self.read(|t| {
            let mut out: Vec<ProcessState> = t
                .processes
                .values()
                .filter(|p| {
                    matches!(
                        p.stage_status,
                        StageStatus::Pending | StageStatus::InProgress | StageStatus::Blocked
                    )
                })
                .cloned()
                .collect();
            // In-progress rows carry their last schedule; None sorts first.
            out.sort_by_key(|p| (p.next_scheduled_action, p.created_at));
            out
        })
        .await
    }

    async fn decisions_for(&self, id: Uuid) -> Result<Vec<DecisionRecord>, StoreError> {
        self.read(|t| sorted_by_time(&t.decisions, |d| d.process_id == id, |d| d.created_at))
            .await
    }

    async fn events_for(&self, id: Uuid) -> Result<Vec<EventRecord>, StoreError> {
        self.read(|t| sorted_by_time(&t.events, |e| e.process_id == id, |e| e.created_at))
            .await
    }
}
