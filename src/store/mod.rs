//! Job and record persistence
//!
//! Two tables, jobs and records, each held in memory behind a lock and
//! mirrored to a JSON file in the data directory. Job status changes are
//! flushed before they return, and a failed flush restores the previous row,
//! so a reported transition is always on disk. Record rows and running-job
//! counters are write-behind: they mark their table dirty and reach disk on
//! the next [`Store::flush`], which the daemon runs on a blocking thread.

mod jobs;
mod records;

pub use jobs::{JobFilter, JobStore};
pub use records::{RecordFilter, RecordStore};

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::types::JobStatus;

/// Errors from the store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },
    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: &'static str, id: Uuid },
    #[error("job {id}: invalid transition {from} -> {to}")]
    InvalidTransition { id: Uuid, from: JobStatus, to: JobStatus },
    #[error("job {id} is {status}; counters are frozen")]
    NotRunning { id: Uuid, status: JobStatus },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {0}: {1}")]
    Encode(&'static str, serde_json::Error),
    #[error("failed to parse {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("background flush failed: {0}")]
    Flush(String),
}

#[derive(Serialize, Deserialize)]
struct SavedTable<R> {
    version: u32,
    rows: R,
}

/// When a table's writes reach disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    /// Flushed before the write returns
    Immediate,
    /// Left dirty for the next [`Table::flush`]
    Deferred,
}

/// One persisted table of rows keyed by id
pub(crate) struct Table<T> {
    name: &'static str,
    rows: RwLock<HashMap<Uuid, T>>,
    path: Option<PathBuf>,
    mode: WriteMode,
    /// Held while the file is written; always taken before `rows`
    file: Mutex<()>,
    /// Bumped on every change
    changes: AtomicU64,
    /// Value of `changes` covered by the file on disk
    saved: AtomicU64,
}

impl<T> Table<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    fn in_memory(name: &'static str, mode: WriteMode) -> Self {
        Self::with_rows(name, HashMap::new(), None, mode)
    }

    fn with_rows(name: &'static str, rows: HashMap<Uuid, T>, path: Option<PathBuf>, mode: WriteMode) -> Self {
        Self {
            name,
            rows: RwLock::new(rows),
            path,
            mode,
            file: Mutex::new(()),
            changes: AtomicU64::new(0),
            saved: AtomicU64::new(0),
        }
    }

    fn open(name: &'static str, path: PathBuf, mode: WriteMode) -> Result<Self, StoreError> {
        let rows = if path.exists() {
            let data = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            let saved: SavedTable<HashMap<Uuid, T>> = serde_json::from_str(&data).map_err(|source| StoreError::Decode {
                path: path.clone(),
                source,
            })?;
            info!("Loaded {} table with {} rows", name, saved.rows.len());
            saved.rows
        } else {
            HashMap::new()
        };
        Ok(Self::with_rows(name, rows, Some(path), mode))
    }

    fn encode(&self, rows: &HashMap<Uuid, T>) -> Result<String, StoreError> {
        serde_json::to_string(&SavedTable { version: 1, rows }).map_err(|e| StoreError::Encode(self.name, e))
    }

    fn write_file(&self, path: &Path, data: String) -> Result<(), StoreError> {
        let tmp = path.with_extension("json.tmp");
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        std::fs::write(&tmp, data).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)
    }

    /// File guard for a write about to flush in place
    fn immediate_guard(&self, mode: WriteMode) -> Option<parking_lot::MutexGuard<'_, ()>> {
        (mode == WriteMode::Immediate && self.path.is_some()).then(|| self.file.lock())
    }

    /// Note a change to `rows` and, for immediate writes, put it on disk.
    /// The caller holds the file guard and the write lock.
    fn commit(&self, rows: &HashMap<Uuid, T>, mode: WriteMode) -> Result<(), StoreError> {
        let change = self.changes.fetch_add(1, Ordering::AcqRel) + 1;
        let Some(path) = self.path.as_deref().filter(|_| mode == WriteMode::Immediate) else {
            return Ok(());
        };
        let data = self.encode(rows)?;
        self.write_file(path, data)?;
        self.saved.store(change, Ordering::Release);
        Ok(())
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.path.is_some() && self.changes.load(Ordering::Acquire) != self.saved.load(Ordering::Acquire)
    }

    /// Write the table out if it changed since the last flush. Rows are
    /// encoded under the read lock; the file is written after it is dropped.
    /// Returns whether a file was written.
    pub(crate) fn flush(&self) -> Result<bool, StoreError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(false);
        };
        let _file = self.file.lock();
        let (data, change) = {
            let rows = self.rows.read();
            let change = self.changes.load(Ordering::Acquire);
            if change == self.saved.load(Ordering::Acquire) {
                return Ok(false);
            }
            (self.encode(&rows)?, change)
        };
        self.write_file(path, data)?;
        self.saved.store(change, Ordering::Release);
        Ok(true)
    }

    pub(crate) fn get(&self, id: &Uuid) -> Option<T> {
        self.rows.read().get(id).cloned()
    }

    /// Look at one row in place
    pub(crate) fn peek<R>(&self, id: &Uuid, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.rows.read().get(id).map(f)
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Snapshot of the rows matching `pred`
    pub(crate) fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows.read().values().filter(|r| pred(r)).cloned().collect()
    }

    /// Walk every row under the read lock without copying
    pub(crate) fn scan<R>(&self, f: impl FnOnce(&mut dyn Iterator<Item = &T>) -> R) -> R {
        let rows = self.rows.read();
        f(&mut rows.values())
    }

    pub(crate) fn insert(&self, id: Uuid, row: T) -> Result<(), StoreError> {
        let _file = self.immediate_guard(self.mode);
        let mut rows = self.rows.write();
        if rows.contains_key(&id) {
            return Err(StoreError::AlreadyExists { kind: self.name, id });
        }
        rows.insert(id, row);
        if let Err(e) = self.commit(&rows, self.mode) {
            rows.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    /// Insert or overwrite one row
    pub(crate) fn put(&self, id: Uuid, row: T) -> Result<(), StoreError> {
        let _file = self.immediate_guard(self.mode);
        let mut rows = self.rows.write();
        let previous = rows.insert(id, row);
        if let Err(e) = self.commit(&rows, self.mode) {
            match previous {
                Some(previous) => rows.insert(id, previous),
                None => rows.remove(&id),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Read-modify-write of one row. `f` may refuse the change by returning
    /// an error, in which case nothing is written.
    pub(crate) fn update<F>(&self, id: &Uuid, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut T) -> Result<(), StoreError>,
    {
        self.update_with(id, self.mode, f)
    }

    /// [`Table::update`] that leaves the change for the next flush
    pub(crate) fn update_deferred<F>(&self, id: &Uuid, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut T) -> Result<(), StoreError>,
    {
        self.update_with(id, WriteMode::Deferred, f)
    }

    fn update_with<F>(&self, id: &Uuid, mode: WriteMode, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut T) -> Result<(), StoreError>,
    {
        let _file = self.immediate_guard(mode);
        let mut rows = self.rows.write();
        let row = rows.get_mut(id).ok_or(StoreError::NotFound { kind: self.name, id: *id })?;
        let previous = row.clone();
        f(row)?;
        let updated = row.clone();
        if let Err(e) = self.commit(&rows, mode) {
            rows.insert(*id, previous);
            return Err(e);
        }
        Ok(updated)
    }

    /// Apply `f` to every row matching `pred` in one write; returns how many
    /// changed
    pub(crate) fn update_where(&self, pred: impl Fn(&T) -> bool, f: impl Fn(&mut T)) -> Result<usize, StoreError> {
        let _file = self.immediate_guard(self.mode);
        let mut rows = self.rows.write();
        let mut previous: Vec<(Uuid, T)> = Vec::new();
        for (id, row) in rows.iter_mut().filter(|(_, r)| pred(r)) {
            previous.push((*id, row.clone()));
            f(row);
        }
        if previous.is_empty() {
            return Ok(0);
        }
        let changed = previous.len();
        if let Err(e) = self.commit(&rows, self.mode) {
            rows.extend(previous);
            return Err(e);
        }
        Ok(changed)
    }

    /// Delete every row matching `pred`; returns how many went
    pub(crate) fn remove_where(&self, pred: impl Fn(&T) -> bool) -> Result<usize, StoreError> {
        let _file = self.immediate_guard(self.mode);
        let mut rows = self.rows.write();
        let doomed: Vec<(Uuid, T)> = rows
            .iter()
            .filter(|(_, r)| pred(r))
            .map(|(id, r)| (*id, r.clone()))
            .collect();
        let removed = doomed.len();
        if removed == 0 {
            return Ok(0);
        }
        for (id, _) in &doomed {
            rows.remove(id);
        }
        if let Err(e) = self.commit(&rows, self.mode) {
            rows.extend(doomed);
            return Err(e);
        }
        Ok(removed)
    }
}

/// Jobs and records, shared by the worker pool and the HTTP API
pub struct Store {
    pub jobs: JobStore,
    pub records: RecordStore,
    data_dir: Option<PathBuf>,
    /// Message of the last failed flush, cleared by the next good one
    flush_error: Mutex<Option<String>>,
}

impl Store {
    /// Open (or create) the store under `data_dir`
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir).map_err(|source| StoreError::Io {
            path: data_dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            jobs: JobStore::new(Table::open("job", data_dir.join("jobs.json"), WriteMode::Immediate)?),
            records: RecordStore::new(Table::open(
                "record",
                data_dir.join("records.json"),
                WriteMode::Deferred,
            )?),
            data_dir: Some(data_dir.to_path_buf()),
            flush_error: Mutex::new(None),
        })
    }

    /// Store without files, for tests and one-shot runs
    pub fn in_memory() -> Self {
        Self {
            jobs: JobStore::new(Table::in_memory("job", WriteMode::Immediate)),
            records: RecordStore::new(Table::in_memory("record", WriteMode::Deferred)),
            data_dir: None,
            flush_error: Mutex::new(None),
        }
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Whether either table holds changes not yet on disk
    pub fn is_dirty(&self) -> bool {
        self.jobs.is_dirty() || self.records.is_dirty()
    }

    /// Write out every table with unflushed changes. Blocks on file I/O;
    /// async callers go through [`Store::flush_blocking`].
    pub fn flush(&self) -> Result<(), StoreError> {
        let result = self.jobs.flush().and_then(|jobs| Ok(jobs | self.records.flush()?));
        let mut last = self.flush_error.lock();
        match result {
            Ok(wrote) => {
                if wrote {
                    debug!("Flushed store to disk");
                }
                *last = None;
                Ok(())
            }
            Err(e) => {
                *last = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// [`Store::flush`] on the blocking pool
    pub async fn flush_blocking(self: &Arc<Self>) -> Result<(), StoreError> {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.flush())
            .await
            .map_err(|e| StoreError::Flush(e.to_string()))?
    }

    /// Flush dirty tables every `every` until shutdown, then once more
    pub fn start_flusher(self: &Arc<Self>, every: Duration, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if !store.is_dirty() {
                            continue;
                        }
                        if let Err(e) = store.flush_blocking().await {
                            error!("Store flush failed, will retry: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            if let Err(e) = store.flush_blocking().await {
                error!("Final store flush failed: {}", e);
            }
        })
    }

    /// Round-trip latency of a read against both tables, or an error when
    /// the data directory has gone away or the last flush failed.
    pub fn ping(&self) -> Result<Duration, StoreError> {
        let start = Instant::now();
        if let Some(message) = self.flush_error.lock().clone() {
            return Err(StoreError::Flush(message));
        }
        if let Some(dir) = &self.data_dir {
            std::fs::metadata(dir).map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        let _ = (self.jobs.len(), self.records.len());
        Ok(start.elapsed())
    }
}
