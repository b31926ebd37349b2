//! Append-only journal backend.
//!
//! Every record lives in an in-memory [`UrlIndex`]; durability comes from a
//! newline-delimited JSON journal. Each create (and each soft-delete batch)
//! appends lines and syncs them to disk before the call returns. On open the
//! journal is replayed in file order, so a later line for the same short code
//! replaces an earlier one. A final line cut short by a crash is truncated
//! away before the first append, so new lines never land on a torn one.
//!
//! Redundant lines accumulate over time. [`JournalRepository::checkpoint`]
//! rewrites the file from the current index, one line per record, and
//! [`JournalCompactor`] runs it periodically.

use crate::index::{new_record, UrlIndex};
use async_trait::async_trait;
use burrow_core::error::Result;
use burrow_core::{Insertion, Lookup, Repository, ShortCode, StorageError, UrlRecord};
use burrow_generator::{Generator, RandomGenerator};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// One line of the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct JournalEntry {
    #[serde(default)]
    id: String,
    short_url: ShortCode,
    original_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    is_deleted: bool,
}

impl From<&UrlRecord> for JournalEntry {
    fn from(record: &UrlRecord) -> Self {
        Self {
            id: record.id.clone(),
            short_url: record.short_code.clone(),
            original_url: record.original_url.clone(),
            user_id: record.owner_id.clone(),
            is_deleted: record.deleted,
        }
    }
}

impl From<JournalEntry> for UrlRecord {
    fn from(entry: JournalEntry) -> Self {
        Self {
            id: entry.id,
            short_code: entry.short_url,
            original_url: entry.original_url,
            owner_id: entry.user_id,
            deleted: entry.is_deleted,
        }
    }
}

/// What replaying the journal on open found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Lines applied to the index.
    pub loaded: usize,
    /// Lines that could not be parsed and were skipped.
    pub skipped: usize,
    /// Bytes of an incomplete final line cut off the journal.
    pub truncated_bytes: u64,
}

/// How the journal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Clean,
    /// The last line is complete but lacks its newline.
    Unterminated,
    /// The last line is a partial write starting at `offset`.
    Torn { offset: u64, len: u64 },
}

/// Outcome of a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointStats {
    /// Records written to the new journal.
    pub records: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

struct JournalState {
    index: UrlIndex,
    /// `None` after a checkpoint renamed the journal but could not reopen it.
    file: Option<File>,
}

impl JournalState {
    /// The append handle, reopened on `path` if a checkpoint lost it.
    fn writer(&mut self, path: &Path) -> Result<&mut File> {
        if self.file.is_none() {
            self.file = Some(open_for_append(path)?);
            info!(path = %path.display(), "journal handle reopened");
        }
        self.file
            .as_mut()
            .ok_or_else(|| StorageError::Unavailable("journal handle unavailable".to_string()))
    }
}

/// File-backed implementation of the Repository trait.
///
/// Reads are served from memory. Writes hold the write lock across the
/// journal append and sync, so concurrent writers never interleave lines.
pub struct JournalRepository<G = RandomGenerator> {
    path: PathBuf,
    state: RwLock<JournalState>,
    generator: G,
    replay: ReplayStats,
}

impl<G> std::fmt::Debug for JournalRepository<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalRepository")
            .field("path", &self.path)
            .field("replay", &self.replay)
            .finish_non_exhaustive()
    }
}

impl JournalRepository<RandomGenerator> {
    /// Opens (or creates) the journal at `path` with a randomly seeded generator.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_generator(path, RandomGenerator::new())
    }
}

impl<G: Generator> JournalRepository<G> {
    /// Opens (or creates) the journal at `path` and replays it into memory.
    pub fn open_with_generator(path: impl Into<PathBuf>, generator: G) -> Result<Self> {
        let path = path.into();
        let mut file = open_for_append(&path)?;
        let (index, mut replay, tail) = replay(&path)?;

        match tail {
            Tail::Clean => {}
            Tail::Unterminated => append(&mut file, b"\n")?,
            Tail::Torn { offset, len } => {
                warn!(path = %path.display(), offset, len, "truncating torn journal tail");
                file.set_len(offset)?;
                file.sync_all()?;
                replay.truncated_bytes = len;
            }
        }

        info!(
            path = %path.display(),
            loaded = replay.loaded,
            skipped = replay.skipped,
            records = index.len(),
            "journal replayed"
        );

        Ok(Self {
            path,
            state: RwLock::new(JournalState {
                index,
                file: Some(file),
            }),
            generator,
            replay,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn replay_stats(&self) -> ReplayStats {
        self.replay
    }

    /// Number of records held, deleted ones included.
    pub fn len(&self) -> usize {
        self.state.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrites the journal from the in-memory index.
    ///
    /// The snapshot goes to a sibling `.compact` file which is synced and then
    /// renamed over the journal, so a crash leaves either the old or the new
    /// journal in place, never a truncated one. A failed checkpoint removes
    /// the `.compact` file and leaves the old journal in use.
    pub fn checkpoint(&self) -> Result<CheckpointStats> {
        let mut state = self.state.write();
        let bytes_before = fs::metadata(&self.path)?.len();
        let records = state.index.snapshot();

        let tmp_path = compact_path(&self.path);
        let replaced = write_snapshot(&tmp_path, &records)
            .and_then(|()| fs::rename(&tmp_path, &self.path).map_err(StorageError::from));
        if let Err(e) = replaced {
            let _ = fs::remove_file(&tmp_path);
            warn!(path = %self.path.display(), error = %e, "journal checkpoint aborted");
            return Err(e);
        }

        // the old handle now points at the unlinked journal
        state.file = None;
        let file = open_for_append(&self.path).inspect_err(|e| {
            error!(path = %self.path.display(), error = %e, "journal reopen after checkpoint failed");
        })?;
        state.file = Some(file);
        sync_parent_dir(&self.path)?;

        let bytes_after = fs::metadata(&self.path)?.len();
        info!(
            path = %self.path.display(),
            records = records.len(),
            bytes_before,
            bytes_after,
            "journal checkpointed"
        );

        Ok(CheckpointStats {
            records: records.len(),
            bytes_before,
            bytes_after,
        })
    }
}

impl<G: Generator> JournalRepository<G> {
    fn create_blocking(&self, owner_id: &str, original_url: &str) -> Result<Insertion> {
        let mut state = self.state.write();

        if let Some(existing) = state.index.code_for_url(original_url) {
            debug!(code = %existing, "url already shortened");
            return Ok(Insertion::Existing(existing.clone()));
        }

        let code = state.index.allocate(&self.generator)?;
        let record = new_record(code.clone(), owner_id, original_url);
        let line = encode_line(&JournalEntry::from(&record))?;
        append(state.writer(&self.path)?, &line).inspect_err(|e| {
            error!(path = %self.path.display(), code = %code, error = %e, "journal append failed");
        })?;

        state.index.upsert(record);
        debug!(code = %code, owner = owner_id, "short code created");
        Ok(Insertion::Created(code))
    }

    fn delete_batch_blocking(&self, owner_id: &str, codes: &[ShortCode]) -> Result<u64> {
        let mut state = self.state.write();
        let flipped = state.index.deletable(owner_id, codes);
        if flipped.is_empty() {
            return Ok(0);
        }

        let mut lines = Vec::new();
        for record in &flipped {
            lines.extend(encode_line(&JournalEntry::from(record))?);
        }
        append(state.writer(&self.path)?, &lines).inspect_err(|e| {
            error!(path = %self.path.display(), error = %e, "journal append failed");
        })?;

        let count = flipped.len() as u64;
        state
            .index
            .mark_deleted(flipped.into_iter().map(|record| record.short_code));
        debug!(owner = owner_id, requested = codes.len(), deleted = count, "soft-deleted batch");
        Ok(count)
    }
}

#[async_trait]
impl<G: Generator> Repository for JournalRepository<G> {
    async fn create(&self, owner_id: &str, original_url: &str) -> Result<Insertion> {
        run_blocking(|| self.create_blocking(owner_id, original_url))
    }

    async fn get(&self, code: &ShortCode) -> Result<Lookup> {
        trace!(code = %code, "looking up short code");
        Ok(self.state.read().index.lookup(code))
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        Ok(self.state.read().index.list_by_owner(owner_id))
    }

    async fn delete_batch(&self, owner_id: &str, codes: &[ShortCode]) -> Result<u64> {
        run_blocking(|| self.delete_batch_blocking(owner_id, codes))
    }

    async fn close(&self) -> Result<()> {
        run_blocking(|| self.checkpoint()).map(|_| ())
    }
}

/// Periodically checkpoints a [`JournalRepository`].
pub struct JournalCompactor<G> {
    repository: Arc<JournalRepository<G>>,
    interval: Duration,
}

/// Handle to a running compactor task.
pub struct CompactorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CompactorHandle {
    /// Signals the compactor to stop and waits for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "journal compactor task failed");
        }
    }
}

impl<G: Generator> JournalCompactor<G> {
    pub fn new(repository: Arc<JournalRepository<G>>, interval: Duration) -> Self {
        Self {
            repository,
            interval,
        }
    }

    /// Spawns the compactor on the current Tokio runtime.
    pub fn spawn(self) -> CompactorHandle {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(rx).await });
        CompactorHandle { shutdown, task }
    }

    /// Runs checkpoints every interval until `shutdown` turns `true` or its
    /// sender is dropped. A failed checkpoint is logged and retried on the
    /// next tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(path = %self.repository.path().display(), interval = ?self.interval, "journal compactor started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let repository = Arc::clone(&self.repository);
                    match tokio::task::spawn_blocking(move || repository.checkpoint()).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!(error = %e, "journal checkpoint failed"),
                        Err(e) => warn!(error = %e, "journal checkpoint task panicked"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("journal compactor stopping");
                        break;
                    }
                }
            }
        }
    }
}

fn open_for_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StorageError::Io(format!("failed to open journal {}: {e}", path.display())))
}

fn replay(path: &Path) -> Result<(UrlIndex, ReplayStats, Tail)> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut index = UrlIndex::default();
    let mut stats = ReplayStats::default();
    let mut tail = Tail::Clean;
    let mut offset = 0u64;
    let mut number = 0usize;
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            break;
        }
        number += 1;
        let start = offset;
        offset += read as u64;
        let terminated = line.last() == Some(&b'\n');

        if line.iter().all(u8::is_ascii_whitespace) {
            if !terminated {
                tail = Tail::Unterminated;
            }
            continue;
        }
        match serde_json::from_slice::<JournalEntry>(&line) {
            Ok(entry) => {
                index.upsert(entry.into());
                stats.loaded += 1;
                if !terminated {
                    tail = Tail::Unterminated;
                }
            }
            Err(e) => {
                warn!(path = %path.display(), line = number, error = %e, "skipping malformed journal line");
                stats.skipped += 1;
                if !terminated {
                    tail = Tail::Torn {
                        offset: start,
                        len: read as u64,
                    };
                }
            }
        }
    }

    Ok((index, stats, tail))
}

fn write_snapshot(path: &Path, records: &[UrlRecord]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for record in records {
        writer.write_all(&encode_line(&JournalEntry::from(record))?)?;
    }
    let file = writer
        .into_inner()
        .map_err(|e| StorageError::Io(e.error().to_string()))?;
    file.sync_all()?;
    Ok(())
}

/// Runs blocking journal I/O, moving the worker thread out of the scheduler
/// first when on a multi-threaded runtime.
fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

fn encode_line(entry: &JournalEntry) -> Result<Vec<u8>> {
    let mut line =
        serde_json::to_vec(entry).map_err(|e| StorageError::InvalidData(e.to_string()))?;
    line.push(b'\n');
    Ok(line)
}

fn append(file: &mut File, bytes: &[u8]) -> Result<()> {
    file.write_all(bytes)?;
    file.sync_data()?;
    Ok(())
}

fn compact_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".compact");
    PathBuf::from(name)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}
