//! Capacity-bounded on-disk cache with LRU eviction.
//!
//! # File Layout
//!
//! ```text
//! {cache_dir}/{sha256(key)}.bin     entry data
//! {cache_dir}/{sha256(key)}.tmp     in-progress write (renamed into place)
//! {cache_dir}/journal.jsonl         append-only index journal
//! ```
//!
//! # Recovery
//!
//! On open the journal is replayed to restore entries and recency. If the
//! journal is missing or unreadable the index is rebuilt from the `.bin` files,
//! ordered by modification time. Either way the result is reconciled against
//! the directory: entries whose file vanished are dropped and files the journal
//! never saw are adopted, so no written byte goes unaccounted.
//!
//! # Concurrency
//!
//! The index sits behind one mutex. File reads and writes happen outside the
//! lock, so distinct keys do their I/O in parallel. Two writers racing on the
//! same key resolve as first-writer-wins.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::journal::{Journal, JournalRecord};
use super::CacheKey;
use crate::bitmap::{DecodedImage, ImageCodec};
use crate::error::CacheError;

/// Default disk cache capacity: 10MB
pub const DEFAULT_DISK_CACHE_CAPACITY: u64 = 10 * 1024 * 1024;

/// Extra journal records tolerated beyond twice the entry count before the
/// journal is compacted.
const COMPACTION_SLACK: u64 = 256;

const DATA_EXTENSION: &str = "bin";
const TEMP_EXTENSION: &str = "tmp";

// =============================================================================
// Index
// =============================================================================

#[derive(Debug, Clone)]
struct IndexEntry {
    len: u64,
    tick: u64,
    key: Option<String>,
}

#[derive(Debug, Default)]
struct IndexState {
    /// Entries by file stem
    entries: HashMap<String, IndexEntry>,
    /// Recency order: lowest tick is least recently used
    order: BTreeMap<u64, String>,
    total_bytes: u64,
    next_tick: u64,
    /// Stems with a write in progress
    pending: HashSet<String>,
    /// Records in the journal file since the last rewrite
    journal_records: u64,
}

impl IndexState {
    fn apply(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::Insert { stem, key, len } => self.insert(stem, key, len),
            JournalRecord::Touch { stem } => self.touch(&stem),
            JournalRecord::Remove { stem } => {
                self.remove(&stem);
            }
        }
    }

    fn insert(&mut self, stem: String, key: Option<String>, len: u64) {
        self.remove(&stem);
        let tick = self.bump();
        self.order.insert(tick, stem.clone());
        self.total_bytes = self.total_bytes.saturating_add(len);
        self.entries.insert(stem, IndexEntry { len, tick, key });
    }

    fn touch(&mut self, stem: &str) {
        let tick = self.bump();
        if let Some(entry) = self.entries.get_mut(stem) {
            self.order.remove(&entry.tick);
            entry.tick = tick;
            self.order.insert(tick, stem.to_string());
        }
    }

    fn remove(&mut self, stem: &str) -> Option<IndexEntry> {
        let entry = self.entries.remove(stem)?;
        self.order.remove(&entry.tick);
        self.total_bytes = self.total_bytes.saturating_sub(entry.len);
        Some(entry)
    }

    fn least_recent(&self) -> Option<String> {
        self.order.values().next().cloned()
    }

    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    /// Records describing the current state, oldest first.
    fn snapshot(&self) -> Vec<JournalRecord> {
        self.order
            .values()
            .filter_map(|stem| {
                self.entries.get(stem).map(|entry| JournalRecord::Insert {
                    stem: stem.clone(),
                    key: entry.key.clone(),
                    len: entry.len,
                })
            })
            .collect()
    }
}

// =============================================================================
// Disk Cache
// =============================================================================

/// Persistent key to blob store bounded by total bytes on disk.
///
/// The image API compresses with the configured [`ImageCodec`]; the byte API
/// stores blobs verbatim (used for raw downloads).
pub struct DiskCache {
    directory: PathBuf,
    max_size: u64,
    codec: ImageCodec,
    journal: Journal,
    state: Mutex<IndexState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DiskCache {
    /// Open (or create) a cache in `directory` with the default codec.
    ///
    /// Opening the same directory again recovers the same entries.
    pub fn open(directory: impl Into<PathBuf>, max_size: u64) -> Result<Self, CacheError> {
        Self::open_with_codec(directory, max_size, ImageCodec::default())
    }

    /// Open (or create) a cache in `directory` compressing images with `codec`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the directory cannot be created or listed. A
    /// damaged journal is rebuilt rather than reported.
    pub fn open_with_codec(
        directory: impl Into<PathBuf>,
        max_size: u64,
        codec: ImageCodec,
    ) -> Result<Self, CacheError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        let cache = Self {
            journal: Journal::new(&directory),
            directory,
            max_size,
            codec,
            state: Mutex::new(IndexState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };
        cache.recover()?;
        Ok(cache)
    }

    // -------------------------------------------------------------------------
    // Image API
    // -------------------------------------------------------------------------

    /// Read and decode the image stored under `key`.
    ///
    /// The stored blob is the full image as it was cached; callers wanting a
    /// different size resize the result. An entry that no longer decodes is
    /// dropped from the cache.
    pub fn get(&self, key: &CacheKey) -> Result<Option<DecodedImage>, CacheError> {
        let Some(data) = self.get_bytes(key)? else {
            return Ok(None);
        };

        match self.codec.decode(&data) {
            Ok(image) => Ok(Some(image)),
            Err(e) => {
                warn!(key = %key, error = %e, "Dropping undecodable disk cache entry");
                self.remove(key)?;
                Err(e.into())
            }
        }
    }

    /// Compress and store `image` under `key`.
    ///
    /// Returns `Ok(false)` without doing any I/O if the key is already stored
    /// or another writer is storing it right now.
    pub fn put(&self, key: &CacheKey, image: &DecodedImage) -> Result<bool, CacheError> {
        if self.contains_or_pending(key) {
            return Ok(false);
        }
        let data = self.codec.encode(image)?;
        self.put_bytes(key, &data)
    }

    // -------------------------------------------------------------------------
    // Byte API
    // -------------------------------------------------------------------------

    /// Read the raw blob stored under `key`, marking it as recently used.
    pub fn get_bytes(&self, key: &CacheKey) -> Result<Option<Bytes>, CacheError> {
        let stem = key.file_stem();
        {
            let mut state = self.lock();
            if !state.entries.contains_key(&stem) {
                drop(state);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            state.touch(&stem);
            self.journal_locked(&mut state, &JournalRecord::Touch { stem: stem.clone() });
        }

        match fs::read(self.data_path(&stem)) {
            Ok(data) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, bytes = data.len(), "Disk cache hit");
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Cleared or deleted underneath us. A writer may have stored
                // the key again since, so only drop the row if the file is
                // still gone.
                let mut state = self.lock();
                let path = self.data_path(&stem);
                if !path.exists() && state.remove(&stem).is_some() {
                    self.journal_locked(&mut state, &JournalRecord::Remove { stem });
                }
                drop(state);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Store `data` under `key`.
    ///
    /// The blob is written to a temp file and renamed into place before the
    /// index records it, so a crash never leaves a half-written entry. After
    /// the insert, least-recently-used entries are evicted until the total
    /// fits the capacity.
    ///
    /// # Errors
    ///
    /// [`CacheError::CapacityExceeded`] if `data` alone is larger than the
    /// cache, or [`CacheError::Io`] if the write fails.
    pub fn put_bytes(&self, key: &CacheKey, data: &[u8]) -> Result<bool, CacheError> {
        let len = data.len() as u64;
        if len > self.max_size {
            return Err(CacheError::CapacityExceeded {
                size: len,
                capacity: self.max_size,
            });
        }

        let stem = key.file_stem();
        {
            let mut state = self.lock();
            if state.entries.contains_key(&stem) || !state.pending.insert(stem.clone()) {
                return Ok(false);
            }
        }

        let written = self.write_atomic(&stem, data);

        let mut state = self.lock();
        state.pending.remove(&stem);
        written?;

        state.insert(stem.clone(), Some(key.to_string()), len);
        self.journal_locked(
            &mut state,
            &JournalRecord::Insert {
                stem,
                key: Some(key.to_string()),
                len,
            },
        );
        debug!(key = %key, bytes = len, total = state.total_bytes, "Stored in disk cache");

        self.evict_locked(&mut state);
        self.compact_if_needed(&mut state);
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Whether `key` is stored.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().entries.contains_key(&key.file_stem())
    }

    /// Delete one entry. Returns whether it existed.
    pub fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let stem = key.file_stem();
        let mut state = self.lock();
        if state.remove(&stem).is_none() {
            return Ok(false);
        }
        remove_file_if_exists(&self.data_path(&stem))?;
        self.journal_locked(&mut state, &JournalRecord::Remove { stem });
        Ok(true)
    }

    /// Delete every entry and reset size accounting.
    ///
    /// Safe to call while reads and writes are in flight: a read racing the
    /// clear either returns the old data or misses, and a write racing it
    /// lands as a fresh entry after the clear.
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut state = self.lock();

        for entry in fs::read_dir(&self.directory)?.flatten() {
            let path = entry.path();
            if !has_extension(&path, DATA_EXTENSION) {
                continue;
            }
            // A pending write may already have renamed its file into place; it
            // is indexed as soon as the writer gets the lock back.
            let pending = path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|stem| state.pending.contains(stem));
            if !pending {
                remove_file_if_exists(&path)?;
            }
        }

        state.entries.clear();
        state.order.clear();
        state.total_bytes = 0;
        self.rewrite_journal_locked(&mut state);

        info!(dir = %self.directory.display(), "Disk cache cleared");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Total bytes of all stored entries.
    pub fn size(&self) -> u64 {
        self.lock().total_bytes
    }

    pub fn capacity(&self) -> u64 {
        self.max_size
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn codec(&self) -> ImageCodec {
        self.codec
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn contains_or_pending(&self, key: &CacheKey) -> bool {
        let stem = key.file_stem();
        let state = self.lock();
        state.entries.contains_key(&stem) || state.pending.contains(&stem)
    }

    fn recover(&self) -> Result<(), CacheError> {
        let mut state = self.lock();

        match self.journal.replay() {
            Ok(Some(records)) => {
                for record in records {
                    state.apply(record);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    dir = %self.directory.display(),
                    error = %e,
                    "Disk cache journal unreadable, rebuilding from directory"
                );
                *state = IndexState::default();
            }
        }

        self.reconcile_locked(&mut state)?;
        self.evict_locked(&mut state);
        self.rewrite_journal_locked(&mut state);

        info!(
            dir = %self.directory.display(),
            entries = state.entries.len(),
            bytes = state.total_bytes,
            capacity = self.max_size,
            "Disk cache opened"
        );
        Ok(())
    }

    /// Bring the index in line with the files actually on disk.
    fn reconcile_locked(&self, state: &mut IndexState) -> Result<(), CacheError> {
        let mut on_disk: HashMap<String, (u64, SystemTime)> = HashMap::new();

        for entry in fs::read_dir(&self.directory)?.flatten() {
            let path = entry.path();
            if has_extension(&path, TEMP_EXTENSION) {
                debug!(path = %path.display(), "Removing interrupted write");
                let _ = fs::remove_file(&path);
                continue;
            }
            if !has_extension(&path, DATA_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            on_disk.insert(stem.to_string(), (metadata.len(), mtime));
        }

        let stale: Vec<String> = state
            .entries
            .keys()
            .filter(|stem| !on_disk.contains_key(*stem))
            .cloned()
            .collect();
        for stem in stale {
            state.remove(&stem);
        }

        // Files the journal never recorded join as the oldest entries, in
        // modification order.
        let mut adopted: Vec<(SystemTime, String, u64)> = Vec::new();
        for (stem, (len, mtime)) in on_disk {
            let Some(entry) = state.entries.get_mut(&stem) else {
                adopted.push((mtime, stem, len));
                continue;
            };
            // The file is the source of truth for size.
            let recorded = std::mem::replace(&mut entry.len, len);
            state.total_bytes = state.total_bytes.saturating_sub(recorded).saturating_add(len);
        }

        if !adopted.is_empty() {
            adopted.sort();
            let existing: Vec<(u64, String)> = std::mem::take(&mut state.order).into_iter().collect();
            let mut rebuilt = IndexState {
                pending: std::mem::take(&mut state.pending),
                ..IndexState::default()
            };
            for (_, stem, len) in adopted {
                rebuilt.insert(stem, None, len);
            }
            for (_, stem) in existing {
                if let Some(entry) = state.entries.get(&stem) {
                    rebuilt.insert(stem.clone(), entry.key.clone(), entry.len);
                }
            }
            *state = rebuilt;
        }

        Ok(())
    }

    fn evict_locked(&self, state: &mut IndexState) {
        while state.total_bytes > self.max_size {
            let Some(stem) = state.least_recent() else {
                break;
            };
            let Some(entry) = state.remove(&stem) else {
                break;
            };
            if let Err(e) = remove_file_if_exists(&self.data_path(&stem)) {
                warn!(stem = %stem, error = %e, "Failed to delete evicted disk cache file");
            }
            debug!(
                key = entry.key.as_deref().unwrap_or(&stem),
                bytes = entry.len,
                "Evicted from disk cache"
            );
            self.journal_locked(state, &JournalRecord::Remove { stem });
        }
    }

    fn journal_locked(&self, state: &mut IndexState, record: &JournalRecord) {
        match self.journal.append(record) {
            Ok(()) => state.journal_records += 1,
            Err(e) => {
                warn!(error = %e, "Journal append failed, rewriting journal");
                self.rewrite_journal_locked(state);
            }
        }
    }

    fn compact_if_needed(&self, state: &mut IndexState) {
        let live = state.entries.len() as u64;
        if state.journal_records > live * 2 + COMPACTION_SLACK {
            debug!(records = state.journal_records, live, "Compacting disk cache journal");
            self.rewrite_journal_locked(state);
        }
    }

    fn rewrite_journal_locked(&self, state: &mut IndexState) {
        let snapshot = state.snapshot();
        match self.journal.rewrite(&snapshot) {
            Ok(()) => state.journal_records = snapshot.len() as u64,
            Err(e) => warn!(
                path = %self.journal.path().display(),
                error = %e,
                "Failed to rewrite disk cache journal"
            ),
        }
    }

    fn write_atomic(&self, stem: &str, data: &[u8]) -> Result<(), CacheError> {
        let path = self.data_path(stem);
        let tmp_path = path.with_extension(TEMP_EXTENSION);
        if let Err(e) = fs::write(&tmp_path, data) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn data_path(&self, stem: &str) -> PathBuf {
        self.directory.join(format!("{}.{}", stem, DATA_EXTENSION))
    }

    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(extension)
}

fn remove_file_if_exists(path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// =============================================================================
// Tests
// =============================================================================
