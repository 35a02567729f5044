//! # Filestore — the append-only file database
//!
//! Persists a [`database::Database`] as a forward-linked list of chunks.
//! Each insert batch becomes one chunk: an index region followed by the
//! batch's value records.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │ CHUNK                                                     │
//! │                                                           │
//! │ chunk_start (0x10)                                        │
//! │ index_entry (0x11) | key_len_prefix | key | voffset (u64) │
//! │ ... one entry per batch item ...                          │
//! │ index_chain (0x12) | next_chunk_offset (u64, 0=terminal)  │
//! │ value (0x13) | type_id (u8) | len_prefix | payload        │
//! │ ... one value record per batch item ...                   │
//! ├───────────────────────────────────────────────────────────┤
//! │ CHUNK ...                                                 │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian; offsets are absolute. The file has no
//! header: byte 0 begins the first chunk. A new chunk is linked by patching
//! the previous terminal chain pointer only after the chunk's bytes are on
//! disk, so a torn write leaves the batch invisible rather than half-read.
//!
//! Enumeration yields lazy entries: keys are decoded eagerly, values stay
//! behind [`database::Loader`] handles that seek and decode on demand under
//! the database's stream mutex.

mod reader;
mod writer;

pub use reader::FileIter;

use byteorder::ReadBytesExt;
use codec::{read_typed, record, CodecError, HandlerRegistry};
use database::{Database, Entry, Error, LazyLoader, Loader, Result};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Backing storage for a [`FileDatabase`].
///
/// Implemented for [`std::fs::File`] (with a real fsync) and for
/// [`Cursor<Vec<u8>>`] (handy for tests and ephemeral stores).
pub trait Stream: Read + Write + Seek + Send {
    /// Flushes OS buffers to durable storage where the backing store has
    /// them.
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Stream for std::fs::File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

impl Stream for Cursor<Vec<u8>> {}

/// Construction knobs for a [`FileDatabase`].
#[derive(Debug, Clone, Copy)]
pub struct FileOptions {
    /// fsync after every batch append and overwrite.
    pub sync_writes: bool,

    /// Read unknown length discriminants as length 0 instead of failing.
    /// Compatibility quirk for files written by historic implementations.
    pub lenient_lengths: bool,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            sync_writes: false,
            lenient_lengths: false,
        }
    }
}

/// Mutable stream state, guarded by the core's mutex.
pub(crate) struct StreamState {
    pub(crate) stream: Box<dyn Stream>,
    /// Offset of the terminal index-chain record; `None` for an empty file.
    pub(crate) tail_chain: Option<u64>,
}

/// State shared between a database and every loader it has handed out.
pub(crate) struct FileCore {
    /// `None` once the database has been disposed.
    pub(crate) state: Mutex<Option<StreamState>>,
    pub(crate) lenient_lengths: bool,
    pub(crate) sync_writes: bool,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| Error::LockPoisoned(e.to_string()))
}

pub(crate) fn read_len<R: Read + ?Sized>(
    r: &mut R,
    lenient: bool,
) -> std::result::Result<u64, CodecError> {
    if lenient {
        codec::read_length_lenient(r)
    } else {
        codec::read_length(r)
    }
}

/// Deferred value handle: seeks to its record and decodes on `load`.
///
/// Never memoizes; memoization belongs to the cache layer.
struct FileLoader<V> {
    core: Arc<FileCore>,
    values: Arc<HandlerRegistry<V>>,
    offset: u64,
}

impl<V: 'static> LazyLoader<V> for FileLoader<V> {
    fn load(&self) -> Result<V> {
        let mut guard = lock(&self.core.state)?;
        let state = guard.as_mut().ok_or(Error::Disposed)?;
        state.stream.seek(io::SeekFrom::Start(self.offset))?;
        let tag = state.stream.read_u8()?;
        if tag != record::VALUE {
            return Err(CodecError::UnknownRecordTag(tag).into());
        }
        Ok(read_typed(
            &mut state.stream,
            &self.values,
            self.core.lenient_lengths,
        )?)
    }

    fn value_offset(&self) -> Option<u64> {
        Some(self.offset)
    }
}

/// A [`Database`] over one shared, seekable stream.
///
/// Reader and writer share a single mutex; it is held for one stream
/// interaction at a time (an iterator step, a lazy load, a batch append),
/// so loads from other threads interleave with an ongoing enumeration.
pub struct FileDatabase<K, V> {
    pub(crate) core: Arc<FileCore>,
    pub(crate) keys: Arc<HandlerRegistry<K>>,
    values: Arc<HandlerRegistry<V>>,
    /// Positional cache: one loader handle per value offset, dropped by
    /// [`drain_buffer`](FileDatabase::drain_buffer).
    loaders: Mutex<HashMap<u64, Loader<V>>>,
    path: Option<PathBuf>,
}

impl<K: 'static, V: 'static> FileDatabase<K, V> {
    /// Opens or creates the file at `path`.
    ///
    /// An existing file is scanned once to find the terminal chain record,
    /// so later appends link correctly.
    pub fn open(
        path: impl AsRef<Path>,
        keys: HandlerRegistry<K>,
        values: HandlerRegistry<V>,
        options: FileOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let size = file.metadata()?.len();
        let db = Self::bind(Box::new(file), keys, values, options, Some(path.into()))?;
        info!(path = ?path, size, "file database opened");
        Ok(db)
    }

    /// Binds a database over an already-open stream.
    pub fn from_stream(
        stream: impl Stream + 'static,
        keys: HandlerRegistry<K>,
        values: HandlerRegistry<V>,
        options: FileOptions,
    ) -> Result<Self> {
        Self::bind(Box::new(stream), keys, values, options, None)
    }

    fn bind(
        mut stream: Box<dyn Stream>,
        keys: HandlerRegistry<K>,
        values: HandlerRegistry<V>,
        options: FileOptions,
        path: Option<PathBuf>,
    ) -> Result<Self> {
        let tail_chain = reader::walk_chunks(&mut stream, options.lenient_lengths, |_| {})?;
        Ok(Self {
            core: Arc::new(FileCore {
                state: Mutex::new(Some(StreamState { stream, tail_chain })),
                lenient_lengths: options.lenient_lengths,
                sync_writes: options.sync_writes,
            }),
            keys: Arc::new(keys),
            values: Arc::new(values),
            loaders: Mutex::new(HashMap::new()),
            path,
        })
    }

    /// Streaming enumeration in insertion order. Locks the stream once per
    /// record, so concurrent loads and appends interleave.
    pub fn iter(&self) -> FileIter<'_, K, V> {
        FileIter::new(self)
    }

    /// First entry, or [`Error::NotFound`] on an empty database.
    pub fn first(&self) -> Result<Entry<K, V>> {
        match self.iter().next() {
            Some(entry) => entry,
            None => Err(Error::NotFound),
        }
    }

    /// Replaces a value in place.
    ///
    /// Valid only when the replacement encodes to exactly the old payload
    /// length under the same type id; the record's offset and total width
    /// are format invariants. Fails with [`Error::OverwriteSizeMismatch`]
    /// otherwise, leaving the record untouched.
    pub fn overwrite_value(&self, entry: &Entry<K, V>, new_value: &V) -> Result<()> {
        let offset = entry.value.value_offset().ok_or(Error::ForeignValue)?;
        {
            let mut guard = lock(&self.core.state)?;
            let state = guard.as_mut().ok_or(Error::Disposed)?;
            writer::overwrite_value(
                state,
                self.values.default_handler(),
                offset,
                new_value,
                self.core.lenient_lengths,
                self.core.sync_writes,
            )?;
        }
        self.drain_buffer()?;
        debug!(offset, "value overwritten in place");
        Ok(())
    }

    /// Rewrites this database's logical content into `target` as a single
    /// batch.
    ///
    /// The append-only format never reclaims space; cleaning into a fresh
    /// file compacts any number of chunks into one.
    pub fn clean_to(&self, target: &mut dyn Database<K, V>) -> Result<()> {
        let mut batch = Vec::new();
        for entry in self.iter() {
            let entry = entry?;
            let value = entry.load()?;
            batch.push((entry.key, value));
        }
        let count = batch.len();
        target.insert_range(batch)?;
        info!(count, "cleaned database into target");
        Ok(())
    }

    /// Dual of [`clean_to`](FileDatabase::clean_to): pulls `source`'s
    /// content into this database as a single batch.
    pub fn clean_from(&mut self, source: &dyn Database<K, V>) -> Result<()> {
        let mut batch = Vec::new();
        for entry in source.entries()? {
            let value = entry.load()?;
            batch.push((entry.key, value));
        }
        self.insert_range(batch)
    }

    /// Drops every cached loader handle.
    pub fn drain_buffer(&self) -> Result<()> {
        lock(&self.loaders)?.clear();
        Ok(())
    }

    /// Number of chunks currently on disk.
    pub fn chunk_count(&self) -> Result<usize> {
        let mut guard = lock(&self.core.state)?;
        let state = guard.as_mut().ok_or(Error::Disposed)?;
        let mut count = 0usize;
        reader::walk_chunks(&mut state.stream, self.core.lenient_lengths, |_| count += 1)?;
        Ok(count)
    }

    pub(crate) fn loader_at(&self, offset: u64) -> Result<Loader<V>> {
        let mut loaders = lock(&self.loaders)?;
        if let Some(loader) = loaders.get(&offset) {
            return Ok(loader.clone());
        }
        let loader: Loader<V> = Arc::new(FileLoader {
            core: self.core.clone(),
            values: self.values.clone(),
            offset,
        });
        loaders.insert(offset, loader.clone());
        Ok(loader)
    }
}

impl<K: 'static, V: 'static> Database<K, V> for FileDatabase<K, V> {
    fn insert_range(&mut self, items: Vec<(K, V)>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let count = items.len();
        let start = {
            let mut guard = lock(&self.core.state)?;
            let state = guard.as_mut().ok_or(Error::Disposed)?;
            writer::append_chunk(
                state,
                self.keys.default_handler(),
                self.values.default_handler(),
                &items,
                self.core.sync_writes,
            )?
        };
        self.drain_buffer()?;
        debug!(count, chunk_start = start, "appended batch");
        Ok(())
    }

    fn try_get(&self, key: &K) -> Result<Option<V>> {
        let comparer = self.keys.default_handler();
        for entry in self.iter() {
            let entry = entry?;
            if comparer.matches(&entry.key, key) {
                return entry.load().map(Some);
            }
        }
        Ok(None)
    }

    fn get_all(&self, key: &K) -> Result<Vec<Loader<V>>> {
        let comparer = self.keys.default_handler();
        let mut out = Vec::new();
        for entry in self.iter() {
            let entry = entry?;
            if comparer.matches(&entry.key, key) {
                out.push(entry.value);
            }
        }
        Ok(out)
    }

    fn entries(&self) -> Result<Vec<Entry<K, V>>> {
        self.iter().collect()
    }

    fn dispose(&mut self) -> Result<()> {
        {
            let mut guard = lock(&self.core.state)?;
            if let Some(state) = guard.as_mut() {
                state.stream.flush()?;
                state.stream.sync()?;
            }
            *guard = None;
        }
        self.drain_buffer()?;
        info!(path = ?self.path, "file database disposed");
        Ok(())
    }
}

impl<K, V> Drop for FileDatabase<K, V> {
    fn drop(&mut self) {
        // Best-effort flush; explicit dispose() is the reliable path.
        if let Ok(mut guard) = self.core.state.lock() {
            if let Some(state) = guard.as_mut() {
                let _ = state.stream.flush();
            }
        }
    }
}
