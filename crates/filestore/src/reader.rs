//! Forward traversal of the chunk chain.

use crate::{lock, read_len, FileDatabase};
use byteorder::{LittleEndian, ReadBytesExt};
use codec::{record, CodecError};
use database::{Entry, Error, Result};
use std::io::{Read, Seek, SeekFrom};

/// Walks every chunk from the start of the stream, invoking `on_chunk` with
/// each chunk's start offset, and returns the offset of the terminal chain
/// record (`None` for an empty stream).
///
/// Index entries are skipped by length, never decoded; value regions are
/// never visited at all since chain pointers jump straight to the next
/// chunk.
pub(crate) fn walk_chunks<S>(
    stream: &mut S,
    lenient: bool,
    mut on_chunk: impl FnMut(u64),
) -> Result<Option<u64>>
where
    S: Read + Seek + ?Sized,
{
    let end = stream.seek(SeekFrom::End(0))?;
    if end == 0 {
        return Ok(None);
    }

    let mut pos = 0u64;
    loop {
        stream.seek(SeekFrom::Start(pos))?;
        let tag = stream.read_u8()?;
        match tag {
            record::CHUNK_START => {
                on_chunk(pos);
                pos += 1;
            }
            record::INDEX_ENTRY => {
                let key_len = read_len(stream, lenient)?;
                pos = stream.seek(SeekFrom::Current(key_len as i64 + 8))?;
            }
            record::INDEX_CHAIN => {
                let next = stream.read_u64::<LittleEndian>()?;
                if next == 0 {
                    return Ok(Some(pos));
                }
                pos = next;
            }
            other => return Err(Error::Codec(CodecError::UnknownRecordTag(other))),
        }
    }
}

/// Streaming iterator over a [`FileDatabase`].
///
/// Each `next` acquires the stream mutex for exactly one record, so lazy
/// loads and batch appends from other threads interleave with an ongoing
/// enumeration. An append that lands after the iterator passed the old
/// terminal chain is missed; one that lands before it is observed.
pub struct FileIter<'a, K, V> {
    db: &'a FileDatabase<K, V>,
    pos: u64,
    done: bool,
}

impl<'a, K, V> FileIter<'a, K, V> {
    pub(crate) fn new(db: &'a FileDatabase<K, V>) -> Self {
        Self {
            db,
            pos: 0,
            done: false,
        }
    }
}

impl<K: 'static, V: 'static> FileIter<'_, K, V> {
    fn step(&mut self) -> Result<Option<Entry<K, V>>> {
        loop {
            let mut guard = lock(&self.db.core.state)?;
            let state = guard.as_mut().ok_or(Error::Disposed)?;

            if self.pos == 0 {
                let end = state.stream.seek(SeekFrom::End(0))?;
                if end == 0 {
                    return Ok(None);
                }
            }

            state.stream.seek(SeekFrom::Start(self.pos))?;
            let tag = state.stream.read_u8()?;
            match tag {
                record::CHUNK_START => {
                    self.pos += 1;
                }
                record::INDEX_ENTRY => {
                    let key_len =
                        read_len(&mut state.stream, self.db.core.lenient_lengths)?;
                    let key = self
                        .db
                        .keys
                        .default_handler()
                        .read(&mut state.stream, key_len)?;
                    let value_offset = state.stream.read_u64::<LittleEndian>()?;
                    self.pos = state.stream.stream_position()?;
                    drop(guard);

                    let loader = self.db.loader_at(value_offset)?;
                    return Ok(Some(Entry::new(key, loader)));
                }
                record::INDEX_CHAIN => {
                    let next = state.stream.read_u64::<LittleEndian>()?;
                    if next == 0 {
                        return Ok(None);
                    }
                    self.pos = next;
                }
                other => return Err(Error::Codec(CodecError::UnknownRecordTag(other))),
            }
        }
    }
}

impl<K: 'static, V: 'static> Iterator for FileIter<'_, K, V> {
    type Item = Result<Entry<K, V>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
