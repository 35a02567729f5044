//! Chunk assembly and in-place value replacement.

use crate::{read_len, StreamState};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use codec::{length_size, record, write_length, CodecError, TypeHandler};
use database::{Error, Result};
use std::io::{Seek, SeekFrom, Write};

/// Size of an index-chain record: tag byte + pointer.
const CHAIN_SIZE: u64 = 1 + 8;

/// Appends one batch as a single chunk and returns the chunk's start
/// offset.
///
/// The whole chunk is laid out up front: `TypeHandler::length` is exact by
/// contract, so every value offset is known before a byte is written and
/// the chunk goes out as one buffer. The previous terminal chain pointer is
/// patched only after the chunk's bytes (and, with `sync`, the fsync) have
/// landed, which keeps a torn append invisible to readers.
pub(crate) fn append_chunk<K, V>(
    state: &mut StreamState,
    keys: &dyn TypeHandler<K>,
    values: &dyn TypeHandler<V>,
    items: &[(K, V)],
    sync: bool,
) -> Result<u64> {
    let start = state.stream.seek(SeekFrom::End(0))?;

    let key_lens: Vec<u64> = items.iter().map(|(k, _)| keys.length(k)).collect();
    let value_lens: Vec<u64> = items.iter().map(|(_, v)| values.length(v)).collect();

    let mut index_size = 1 + CHAIN_SIZE;
    for key_len in &key_lens {
        index_size += 1 + length_size(*key_len) as u64 + key_len + 8;
    }
    let chain_at = start + index_size - CHAIN_SIZE;

    let mut buf = Vec::new();
    buf.write_u8(record::CHUNK_START)?;
    let mut value_offset = start + index_size;
    for (i, (key, _)) in items.iter().enumerate() {
        buf.write_u8(record::INDEX_ENTRY)?;
        write_length(&mut buf, key_lens[i])?;
        keys.write(&mut buf, key)?;
        buf.write_u64::<LittleEndian>(value_offset)?;
        value_offset += 1 + 1 + length_size(value_lens[i]) as u64 + value_lens[i];
    }
    buf.write_u8(record::INDEX_CHAIN)?;
    buf.write_u64::<LittleEndian>(0)?;
    for (i, (_, value)) in items.iter().enumerate() {
        buf.write_u8(record::VALUE)?;
        buf.write_u8(values.id())?;
        write_length(&mut buf, value_lens[i])?;
        values.write(&mut buf, value)?;
    }
    debug_assert_eq!(start + buf.len() as u64, value_offset);

    state.stream.write_all(&buf)?;
    state.stream.flush()?;
    if sync {
        state.stream.sync()?;
    }

    if let Some(previous) = state.tail_chain {
        state.stream.seek(SeekFrom::Start(previous + 1))?;
        state.stream.write_u64::<LittleEndian>(start)?;
        state.stream.flush()?;
        if sync {
            state.stream.sync()?;
        }
    }
    state.tail_chain = Some(chain_at);
    Ok(start)
}

/// Replaces the value record at `offset` in place.
///
/// The replacement must carry the same type id and encode to exactly the
/// old payload length; equal payload lengths imply an equal-width length
/// prefix, so the record's total size cannot change.
pub(crate) fn overwrite_value<V>(
    state: &mut StreamState,
    handler: &dyn TypeHandler<V>,
    offset: u64,
    new_value: &V,
    lenient: bool,
    sync: bool,
) -> Result<()> {
    state.stream.seek(SeekFrom::Start(offset))?;
    let tag = state.stream.read_u8()?;
    if tag != record::VALUE {
        return Err(CodecError::UnknownRecordTag(tag).into());
    }
    let old_id = state.stream.read_u8()?;
    let old_len = read_len(&mut state.stream, lenient)?;

    let new_len = handler.length(new_value);
    if old_id != handler.id() || new_len != old_len {
        return Err(Error::OverwriteSizeMismatch {
            expected: old_len,
            actual: new_len,
        });
    }

    state.stream.seek(SeekFrom::Start(offset))?;
    state.stream.write_u8(record::VALUE)?;
    state.stream.write_u8(handler.id())?;
    write_length(&mut state.stream, new_len)?;
    handler.write(&mut state.stream, new_value)?;
    state.stream.flush()?;
    if sync {
        state.stream.sync()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::{read_length, Utf8Handler};
    use std::io::{Cursor, Read};

    fn state() -> StreamState {
        StreamState {
            stream: Box::new(Cursor::new(Vec::new())),
            tail_chain: None,
        }
    }

    /// Reads the value offset out of the first chunk's first index entry.
    fn first_value_offset(state: &mut StreamState) -> u64 {
        state.stream.seek(SeekFrom::Start(1)).unwrap();
        assert_eq!(state.stream.read_u8().unwrap(), record::INDEX_ENTRY);
        let key_len = read_length(&mut state.stream).unwrap();
        state
            .stream
            .seek(SeekFrom::Current(key_len as i64))
            .unwrap();
        state.stream.read_u64::<LittleEndian>().unwrap()
    }

    fn read_at(state: &mut StreamState, offset: u64, len: usize) -> Vec<u8> {
        state.stream.seek(SeekFrom::Start(offset)).unwrap();
        let mut buf = vec![0u8; len];
        state.stream.read_exact(&mut buf).unwrap();
        buf
    }

    // -------------------- Chunk layout --------------------

    #[test]
    fn single_item_chunk_layout() {
        let mut state = state();
        let items = vec![("ab".to_string(), "xyz".to_string())];
        let start =
            append_chunk(&mut state, &Utf8Handler, &Utf8Handler, &items, false).unwrap();
        assert_eq!(start, 0);

        // chunk start marker
        assert_eq!(read_at(&mut state, 0, 1), [record::CHUNK_START]);

        // index entry: tag, length prefix of 2, "ab", value offset
        state.stream.seek(SeekFrom::Start(1)).unwrap();
        assert_eq!(state.stream.read_u8().unwrap(), record::INDEX_ENTRY);
        assert_eq!(read_length(&mut state.stream).unwrap(), 2);
        let mut key = [0u8; 2];
        state.stream.read_exact(&mut key).unwrap();
        assert_eq!(&key, b"ab");
        let value_offset = state.stream.read_u64::<LittleEndian>().unwrap();

        // terminal chain directly after the entry
        assert_eq!(state.stream.read_u8().unwrap(), record::INDEX_CHAIN);
        assert_eq!(state.stream.read_u64::<LittleEndian>().unwrap(), 0);

        // the value record begins exactly where the index said
        assert_eq!(state.stream.stream_position().unwrap(), value_offset);
        assert_eq!(state.stream.read_u8().unwrap(), record::VALUE);
        assert_eq!(state.stream.read_u8().unwrap(), codec::UTF8_ID);
        assert_eq!(read_length(&mut state.stream).unwrap(), 3);
        let mut value = [0u8; 3];
        state.stream.read_exact(&mut value).unwrap();
        assert_eq!(&value, b"xyz");

        // nothing after the last value record
        let end = state.stream.seek(SeekFrom::End(0)).unwrap();
        assert_eq!(end, value_offset + 1 + 1 + 2 + 3);
    }

    #[test]
    fn second_chunk_patches_previous_chain() {
        let mut state = state();
        let items = vec![("a".to_string(), "1".to_string())];
        append_chunk(&mut state, &Utf8Handler, &Utf8Handler, &items, false).unwrap();
        let first_chain = state.tail_chain.unwrap();

        let second =
            append_chunk(&mut state, &Utf8Handler, &Utf8Handler, &items, false).unwrap();

        state.stream.seek(SeekFrom::Start(first_chain)).unwrap();
        assert_eq!(state.stream.read_u8().unwrap(), record::INDEX_CHAIN);
        assert_eq!(state.stream.read_u64::<LittleEndian>().unwrap(), second);

        // the new terminal still points nowhere
        state
            .stream
            .seek(SeekFrom::Start(state.tail_chain.unwrap() + 1))
            .unwrap();
        assert_eq!(state.stream.read_u64::<LittleEndian>().unwrap(), 0);
    }

    // -------------------- Overwrite --------------------

    #[test]
    fn overwrite_replaces_payload_in_place() {
        let mut state = state();
        let items = vec![("k".to_string(), "abc".to_string())];
        append_chunk(&mut state, &Utf8Handler, &Utf8Handler, &items, false).unwrap();
        let end_before = state.stream.seek(SeekFrom::End(0)).unwrap();
        let offset = first_value_offset(&mut state);

        overwrite_value(
            &mut state,
            &Utf8Handler,
            offset,
            &"xyz".to_string(),
            false,
            false,
        )
        .unwrap();

        // same file size, new payload bytes behind tag + id + prefix
        assert_eq!(state.stream.seek(SeekFrom::End(0)).unwrap(), end_before);
        assert_eq!(read_at(&mut state, offset + 4, 3), b"xyz");
    }

    #[test]
    fn overwrite_rejects_different_length() {
        let mut state = state();
        let items = vec![("k".to_string(), "abc".to_string())];
        append_chunk(&mut state, &Utf8Handler, &Utf8Handler, &items, false).unwrap();
        let offset = first_value_offset(&mut state);

        let err = overwrite_value(
            &mut state,
            &Utf8Handler,
            offset,
            &"ab".to_string(),
            false,
            false,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::OverwriteSizeMismatch {
                expected: 3,
                actual: 2
            }
        ));

        // the old payload is still there
        assert_eq!(read_at(&mut state, offset + 4, 3), b"abc");
    }
}
