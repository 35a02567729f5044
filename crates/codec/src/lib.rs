//! # Codec — on-disk primitives for StringDB
//!
//! Everything that touches raw bytes lives here: the variable-width length
//! prefix, the record tag constants shared by the file reader and writer,
//! and the pluggable [`TypeHandler`] codecs for typed value payloads.
//!
//! ## Length prefix
//!
//! Lengths are stored as a one-byte discriminant followed by a little-endian
//! payload. The writer always picks the smallest width that fits:
//!
//! ```text
//! ┌──────────────┬─────────────┬──────────────────┐
//! │ discriminant │ payload     │ chosen when      │
//! ├──────────────┼─────────────┼──────────────────┤
//! │ 0xFE         │ u8          │ n <= 255         │
//! │ 0xFD         │ u16 LE      │ n <= 65_535      │
//! │ 0xFC         │ u32 LE      │ n <= 2^32 - 1    │
//! │ 0xFB         │ i64 LE      │ otherwise        │
//! └──────────────┴─────────────┴──────────────────┘
//! ```
//!
//! [`length_size`] returns the exact byte cost of a prefix without writing
//! it, which the file writer uses to lay out a whole chunk up front.
//!
//! Decoding is strict by default: an unknown discriminant is a
//! [`CodecError::UnknownLengthTag`]. [`read_length_lenient`] preserves the
//! legacy behavior of reading unknown discriminants as length 0, for files
//! written by historic implementations.

mod handlers;

pub use handlers::{
    read_typed, typed_size, write_typed, ByteArrayHandler, HandlerRegistry, StreamHandler,
    TypeHandler, Utf8Handler, BYTE_ARRAY_ID, CUSTOM_ID_FLOOR, STREAM_ID, UTF8_ID,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Length-prefix discriminant for a `u8` payload.
pub const LEN_U8: u8 = 0xFE;
/// Length-prefix discriminant for a `u16` payload.
pub const LEN_U16: u8 = 0xFD;
/// Length-prefix discriminant for a `u32` payload.
pub const LEN_U32: u8 = 0xFC;
/// Length-prefix discriminant for an `i64` payload.
pub const LEN_I64: u8 = 0xFB;

/// Record tag bytes.
///
/// Single-byte discriminants for the three record kinds plus the chunk
/// start marker. Chosen disjoint from the length-prefix discriminants so a
/// reader positioned at a record boundary can never confuse the two.
pub mod record {
    /// Leading marker of a chunk's index region.
    pub const CHUNK_START: u8 = 0x10;
    /// A key together with the absolute offset of its value record.
    pub const INDEX_ENTRY: u8 = 0x11;
    /// Forward pointer to the next chunk; a zero pointer is terminal.
    pub const INDEX_CHAIN: u8 = 0x12;
    /// A typed value payload.
    pub const VALUE: u8 = 0x13;
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("length {0} does not fit the on-disk length encoding")]
    LengthOverflow(u64),

    #[error("negative length {0} on disk")]
    NegativeLength(i64),

    #[error("unknown length discriminant {0:#04x}")]
    UnknownLengthTag(u8),

    #[error("unknown record tag {0:#04x}")]
    UnknownRecordTag(u8),

    #[error("no type handler registered for id {0:#04x}")]
    UnknownTypeId(u8),

    #[error("type handler id {0:#04x} collides with the reserved range")]
    ReservedTypeId(u8),

    #[error("invalid utf-8 in string payload: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Writes `n` as a discriminant byte plus the smallest payload that fits.
pub fn write_length<W: Write + ?Sized>(w: &mut W, n: u64) -> Result<(), CodecError> {
    if n <= u8::MAX as u64 {
        w.write_u8(LEN_U8)?;
        w.write_u8(n as u8)?;
    } else if n <= u16::MAX as u64 {
        w.write_u8(LEN_U16)?;
        w.write_u16::<LittleEndian>(n as u16)?;
    } else if n <= u32::MAX as u64 {
        w.write_u8(LEN_U32)?;
        w.write_u32::<LittleEndian>(n as u32)?;
    } else if n <= i64::MAX as u64 {
        w.write_u8(LEN_I64)?;
        w.write_i64::<LittleEndian>(n as i64)?;
    } else {
        return Err(CodecError::LengthOverflow(n));
    }
    Ok(())
}

/// Reads a length prefix, rejecting unknown discriminants.
pub fn read_length<R: Read + ?Sized>(r: &mut R) -> Result<u64, CodecError> {
    let tag = r.read_u8()?;
    match decode_payload(r, tag)? {
        Some(n) => Ok(n),
        None => Err(CodecError::UnknownLengthTag(tag)),
    }
}

/// Reads a length prefix, mapping unknown discriminants to length 0.
///
/// Compatibility quirk for files produced by historic writers; new code
/// wants [`read_length`].
pub fn read_length_lenient<R: Read + ?Sized>(r: &mut R) -> Result<u64, CodecError> {
    let tag = r.read_u8()?;
    Ok(decode_payload(r, tag)?.unwrap_or(0))
}

/// Exact on-disk byte count of the length prefix for `n`: 2, 3, 5 or 9.
pub fn length_size(n: u64) -> usize {
    if n <= u8::MAX as u64 {
        2
    } else if n <= u16::MAX as u64 {
        3
    } else if n <= u32::MAX as u64 {
        5
    } else {
        9
    }
}

fn decode_payload<R: Read + ?Sized>(r: &mut R, tag: u8) -> Result<Option<u64>, CodecError> {
    match tag {
        LEN_U8 => Ok(Some(r.read_u8()? as u64)),
        LEN_U16 => Ok(Some(r.read_u16::<LittleEndian>()? as u64)),
        LEN_U32 => Ok(Some(r.read_u32::<LittleEndian>()? as u64)),
        LEN_I64 => {
            let n = r.read_i64::<LittleEndian>()?;
            if n < 0 {
                return Err(CodecError::NegativeLength(n));
            }
            Ok(Some(n as u64))
        }
        _ => Ok(None),
    }
}
