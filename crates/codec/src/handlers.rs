//! Type handlers: pluggable codecs for typed value payloads.
//!
//! Every value record on disk is prefixed by a one-byte type id. A
//! [`TypeHandler`] knows how to size, write, read and compare one value
//! type; a [`HandlerRegistry`] resolves ids back to handlers during decode.

use crate::{length_size, read_length, read_length_lenient, write_length, CodecError};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

/// Reserved id: raw byte array (`Vec<u8>`).
pub const BYTE_ARRAY_ID: u8 = 0x01;
/// Reserved id: UTF-8 string (`String`).
pub const UTF8_ID: u8 = 0x02;
/// Reserved id: stream-as-bytes (`io::Cursor<Vec<u8>>`).
pub const STREAM_ID: u8 = 0x03;
/// First id available to custom handlers.
pub const CUSTOM_ID_FLOOR: u8 = 0x30;

/// Codec for one value type, keyed by a stable one-byte id.
///
/// `write` must emit exactly `length(item)` payload bytes; the file writer
/// plans chunk layout from `length` and does not re-measure. `matches` is
/// the equality notion used for key lookups in the file store, so a custom
/// handler can double as a custom key comparer.
pub trait TypeHandler<T>: Send + Sync {
    fn id(&self) -> u8;

    /// Payload byte count for `item`.
    fn length(&self, item: &T) -> u64;

    /// Writes the payload bytes (no id, no length prefix).
    fn write(&self, w: &mut dyn Write, item: &T) -> Result<(), CodecError>;

    /// Reads back an item from exactly `len` payload bytes.
    fn read(&self, r: &mut dyn Read, len: u64) -> Result<T, CodecError>;

    /// Equality under this handler.
    fn matches(&self, a: &T, b: &T) -> bool;
}

/// Raw byte arrays, id `0x01`.
pub struct ByteArrayHandler;

impl TypeHandler<Vec<u8>> for ByteArrayHandler {
    fn id(&self) -> u8 {
        BYTE_ARRAY_ID
    }

    fn length(&self, item: &Vec<u8>) -> u64 {
        item.len() as u64
    }

    fn write(&self, w: &mut dyn Write, item: &Vec<u8>) -> Result<(), CodecError> {
        w.write_all(item)?;
        Ok(())
    }

    fn read(&self, r: &mut dyn Read, len: u64) -> Result<Vec<u8>, CodecError> {
        let mut buf = vec![0u8; len as usize];
        r.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn matches(&self, a: &Vec<u8>, b: &Vec<u8>) -> bool {
        a == b
    }
}

/// UTF-8 strings, id `0x02`. Rejects invalid UTF-8 on decode.
pub struct Utf8Handler;

impl TypeHandler<String> for Utf8Handler {
    fn id(&self) -> u8 {
        UTF8_ID
    }

    fn length(&self, item: &String) -> u64 {
        item.len() as u64
    }

    fn write(&self, w: &mut dyn Write, item: &String) -> Result<(), CodecError> {
        w.write_all(item.as_bytes())?;
        Ok(())
    }

    fn read(&self, r: &mut dyn Read, len: u64) -> Result<String, CodecError> {
        let mut buf = vec![0u8; len as usize];
        r.read_exact(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    fn matches(&self, a: &String, b: &String) -> bool {
        a == b
    }
}

/// Stream payloads, id `0x03`. The in-memory side is a `Cursor<Vec<u8>>`;
/// the full underlying buffer is written regardless of cursor position.
pub struct StreamHandler;

impl TypeHandler<Cursor<Vec<u8>>> for StreamHandler {
    fn id(&self) -> u8 {
        STREAM_ID
    }

    fn length(&self, item: &Cursor<Vec<u8>>) -> u64 {
        item.get_ref().len() as u64
    }

    fn write(&self, w: &mut dyn Write, item: &Cursor<Vec<u8>>) -> Result<(), CodecError> {
        w.write_all(item.get_ref())?;
        Ok(())
    }

    fn read(&self, r: &mut dyn Read, len: u64) -> Result<Cursor<Vec<u8>>, CodecError> {
        let mut buf = vec![0u8; len as usize];
        r.read_exact(&mut buf)?;
        Ok(Cursor::new(buf))
    }

    fn matches(&self, a: &Cursor<Vec<u8>>, b: &Cursor<Vec<u8>>) -> bool {
        a.get_ref() == b.get_ref()
    }
}

/// Id-keyed handler set for one logical type.
///
/// The *default* handler encodes writes and decodes keys; extra handlers
/// registered on top are consulted when decoding value records whose id
/// differs (e.g. files written with a custom handler).
pub struct HandlerRegistry<T> {
    default_id: u8,
    handlers: HashMap<u8, Arc<dyn TypeHandler<T>>>,
}

impl<T> HandlerRegistry<T> {
    pub fn new(default: Arc<dyn TypeHandler<T>>) -> Self {
        let default_id = default.id();
        let mut handlers = HashMap::new();
        handlers.insert(default_id, default);
        Self {
            default_id,
            handlers,
        }
    }

    /// Registers an additional handler. Custom handlers must use ids at or
    /// above [`CUSTOM_ID_FLOOR`]; anything below is reserved.
    pub fn register(&mut self, handler: Arc<dyn TypeHandler<T>>) -> Result<(), CodecError> {
        let id = handler.id();
        if id < CUSTOM_ID_FLOOR {
            return Err(CodecError::ReservedTypeId(id));
        }
        self.handlers.insert(id, handler);
        Ok(())
    }

    pub fn default_handler(&self) -> &dyn TypeHandler<T> {
        self.handlers[&self.default_id].as_ref()
    }

    pub fn lookup(&self, id: u8) -> Option<&dyn TypeHandler<T>> {
        self.handlers.get(&id).map(|h| h.as_ref())
    }
}

impl HandlerRegistry<Vec<u8>> {
    pub fn byte_array() -> Self {
        Self::new(Arc::new(ByteArrayHandler))
    }
}

impl HandlerRegistry<String> {
    pub fn utf8() -> Self {
        Self::new(Arc::new(Utf8Handler))
    }
}

impl HandlerRegistry<Cursor<Vec<u8>>> {
    pub fn stream() -> Self {
        Self::new(Arc::new(StreamHandler))
    }
}

/// Writes `[type-id][length-prefix][payload]` for one typed value.
pub fn write_typed<T>(
    w: &mut dyn Write,
    handler: &dyn TypeHandler<T>,
    item: &T,
) -> Result<(), CodecError> {
    w.write_u8(handler.id())?;
    write_length(w, handler.length(item))?;
    handler.write(w, item)
}

/// Reads one typed value: id byte, handler lookup, length prefix, payload.
pub fn read_typed<T>(
    r: &mut dyn Read,
    registry: &HandlerRegistry<T>,
    lenient: bool,
) -> Result<T, CodecError> {
    let id = r.read_u8()?;
    let handler = registry.lookup(id).ok_or(CodecError::UnknownTypeId(id))?;
    let len = if lenient {
        read_length_lenient(r)?
    } else {
        read_length(r)?
    };
    handler.read(r, len)
}

/// On-disk byte count of `[type-id][length-prefix][payload]` for `item`.
pub fn typed_size<T>(handler: &dyn TypeHandler<T>, item: &T) -> u64 {
    let len = handler.length(item);
    1 + length_size(len) as u64 + len
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------- Reserved handler roundtrips --------------------

    #[test]
    fn byte_array_roundtrip() {
        let registry = HandlerRegistry::byte_array();
        let item = vec![0x00u8, 0xFF, 0x80, 0x01];

        let mut buf = Vec::new();
        write_typed(&mut buf, registry.default_handler(), &item).unwrap();
        assert_eq!(buf.len() as u64, typed_size(registry.default_handler(), &item));

        let back = read_typed(&mut Cursor::new(buf), &registry, false).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn utf8_roundtrip() {
        let registry = HandlerRegistry::utf8();
        let item = "κλειδί 🔑".to_string();

        let mut buf = Vec::new();
        write_typed(&mut buf, registry.default_handler(), &item).unwrap();
        let back = read_typed(&mut Cursor::new(buf), &registry, false).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn utf8_rejects_invalid_bytes() {
        let registry = HandlerRegistry::utf8();
        // id, u8 length prefix of 2, invalid utf-8 payload
        let buf = vec![UTF8_ID, crate::LEN_U8, 2, 0xC3, 0x28];
        let err = read_typed(&mut Cursor::new(buf), &registry, false).unwrap_err();
        assert!(matches!(err, CodecError::Utf8(_)));
    }

    #[test]
    fn stream_roundtrip_ignores_cursor_position() {
        let registry = HandlerRegistry::stream();
        let mut item = Cursor::new(b"stream body".to_vec());
        item.set_position(4);

        let mut buf = Vec::new();
        write_typed(&mut buf, registry.default_handler(), &item).unwrap();
        let back = read_typed(&mut Cursor::new(buf), &registry, false).unwrap();
        assert_eq!(back.get_ref(), item.get_ref());
        assert!(registry.default_handler().matches(&back, &item));
    }

    #[test]
    fn empty_payload_roundtrip() {
        let registry = HandlerRegistry::utf8();
        let mut buf = Vec::new();
        write_typed(&mut buf, registry.default_handler(), &String::new()).unwrap();
        // id + two-byte length prefix, zero payload bytes
        assert_eq!(buf.len(), 3);
        let back = read_typed(&mut Cursor::new(buf), &registry, false).unwrap();
        assert_eq!(back, "");
    }

    // -------------------- Registry --------------------

    struct UpperHandler;

    impl TypeHandler<String> for UpperHandler {
        fn id(&self) -> u8 {
            0x31
        }
        fn length(&self, item: &String) -> u64 {
            item.len() as u64
        }
        fn write(&self, w: &mut dyn Write, item: &String) -> Result<(), CodecError> {
            w.write_all(item.to_uppercase().as_bytes())?;
            Ok(())
        }
        fn read(&self, r: &mut dyn Read, len: u64) -> Result<String, CodecError> {
            let mut buf = vec![0u8; len as usize];
            r.read_exact(&mut buf)?;
            Ok(String::from_utf8(buf)?)
        }
        fn matches(&self, a: &String, b: &String) -> bool {
            a.eq_ignore_ascii_case(b)
        }
    }

    #[test]
    fn custom_handler_resolves_by_id() {
        let mut registry = HandlerRegistry::utf8();
        registry.register(Arc::new(UpperHandler)).unwrap();

        let mut buf = Vec::new();
        write_typed(&mut buf, &UpperHandler, &"shout".to_string()).unwrap();
        let back = read_typed(&mut Cursor::new(buf), &registry, false).unwrap();
        assert_eq!(back, "SHOUT");
    }

    #[test]
    fn custom_id_below_floor_is_rejected() {
        struct BadId;
        impl TypeHandler<String> for BadId {
            fn id(&self) -> u8 {
                0x2F
            }
            fn length(&self, _: &String) -> u64 {
                0
            }
            fn write(&self, _: &mut dyn Write, _: &String) -> Result<(), CodecError> {
                Ok(())
            }
            fn read(&self, _: &mut dyn Read, _: u64) -> Result<String, CodecError> {
                Ok(String::new())
            }
            fn matches(&self, a: &String, b: &String) -> bool {
                a == b
            }
        }

        let mut registry = HandlerRegistry::utf8();
        let err = registry.register(Arc::new(BadId)).unwrap_err();
        assert!(matches!(err, CodecError::ReservedTypeId(0x2F)));
    }

    #[test]
    fn unknown_type_id_is_rejected() {
        let registry = HandlerRegistry::utf8();
        let buf = vec![0x55u8, crate::LEN_U8, 0];
        let err = read_typed(&mut Cursor::new(buf), &registry, false).unwrap_err();
        assert!(matches!(err, CodecError::UnknownTypeId(0x55)));
    }
}
