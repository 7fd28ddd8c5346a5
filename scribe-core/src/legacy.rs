//! Read-only decoder for the flat binary tag-length-value save format.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! document := i32 version, record*
//! record   := u8 type, string tag, i32 len, payload[len]
//! string   := uleb128 byte length, utf-8 bytes
//! nstring  := u8 present, [string]
//! ```
//!
//! Node payloads are themselves a sequence of records. The decoder produces
//! the same [`Document`] shape as the JSON path. It is frozen: new field
//! types are only ever added to JSON.

use indexmap::IndexMap;
use thiserror::Error;
use tracing::warn;

use crate::field::{Field, FieldType, PolyEntry};
use crate::frame::{Document, Frame};

#[derive(Debug, Error, PartialEq)]
pub enum LegacyError {
    #[error("unexpected end of legacy data")]
    Truncated,

    #[error("negative length {0}")]
    NegativeLength(i32),

    #[error("malformed string length prefix")]
    BadLengthPrefix,

    #[error("invalid UTF-8 in legacy string")]
    InvalidUtf8,

    #[error("node nesting exceeds {0} levels")]
    TooDeep(usize),

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

pub type LegacyResult<T> = std::result::Result<T, LegacyError>;

/// Decodes a complete legacy document.
///
/// Structural damage fails the whole decode. A record whose payload does not
/// fit its declared type is skipped and logged.
pub fn decode_document(bytes: &[u8], max_depth: usize) -> LegacyResult<Document> {
    let mut reader = ByteReader::new(bytes);
    let version = reader.read_i32()?;
    let root = decode_records(reader.rest(), 0, max_depth)?;
    Ok(Document::new(version, root))
}

/// Decodes a record sequence into a frame.
pub fn decode_records(bytes: &[u8], depth: usize, max_depth: usize) -> LegacyResult<Frame> {
    if depth > max_depth {
        return Err(LegacyError::TooDeep(max_depth));
    }

    let mut reader = ByteReader::new(bytes);
    let mut frame = Frame::new();

    while !reader.is_empty() {
        let code = reader.read_u8()?;
        let tag = reader.read_string()?;
        let len = reader.read_len()?;
        let payload = reader.take(len)?;

        let Some(field_type) = FieldType::from_code(code) else {
            warn!(%tag, code, "skipping legacy record with unknown field type");
            continue;
        };

        match decode_payload(field_type, payload, depth, max_depth) {
            Ok(field) => {
                frame.insert(tag, field);
            }
            Err(err @ LegacyError::TooDeep(_)) => return Err(err),
            Err(err) => {
                warn!(%tag, %field_type, error = %err, "skipping undecodable legacy record");
            }
        }
    }

    Ok(frame)
}

fn decode_payload(
    field_type: FieldType,
    payload: &[u8],
    depth: usize,
    max_depth: usize,
) -> LegacyResult<Field> {
    let mut r = ByteReader::new(payload);
    let field = match field_type {
        FieldType::Null => Field::Null,
        FieldType::Node => return decode_records(payload, depth + 1, max_depth).map(Field::Node),
        FieldType::Int => Field::Int(r.read_i32()?),
        FieldType::Long => Field::Long(r.read_i64()?),
        FieldType::Float => Field::Float(r.read_f32()?),
        FieldType::Bool => Field::Bool(r.read_bool()?),
        FieldType::Enum => Field::Enum(r.read_i32()?),
        FieldType::String => r.read_nullable_string()?.map_or(Field::Null, Field::Str),
        FieldType::IntMap => r.read_map(ByteReader::read_i32)?.map_or(Field::Null, Field::IntMap),
        FieldType::FloatMap => r
            .read_map(ByteReader::read_f32)?
            .map_or(Field::Null, Field::FloatMap),
        FieldType::BoolMap => r
            .read_map(ByteReader::read_bool)?
            .map_or(Field::Null, Field::BoolMap),
        FieldType::StringMap => r
            .read_map(|r| Ok(r.read_nullable_string()?.unwrap_or_default()))?
            .map_or(Field::Null, Field::StrMap),
        FieldType::EnumMap => r
            .read_map(ByteReader::read_i32)?
            .map_or(Field::Null, Field::EnumMap),
        FieldType::IntList => r
            .read_list(ByteReader::read_i32)?
            .map_or(Field::Null, Field::IntList),
        FieldType::FloatList => r
            .read_list(ByteReader::read_f32)?
            .map_or(Field::Null, Field::FloatList),
        FieldType::BoolList => r
            .read_list(ByteReader::read_bool)?
            .map_or(Field::Null, Field::BoolList),
        FieldType::StringList => r
            .read_list(ByteReader::read_nullable_string)?
            .map_or(Field::Null, Field::StrList),
        FieldType::DeepList => r
            .read_list(|r| r.read_nested_slot(depth, max_depth))?
            .map_or(Field::Null, Field::DeepList),
        FieldType::PolymorphicList => r
            .read_list(|r| {
                let type_key = r.read_nullable_string()?.unwrap_or_default();
                let node = r.read_nested_slot(depth, max_depth)?;
                Ok(PolyEntry { type_key, node })
            })?
            .map_or(Field::Null, Field::PolyList),
        FieldType::Reference => r
            .read_nullable_string()?
            .map_or(Field::Null, Field::Reference),
        FieldType::ReferenceList => r
            .read_list(ByteReader::read_nullable_string)?
            .map_or(Field::Null, Field::ReferenceList),
    };

    if !r.is_empty() {
        return Err(LegacyError::TrailingBytes(r.rest().len()));
    }
    Ok(field)
}

/// Little-endian reader over a borrowed buffer.
struct ByteReader<'a> {
    buf: &'a [u8],
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn rest(&self) -> &'a [u8] {
        self.buf
    }

    fn take(&mut self, len: usize) -> LegacyResult<&'a [u8]> {
        if self.buf.len() < len {
            return Err(LegacyError::Truncated);
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn read_array<const N: usize>(&mut self) -> LegacyResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> LegacyResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_bool(&mut self) -> LegacyResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_i32(&mut self) -> LegacyResult<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    fn read_i64(&mut self) -> LegacyResult<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    fn read_f32(&mut self) -> LegacyResult<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    /// Reads a non-negative i32 byte length.
    fn read_len(&mut self) -> LegacyResult<usize> {
        let len = self.read_i32()?;
        usize::try_from(len).map_err(|_| LegacyError::NegativeLength(len))
    }

    /// Reads an i32 element count where -1 marks a null collection.
    fn read_count(&mut self) -> LegacyResult<Option<usize>> {
        match self.read_i32()? {
            -1 => Ok(None),
            n if n < 0 => Err(LegacyError::NegativeLength(n)),
            n => Ok(Some(n as usize)),
        }
    }

    /// Unsigned LEB128, at most five bytes.
    fn read_var_len(&mut self) -> LegacyResult<usize> {
        let mut value: u64 = 0;
        for shift in (0..35).step_by(7) {
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return usize::try_from(value).map_err(|_| LegacyError::BadLengthPrefix);
            }
        }
        Err(LegacyError::BadLengthPrefix)
    }

    fn read_string(&mut self) -> LegacyResult<String> {
        let len = self.read_var_len()?;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| LegacyError::InvalidUtf8)
    }

    fn read_nullable_string(&mut self) -> LegacyResult<Option<String>> {
        if self.read_bool()? {
            self.read_string().map(Some)
        } else {
            Ok(None)
        }
    }

    fn read_list<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> LegacyResult<T>,
    ) -> LegacyResult<Option<Vec<T>>> {
        let Some(count) = self.read_count()? else {
            return Ok(None);
        };
        // Every element takes at least one byte.
        let mut items = Vec::with_capacity(count.min(self.buf.len()));
        for _ in 0..count {
            items.push(read(self)?);
        }
        Ok(Some(items))
    }

    fn read_map<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> LegacyResult<T>,
    ) -> LegacyResult<Option<IndexMap<String, T>>> {
        let Some(count) = self.read_count()? else {
            return Ok(None);
        };
        let mut map = IndexMap::with_capacity(count.min(self.buf.len()));
        for _ in 0..count {
            let key = self.read_string()?;
            let value = read(self)?;
            map.insert(key, value);
        }
        Ok(Some(map))
    }

    /// Presence byte, then a length-prefixed nested record sequence.
    fn read_nested_slot(&mut self, depth: usize, max_depth: usize) -> LegacyResult<Option<Frame>> {
        if !self.read_bool()? {
            return Ok(None);
        }
        let len = self.read_len()?;
        let bytes = self.take(len)?;
        decode_records(bytes, depth + 1, max_depth).map(Some)
    }
}
