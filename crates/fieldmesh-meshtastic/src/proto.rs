//! Minimal protobuf wire codec
//!
//! Only what the Meshtastic handshake and data packets need: varints,
//! fixed32 and length-delimited fields, written by field number into a
//! capacity-bounded buffer and read back by a linear scan.
//!
//! Writing never fails. A field that does not fit is not written and the
//! writer's overflow flag is set; [`ProtoWriter::finish`] turns that flag
//! into an error. Reading never panics. Malformed input simply ends the
//! scan, so a field that cannot be reached reads as absent.

use bytes::Bytes;

use crate::error::{MeshtasticError, Result};

/// Wire type codes
pub mod wire_type {
    /// Base-128 varint
    pub const VARINT: u8 = 0;
    /// Little-endian 64-bit
    pub const FIXED64: u8 = 1;
    /// Length-prefixed bytes
    pub const LENGTH_DELIMITED: u8 = 2;
    /// Little-endian 32-bit
    pub const FIXED32: u8 = 5;
}

/// Encoded size of a varint
pub fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

fn tag(field: u32, wire_type: u8) -> u64 {
    ((field as u64) << 3) | wire_type as u64
}

/// Capacity-bounded protobuf writer
#[derive(Debug, Clone)]
pub struct ProtoWriter {
    buf: Vec<u8>,
    capacity: usize,
    overflow: bool,
    needed: usize,
}

impl ProtoWriter {
    /// Create a writer that will hold at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            overflow: false,
            needed: 0,
        }
    }

    fn reserve(&mut self, len: usize) -> bool {
        self.needed += len;
        if self.overflow || self.buf.len() + len > self.capacity {
            self.overflow = true;
            return false;
        }
        true
    }

    fn put_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.push((value as u8 & 0x7F) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    /// Write a varint field
    pub fn write_varint(&mut self, field: u32, value: u64) -> &mut Self {
        let tag = tag(field, wire_type::VARINT);
        if self.reserve(varint_len(tag) + varint_len(value)) {
            self.put_varint(tag);
            self.put_varint(value);
        }
        self
    }

    /// Write a bool as a varint field
    pub fn write_bool(&mut self, field: u32, value: bool) -> &mut Self {
        self.write_varint(field, value as u64)
    }

    /// Write a fixed32 field
    pub fn write_fixed32(&mut self, field: u32, value: u32) -> &mut Self {
        let tag = tag(field, wire_type::FIXED32);
        if self.reserve(varint_len(tag) + 4) {
            self.put_varint(tag);
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
        self
    }

    /// Write a length-delimited field
    pub fn write_bytes(&mut self, field: u32, value: &[u8]) -> &mut Self {
        let tag = tag(field, wire_type::LENGTH_DELIMITED);
        if self.reserve(varint_len(tag) + varint_len(value.len() as u64) + value.len()) {
            self.put_varint(tag);
            self.put_varint(value.len() as u64);
            self.buf.extend_from_slice(value);
        }
        self
    }

    /// Write a string field
    pub fn write_string(&mut self, field: u32, value: &str) -> &mut Self {
        self.write_bytes(field, value.as_bytes())
    }

    /// Write a nested message built by another writer
    ///
    /// An overflowed nested writer overflows this one too.
    pub fn write_message(&mut self, field: u32, nested: &ProtoWriter) -> &mut Self {
        if nested.overflow {
            self.overflow = true;
            self.needed += nested.needed;
            return self;
        }
        self.write_bytes(field, &nested.buf)
    }

    /// Whether any write was dropped for lack of room
    pub fn is_overflow(&self) -> bool {
        self.overflow
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Written bytes, valid only when no overflow occurred
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Finish, failing if any write overflowed
    pub fn finish(self) -> Result<Bytes> {
        if self.overflow {
            return Err(MeshtasticError::EncodeOverflow {
                needed: self.needed,
                capacity: self.capacity,
            });
        }
        Ok(Bytes::from(self.buf))
    }
}

/// A decoded field value, borrowing length-delimited data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    /// Wire type 0
    Varint(u64),
    /// Wire type 1
    Fixed64(u64),
    /// Wire type 2
    LengthDelimited(&'a [u8]),
    /// Wire type 5
    Fixed32(u32),
}

/// One field from a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field<'a> {
    /// Field number
    pub number: u32,
    /// Decoded value
    pub value: FieldValue<'a>,
}

/// Read a varint at `pos`, advancing it
pub fn read_varint(data: &[u8], pos: &mut usize) -> Option<u64> {
    let mut result: u64 = 0;
    for shift in (0..64).step_by(7) {
        let byte = *data.get(*pos)?;
        *pos += 1;
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
    }
    None
}

/// Iterator over the fields of one message
///
/// Stops at the end of input or at the first malformed field. Groups and
/// reserved wire types count as malformed.
#[derive(Debug, Clone)]
pub struct FieldIter<'a> {
    data: &'a [u8],
    pos: usize,
    malformed: bool,
}

impl<'a> FieldIter<'a> {
    /// Iterate the fields of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            malformed: false,
        }
    }

    /// Whether the scan stopped on bad input
    pub fn is_malformed(&self) -> bool {
        self.malformed
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn next_field(&mut self) -> Option<Field<'a>> {
        let key = read_varint(self.data, &mut self.pos)?;
        let number = u32::try_from(key >> 3).ok().filter(|n| *n != 0)?;
        let value = match (key & 0x7) as u8 {
            wire_type::VARINT => FieldValue::Varint(read_varint(self.data, &mut self.pos)?),
            wire_type::FIXED64 => {
                let bytes: [u8; 8] = self.take(8)?.try_into().ok()?;
                FieldValue::Fixed64(u64::from_le_bytes(bytes))
            }
            wire_type::LENGTH_DELIMITED => {
                let len = usize::try_from(read_varint(self.data, &mut self.pos)?).ok()?;
                FieldValue::LengthDelimited(self.take(len)?)
            }
            wire_type::FIXED32 => {
                let bytes: [u8; 4] = self.take(4)?.try_into().ok()?;
                FieldValue::Fixed32(u32::from_le_bytes(bytes))
            }
            _ => return None,
        };
        Some(Field { number, value })
    }
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = Field<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.malformed || self.pos >= self.data.len() {
            return None;
        }
        let field = self.next_field();
        if field.is_none() {
            self.malformed = true;
        }
        field
    }
}

/// Iterate the fields of a message
pub fn fields(data: &[u8]) -> FieldIter<'_> {
    FieldIter::new(data)
}

/// Whether the whole buffer parses as a sequence of fields
pub fn is_well_formed(data: &[u8]) -> bool {
    let mut iter = fields(data);
    iter.by_ref().for_each(drop);
    !iter.is_malformed()
}

/// First varint field with the given number
pub fn extract_varint(data: &[u8], field: u32) -> Option<u64> {
    fields(data).find_map(|f| match f.value {
        FieldValue::Varint(v) if f.number == field => Some(v),
        _ => None,
    })
}

/// First fixed32 field with the given number
pub fn extract_fixed32(data: &[u8], field: u32) -> Option<u32> {
    fields(data).find_map(|f| match f.value {
        FieldValue::Fixed32(v) if f.number == field => Some(v),
        _ => None,
    })
}

/// First length-delimited field with the given number
pub fn extract_length_delimited(data: &[u8], field: u32) -> Option<&[u8]> {
    fields(data).find_map(|f| match f.value {
        FieldValue::LengthDelimited(v) if f.number == field => Some(v),
        _ => None,
    })
}

/// First string field with the given number, if valid UTF-8
pub fn extract_string(data: &[u8], field: u32) -> Option<&str> {
    extract_length_delimited(data, field).and_then(|b| std::str::from_utf8(b).ok())
}
