//! Class-file constant pool decoding.
//!
//! The decoder indexes the pool without materialising entries: one pass
//! records each slot's tag byte and payload offset, and UTF-8 slots decode
//! lazily into a per-slot cache. Only the bytes up to the end of the pool
//! are ever parsed; everything after is the caller's to stream through.

use std::cell::OnceCell;

pub const UTF8_TAG: u8 = 1;
pub const INTEGER_TAG: u8 = 3;
pub const FLOAT_TAG: u8 = 4;
pub const LONG_TAG: u8 = 5;
pub const DOUBLE_TAG: u8 = 6;
pub const CLASS_TAG: u8 = 7;
pub const STRING_TAG: u8 = 8;
pub const FIELD_REF_TAG: u8 = 9;
pub const METHOD_REF_TAG: u8 = 10;
pub const INTERFACE_METHOD_REF_TAG: u8 = 11;
pub const NAME_AND_TYPE_TAG: u8 = 12;
pub const METHOD_HANDLE_TAG: u8 = 15;
pub const METHOD_TYPE_TAG: u8 = 16;
pub const INVOKE_DYNAMIC_TAG: u8 = 18;
/// Marker for the inaccessible slot after a long or double constant.
pub const RESERVED_TAG: u8 = 0;

pub const CLASS_MAGIC: u32 = 0xCAFE_BABE;
pub const MAX_SUPPORTED_VERSION: u16 = 52;

#[derive(Debug, thiserror::Error)]
pub enum ClassFileError {
    #[error("invalid class file magic: {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported class file version: {0}")]
    UnsupportedVersion(u16),
    #[error("invalid constant pool count: {0}")]
    InvalidConstantCount(u16),
    #[error("class file truncated inside the constant pool")]
    Truncated,
    #[error("long/double constant {index} overruns the constant pool")]
    DanglingWideConstant { index: usize },
    #[error("unknown constant pool tag: {0}")]
    UnknownTag(u8),
    #[error("expected tag {expected} at constant {index}, but got {actual}")]
    UnexpectedTag {
        index: usize,
        expected: u8,
        actual: u8,
    },
    #[error("constant index {index} out of bounds for pool of {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("invalid modified UTF-8 in constant {index}")]
    InvalidUtf8 { index: usize },
}

/// Payload byte count for a fixed-size tag; `None` for UTF-8 (variable) and
/// unknown tags.
pub fn payload_size(tag: u8) -> Option<usize> {
    match tag {
        LONG_TAG | DOUBLE_TAG => Some(8),
        CLASS_TAG | STRING_TAG | METHOD_TYPE_TAG => Some(2),
        INTEGER_TAG | FLOAT_TAG | FIELD_REF_TAG | METHOD_REF_TAG | INTERFACE_METHOD_REF_TAG
        | NAME_AND_TYPE_TAG | INVOKE_DYNAMIC_TAG => Some(4),
        METHOD_HANDLE_TAG => Some(3),
        _ => None,
    }
}

/// A parsed view over a class file's constant pool.
///
/// Slots are indexed from zero here; the 1-based class-file convention only
/// appears in payloads.
#[derive(Debug)]
pub struct ConstantPoolDecoder<'a> {
    data: &'a [u8],
    tags: Vec<u8>,
    offsets: Vec<u32>,
    utf8_cache: Vec<OnceCell<String>>,
    end: usize,
    version: u16,
}

impl<'a> ConstantPoolDecoder<'a> {
    pub fn decode(data: &'a [u8]) -> Result<Self, ClassFileError> {
        let mut reader = SliceReader { data, pos: 0 };
        let magic = reader.read_u32()?;
        if magic != CLASS_MAGIC {
            return Err(ClassFileError::BadMagic(magic));
        }
        let _minor = reader.read_u16()?;
        let version = reader.read_u16()?;
        if version > MAX_SUPPORTED_VERSION {
            return Err(ClassFileError::UnsupportedVersion(version));
        }
        let count = reader.read_u16()?;
        if count < 1 {
            return Err(ClassFileError::InvalidConstantCount(count));
        }

        let size = (count - 1) as usize;
        let mut tags = vec![RESERVED_TAG; size];
        let mut offsets = vec![0u32; size];
        let mut index = 0;
        while index < size {
            let tag = reader.read_u8()?;
            let offset = reader.pos as u32;
            tags[index] = tag;
            offsets[index] = offset;
            match tag {
                UTF8_TAG => {
                    let length = reader.read_u16()? as usize;
                    reader.skip(length)?;
                    index += 1;
                }
                LONG_TAG | DOUBLE_TAG => {
                    reader.skip(8)?;
                    if index + 1 >= size {
                        return Err(ClassFileError::DanglingWideConstant { index });
                    }
                    offsets[index + 1] = offset;
                    index += 2;
                }
                other => {
                    let payload = payload_size(other).ok_or(ClassFileError::UnknownTag(other))?;
                    reader.skip(payload)?;
                    index += 1;
                }
            }
        }

        Ok(Self {
            data,
            tags,
            offsets,
            utf8_cache: (0..size).map(|_| OnceCell::new()).collect(),
            end: reader.pos,
            version,
        })
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Number of pool slots (the class-file count field minus one).
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Offset of the first header byte.
    pub fn start(&self) -> usize {
        0
    }

    /// Offset just past the last pool byte.
    pub fn end(&self) -> usize {
        self.end
    }

    pub fn byte_size(&self) -> usize {
        self.end - self.start()
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn tag(&self, index: usize) -> Result<u8, ClassFileError> {
        self.tags
            .get(index)
            .copied()
            .ok_or(ClassFileError::IndexOutOfBounds {
                index,
                len: self.tags.len(),
            })
    }

    pub fn offset(&self, index: usize) -> Result<usize, ClassFileError> {
        self.offsets
            .get(index)
            .map(|&offset| offset as usize)
            .ok_or(ClassFileError::IndexOutOfBounds {
                index,
                len: self.offsets.len(),
            })
    }

    /// The decoded string at a UTF-8 slot, cached per slot.
    pub fn utf8(&self, index: usize) -> Result<&str, ClassFileError> {
        self.check_tag(index, UTF8_TAG)?;
        let cell = &self.utf8_cache[index];
        if let Some(decoded) = cell.get() {
            return Ok(decoded);
        }
        let offset = self.offsets[index] as usize;
        let length = self.u16_at(offset) as usize;
        let bytes = &self.data[offset + 2..offset + 2 + length];
        let decoded =
            decode_modified_utf8(bytes).ok_or(ClassFileError::InvalidUtf8 { index })?;
        Ok(cell.get_or_init(|| decoded))
    }

    /// A NameAndType payload packed into one u32: low half is the (1-based)
    /// name index, high half the descriptor index.
    pub fn name_and_type(&self, index: usize) -> Result<u32, ClassFileError> {
        self.check_tag(index, NAME_AND_TYPE_TAG)?;
        let offset = self.offsets[index] as usize;
        let name = self.u16_at(offset) as u32;
        let descriptor = self.u16_at(offset + 2) as u32;
        Ok(descriptor << 16 | name)
    }

    /// The (1-based) UTF-8 index a Class slot points at.
    pub fn class_name_index(&self, index: usize) -> Result<u16, ClassFileError> {
        self.check_tag(index, CLASS_TAG)?;
        Ok(self.u16_at(self.offsets[index] as usize))
    }

    pub(crate) fn u16_at(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.data[offset], self.data[offset + 1]])
    }

    fn check_tag(&self, index: usize, expected: u8) -> Result<(), ClassFileError> {
        let actual = self.tag(index)?;
        if actual != expected {
            return Err(ClassFileError::UnexpectedTag {
                index,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl SliceReader<'_> {
    fn read_u8(&mut self) -> Result<u8, ClassFileError> {
        let byte = *self.data.get(self.pos).ok_or(ClassFileError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16, ClassFileError> {
        let bytes = self
            .data
            .get(self.pos..self.pos + 2)
            .ok_or(ClassFileError::Truncated)?;
        self.pos += 2;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, ClassFileError> {
        let bytes = self
            .data
            .get(self.pos..self.pos + 4)
            .ok_or(ClassFileError::Truncated)?;
        self.pos += 4;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn skip(&mut self, count: usize) -> Result<(), ClassFileError> {
        let end = self.pos.checked_add(count).ok_or(ClassFileError::Truncated)?;
        if end > self.data.len() {
            return Err(ClassFileError::Truncated);
        }
        self.pos = end;
        Ok(())
    }
}

/// Decodes Java's modified UTF-8: CESU-8 style surrogate pairs, NUL as
/// `0xC0 0x80`, never four-byte sequences.
fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            let b2 = *bytes.get(i + 1)?;
            if b2 & 0xC0 != 0x80 {
                return None;
            }
            units.push(u16::from(b & 0x1F) << 6 | u16::from(b2 & 0x3F));
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            let b2 = *bytes.get(i + 1)?;
            let b3 = *bytes.get(i + 2)?;
            if b2 & 0xC0 != 0x80 || b3 & 0xC0 != 0x80 {
                return None;
            }
            units.push(u16::from(b & 0x0F) << 12 | u16::from(b2 & 0x3F) << 6 | u16::from(b3 & 0x3F));
            i += 3;
        } else {
            return None;
        }
    }
    // Identifiers may contain unpaired surrogates; decode lossily rather
    // than rejecting the whole pool.
    Some(String::from_utf16_lossy(&units))
}

/// Test-only constant pool assembly, shared with the remapper tests.
#[cfg(test)]
pub(crate) mod pool {
    use byteorder::{BigEndian, WriteBytesExt};

    #[derive(Debug, Clone)]
    pub enum Entry {
        Utf8(&'static str),
        Integer(i32),
        Long(i64),
        Class(u16),
        String(u16),
        FieldRef(u16, u16),
        MethodRef(u16, u16),
        NameAndType(u16, u16),
        MethodType(u16),
        Raw(u8, Vec<u8>),
    }

    /// Slot count an entry occupies (long/double take two).
    pub fn slots(entry: &Entry) -> u16 {
        match entry {
            Entry::Long(_) => 2,
            _ => 1,
        }
    }

    /// Builds a class file: header, pool, then `tail` verbatim.
    pub fn class_file(version: u16, entries: &[Entry], tail: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.write_u32::<BigEndian>(super::CLASS_MAGIC).unwrap();
        data.write_u16::<BigEndian>(0).unwrap();
        data.write_u16::<BigEndian>(version).unwrap();
        let count: u16 = 1 + entries.iter().map(slots).sum::<u16>();
        data.write_u16::<BigEndian>(count).unwrap();
        for entry in entries {
            match entry {
                Entry::Utf8(s) => {
                    data.push(super::UTF8_TAG);
                    data.write_u16::<BigEndian>(s.len() as u16).unwrap();
                    data.extend_from_slice(s.as_bytes());
                }
                Entry::Integer(value) => {
                    data.push(super::INTEGER_TAG);
                    data.write_i32::<BigEndian>(*value).unwrap();
                }
                Entry::Long(value) => {
                    data.push(super::LONG_TAG);
                    data.write_i64::<BigEndian>(*value).unwrap();
                }
                Entry::Class(name) => {
                    data.push(super::CLASS_TAG);
                    data.write_u16::<BigEndian>(*name).unwrap();
                }
                Entry::String(utf8) => {
                    data.push(super::STRING_TAG);
                    data.write_u16::<BigEndian>(*utf8).unwrap();
                }
                Entry::FieldRef(class, nat) => {
                    data.push(super::FIELD_REF_TAG);
                    data.write_u16::<BigEndian>(*class).unwrap();
                    data.write_u16::<BigEndian>(*nat).unwrap();
                }
                Entry::MethodRef(class, nat) => {
                    data.push(super::METHOD_REF_TAG);
                    data.write_u16::<BigEndian>(*class).unwrap();
                    data.write_u16::<BigEndian>(*nat).unwrap();
                }
                Entry::NameAndType(name, descriptor) => {
                    data.push(super::NAME_AND_TYPE_TAG);
                    data.write_u16::<BigEndian>(*name).unwrap();
                    data.write_u16::<BigEndian>(*descriptor).unwrap();
                }
                Entry::MethodType(descriptor) => {
                    data.push(super::METHOD_TYPE_TAG);
                    data.write_u16::<BigEndian>(*descriptor).unwrap();
                }
                Entry::Raw(tag, payload) => {
                    data.push(*tag);
                    data.extend_from_slice(payload);
                }
            }
        }
        data.extend_from_slice(tail);
        data
    }
}
