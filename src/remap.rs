//! Constant pool rewriting.
//!
//! The remapper never rewrites NameAndType slots in place: which rename
//! applies depends on the FieldRef/MethodRef that uses the slot, so fresh
//! NameAndType and UTF-8 entries are appended to the end of the pool and the
//! originals are left behind unreferenced. Everything after the pool is the
//! caller's to copy verbatim.

use crate::classfile::{
    CLASS_MAGIC, CLASS_TAG, ClassFileError, ConstantPoolDecoder, DOUBLE_TAG, FIELD_REF_TAG,
    FLOAT_TAG, INTEGER_TAG, INTERFACE_METHOD_REF_TAG, INVOKE_DYNAMIC_TAG, LONG_TAG,
    METHOD_HANDLE_TAG, METHOD_REF_TAG, METHOD_TYPE_TAG, NAME_AND_TYPE_TAG, STRING_TAG, UTF8_TAG,
    payload_size,
};
use crate::mappings::{ClassMappings, Mappings};

#[derive(Debug, thiserror::Error)]
pub enum RemapError {
    #[error(transparent)]
    ClassFile(#[from] ClassFileError),
    #[error("class {class} remaps to an empty name")]
    InvalidMappings { class: String },
    #[error("remapped constant pool overflows the u16 count field")]
    PoolOverflow,
}

/// Remaps a whole class file: rewritten constant pool, then the remaining
/// bytes streamed through unchanged.
pub fn remap_class_file(data: &[u8], mappings: &Mappings) -> Result<Vec<u8>, RemapError> {
    let decoder = ConstantPoolDecoder::decode(data)?;
    let mut out = Vec::with_capacity(data.len() + data.len() / 2);
    ConstantPoolRemapper::new(&decoder, mappings).remap(&mut out)?;
    out.extend_from_slice(&data[decoder.end()..]);
    Ok(out)
}

pub struct ConstantPoolRemapper<'a, 'data> {
    decoder: &'a ConstantPoolDecoder<'data>,
    mappings: &'a Mappings,
    /// Lazily resolved class mappings per Class slot; the outer `Option` is
    /// the "looked up yet" sentinel.
    class_mappings: Vec<Option<Option<&'a ClassMappings>>>,
    /// For UTF-8 slots used as descriptors: the slot in the new pool that
    /// carries the remapped text, or the original slot when unchanged.
    remapped_descriptors: Vec<Option<usize>>,
    /// Appended UTF-8 and NameAndType entries.
    additional: Vec<u8>,
    appended: usize,
}

impl<'a, 'data> ConstantPoolRemapper<'a, 'data> {
    pub fn new(decoder: &'a ConstantPoolDecoder<'data>, mappings: &'a Mappings) -> Self {
        Self {
            decoder,
            mappings,
            class_mappings: vec![None; decoder.len()],
            remapped_descriptors: vec![None; decoder.len()],
            additional: Vec::new(),
            appended: 0,
        }
    }

    /// Emits the remapped pool (header included) into `out`.
    pub fn remap(mut self, out: &mut Vec<u8>) -> Result<(), RemapError> {
        out.extend_from_slice(&CLASS_MAGIC.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&self.decoder.version().to_be_bytes());
        let count_position = out.len();
        out.extend_from_slice(&0u16.to_be_bytes());

        let data = self.decoder.data();
        let mut index = 0;
        while index < self.decoder.len() {
            let tag = self.decoder.tag(index)?;
            let offset = self.decoder.offset(index)?;
            match tag {
                FIELD_REF_TAG | METHOD_REF_TAG | INTERFACE_METHOD_REF_TAG => {
                    self.remap_member_ref(tag, index, offset, out)?;
                    index += 1;
                }
                METHOD_TYPE_TAG => {
                    let descriptor_slot = self.slot(self.decoder.u16_at(offset))?;
                    let remapped = self.remap_descriptor_slot(descriptor_slot, true)?;
                    out.push(tag);
                    out.extend_from_slice(&to_pool_index(remapped)?.to_be_bytes());
                    index += 1;
                }
                CLASS_TAG => {
                    let class = self.class_mappings_at(index)?;
                    match class.and_then(|c| c.remapped_name().map(|n| (c, n))) {
                        Some((class, remapped_name)) => {
                            if remapped_name.is_empty() {
                                return Err(RemapError::InvalidMappings {
                                    class: class.original_name().to_string(),
                                });
                            }
                            let name = remapped_name.to_string();
                            let utf8 = self.insert_utf8(&name);
                            out.push(tag);
                            out.extend_from_slice(&to_pool_index(utf8)?.to_be_bytes());
                        }
                        None => copy_verbatim(out, tag, data, offset),
                    }
                    index += 1;
                }
                UTF8_TAG => {
                    let length = self.decoder.u16_at(offset) as usize;
                    out.push(tag);
                    out.extend_from_slice(&data[offset..offset + 2 + length]);
                    index += 1;
                }
                LONG_TAG | DOUBLE_TAG => {
                    copy_verbatim(out, tag, data, offset);
                    // The following slot is the wide constant's reserved half.
                    index += 2;
                }
                NAME_AND_TYPE_TAG | METHOD_HANDLE_TAG | INVOKE_DYNAMIC_TAG | STRING_TAG
                | FLOAT_TAG | INTEGER_TAG => {
                    copy_verbatim(out, tag, data, offset);
                    index += 1;
                }
                other => return Err(ClassFileError::UnknownTag(other).into()),
            }
        }

        let count = self
            .decoder
            .len()
            .checked_add(self.appended)
            .and_then(|total| u16::try_from(total + 1).ok())
            .ok_or(RemapError::PoolOverflow)?;
        out[count_position..count_position + 2].copy_from_slice(&count.to_be_bytes());
        out.extend_from_slice(&self.additional);
        Ok(())
    }

    fn remap_member_ref(
        &mut self,
        tag: u8,
        index: usize,
        offset: usize,
        out: &mut Vec<u8>,
    ) -> Result<(), RemapError> {
        let class_ref = self.decoder.u16_at(offset);
        let class_slot = self.slot(class_ref)?;
        if let Some(class) = self.class_mappings_at(class_slot)? {
            let name_and_type_slot = self.slot(self.decoder.u16_at(offset + 2))?;
            let packed = self.decoder.name_and_type(name_and_type_slot)?;
            let name_ref = (packed & 0xFFFF) as u16;
            let descriptor_ref = (packed >> 16) as u16;
            let name_slot = self.slot(name_ref)?;
            let descriptor_slot = self.slot(descriptor_ref)?;

            let original_name = self.decoder.utf8(name_slot)?;
            let (new_name, remapped_descriptor) = if tag == FIELD_REF_TAG {
                let new_name = class.field_name(original_name).map(str::to_string);
                (new_name, self.remap_descriptor_slot(descriptor_slot, false)?)
            } else {
                let descriptor = self.decoder.utf8(descriptor_slot)?;
                let new_name = class.method_name(original_name, descriptor).map(str::to_string);
                (new_name, self.remap_descriptor_slot(descriptor_slot, true)?)
            };

            if new_name.is_some() || remapped_descriptor != descriptor_slot {
                let name_index = match new_name {
                    Some(new_name) => to_pool_index(self.insert_utf8(&new_name))?,
                    None => name_ref,
                };
                let descriptor_index = to_pool_index(remapped_descriptor)?;
                let name_and_type = self.insert_name_and_type(name_index, descriptor_index);
                out.push(tag);
                out.extend_from_slice(&class_ref.to_be_bytes());
                out.extend_from_slice(&to_pool_index(name_and_type)?.to_be_bytes());
                return Ok(());
            }
        }
        copy_verbatim(out, tag, self.decoder.data(), offset);
        Ok(())
    }

    fn class_mappings_at(
        &mut self,
        class_slot: usize,
    ) -> Result<Option<&'a ClassMappings>, ClassFileError> {
        if let Some(cached) = self.class_mappings[class_slot] {
            return Ok(cached);
        }
        let name_slot = self.slot(self.decoder.class_name_index(class_slot)?)?;
        let name = self.decoder.utf8(name_slot)?;
        let resolved = self.mappings.class_mappings(name);
        self.class_mappings[class_slot] = Some(resolved);
        Ok(resolved)
    }

    /// New-pool slot carrying the (possibly rewritten) descriptor text,
    /// memoised per source slot.
    fn remap_descriptor_slot(
        &mut self,
        descriptor_slot: usize,
        method: bool,
    ) -> Result<usize, ClassFileError> {
        if let Some(resolved) = self.remapped_descriptors[descriptor_slot] {
            return Ok(resolved);
        }
        let descriptor = self.decoder.utf8(descriptor_slot)?;
        let remapped = if method {
            self.mappings.remap_method_descriptor(descriptor)
        } else {
            self.mappings.remap_type_descriptor(descriptor)
        };
        let resolved = match remapped {
            Some(text) => self.insert_utf8(&text),
            None => descriptor_slot,
        };
        self.remapped_descriptors[descriptor_slot] = Some(resolved);
        Ok(resolved)
    }

    /// Appends a UTF-8 constant, returning its zero-based slot in the new pool.
    fn insert_utf8(&mut self, value: &str) -> usize {
        let encoded = encode_modified_utf8(value);
        self.additional.push(UTF8_TAG);
        self.additional
            .extend_from_slice(&(encoded.len() as u16).to_be_bytes());
        self.additional.extend_from_slice(&encoded);
        self.next_appended_slot()
    }

    /// Appends a NameAndType constant pointing at the given 1-based indices.
    fn insert_name_and_type(&mut self, name_index: u16, descriptor_index: u16) -> usize {
        self.additional.push(NAME_AND_TYPE_TAG);
        self.additional.extend_from_slice(&name_index.to_be_bytes());
        self.additional.extend_from_slice(&descriptor_index.to_be_bytes());
        self.next_appended_slot()
    }

    fn next_appended_slot(&mut self) -> usize {
        let slot = self.decoder.len() + self.appended;
        self.appended += 1;
        slot
    }

    fn slot(&self, one_based: u16) -> Result<usize, ClassFileError> {
        let len = self.decoder.len();
        let index = one_based as usize;
        if index == 0 || index > len {
            return Err(ClassFileError::IndexOutOfBounds { index, len });
        }
        Ok(index - 1)
    }
}

fn copy_verbatim(out: &mut Vec<u8>, tag: u8, data: &[u8], offset: usize) {
    // Every tag reaching this point has a fixed payload size.
    let size = payload_size(tag).unwrap_or(0);
    out.push(tag);
    out.extend_from_slice(&data[offset..offset + size]);
}

fn to_pool_index(slot: usize) -> Result<u16, RemapError> {
    u16::try_from(slot + 1).map_err(|_| RemapError::PoolOverflow)
}

/// Encodes Java's modified UTF-8: NUL as `0xC0 0x80`, supplementary
/// characters as CESU-8 surrogate pairs.
fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => bytes.push(unit as u8),
            0x0000..=0x07FF => {
                bytes.push(0xC0 | (unit >> 6) as u8);
                bytes.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                bytes.push(0xE0 | (unit >> 12) as u8);
                bytes.push(0x80 | (unit >> 6 & 0x3F) as u8);
                bytes.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    bytes
}
