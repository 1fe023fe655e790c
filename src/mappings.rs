//! The rename dictionary shared by the source and class-file pipelines.
//!
//! Lookups are two-level: class internal name, then member. Method renames
//! are keyed by (descriptor, name) — per class the descriptor is usually the
//! sparser dimension, so putting it first lets a descriptor-driven lookup
//! skip hashing the name twice.
//!
//! Descriptor rewriting walks the JVM grammar natively and only touches class
//! internal names in `L...;` positions. Results (including "no change") are
//! memoised in bounded caches; correctness never depends on a cache hit.

use anyhow::{Context, Result, bail};
use moka::sync::Cache;
use std::collections::HashMap;
use std::path::Path;

use crate::binary;

const TYPE_CACHE_CAPACITY: u64 = 10_000;
const METHOD_CACHE_CAPACITY: u64 = 100_000;

/// Renames for a single class: its own new name plus field and method renames.
#[derive(Debug, Clone, Default)]
pub struct ClassMappings {
    original_name: String,
    remapped_name: Option<String>,
    field_names: HashMap<String, String>,
    method_names: HashMap<(String, String), String>,
}

impl ClassMappings {
    pub fn new(original_name: impl Into<String>) -> Self {
        Self {
            original_name: original_name.into(),
            ..Self::default()
        }
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn remapped_name(&self) -> Option<&str> {
        self.remapped_name.as_deref()
    }

    pub fn set_remapped_name(&mut self, name: impl Into<String>) {
        self.remapped_name = Some(name.into());
    }

    pub fn rename_field(&mut self, old: impl Into<String>, new: impl Into<String>) {
        self.field_names.insert(old.into(), new.into());
    }

    pub fn rename_method(
        &mut self,
        old: impl Into<String>,
        descriptor: impl Into<String>,
        new: impl Into<String>,
    ) {
        self.method_names
            .insert((descriptor.into(), old.into()), new.into());
    }

    /// The new field name, or `None` when the field keeps its name.
    pub fn field_name(&self, old: &str) -> Option<&str> {
        self.field_names.get(old).map(String::as_str)
    }

    /// The new method name, or `None` when the method keeps its name.
    pub fn method_name(&self, old: &str, descriptor: &str) -> Option<&str> {
        // TODO: avoid allocating the key once hashbrown's raw entry API is
        // usable from stable for (str, str) probing.
        self.method_names
            .get(&(descriptor.to_string(), old.to_string()))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.remapped_name.is_none() && self.field_names.is_empty() && self.method_names.is_empty()
    }
}

/// The full rename dictionary plus descriptor memo caches.
#[derive(Debug)]
pub struct Mappings {
    classes: HashMap<String, ClassMappings>,
    type_descriptor_cache: Cache<String, Option<String>>,
    method_descriptor_cache: Cache<String, Option<String>>,
}

impl Mappings {
    pub fn empty() -> Self {
        Self::from_classes([])
    }

    pub fn from_classes(classes: impl IntoIterator<Item = ClassMappings>) -> Self {
        let classes = classes
            .into_iter()
            .map(|class| (class.original_name.clone(), class))
            .collect();
        Self {
            classes,
            type_descriptor_cache: Cache::new(TYPE_CACHE_CAPACITY),
            method_descriptor_cache: Cache::new(METHOD_CACHE_CAPACITY),
        }
    }

    /// Loads mappings from a file, dispatching on the extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let name = path.file_name().and_then(|name| name.to_str()).unwrap_or("");
        if name.ends_with(".srg.dat") {
            binary::read_mappings_file(path)
                .with_context(|| format!("failed to read mappings: {}", path.display()))
        } else {
            bail!("unknown mapping file extension: {}", path.display());
        }
    }

    pub fn class_mappings(&self, internal_name: &str) -> Option<&ClassMappings> {
        self.classes.get(internal_name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassMappings> {
        self.classes.values()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Rewrites a type descriptor, or `None` when nothing inside it renames.
    pub fn remap_type_descriptor(&self, descriptor: &str) -> Option<String> {
        self.type_descriptor_cache
            .get_with(descriptor.to_string(), || self.remap_type(descriptor))
    }

    /// Rewrites a `(params*)return` method descriptor, or `None` when
    /// nothing inside it renames.
    pub fn remap_method_descriptor(&self, descriptor: &str) -> Option<String> {
        self.method_descriptor_cache
            .get_with(descriptor.to_string(), || self.remap_method(descriptor))
    }

    fn remap_type(&self, descriptor: &str) -> Option<String> {
        let element = descriptor.trim_start_matches('[');
        let name = element.strip_prefix('L')?.strip_suffix(';')?;
        let remapped = self.classes.get(name)?.remapped_name()?;
        let dimensions = descriptor.len() - element.len();
        let mut result = String::with_capacity(dimensions + remapped.len() + 2);
        result.extend(std::iter::repeat('[').take(dimensions));
        result.push('L');
        result.push_str(remapped);
        result.push(';');
        Some(result)
    }

    fn remap_method(&self, descriptor: &str) -> Option<String> {
        let params = descriptor.strip_prefix('(')?;
        let close = params.find(')')?;
        let (params, return_type) = (&params[..close], &params[close + 1..]);

        let mut result = String::with_capacity(descriptor.len() + 16);
        let mut changed = false;
        result.push('(');
        let mut pos = 0;
        while pos < params.len() {
            let len = type_descriptor_len(params, pos)?;
            let component = &params[pos..pos + len];
            match self.remap_type(component) {
                Some(remapped) => {
                    changed = true;
                    result.push_str(&remapped);
                }
                None => result.push_str(component),
            }
            pos += len;
        }
        result.push(')');
        match self.remap_type(return_type) {
            Some(remapped) => {
                changed = true;
                result.push_str(&remapped);
            }
            None => result.push_str(return_type),
        }
        changed.then_some(result)
    }
}

/// Byte length of the single type descriptor starting at `pos`, or `None`
/// when the text is not a well-formed descriptor.
fn type_descriptor_len(text: &str, pos: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut index = pos;
    while bytes.get(index) == Some(&b'[') {
        index += 1;
    }
    match bytes.get(index)? {
        b'L' => {
            let semicolon = text[index..].find(';')?;
            Some(index + semicolon + 1 - pos)
        }
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => Some(index + 1 - pos),
        _ => None,
    }
}
