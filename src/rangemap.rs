//! The persisted index of every renameable identifier in a source tree.
//!
//! A range map ties three things together per relative file path: the field
//! references, the method references, and a content hash used to skip
//! re-analysis of unchanged files. On disk it is a MessagePack map of those
//! three dictionaries, with each reference packed into a fixed-layout binary
//! blob (offsets and length-prefixed names, big-endian).

use anyhow::{Context, Result, bail, ensure};
use rmp::decode;
use rmp::encode;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::OnceLock;

use crate::location::{FieldReference, MemberReference, MethodReference};

const FIELD_REFERENCES_KEY: &str = "fieldReferences";
const METHOD_REFERENCES_KEY: &str = "methodReferences";
const FILE_HASHES_KEY: &str = "fileHashes";

#[derive(Debug, Clone, Default)]
pub struct RangeMap {
    field_references: BTreeMap<String, Vec<FieldReference>>,
    method_references: BTreeMap<String, Vec<MethodReference>>,
    file_hashes: BTreeMap<String, Vec<u8>>,
    known_files: OnceLock<BTreeSet<String>>,
}

impl RangeMap {
    pub fn new(
        field_references: BTreeMap<String, Vec<FieldReference>>,
        method_references: BTreeMap<String, Vec<MethodReference>>,
        file_hashes: BTreeMap<String, Vec<u8>>,
    ) -> Self {
        Self {
            field_references,
            method_references,
            file_hashes,
            known_files: OnceLock::new(),
        }
    }

    /// The canonical empty map.
    pub fn empty() -> &'static RangeMap {
        static EMPTY: OnceLock<RangeMap> = OnceLock::new();
        EMPTY.get_or_init(RangeMap::default)
    }

    pub fn is_empty(&self) -> bool {
        self.field_references.is_empty()
            && self.method_references.is_empty()
            && self.file_hashes.is_empty()
    }

    pub fn field_references(&self, file: &str) -> &[FieldReference] {
        self.field_references.get(file).map_or(&[], Vec::as_slice)
    }

    pub fn method_references(&self, file: &str) -> &[MethodReference] {
        self.method_references.get(file).map_or(&[], Vec::as_slice)
    }

    /// Both reference lists for a file, merged and sorted by location.
    pub fn all_sorted_references(&self, file: &str) -> Vec<MemberReference> {
        let mut references: Vec<MemberReference> = self
            .field_references(file)
            .iter()
            .cloned()
            .map(MemberReference::from)
            .chain(
                self.method_references(file)
                    .iter()
                    .cloned()
                    .map(MemberReference::from),
            )
            .collect();
        references.sort();
        references
    }

    pub fn file_hash(&self, file: &str) -> Option<&[u8]> {
        self.file_hashes.get(file).map(Vec::as_slice)
    }

    pub fn has_file_hash(&self, file: &str, expected: &[u8]) -> bool {
        self.file_hash(file) == Some(expected)
    }

    pub fn file_hashes(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.file_hashes
    }

    /// The files that carry references (hash-only files excluded), cached.
    pub fn known_files(&self) -> &BTreeSet<String> {
        self.known_files.get_or_init(|| {
            self.field_references
                .keys()
                .chain(self.method_references.keys())
                .cloned()
                .collect()
        })
    }

    /// Folds a partial map into this one, producing a new map.
    ///
    /// For every file the other map knows about, both reference lists are
    /// replaced wholesale; hashes are inserted or overwritten. Entries unique
    /// to `self` survive. This is what lets an incremental analysis of only
    /// the changed files refresh the full map.
    pub fn update(&self, other: &RangeMap) -> RangeMap {
        let mut field_references = self.field_references.clone();
        let mut method_references = self.method_references.clone();
        let mut file_hashes = self.file_hashes.clone();
        for file in other.known_files() {
            match other.field_references.get(file) {
                Some(references) => field_references.insert(file.clone(), references.clone()),
                None => field_references.remove(file),
            };
            match other.method_references.get(file) {
                Some(references) => method_references.insert(file.clone(), references.clone()),
                None => method_references.remove(file),
            };
        }
        for (file, hash) in &other.file_hashes {
            file_hashes.insert(file.clone(), hash.clone());
        }
        RangeMap::new(field_references, method_references, file_hashes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.pack(&mut out)?;
        Ok(out)
    }

    fn pack<W: Write>(&self, out: &mut W) -> Result<()> {
        encode::write_map_len(out, 3)?;

        encode::write_str(out, FIELD_REFERENCES_KEY)?;
        encode::write_map_len(out, u32::try_from(self.field_references.len())?)?;
        let mut blob = Vec::with_capacity(256);
        for (file, references) in &self.field_references {
            encode::write_str(out, file)?;
            encode::write_array_len(out, u32::try_from(references.len())?)?;
            for reference in references {
                blob.clear();
                reference.write_blob(&mut blob)?;
                encode::write_bin(out, &blob)?;
            }
        }

        encode::write_str(out, METHOD_REFERENCES_KEY)?;
        encode::write_map_len(out, u32::try_from(self.method_references.len())?)?;
        for (file, references) in &self.method_references {
            encode::write_str(out, file)?;
            encode::write_array_len(out, u32::try_from(references.len())?)?;
            for reference in references {
                blob.clear();
                reference.write_blob(&mut blob)?;
                encode::write_bin(out, &blob)?;
            }
        }

        encode::write_str(out, FILE_HASHES_KEY)?;
        encode::write_map_len(out, u32::try_from(self.file_hashes.len())?)?;
        for (file, hash) in &self.file_hashes {
            encode::write_str(out, file)?;
            encode::write_bin(out, hash)?;
        }
        Ok(())
    }

    pub fn deserialize(data: &[u8]) -> Result<RangeMap> {
        let mut cursor = Cursor::new(data);
        let entries = decode::read_map_len(&mut cursor).context("not a range map dictionary")?;
        ensure!(entries == 3, "range map must have exactly 3 entries, got {entries}");

        let mut field_references = None;
        let mut method_references = None;
        let mut file_hashes = None;
        for _ in 0..entries {
            match read_string(&mut cursor)?.as_str() {
                FIELD_REFERENCES_KEY => {
                    ensure!(field_references.is_none(), "duplicate {FIELD_REFERENCES_KEY}");
                    field_references = Some(read_reference_map(&mut cursor, |blob: &[u8]| {
                        parse_blob(blob, FieldReference::read_blob)
                    })?);
                }
                METHOD_REFERENCES_KEY => {
                    ensure!(method_references.is_none(), "duplicate {METHOD_REFERENCES_KEY}");
                    method_references = Some(read_reference_map(&mut cursor, |blob: &[u8]| {
                        parse_blob(blob, MethodReference::read_blob)
                    })?);
                }
                FILE_HASHES_KEY => {
                    ensure!(file_hashes.is_none(), "duplicate {FILE_HASHES_KEY}");
                    file_hashes = Some(read_hash_map(&mut cursor)?);
                }
                other => bail!("unexpected range map key: {other}"),
            }
        }

        // All three keys are present: the map has exactly three entries and
        // duplicates were rejected above.
        Ok(RangeMap::new(
            field_references.unwrap_or_default(),
            method_references.unwrap_or_default(),
            file_hashes.unwrap_or_default(),
        ))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.serialize()?;
        let temp = path.with_extension("tmp");
        std::fs::write(&temp, &bytes)
            .with_context(|| format!("failed to write range map: {}", temp.display()))?;
        std::fs::rename(&temp, path)
            .with_context(|| format!("failed to replace range map: {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<RangeMap> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read range map: {}", path.display()))?;
        RangeMap::deserialize(&bytes)
            .with_context(|| format!("failed to decode range map: {}", path.display()))
    }

    /// A human-readable rendering: hex hashes plus `owner/name@start:end`
    /// reference strings.
    pub fn to_json(&self) -> serde_json::Value {
        let file_hashes: serde_json::Map<String, serde_json::Value> = self
            .file_hashes
            .iter()
            .map(|(file, hash)| (file.clone(), json!(hex::encode(hash))))
            .collect();
        let field_references: serde_json::Map<String, serde_json::Value> = self
            .field_references
            .iter()
            .map(|(file, references)| {
                let rendered: Vec<String> =
                    references.iter().map(FieldReference::to_string).collect();
                (file.clone(), json!(rendered))
            })
            .collect();
        let method_references: serde_json::Map<String, serde_json::Value> = self
            .method_references
            .iter()
            .map(|(file, references)| {
                let rendered: Vec<String> =
                    references.iter().map(MethodReference::to_string).collect();
                (file.clone(), json!(rendered))
            })
            .collect();
        json!({
            "fileHashes": file_hashes,
            "fieldReferences": field_references,
            "methodReferences": method_references,
        })
    }
}

impl PartialEq for RangeMap {
    fn eq(&self, other: &Self) -> bool {
        self.file_hashes == other.file_hashes
            && self.known_files() == other.known_files()
            && self
                .known_files()
                .iter()
                .all(|file| self.all_sorted_references(file) == other.all_sorted_references(file))
    }
}

impl Eq for RangeMap {}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let len = decode::read_str_len(cursor).context("expected a string")? as usize;
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes).context("truncated string")?;
    String::from_utf8(bytes).context("invalid UTF-8 string")
}

/// Decodes one blob, insisting the parser consumes every byte.
fn parse_blob<'b, T>(
    blob: &'b [u8],
    parse: impl FnOnce(&mut Cursor<&'b [u8]>) -> std::io::Result<T>,
) -> Result<T> {
    let mut cursor = Cursor::new(blob);
    let value = parse(&mut cursor)?;
    ensure!(
        cursor.position() as usize == blob.len(),
        "trailing bytes in reference blob"
    );
    Ok(value)
}

fn read_reference_map<T>(
    cursor: &mut Cursor<&[u8]>,
    parse: impl Fn(&[u8]) -> Result<T>,
) -> Result<BTreeMap<String, Vec<T>>> {
    let entries = decode::read_map_len(cursor).context("expected a reference dictionary")?;
    let mut result = BTreeMap::new();
    for _ in 0..entries {
        let file = read_string(cursor)?;
        let count = decode::read_array_len(cursor)
            .with_context(|| format!("expected a reference array for {file}"))?;
        let mut references = Vec::with_capacity(count.min(1 << 16) as usize);
        for _ in 0..count {
            let len = decode::read_bin_len(cursor)
                .with_context(|| format!("expected a reference blob in {file}"))?
                as usize;
            let mut blob = vec![0u8; len];
            cursor
                .read_exact(&mut blob)
                .with_context(|| format!("truncated reference blob in {file}"))?;
            let reference =
                parse(&blob).with_context(|| format!("invalid reference blob in {file}"))?;
            references.push(reference);
        }
        ensure!(
            result.insert(file.clone(), references).is_none(),
            "duplicate file entry: {file}"
        );
    }
    Ok(result)
}

fn read_hash_map(cursor: &mut Cursor<&[u8]>) -> Result<BTreeMap<String, Vec<u8>>> {
    let entries = decode::read_map_len(cursor).context("expected a hash dictionary")?;
    let mut result = BTreeMap::new();
    for _ in 0..entries {
        let file = read_string(cursor)?;
        let len = decode::read_bin_len(cursor)
            .with_context(|| format!("expected a hash for {file}"))? as usize;
        let mut hash = vec![0u8; len];
        cursor
            .read_exact(&mut hash)
            .with_context(|| format!("truncated hash for {file}"))?;
        ensure!(
            result.insert(file.clone(), hash).is_none(),
            "duplicate file hash: {file}"
        );
    }
    Ok(result)
}

/// The sink the source analyser fills while walking a tree.
#[derive(Debug, Default)]
pub struct RangeMapBuilder {
    field_references: BTreeMap<String, Vec<FieldReference>>,
    method_references: BTreeMap<String, Vec<MethodReference>>,
    file_hashes: BTreeMap<String, Vec<u8>>,
}

impl RangeMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field_reference(&mut self, file: &str, reference: FieldReference) {
        self.field_references
            .entry(file.to_string())
            .or_default()
            .push(reference);
    }

    pub fn add_method_reference(&mut self, file: &str, reference: MethodReference) {
        self.method_references
            .entry(file.to_string())
            .or_default()
            .push(reference);
    }

    pub fn set_file_hash(&mut self, file: &str, hash: Vec<u8>) {
        self.file_hashes.insert(file.to_string(), hash);
    }

    pub fn build(self) -> RangeMap {
        RangeMap::new(self.field_references, self.method_references, self.file_hashes)
    }
}
