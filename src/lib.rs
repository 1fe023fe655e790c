//! # jremap
//!
//! Renames Java symbols (classes, fields, methods) in source trees and jars
//! according to an externally supplied mapping. Two pipelines share the
//! mapping model: a byte-range rewriter for source files driven by a
//! persisted range map, and a constant-pool rewriter for class files.
//!
//! ## Architecture
//!
//! - **location**: byte spans and the field/method references that cover them
//! - **rangemap**: the persisted per-file reference index with content hashes
//! - **apply**: streaming source rewriter and the parallel tree applier
//! - **mappings**: class/field/method rename lookups with cached descriptor rewriting
//! - **binary**: the `.srg.dat` binary mapping decoder (lz4-frame / gzip)
//! - **classfile**: constant pool decoding over raw class-file bytes
//! - **remap**: constant pool rewriting with append-only interning
//! - **jar**: parallel jar remap worker pool with a single zip writer
//! - **hash**: parallel SHA-256 hashing of a source tree
//! - **extract**: incremental extraction orchestration around an external analyser
//! - **text**: comment and annotation stripping for declaration text
//! - **wire**: length-prefixed big-endian framing helpers

pub mod apply;
pub mod binary;
pub mod classfile;
pub mod cli;
pub mod extract;
pub mod hash;
pub mod jar;
pub mod location;
pub mod mappings;
pub mod rangemap;
pub mod remap;
pub mod text;
pub mod wire;
