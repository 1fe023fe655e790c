//! Incremental range-map extraction.
//!
//! The actual reference discovery is an external analyser's job; this module
//! owns everything around it: hashing the tree, deciding which files changed
//! since the stored range map was built, handing the analyser a
//! [`RangeMapBuilder`] sink for just those files, and folding the partial
//! result back into the stored map.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::hash::hash_tree;
use crate::rangemap::{RangeMap, RangeMapBuilder};

/// Everything an analyser needs to know about the extraction run.
#[derive(Debug, Clone)]
pub struct ExtractContext {
    pub source_dir: PathBuf,
    pub classpath: Vec<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub rebuild: bool,
}

/// The external reference-discovery engine.
///
/// `files` are the relative paths whose content changed since the stored
/// range map was built (or every file on a rebuild); the analyser records
/// what it finds through the builder sink.
pub trait SourceAnalyzer {
    fn analyze(
        &mut self,
        context: &ExtractContext,
        files: &[String],
        builder: &mut RangeMapBuilder,
    ) -> Result<()>;
}

/// Stands in when no analysis engine is wired up. The extraction still
/// refreshes file hashes and reports which files changed.
#[derive(Debug, Default)]
pub struct NoopAnalyzer;

impl SourceAnalyzer for NoopAnalyzer {
    fn analyze(
        &mut self,
        _context: &ExtractContext,
        _files: &[String],
        _builder: &mut RangeMapBuilder,
    ) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct ExtractStats {
    pub scanned_files: usize,
    pub changed_files: usize,
    pub skipped_files: usize,
}

/// Runs one incremental extraction pass, producing the updated range map.
pub fn extract<A: SourceAnalyzer>(
    context: &ExtractContext,
    analyzer: &mut A,
    existing: &RangeMap,
) -> Result<(RangeMap, ExtractStats)> {
    let hashes = hash_tree(&context.source_dir)
        .with_context(|| format!("failed to hash {}", context.source_dir.display()))?;
    let scanned_files = hashes.len();

    let changed: Vec<String> = hashes
        .iter()
        .filter(|(file, hash)| context.rebuild || !existing.has_file_hash(file, hash))
        .map(|(file, _)| file.clone())
        .collect();
    debug!(
        scanned = scanned_files,
        changed = changed.len(),
        rebuild = context.rebuild,
        "computed changed set"
    );

    let mut builder = RangeMapBuilder::new();
    analyzer
        .analyze(context, &changed, &mut builder)
        .context("source analysis failed")?;
    for (file, hash) in &hashes {
        builder.set_file_hash(file, hash.clone());
    }

    let stats = ExtractStats {
        scanned_files,
        changed_files: changed.len(),
        skipped_files: scanned_files - changed.len(),
    };
    Ok((existing.update(&builder.build()), stats))
}

/// Loads (or starts empty), extracts, and persists the range map file.
pub fn extract_to_file<A: SourceAnalyzer>(
    context: &ExtractContext,
    analyzer: &mut A,
    range_map_path: &Path,
) -> Result<ExtractStats> {
    let existing = if range_map_path.exists() && !context.rebuild {
        RangeMap::load(range_map_path)?
    } else {
        RangeMap::empty().clone()
    };
    let (updated, stats) = extract(context, analyzer, &existing)?;
    updated.save(range_map_path)?;
    info!(
        path = %range_map_path.display(),
        changed = stats.changed_files,
        "range map updated"
    );
    Ok(stats)
}
