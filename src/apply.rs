//! Source rewriting: streaming a file through while substituting recorded
//! identifier spans.
//!
//! The applier never reinterprets the file; it trusts the range map's byte
//! offsets, verifies the bytes it is about to replace, and copies everything
//! else through untouched. Offsets always refer to the original file, so the
//! cursor advances by each reference's recorded size even when the emitted
//! name is longer or shorter.

use anyhow::{Context, Result};
use crossbeam_channel as channel;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

use crate::hash::{relative_key, walk_files};
use crate::location::MemberReference;
use crate::mappings::Mappings;
use crate::rangemap::RangeMap;

const COPY_BUFFER_SIZE: usize = 4096;
const WORK_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("expected `{expected}` at offset {offset}, but got `{actual}`")]
    IdentifierMismatch {
        offset: u64,
        expected: String,
        actual: String,
    },
    #[error("overlapping references: {next} and {previous}")]
    OverlappingReferences { previous: String, next: String },
    #[error("unexpected EOF at offset {offset}")]
    UnexpectedEof { offset: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Rewrites one file's bytes, returning how many references were renamed.
///
/// `references` must be sorted ascending by start offset; the scan fails
/// with [`ApplyError::OverlappingReferences`] if the cursor ever overruns
/// the next reference.
pub fn apply_ranges<R: Read, W: Write>(
    mut input: R,
    mut output: W,
    references: &[MemberReference],
    mappings: &Mappings,
) -> Result<usize, ApplyError> {
    let mut buffer = [0u8; COPY_BUFFER_SIZE];
    let mut name_buffer = Vec::new();
    let mut position: u64 = 0;
    let mut renamed = 0usize;

    for (index, reference) in references.iter().enumerate() {
        let start = u64::from(reference.start());
        if position > start {
            let previous = match index.checked_sub(1) {
                Some(prior) => references[prior].to_string(),
                None => "<start of file>".to_string(),
            };
            return Err(ApplyError::OverlappingReferences {
                previous,
                next: reference.to_string(),
            });
        }

        while position < start {
            let to_copy = buffer.len().min((start - position) as usize);
            let num_read = input.read(&mut buffer[..to_copy])?;
            if num_read == 0 {
                return Err(ApplyError::UnexpectedEof { offset: position });
            }
            output.write_all(&buffer[..num_read])?;
            position += num_read as u64;
        }

        name_buffer.resize(reference.size(), 0);
        input.read_exact(&mut name_buffer).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ApplyError::UnexpectedEof { offset: position }
            } else {
                ApplyError::Io(e)
            }
        })?;
        if name_buffer != reference.name().as_bytes() {
            return Err(ApplyError::IdentifierMismatch {
                offset: position,
                expected: reference.name().to_string(),
                actual: String::from_utf8_lossy(&name_buffer).into_owned(),
            });
        }

        match reference.remapped_name(mappings) {
            Some(new_name) => {
                output.write_all(new_name.as_bytes())?;
                if new_name != reference.name() {
                    renamed += 1;
                }
            }
            None => output.write_all(&name_buffer)?,
        }
        position += reference.size() as u64;
    }

    io::copy(&mut input, &mut output)?;
    Ok(renamed)
}

/// Applies one file from the input tree to its place in the output tree.
pub fn apply_file(
    input_path: &Path,
    output_path: &Path,
    references: &[MemberReference],
    mappings: &Mappings,
) -> Result<usize> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let input = BufReader::new(
        File::open(input_path)
            .with_context(|| format!("failed to open {}", input_path.display()))?,
    );
    let mut output = BufWriter::new(
        File::create(output_path)
            .with_context(|| format!("failed to create {}", output_path.display()))?,
    );
    let renamed = apply_ranges(input, &mut output, references, mappings)
        .with_context(|| format!("failed to apply {}", input_path.display()))?;
    output
        .flush()
        .with_context(|| format!("failed to write {}", output_path.display()))?;
    Ok(renamed)
}

#[derive(Debug, Serialize)]
pub struct ApplyStats {
    pub files: usize,
    pub files_with_references: usize,
    pub renamed_references: usize,
}

/// Applies a whole tree in parallel: every input file lands at the parallel
/// relative path under the output directory, rewritten where the range map
/// has references for it.
pub fn apply_tree(
    input_dir: &Path,
    output_dir: &Path,
    range_map: &RangeMap,
    mappings: &Mappings,
    workers: usize,
) -> Result<ApplyStats> {
    let files = walk_files(input_dir)?;
    let workers = workers.max(1);
    debug!(files = files.len(), workers, "applying source tree");

    let (sender, receiver) = channel::bounded::<std::path::PathBuf>(WORK_QUEUE_CAPACITY);
    let failed = AtomicBool::new(false);
    let first_error: Mutex<Option<anyhow::Error>> = Mutex::new(None);
    let files_with_references = AtomicUsize::new(0);
    let renamed_references = AtomicUsize::new(0);
    let total = files.len();

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let receiver = receiver.clone();
            let failed = &failed;
            let first_error = &first_error;
            let files_with_references = &files_with_references;
            let renamed_references = &renamed_references;
            scope.spawn(move || {
                for path in receiver {
                    if failed.load(Ordering::Relaxed) {
                        break;
                    }
                    let result = (|| -> Result<()> {
                        let key = relative_key(input_dir, &path)?;
                        let references = range_map.all_sorted_references(&key);
                        if !references.is_empty() {
                            files_with_references.fetch_add(1, Ordering::Relaxed);
                        }
                        let renamed =
                            apply_file(&path, &output_dir.join(&key), &references, mappings)?;
                        renamed_references.fetch_add(renamed, Ordering::Relaxed);
                        Ok(())
                    })();
                    if let Err(error) = result {
                        // Only the first failure is reported; the rest of the
                        // pool drains and stops.
                        let mut slot = first_error.lock().unwrap_or_else(|e| e.into_inner());
                        slot.get_or_insert(error);
                        failed.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            });
        }
        drop(receiver);

        for file in files {
            if failed.load(Ordering::Relaxed) {
                break;
            }
            if sender.send(file).is_err() {
                break;
            }
        }
        drop(sender);
    });

    if let Some(error) = first_error.into_inner().unwrap_or_else(|e| e.into_inner()) {
        return Err(error);
    }
    Ok(ApplyStats {
        files: total,
        files_with_references: files_with_references.into_inner(),
        renamed_references: renamed_references.into_inner(),
    })
}
