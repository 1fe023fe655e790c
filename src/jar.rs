//! Parallel jar remapping.
//!
//! The input jar is memory-mapped and each worker owns its own archive
//! handle over the same bytes, so entry extraction needs no shared lock.
//! Workers pull entry indices from a bounded channel, remap `.class` entries
//! through the constant-pool rewriter, and hand finished buffers to the
//! single writer thread that owns the output zip. Buffers move through the
//! channel, which is the ownership handoff. Entry order in the output is
//! whatever the scheduler produces.

use anyhow::{Context, Result};
use crossbeam_channel as channel;
use memmap2::Mmap;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::mappings::Mappings;
use crate::remap::remap_class_file;

const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Serialize)]
pub struct JarStats {
    pub entries: usize,
    pub remapped_classes: usize,
    pub renamed_entries: usize,
}

/// The output entry name for a class entry, renamed when its class is.
fn remapped_entry_name(entry_name: &str, mappings: &Mappings) -> String {
    let Some(internal_name) = entry_name.strip_suffix(".class") else {
        return entry_name.to_string();
    };
    match mappings
        .class_mappings(internal_name)
        .and_then(|class| class.remapped_name())
    {
        Some(remapped) => format!("{remapped}.class"),
        None => entry_name.to_string(),
    }
}

pub fn remap_jar(
    input: &Path,
    output: &Path,
    mappings: &Mappings,
    workers: usize,
) -> Result<JarStats> {
    let file =
        File::open(input).with_context(|| format!("failed to open jar: {}", input.display()))?;
    // SAFETY: The file is opened read-only and the mmap lives for the whole
    // remap; workers only ever read through it.
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("failed to mmap jar: {}", input.display()))?;
    let archive = ZipArchive::new(Cursor::new(&mmap[..]))
        .with_context(|| format!("failed to read zip structure: {}", input.display()))?;
    let entry_count = archive.len();
    let remap_workers = workers.saturating_sub(1).max(1);
    debug!(entries = entry_count, workers = remap_workers, "remapping jar");

    let failed = AtomicBool::new(false);
    let first_error: Mutex<Option<anyhow::Error>> = Mutex::new(None);
    let remapped_classes = AtomicUsize::new(0);
    let renamed_entries = AtomicUsize::new(0);

    let mut writer_result: Result<()> = Ok(());
    std::thread::scope(|scope| {
        let (work_sender, work_receiver) = channel::bounded::<usize>(QUEUE_CAPACITY);
        let (out_sender, out_receiver) = channel::bounded::<(String, Vec<u8>)>(QUEUE_CAPACITY);

        let failed_ref = &failed;
        let writer = scope.spawn(move || -> Result<()> {
            let file = File::create(output)
                .with_context(|| format!("failed to create jar: {}", output.display()))?;
            let mut zip = ZipWriter::new(BufWriter::new(file));
            let options =
                FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
            for (name, data) in out_receiver {
                let result = (|| -> Result<()> {
                    if let Some(directory) = name.strip_suffix('/') {
                        zip.add_directory(directory, options)?;
                    } else {
                        zip.start_file(name.as_str(), options)?;
                        zip.write_all(&data)?;
                    }
                    Ok(())
                })();
                if let Err(error) = result {
                    failed_ref.store(true, Ordering::Relaxed);
                    return Err(error.context(format!("failed to write jar entry {name}")));
                }
            }
            zip.finish().context("failed to finish output jar")?;
            Ok(())
        });

        for _ in 0..remap_workers {
            let work_receiver = work_receiver.clone();
            let out_sender = out_sender.clone();
            let archive = archive.clone();
            let failed = &failed;
            let first_error = &first_error;
            let remapped_classes = &remapped_classes;
            let renamed_entries = &renamed_entries;
            scope.spawn(move || {
                let mut archive = archive;
                let mut buffer = Vec::new();
                for index in work_receiver {
                    if failed.load(Ordering::Relaxed) {
                        break;
                    }
                    let result = (|| -> Result<(String, Vec<u8>)> {
                        let mut entry = archive.by_index(index)?;
                        let entry_name = entry.name().to_string();
                        buffer.clear();
                        entry
                            .read_to_end(&mut buffer)
                            .with_context(|| format!("failed to read jar entry {entry_name}"))?;
                        if entry_name.ends_with(".class") {
                            let remapped = remap_class_file(&buffer, mappings)
                                .with_context(|| format!("failed to remap {entry_name}"))?;
                            remapped_classes.fetch_add(1, Ordering::Relaxed);
                            let output_name = remapped_entry_name(&entry_name, mappings);
                            if output_name != entry_name {
                                renamed_entries.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok((output_name, remapped))
                        } else {
                            Ok((entry_name, buffer.clone()))
                        }
                    })();
                    match result {
                        Ok(message) => {
                            if out_sender.send(message).is_err() {
                                // Writer is gone; its error wins.
                                break;
                            }
                        }
                        Err(error) => {
                            let mut slot = first_error.lock().unwrap_or_else(|e| e.into_inner());
                            slot.get_or_insert(error);
                            failed.store(true, Ordering::Relaxed);
                            break;
                        }
                    }
                }
            });
        }
        drop(work_receiver);
        drop(out_sender);

        for index in 0..entry_count {
            if failed.load(Ordering::Relaxed) {
                break;
            }
            if work_sender.send(index).is_err() {
                break;
            }
        }
        drop(work_sender);

        writer_result = writer.join().expect("jar writer panicked");
    });

    if let Some(error) = first_error.into_inner().unwrap_or_else(|e| e.into_inner()) {
        return Err(error);
    }
    writer_result?;
    Ok(JarStats {
        entries: entry_count,
        remapped_classes: remapped_classes.into_inner(),
        renamed_entries: renamed_entries.into_inner(),
    })
}
