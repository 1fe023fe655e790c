//! Parallel content hashing of a source tree.
//!
//! Produces the relative-path → SHA-256 dictionary the incremental extractor
//! compares against a stored range map to decide which files need
//! re-analysis.

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::debug;

const HASH_BUFFER_SIZE: usize = 4096;

/// Every regular file under `root`, in no particular order.
pub fn walk_files(root: &Path) -> Result<Vec<PathBuf>> {
    let (tx, rx) = mpsc::channel();

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build_parallel();

    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |entry| {
            if let Ok(entry) = entry {
                if entry.file_type().is_some_and(|t| t.is_file()) {
                    let _ = tx.send(entry.path().to_path_buf());
                }
            }
            ignore::WalkState::Continue
        })
    });

    drop(tx);
    Ok(rx.iter().collect())
}

/// The `/`-separated path of `file` relative to `root`, as used for range
/// map keys.
pub fn relative_key(root: &Path, file: &Path) -> Result<String> {
    let relative = file
        .strip_prefix(root)
        .with_context(|| format!("{} is not under {}", file.display(), root.display()))?;
    let mut key = String::new();
    for component in relative.components() {
        if !key.is_empty() {
            key.push('/');
        }
        key.push_str(&component.as_os_str().to_string_lossy());
    }
    Ok(key)
}

pub fn hash_file(path: &Path) -> Result<Vec<u8>> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_BUFFER_SIZE];
    loop {
        let num_read = file
            .read(&mut buffer)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if num_read == 0 {
            break;
        }
        hasher.update(&buffer[..num_read]);
    }
    Ok(hasher.finalize().to_vec())
}

/// SHA-256 of every file under `root`, keyed by relative path, hashed in
/// parallel on at least two workers.
pub fn hash_tree(root: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
    let files = walk_files(root)?;
    debug!(files = files.len(), root = %root.display(), "hashing source tree");

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(2);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("failed to start hash workers")?;

    let hashes: Vec<(String, Vec<u8>)> = pool.install(|| {
        files
            .par_iter()
            .map(|file| Ok((relative_key(root, file)?, hash_file(file)?)))
            .collect::<Result<_>>()
    })?;
    Ok(hashes.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_tree(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "jremap_test_{}_{}_{}",
            std::process::id(),
            nanos,
            name
        ))
    }

    #[test]
    fn hashes_every_file_by_relative_key() -> Result<()> {
        let root = temp_tree("hash_tree");
        std::fs::create_dir_all(root.join("com/example"))?;
        std::fs::write(root.join("com/example/Foo.java"), b"class Foo {}\n")?;
        std::fs::write(root.join("Top.java"), b"class Top {}\n")?;

        let hashes = hash_tree(&root)?;
        assert_eq!(hashes.len(), 2);
        let expected = Sha256::digest(b"class Foo {}\n").to_vec();
        assert_eq!(hashes.get("com/example/Foo.java"), Some(&expected));
        assert!(hashes.contains_key("Top.java"));

        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }

    #[test]
    fn identical_content_hashes_identically() -> Result<()> {
        let root = temp_tree("hash_same");
        std::fs::create_dir_all(&root)?;
        std::fs::write(root.join("a.java"), b"same")?;
        std::fs::write(root.join("b.java"), b"same")?;

        let hashes = hash_tree(&root)?;
        assert_eq!(hashes.get("a.java"), hashes.get("b.java"));

        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }
}
