use anyhow::{Result, ensure};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "jremap")]
#[command(about = "Rename Java symbols in source trees and jars from srg mappings")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Worker thread count; defaults to the number of available CPUs.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Refresh a range map's file hashes and report which files changed.
    Extract {
        source_dir: PathBuf,
        range_map: PathBuf,

        #[arg(long = "cp", value_name = "PATHS")]
        classpath: Option<String>,

        #[arg(long, value_name = "DIR")]
        cache: Option<PathBuf>,

        #[arg(long)]
        rebuild: bool,
    },
    /// Rewrite a source tree using a range map and mappings.
    Apply {
        source_dir: PathBuf,
        output_dir: PathBuf,
        range_map: PathBuf,
        mappings: PathBuf,
    },
    /// Remap every class file in a jar.
    RemapJar {
        input_jar: PathBuf,
        output_jar: PathBuf,
        mappings: PathBuf,
    },
    /// Dump a range map as JSON.
    Inspect { range_map: PathBuf },
}

/// Splits a classpath argument on the OS path-list separator, checking that
/// every entry exists.
pub fn split_classpath(raw: &str) -> Result<Vec<PathBuf>> {
    const SEPARATOR: char = if cfg!(windows) { ';' } else { ':' };
    let mut files = Vec::new();
    for part in raw.split(SEPARATOR).filter(|part| !part.is_empty()) {
        let path = PathBuf::from(part);
        ensure!(path.exists(), "classpath entry not found: {part}");
        files.push(path);
    }
    Ok(files)
}
