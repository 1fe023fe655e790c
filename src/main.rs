use anyhow::Result;
use clap::Parser;
use jremap::apply::apply_tree;
use jremap::cli::{Cli, Commands, split_classpath};
use jremap::extract::{ExtractContext, NoopAnalyzer, extract_to_file};
use jremap::jar::remap_jar;
use jremap::mappings::Mappings;
use jremap::rangemap::RangeMap;
use serde::Serialize;
use std::time::Instant;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let workers = resolve_workers(&cli);

    match cli.command.clone() {
        Commands::Extract {
            source_dir,
            range_map,
            classpath,
            cache,
            rebuild,
        } => {
            let start = Instant::now();
            let classpath = match classpath {
                Some(raw) => split_classpath(&raw)?,
                None => Vec::new(),
            };
            let context = ExtractContext {
                source_dir: source_dir.clone(),
                classpath,
                cache_dir: cache,
                rebuild,
            };
            let stats = extract_to_file(&context, &mut NoopAnalyzer, &range_map)?;
            let output = ExtractOutput {
                source_dir: source_dir.display().to_string(),
                range_map: range_map.display().to_string(),
                scanned_files: stats.scanned_files,
                changed_files: stats.changed_files,
                skipped_files: stats.skipped_files,
                duration_ms: start.elapsed().as_millis() as u64,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Apply {
            source_dir,
            output_dir,
            range_map,
            mappings,
        } => {
            let start = Instant::now();
            let mappings = Mappings::from_file(&mappings)?;
            let range_map = RangeMap::load(&range_map)?;
            let stats = apply_tree(&source_dir, &output_dir, &range_map, &mappings, workers)?;
            let output = ApplyOutput {
                source_dir: source_dir.display().to_string(),
                output_dir: output_dir.display().to_string(),
                files: stats.files,
                files_with_references: stats.files_with_references,
                renamed_references: stats.renamed_references,
                duration_ms: start.elapsed().as_millis() as u64,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::RemapJar {
            input_jar,
            output_jar,
            mappings,
        } => {
            let start = Instant::now();
            let mappings = Mappings::from_file(&mappings)?;
            let stats = remap_jar(&input_jar, &output_jar, &mappings, workers)?;
            let output = RemapJarOutput {
                input_jar: input_jar.display().to_string(),
                output_jar: output_jar.display().to_string(),
                entries: stats.entries,
                remapped_classes: stats.remapped_classes,
                renamed_entries: stats.renamed_entries,
                duration_ms: start.elapsed().as_millis() as u64,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Inspect { range_map } => {
            let range_map = RangeMap::load(&range_map)?;
            println!("{}", serde_json::to_string_pretty(&range_map.to_json())?);
        }
    }

    Ok(())
}

fn resolve_workers(cli: &Cli) -> usize {
    match cli.workers {
        Some(workers) => workers.max(1),
        None => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2),
    }
}

#[derive(Debug, Serialize)]
struct ExtractOutput {
    source_dir: String,
    range_map: String,
    scanned_files: usize,
    changed_files: usize,
    skipped_files: usize,
    duration_ms: u64,
}

#[derive(Debug, Serialize)]
struct ApplyOutput {
    source_dir: String,
    output_dir: String,
    files: usize,
    files_with_references: usize,
    renamed_references: usize,
    duration_ms: u64,
}

#[derive(Debug, Serialize)]
struct RemapJarOutput {
    input_jar: String,
    output_jar: String,
    entries: usize,
    remapped_classes: usize,
    renamed_entries: usize,
    duration_ms: u64,
}
