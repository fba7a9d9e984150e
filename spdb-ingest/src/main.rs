use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use clap::Subcommand;
use spdb::io::{discover_segments, SegmentName, SegmentReader};
use spdb::{IngestConfig, Ingestor};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory segments are written to
    #[arg(short = 'f', long)]
    storage: Option<PathBuf>,

    /// Input bytes to buffer before flushing
    #[arg(short, long)]
    memory: Option<u64>,

    /// Minimum degree of the in-memory index
    #[arg(long)]
    degree: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest JSON lines files ("-" reads stdin)
    Ingest { files: Vec<PathBuf> },
    /// Print the records of a segment as JSON lines
    Dump { segment: PathBuf },
    /// List the segments in the storage directory
    Segments,
}

impl Cli {
    fn config(&self) -> Result<IngestConfig> {
        let mut config = match &self.config {
            Some(path) => IngestConfig::from_file(path)?,
            None => IngestConfig::default(),
        };
        if let Some(storage) = &self.storage {
            config.storage_dir = storage.clone();
        }
        if let Some(memory) = self.memory {
            config.memory_budget = memory;
        }
        if let Some(degree) = self.degree {
            config.degree = degree;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, PartialEq)]
enum Input<'a> {
    Stdin,
    File(&'a Path),
}

/// Inputs in the order given. `-`, or no arguments at all, means stdin.
fn inputs(files: &[PathBuf]) -> Vec<Input<'_>> {
    if files.is_empty() {
        return vec![Input::Stdin];
    }
    files
        .iter()
        .map(|f| {
            if f.as_os_str() == "-" {
                Input::Stdin
            } else {
                Input::File(f.as_path())
            }
        })
        .collect()
}

fn ingest(config: IngestConfig, files: &[PathBuf]) -> Result<()> {
    let existing = discover_segments(&config.storage_dir)?;
    tracing::info!(count = existing.len(), "Existing segments are left untouched");

    let mut ingestor = Ingestor::try_new(config)?;
    for input in inputs(files) {
        match input {
            Input::Stdin => {
                tracing::info!("Ingesting stdin");
                ingestor
                    .ingest_reader(std::io::stdin().lock())
                    .context("stdin")?;
            }
            Input::File(path) => {
                let file = File::open(path)
                    .with_context(|| format!("could not open input: {}", path.display()))?;
                tracing::info!(path = %path.display(), "Ingesting file");
                ingestor
                    .ingest_reader(BufReader::new(file))
                    .with_context(|| path.display().to_string())?;
            }
        }
    }
    let summary = ingestor.finish()?;
    println!(
        "ingested {} records in {} flushes, {} skipped",
        summary.records, summary.flushes, summary.skipped
    );
    for segment in summary.segments {
        println!(
            "{}\t{} records\t{} bytes",
            segment.path.display(),
            segment.records,
            segment.bytes
        );
    }
    Ok(())
}

fn dump(segment: &Path) -> Result<()> {
    let mut out = std::io::stdout().lock();
    for item in SegmentReader::try_open(segment)? {
        let item = item?;
        let row = item
            .row
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect::<serde_json::Map<String, serde_json::Value>>();
        let line = serde_json::json!({ "pk": item.pk, "row": row });
        writeln!(out, "{line}")?;
    }
    Ok(())
}

fn segments(config: &IngestConfig) -> Result<()> {
    for path in discover_segments(&config.storage_dir)? {
        let range = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(SegmentName::parse);
        match range {
            Some(range) => println!("{}\t[{}, {}]", path.display(), range.min, range.max),
            None => println!("{}\tincomplete", path.display()),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config()?;

    let file_appender = tracing_appender::rolling::daily(&config.storage_dir, "spdb-ingest.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(non_blocking)
        .init();

    match &cli.command {
        Command::Ingest { files } => ingest(config, files),
        Command::Dump { segment } => dump(segment),
        Command::Segments => segments(&config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_reads_stdin_without_files() {
        assert_eq!(inputs(&[]), [Input::Stdin]);
    }

    #[test]
    fn it_mixes_files_and_stdin() {
        let files = [
            PathBuf::from("a.jsonl"),
            PathBuf::from("-"),
            PathBuf::from("b.jsonl"),
        ];
        assert_eq!(
            inputs(&files),
            [
                Input::File(Path::new("a.jsonl")),
                Input::Stdin,
                Input::File(Path::new("b.jsonl")),
            ]
        );
    }
}
