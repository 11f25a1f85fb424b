//! EDA Loader - command-line front end
//!
//! Loads a directory of CSV files and prints what was loaded.

use anyhow::{Context, Result};
use clap::Parser;
use eda_loader::data::DEFAULT_CHUNK_SIZE;
use eda_loader::{CsvBatchLoader, LoaderOptions, ProjectPaths};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "eda_loader")]
#[command(about = "Bulk-load a directory of CSV files into data frames")]
#[command(version)]
struct Cli {
    /// Directory containing the CSV files (defaults to <root>/data/raw)
    dir: Option<PathBuf>,

    /// Project root used to resolve the default data directory
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Table name prefix; file names are used when omitted
    #[arg(short, long)]
    prefix: Option<String>,

    /// Table name suffix, in file order (repeatable)
    #[arg(short, long = "suffix")]
    suffixes: Vec<String>,

    /// Rows per chunk for large files
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Collect and print per-table metadata
    #[arg(short, long)]
    metadata: bool,

    /// Print metadata as JSON
    #[arg(long, requires = "metadata")]
    json: bool,

    /// Keep directory listing order instead of sorting by file name
    #[arg(long)]
    unsorted: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = ProjectPaths::from_root(&cli.root);
    let dir = cli.dir.unwrap_or_else(|| paths.raw_data_dir.clone());

    let mut options = LoaderOptions::default()
        .with_chunk_size(cli.chunk_size)
        .with_metadata(cli.metadata)
        .with_sort_files(!cli.unsorted);
    if let Some(prefix) = cli.prefix {
        options = options.with_prefix(prefix);
    }
    if !cli.suffixes.is_empty() {
        options = options.with_suffixes(cli.suffixes);
    }

    let outcome = CsvBatchLoader::new(options)
        .load(&dir)
        .with_context(|| format!("Failed to load CSV files from {}", dir.display()))?;

    for (name, df) in &outcome.tables {
        println!("✓ {name}: {} rows × {} columns", df.height(), df.width());
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome.metadata)?);
    } else {
        for (name, meta) in &outcome.metadata {
            println!(
                "{name}: {} rows, {} columns, {:.2} MB, {} ({})",
                meta.rows,
                meta.columns,
                meta.memory_size_mb,
                meta.encoding,
                meta.file_path.display()
            );
            println!("  columns: {}", meta.columns_list.join(", "));
        }
    }

    println!(
        "Loaded {} of {} tables",
        outcome.tables.len(),
        outcome.tables.len() + outcome.failures.len()
    );
    Ok(())
}
