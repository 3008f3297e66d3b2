use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use strata_kernel::log::CommitInfo;
use strata_kernel::{
    Field, RowBatch, Schema, StorageOptions, Table, TableConfig, TableState, Version, WriteMode,
};

/// Strata table CLI
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(about = "Transactional append-only tables on local disk or S3", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Arguments shared by every command that opens a table.
#[derive(clap::Args, Debug)]
struct TableArgs {
    /// Table root: a local directory or s3://bucket/prefix
    #[arg(long)]
    table: String,

    /// Storage option overriding the environment, e.g. AWS_REGION=eu-west-1
    #[arg(long = "storage-option", value_name = "KEY=VALUE")]
    storage_options: Vec<String>,

    /// Path to table config JSON
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a JSON batch file to the table
    Write {
        #[command(flatten)]
        table: TableArgs,

        /// Batch file: {"schema": [...fields], "rows": [...]}
        #[arg(long)]
        batch: PathBuf,

        #[arg(long, default_value = "append")]
        mode: WriteMode,

        /// Partition column, repeatable
        #[arg(long = "partition-by", value_name = "COLUMN")]
        partition_by: Vec<String>,
    },

    /// Print table state at the latest or a given version
    State {
        #[command(flatten)]
        table: TableArgs,

        #[arg(long)]
        version: Option<Version>,
    },

    /// Print commit history, newest first
    History {
        #[command(flatten)]
        table: TableArgs,

        #[arg(long)]
        limit: Option<usize>,
    },
}

/// Input format for `write`.
#[derive(Debug, Deserialize)]
struct BatchFile {
    schema: Vec<Field>,
    rows: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct FileOutput {
    path: String,
    size: u64,
    records: u64,
}

#[derive(Debug, Serialize)]
struct StateOutput {
    version: Option<Version>,
    schema: Option<Schema>,
    partition_columns: Vec<String>,
    partitions: Vec<String>,
    num_files: usize,
    num_records: u64,
    files: Vec<FileOutput>,
}

impl From<&TableState> for StateOutput {
    fn from(state: &TableState) -> Self {
        Self {
            version: state.version(),
            schema: state.schema().cloned(),
            partition_columns: state.partition_columns().to_vec(),
            partitions: state.partitions().into_iter().collect(),
            num_files: state.num_files(),
            num_records: state.num_records(),
            files: state
                .files()
                .map(|f| FileOutput {
                    path: f.path.clone(),
                    size: f.size,
                    records: f.stats.num_records,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HistoryEntry {
    version: Version,
    #[serde(flatten)]
    info: CommitInfo,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Write {
            table,
            batch,
            mode,
            partition_by,
        } => {
            let table = open_table(&table)?;
            let batch = load_batch(&batch)?;
            let result = table.write(&batch, mode, &partition_by)?;
            print_json(&result)
        }
        Command::State { table, version } => {
            let table = open_table(&table)?;
            let state = match version {
                Some(v) => table.snapshot_at(v)?,
                None => table.snapshot()?,
            };
            print_json(&StateOutput::from(&state))
        }
        Command::History { table, limit } => {
            let table = open_table(&table)?;
            let history: Vec<HistoryEntry> = table
                .history(limit)?
                .into_iter()
                .map(|(version, info)| HistoryEntry { version, info })
                .collect();
            print_json(&history)
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

// ----------------------------
// Table access
// ----------------------------

fn open_table(args: &TableArgs) -> Result<Table> {
    let mut options = StorageOptions::from_env()?;
    for pair in &args.storage_options {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("storage option `{pair}` is not KEY=VALUE");
        };
        options.set(key.trim(), value.trim())?;
    }

    let config = match &args.config {
        Some(path) => TableConfig::from_json_file(path)?,
        None => TableConfig::default(),
    };

    Table::open(&args.table, &options, config)
        .with_context(|| format!("failed to open table `{}`", args.table))
}

fn load_batch(path: &Path) -> Result<RowBatch> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read batch file `{}`", path.display()))?;
    let file: BatchFile = serde_json::from_str(&data)?;

    let schema = Schema::new(file.schema)?;
    Ok(RowBatch::from_json_rows(schema, &file.rows)?)
}

// ----------------------------
// Output
// ----------------------------

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
