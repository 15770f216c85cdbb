use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Fetch remote files only when they change, and turn them into tables.
#[derive(Debug, Parser)]
#[command(name = "ketl", version, about)]
pub struct Cli {
    /// Configuration file. Defaults to `ketl.toml` in the working directory,
    /// then the user configuration directory.
    #[arg(long, short, global = true, env = "KETL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create or upgrade the database schema.
    Migrate,
    /// Register every API declared in the configuration.
    Setup,
    /// Bring the cached files of an API up to date.
    Extract {
        api: String,
        /// Fetch every file, even those that look unchanged.
        #[arg(long)]
        force: bool,
    },
    /// Show what an extraction would do, without contacting any remote.
    Status { api: String },
    /// Extract an API, then transform its files into a file or table.
    #[command(group(ArgGroup::new("sink").required(true).args(["output", "table"])))]
    Run {
        api: String,
        /// Output file: `.csv`, `.tsv`, `.parquet`, or `.blake3` for a digest of the rows.
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Table in the ketl database to replace.
        #[arg(long)]
        table: Option<String>,
        /// Format of the extracted files.
        #[arg(long, short, value_enum, default_value_t = InputFormat::Csv)]
        format: InputFormat,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    Csv,
    Tsv,
    /// JSON documents or JSON lines.
    Json,
}
