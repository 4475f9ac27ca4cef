use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Stage CSV and JSON records into PostgreSQL tables",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Introspect a table and list its columns and unique constraints
    Inspect(InspectArgs),
    /// Reconcile the fields of an input file against a table schema
    Match(MatchArgs),
    /// Stage an input file into a temporary table and promote or merge it
    Load(LoadArgs),
}

#[derive(Debug, Args, Default)]
pub struct ConnectionArgs {
    /// YAML file with load and connection settings; flags override its values
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Database host
    #[arg(long)]
    pub host: Option<String>,
    /// Database port
    #[arg(long)]
    pub port: Option<u16>,
    /// Database user
    #[arg(long)]
    pub user: Option<String>,
    /// Database password
    #[arg(long)]
    pub password: Option<String>,
    /// Database name
    #[arg(long)]
    pub dbname: Option<String>,
}

#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Input file with one record per row (`-` reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Input format (detected from the file extension when omitted)
    #[arg(long, value_enum)]
    pub format: Option<InputFormat>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    Csv,
    Json,
    Jsonl,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Table to introspect
    #[arg(short = 't', long = "table")]
    pub table: Option<String>,
    /// Schema containing the table (defaults to public)
    #[arg(short = 's', long = "schema")]
    pub schema: Option<String>,
    /// Write the introspected schema to a YAML snapshot
    #[arg(long)]
    pub save: Option<PathBuf>,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Debug, Args)]
pub struct MatchArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Table to reconcile against
    #[arg(short = 't', long = "table", conflicts_with = "schema_file")]
    pub table: Option<String>,
    /// Schema containing the table (defaults to public)
    #[arg(short = 's', long = "schema")]
    pub schema: Option<String>,
    /// Reconcile against a saved schema snapshot instead of a live table
    #[arg(long = "schema-file")]
    pub schema_file: Option<PathBuf>,
    /// Field names to ignore when they have no matching column
    #[arg(long = "ignore", value_delimiter = ',')]
    pub ignore: Vec<String>,
    /// Print the reconciliation report as JSON
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Target table whose schema drives the load
    #[arg(short = 't', long = "table")]
    pub table: Option<String>,
    /// Schema containing the table (defaults to public)
    #[arg(short = 's', long = "schema")]
    pub schema: Option<String>,
    /// Field names to ignore when they have no matching column
    #[arg(long = "ignore", value_delimiter = ',')]
    pub ignore: Vec<String>,
    /// Report progress while loading
    #[arg(long)]
    pub progress: bool,
    /// Upsert staged rows into the target table
    #[arg(long)]
    pub merge: bool,
    /// Promote the staging table to a new durable table with this name
    #[arg(long = "promote-to")]
    pub promote_to: Option<String>,
    /// Schema for the promoted table (defaults to the target schema)
    #[arg(long = "promote-schema", requires = "promote_to")]
    pub promote_schema: Option<String>,
    /// Print the load summary as JSON
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
