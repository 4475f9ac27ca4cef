pub mod catalog;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod io_utils;
pub mod load;
pub mod matcher;
pub mod progress;
pub mod promotion;
pub mod records;
pub mod staging;
pub mod store;
pub mod table;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    catalog::TableSchema,
    cli::{Cli, Commands, ConnectionArgs, InputFormat, SourceArgs},
    config::{ConnectionConfig, LoadConfig},
    data::Record,
    load::LoadPlan,
    progress::{LogProgress, NoProgress, ProgressObserver},
    records::{RecordFormat, SourceOptions},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("pg_upserter", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Inspect(args) => handle_inspect(&args),
        Commands::Match(args) => handle_match(&args),
        Commands::Load(args) => handle_load(&args),
    }
}

fn handle_inspect(args: &cli::InspectArgs) -> Result<()> {
    let config = resolve_load_config(
        &args.connection,
        args.table.as_deref(),
        args.schema.as_deref(),
    )?;
    let mut store = resolve_connection(&args.connection, &config)?.connect()?;
    let schema = catalog::inspect(&mut store, &config.table, &config.schema)
        .with_context(|| format!("Inspecting {}.{}", config.schema, config.table))?;
    print!("{}", table::render_schema(&schema));
    if let Some(path) = &args.save {
        schema
            .save(path)
            .with_context(|| format!("Writing schema snapshot to {path:?}"))?;
        info!("Schema snapshot for {} written to {:?}", schema.qualified_name(), path);
    }
    Ok(())
}

fn handle_match(args: &cli::MatchArgs) -> Result<()> {
    let records = read_source(&args.source)?;
    let (schema, ignore) = match &args.schema_file {
        Some(path) => {
            let schema = TableSchema::load(path)?;
            info!("Reconciling against snapshot of {}", schema.qualified_name());
            (schema, args.ignore.clone())
        }
        None => {
            let mut config = resolve_load_config(
                &args.connection,
                args.table.as_deref(),
                args.schema.as_deref(),
            )?;
            config.ignore_columns.extend(args.ignore.iter().cloned());
            let mut store = resolve_connection(&args.connection, &config)?.connect()?;
            let schema = catalog::inspect(&mut store, &config.table, &config.schema)
                .with_context(|| format!("Inspecting {}.{}", config.schema, config.table))?;
            (schema, config.ignore_columns)
        }
    };
    let report = matcher::match_columns(&records, &schema, &ignore);
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Serializing reconciliation report")?
        );
    } else {
        print!("{}", table::render_report(&report));
    }
    Ok(())
}

fn handle_load(args: &cli::LoadArgs) -> Result<()> {
    let mut config = resolve_load_config(
        &args.connection,
        args.table.as_deref(),
        args.schema.as_deref(),
    )?;
    config.ignore_columns.extend(args.ignore.iter().cloned());
    config.show_progress |= args.progress;
    let plan = LoadPlan {
        merge: args.merge,
        promote_to: args.promote_to.as_ref().map(|target| {
            let target_schema = args
                .promote_schema
                .clone()
                .unwrap_or_else(|| config.schema.clone());
            (target.clone(), target_schema)
        }),
    };
    debug!("Load plan: {plan:?}");

    let records = read_source(&args.source)?;
    let mut store = resolve_connection(&args.connection, &config)?.connect()?;
    let schema = catalog::inspect(&mut store, &config.table, &config.schema)
        .with_context(|| format!("Inspecting {}.{}", config.schema, config.table))?;

    let mut log_progress;
    let mut no_progress = NoProgress;
    let observer: &mut dyn ProgressObserver = if config.show_progress {
        log_progress = LogProgress::new(format!("Loading {}", schema.qualified_name()));
        &mut log_progress
    } else {
        &mut no_progress
    };
    let summary = load::run_cycle(&mut store, schema, &config, &records, &plan, observer)
        .with_context(|| format!("Loading {:?} into {}.{}", args.source.input, config.schema, config.table))?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Serializing load summary")?
        );
    } else {
        print!("{}", table::render_report(&summary.report));
        println!(
            "{} row(s) staged in {}",
            summary.rows_loaded, summary.staging_table
        );
        if let Some(merge) = &summary.merge {
            match &merge.conflict_constraint {
                Some(constraint) => println!(
                    "{} row(s) merged into {} on {}",
                    merge.rows_affected, summary.table, constraint
                ),
                None => println!("{} row(s) inserted into {}", merge.rows_affected, summary.table),
            }
        }
        if let Some(promoted) = &summary.promoted_to {
            println!("Promoted to {promoted}");
        }
    }
    Ok(())
}

/// Starts from `--config` when given and applies the table and schema flags
/// on top.
fn resolve_load_config(
    connection: &ConnectionArgs,
    table: Option<&str>,
    schema: Option<&str>,
) -> Result<LoadConfig> {
    let mut config = match &connection.config {
        Some(path) => load_config_file(path)?,
        None => LoadConfig::new(
            table.ok_or_else(|| anyhow!("--table is required when no --config file is given"))?,
        ),
    };
    if let Some(table) = table {
        config.table = table.to_string();
    }
    if let Some(schema) = schema {
        config.schema = schema.to_string();
    }
    config.validate()?;
    Ok(config)
}

fn load_config_file(path: &Path) -> Result<LoadConfig> {
    let config =
        LoadConfig::load(path).with_context(|| format!("Loading configuration from {path:?}"))?;
    debug!("Loaded configuration for table '{}' from {:?}", config.table, path);
    Ok(config)
}

fn resolve_connection(args: &ConnectionArgs, config: &LoadConfig) -> Result<ConnectionConfig> {
    let mut connection = match (&config.connection, &args.user, &args.dbname) {
        (Some(existing), _, _) => existing.clone(),
        (None, Some(user), Some(dbname)) => ConnectionConfig::new(user, dbname),
        (None, _, _) => {
            bail!("--user and --dbname are required when the configuration has no connection section")
        }
    };
    if let Some(host) = &args.host {
        connection.host = host.clone();
    }
    if let Some(port) = args.port {
        connection.port = port;
    }
    if let Some(user) = &args.user {
        connection.user = user.clone();
    }
    if let Some(password) = &args.password {
        connection.password = Some(password.clone());
    }
    if let Some(dbname) = &args.dbname {
        connection.dbname = dbname.clone();
    }
    debug!("Connection settings: {connection:?}");
    Ok(connection)
}

fn read_source(args: &SourceArgs) -> Result<Vec<Record>> {
    let options = SourceOptions {
        format: args.format.map(|format| match format {
            InputFormat::Csv => RecordFormat::Csv,
            InputFormat::Json => RecordFormat::Json,
            InputFormat::Jsonl => RecordFormat::JsonLines,
        }),
        delimiter: args.delimiter,
        encoding: io_utils::resolve_encoding(args.input_encoding.as_deref())?,
    };
    info!("Reading records from '{}'", args.input.display());
    records::read_records(&args.input, &options)
        .with_context(|| format!("Reading records from {:?}", args.input))
}
