//! Session-scoped staging tables and bulk loading.
//!
//! A [`StagingTable`] is a `TEMPORARY` table created from the insertable
//! columns of a [`TableSchema`]. Records are normalized (see
//! [`crate::data::normalize_value`]) and streamed in with `COPY .. FROM STDIN`
//! in chunks of [`LOAD_CHUNK_ROWS`]. Each chunk is its own bulk transfer, so a
//! failing chunk leaves the chunks before it staged.

use std::sync::OnceLock;

use log::{debug, info};
use regex::Regex;
use uuid::Uuid;

use crate::{
    catalog::TableSchema,
    data::{Record, normalize_value},
    error::{LoadError, RowSpan},
    progress::{ProgressObserver, progress_enabled},
    store::{Store, StoreError, quote_ident},
};

pub const LOAD_CHUNK_ROWS: usize = 1000;
pub const STAGING_PREFIX: &str = "stg_";
const STAGING_BASE_CHARS: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedColumn {
    pub name: String,
    pub declared_type: String,
}

/// Handle to a staging table owned by the session that created it.
///
/// Not `Clone`: promotion consumes the handle.
#[derive(Debug, PartialEq, Eq)]
pub struct StagingTable {
    name: String,
    source_table: String,
    columns: Vec<StagedColumn>,
    session: String,
    rows_loaded: u64,
}

impl StagingTable {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reference valid only inside the creating session.
    pub fn qualified_name(&self) -> String {
        format!("pg_temp.{}", quote_ident(&self.name))
    }

    pub fn source_table(&self) -> &str {
        &self.source_table
    }

    pub fn columns(&self) -> &[StagedColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn rows_loaded(&self) -> u64 {
        self.rows_loaded
    }

    pub(crate) fn into_columns(self) -> Vec<StagedColumn> {
        self.columns
    }
}

fn staging_error(table: &str, row: Option<RowSpan>, message: impl Into<String>) -> LoadError {
    LoadError::Staging {
        table: table.to_string(),
        row,
        message: message.into(),
    }
}

fn store_error(table: &str, row: Option<RowSpan>, err: StoreError) -> LoadError {
    if err.is_connection() {
        LoadError::Connection(err.message)
    } else if err.is_data_exception() {
        staging_error(
            table,
            row,
            format!("value rejected by column type: {}", err.message),
        )
    } else {
        staging_error(table, row, err.message)
    }
}

pub fn staging_name(table_name: &str) -> String {
    let base: String = table_name.chars().take(STAGING_BASE_CHARS).collect();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{STAGING_PREFIX}{base}_{}", &suffix[..12])
}

pub fn create_staging<S: Store + ?Sized, C: AsRef<str>>(
    store: &mut S,
    schema: &TableSchema,
    matched_columns: &[C],
) -> Result<StagingTable, LoadError> {
    let target = schema.qualified_name();
    if matched_columns.is_empty() {
        return Err(staging_error(&target, None, "no matched columns to stage"));
    }
    for name in matched_columns.iter().map(AsRef::as_ref) {
        match schema.column(name) {
            None => {
                return Err(staging_error(
                    &target,
                    None,
                    format!("column '{name}' does not exist in {target}"),
                ));
            }
            Some(column) if column.is_auto_generated => {
                return Err(staging_error(
                    &target,
                    None,
                    format!("column '{name}' is generated by the store and cannot be staged"),
                ));
            }
            Some(_) => {}
        }
    }

    let columns: Vec<StagedColumn> = schema
        .columns()
        .iter()
        .filter(|c| matched_columns.iter().any(|m| m.as_ref() == c.name))
        .map(|c| StagedColumn {
            name: c.name.clone(),
            declared_type: c.declared_type.clone(),
        })
        .collect();

    let name = staging_name(schema.table_name());
    let definitions = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.declared_type))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("CREATE TEMPORARY TABLE {} ({definitions})", quote_ident(&name));
    debug!("{sql}");

    let session = store
        .session_id()
        .map_err(|err| store_error(&name, None, err))?;
    store
        .execute(&sql, &[])
        .map_err(|err| store_error(&name, None, err))?;
    info!(
        "Created staging table {name} for {target} with {} column(s)",
        columns.len()
    );
    Ok(StagingTable {
        name,
        source_table: schema.table_name().to_string(),
        columns,
        session,
        rows_loaded: 0,
    })
}

/// Escapes one value for the COPY text format.
fn push_copy_value(line: &mut String, value: Option<&str>) {
    let Some(value) = value else {
        line.push_str("\\N");
        return;
    };
    for ch in value.chars() {
        match ch {
            '\\' => line.push_str("\\\\"),
            '\n' => line.push_str("\\n"),
            '\r' => line.push_str("\\r"),
            '\t' => line.push_str("\\t"),
            other => line.push(other),
        }
    }
}

/// Renders records as COPY text-format lines over `columns`.
pub fn encode_copy_rows(records: &[Record], columns: &[&str]) -> String {
    let mut payload = String::new();
    for record in records {
        for (idx, column) in columns.iter().enumerate() {
            if idx > 0 {
                payload.push('\t');
            }
            let value = record.get(*column).and_then(normalize_value);
            push_copy_value(&mut payload, value.as_deref());
        }
        payload.push('\n');
    }
    payload
}

/// Narrows a failed chunk to the offending record when the server reports
/// the COPY line number.
fn failing_row(message: &str, first: usize, last: usize) -> RowSpan {
    static COPY_LINE: OnceLock<Regex> = OnceLock::new();
    let line = COPY_LINE
        .get_or_init(|| Regex::new(r"COPY [^,]+, line (\d+)").expect("valid COPY line regex"))
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok());
    match line {
        Some(line) if line >= 1 && first + line - 1 <= last => RowSpan {
            first: first + line - 1,
            last: first + line - 1,
        },
        _ => RowSpan { first, last },
    }
}

pub fn load<S: Store + ?Sized, C: AsRef<str>>(
    store: &mut S,
    staging: &mut StagingTable,
    records: &[Record],
    matched_columns: &[C],
    show_progress: bool,
    observer: &mut dyn ProgressObserver,
) -> Result<u64, LoadError> {
    if let Some(unknown) = matched_columns
        .iter()
        .map(AsRef::as_ref)
        .find(|name| !staging.columns.iter().any(|c| c.name == *name))
    {
        return Err(staging_error(
            &staging.name,
            None,
            format!("column '{unknown}' is not part of the staging table"),
        ));
    }
    if records.is_empty() {
        return Ok(0);
    }

    let columns: Vec<&str> = staging
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .filter(|name| matched_columns.iter().any(|m| m.as_ref() == *name))
        .collect();
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let statement = format!(
        "COPY {} ({column_list}) FROM STDIN",
        staging.qualified_name()
    );

    let reporting = progress_enabled(show_progress, records.len());
    if reporting {
        observer.start(records.len());
    }

    let mut written = 0u64;
    for (chunk_idx, chunk) in records.chunks(LOAD_CHUNK_ROWS).enumerate() {
        let first = chunk_idx * LOAD_CHUNK_ROWS;
        let last = first + chunk.len() - 1;
        let payload = encode_copy_rows(chunk, &columns);
        let copied = store
            .copy_in(&statement, payload.as_bytes())
            .map_err(|err| {
                let span = failing_row(&err.message, first, last);
                store_error(&staging.name, Some(span), err)
            })?;
        written += copied;
        staging.rows_loaded += copied;
        if reporting {
            observer.advance(first + chunk.len());
        }
    }
    if reporting {
        observer.finish(written as usize);
    }
    info!("Loaded {written} row(s) into {}", staging.name);
    Ok(written)
}

/// Drops the staging table. Used when a load is abandoned before promotion.
pub fn discard<S: Store + ?Sized>(store: &mut S, staging: StagingTable) -> Result<(), LoadError> {
    let sql = format!("DROP TABLE IF EXISTS {}", staging.qualified_name());
    store
        .execute(&sql, &[])
        .map_err(|err| store_error(&staging.name, None, err))?;
    debug!("Discarded staging table {}", staging.name);
    Ok(())
}

pub fn row_count<S: Store + ?Sized>(store: &mut S, staging: &StagingTable) -> Result<u64, LoadError> {
    let sql = format!("SELECT count(*)::text FROM {}", staging.qualified_name());
    let rows = store
        .query(&sql, &[])
        .map_err(|err| store_error(&staging.name, None, err))?;
    rows.into_iter()
        .next()
        .and_then(|row| row.into_iter().next().flatten())
        .and_then(|count| count.parse::<u64>().ok())
        .ok_or_else(|| staging_error(&staging.name, None, "count(*) returned no value"))
}
