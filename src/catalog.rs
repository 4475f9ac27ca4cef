//! Live schema introspection.
//!
//! [`inspect`] reads `pg_catalog` for one table and produces an immutable
//! [`TableSchema`]. The schema's [`TableSchema::valid_columns`] are the only
//! columns the loader ever writes to: identity, serial and generated columns
//! as well as columns defaulting to a store-side generator (sequences,
//! `CURRENT_TIMESTAMP`, `gen_random_uuid()`, ...) are excluded.
//!
//! Snapshots can be saved to YAML and loaded back for offline reconciliation.

use std::{collections::HashSet, path::Path, sync::OnceLock};

use anyhow::{Context, Result};
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::LoadError,
    io_utils,
    store::{SqlRow, Store, StoreError, qualified_name},
};

const TABLE_EXISTS_SQL: &str = concat!(
    "SELECT cls.oid::text ",
    "FROM pg_catalog.pg_class cls ",
    "JOIN pg_catalog.pg_namespace ns ON ns.oid = cls.relnamespace ",
    "WHERE ns.nspname = $1::text ",
    "  AND cls.relname = $2::text ",
    "  AND cls.relkind IN ('r', 'p')"
);

const COLUMNS_SQL: &str = concat!(
    "SELECT ",
    "  attr.attname::text, ",
    "  pg_catalog.format_type(attr.atttypid, attr.atttypmod)::text, ",
    "  (NOT attr.attnotnull)::text, ",
    "  pg_catalog.pg_get_expr(def.adbin, def.adrelid)::text, ",
    "  (attr.attidentity <> '')::text, ",
    "  (attr.attgenerated <> '')::text, ",
    "  attr.attnum::text ",
    "FROM pg_catalog.pg_attribute attr ",
    "JOIN pg_catalog.pg_class cls ON cls.oid = attr.attrelid ",
    "JOIN pg_catalog.pg_namespace ns ON ns.oid = cls.relnamespace ",
    "LEFT JOIN pg_catalog.pg_attrdef def ",
    "  ON def.adrelid = attr.attrelid AND def.adnum = attr.attnum ",
    "WHERE ns.nspname = $1::text ",
    "  AND cls.relname = $2::text ",
    "  AND attr.attnum > 0 ",
    "  AND NOT attr.attisdropped ",
    "ORDER BY attr.attnum"
);

const CONSTRAINTS_SQL: &str = concat!(
    "SELECT ",
    "  con.conname::text, ",
    "  (con.contype = 'p')::text, ",
    "  attr.attname::text ",
    "FROM pg_catalog.pg_constraint con ",
    "JOIN pg_catalog.pg_class cls ON cls.oid = con.conrelid ",
    "JOIN pg_catalog.pg_namespace ns ON ns.oid = cls.relnamespace ",
    "JOIN unnest(con.conkey) WITH ORDINALITY AS key(attnum, ord) ON TRUE ",
    "JOIN pg_catalog.pg_attribute attr ",
    "  ON attr.attrelid = cls.oid AND attr.attnum = key.attnum ",
    "WHERE ns.nspname = $1::text ",
    "  AND cls.relname = $2::text ",
    "  AND con.contype IN ('p', 'u') ",
    "ORDER BY con.conname, key.ord"
);

/// Default expressions that make the store produce the value on insert.
const GENERATOR_MARKERS: &[&str] = &[
    "nextval(",
    "current_timestamp",
    "current_date",
    "current_time",
    "localtimestamp",
    "localtime",
    "now()",
    "clock_timestamp()",
    "statement_timestamp()",
    "transaction_timestamp()",
    "gen_random_uuid()",
    "uuid_generate_v",
];

const SERIAL_TYPES: &[&str] = &["serial", "serial4", "serial8", "bigserial", "smallserial", "serial2"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_expression: Option<String>,
    pub is_auto_generated: bool,
    pub ordinal_position: usize,
}

impl ColumnInfo {
    pub fn new(
        name: impl Into<String>,
        declared_type: impl Into<String>,
        nullable: bool,
        default_expression: Option<&str>,
        is_auto_generated: bool,
        ordinal_position: usize,
    ) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            nullable,
            default_expression: default_expression.map(str::to_string),
            is_auto_generated,
            ordinal_position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableSchemaDoc {
    table_name: String,
    schema_name: String,
    columns: Vec<ColumnInfo>,
    #[serde(default)]
    unique_constraints: Vec<UniqueConstraint>,
}

/// Insert-safe description of one table. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TableSchemaDoc", into = "TableSchemaDoc")]
pub struct TableSchema {
    table_name: String,
    schema_name: String,
    columns: Vec<ColumnInfo>,
    unique_constraints: Vec<UniqueConstraint>,
    valid_columns: Vec<String>,
}

impl TableSchema {
    /// Columns are ordered by ordinal position and must be unique by name.
    /// Constraints are kept sorted by name; at most one may be primary.
    pub fn new(
        table_name: impl Into<String>,
        schema_name: impl Into<String>,
        mut columns: Vec<ColumnInfo>,
        mut unique_constraints: Vec<UniqueConstraint>,
    ) -> Result<Self, LoadError> {
        let table_name = table_name.into();
        let schema_name = schema_name.into();
        let malformed = |message: String| LoadError::Catalog {
            schema: schema_name.clone(),
            table: table_name.clone(),
            message,
        };

        columns.sort_by_key(|c| c.ordinal_position);
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(malformed(format!("duplicate column '{}'", column.name)));
            }
        }
        unique_constraints.sort_by(|a, b| a.name.cmp(&b.name));
        if unique_constraints.iter().filter(|uc| uc.is_primary).count() > 1 {
            return Err(malformed("more than one primary key".to_string()));
        }
        for constraint in &unique_constraints {
            if let Some(unknown) = constraint.columns.iter().find(|c| !seen.contains(c.as_str())) {
                return Err(malformed(format!(
                    "constraint '{}' references unknown column '{unknown}'",
                    constraint.name
                )));
            }
        }

        let valid_columns = columns
            .iter()
            .filter(|c| !c.is_auto_generated)
            .map(|c| c.name.clone())
            .collect();
        Ok(Self {
            table_name,
            schema_name,
            columns,
            unique_constraints,
            valid_columns,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn qualified_name(&self) -> String {
        qualified_name(&self.schema_name, &self.table_name)
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn unique_constraints(&self) -> &[UniqueConstraint] {
        &self.unique_constraints
    }

    pub fn primary_key(&self) -> Option<&UniqueConstraint> {
        self.unique_constraints.iter().find(|uc| uc.is_primary)
    }

    /// Insertable columns in ordinal order.
    pub fn valid_columns(&self) -> &[String] {
        &self.valid_columns
    }

    pub fn is_valid_column(&self, name: &str) -> bool {
        self.valid_columns.iter().any(|c| c == name)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        io_utils::write_yaml(path, self)
            .with_context(|| format!("Writing schema snapshot {path:?}"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        io_utils::read_yaml(path)
            .with_context(|| format!("Loading schema snapshot {path:?}"))
    }
}

impl TryFrom<TableSchemaDoc> for TableSchema {
    type Error = LoadError;

    fn try_from(doc: TableSchemaDoc) -> Result<Self, Self::Error> {
        TableSchema::new(doc.table_name, doc.schema_name, doc.columns, doc.unique_constraints)
    }
}

impl From<TableSchema> for TableSchemaDoc {
    fn from(schema: TableSchema) -> Self {
        TableSchemaDoc {
            table_name: schema.table_name,
            schema_name: schema.schema_name,
            columns: schema.columns,
            unique_constraints: schema.unique_constraints,
        }
    }
}

pub fn is_plain_identifier(name: &str) -> bool {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("valid identifier regex"))
        .is_match(name)
}

pub fn ensure_identifier(name: &str) -> Result<(), LoadError> {
    if is_plain_identifier(name) {
        Ok(())
    } else {
        Err(LoadError::InvalidIdentifier(name.to_string()))
    }
}

/// Blanks out single-quoted literals so a marker spelled inside a string
/// constant does not count.
fn strip_literals(expr: &str) -> std::borrow::Cow<'_, str> {
    static LITERAL: OnceLock<Regex> = OnceLock::new();
    LITERAL
        .get_or_init(|| Regex::new(r"'(?:[^']|'')*'").expect("valid literal regex"))
        .replace_all(expr, "''")
}

/// True when the store, not the caller, supplies the column's value.
pub fn is_generated_column(
    declared_type: &str,
    default_expression: Option<&str>,
    is_identity: bool,
    is_generated: bool,
) -> bool {
    if is_identity || is_generated {
        return true;
    }
    let declared = declared_type.trim().to_ascii_lowercase();
    if SERIAL_TYPES.contains(&declared.as_str()) {
        return true;
    }
    default_expression.is_some_and(|expr| {
        let lowered = strip_literals(expr).to_ascii_lowercase();
        GENERATOR_MARKERS.iter().any(|marker| lowered.contains(marker))
    })
}

pub fn inspect<S: Store + ?Sized>(
    store: &mut S,
    table_name: &str,
    schema_name: &str,
) -> Result<TableSchema, LoadError> {
    ensure_identifier(table_name)?;
    ensure_identifier(schema_name)?;
    if store.is_closed() {
        return Err(LoadError::Connection("connection is closed".to_string()));
    }
    let params = [Some(schema_name), Some(table_name)];
    let catalog_error = |err: StoreError| {
        if err.is_connection() {
            LoadError::Connection(err.message)
        } else {
            LoadError::Catalog {
                schema: schema_name.to_string(),
                table: table_name.to_string(),
                message: err.message,
            }
        }
    };

    let exists = store.query(TABLE_EXISTS_SQL, &params).map_err(catalog_error)?;
    if exists.is_empty() {
        return Err(LoadError::TableNotFound {
            schema: schema_name.to_string(),
            table: table_name.to_string(),
        });
    }

    let column_rows = store.query(COLUMNS_SQL, &params).map_err(catalog_error)?;
    let columns = column_rows
        .into_iter()
        .map(parse_column_row)
        .collect::<Result<Vec<_>, String>>()
        .map_err(|message| LoadError::Catalog {
            schema: schema_name.to_string(),
            table: table_name.to_string(),
            message,
        })?;

    let constraint_rows = store.query(CONSTRAINTS_SQL, &params).map_err(catalog_error)?;
    let constraints = group_constraint_rows(constraint_rows).map_err(|message| LoadError::Catalog {
        schema: schema_name.to_string(),
        table: table_name.to_string(),
        message,
    })?;

    let schema = TableSchema::new(table_name, schema_name, columns, constraints)?;
    debug!(
        "Valid columns for {}: {:?}",
        schema.qualified_name(),
        schema.valid_columns()
    );
    info!(
        "Inspected {}: {} column(s), {} insertable, {} unique constraint(s)",
        schema.qualified_name(),
        schema.columns().len(),
        schema.valid_columns().len(),
        schema.unique_constraints().len()
    );
    Ok(schema)
}

fn required(cell: Option<String>, what: &str) -> Result<String, String> {
    cell.ok_or_else(|| format!("catalog returned NULL {what}"))
}

fn parse_flag(cell: Option<String>, what: &str) -> Result<bool, String> {
    match required(cell, what)?.as_str() {
        "true" | "t" => Ok(true),
        "false" | "f" => Ok(false),
        other => Err(format!("unexpected {what} flag '{other}'")),
    }
}

fn parse_column_row(row: SqlRow) -> Result<ColumnInfo, String> {
    let [name, declared_type, nullable, default, identity, generated, ordinal]: [Option<String>; 7] =
        row.try_into()
            .map_err(|row: SqlRow| format!("column row has {} cell(s), expected 7", row.len()))?;
    let name = required(name, "column name")?;
    let declared_type = required(declared_type, "column type")?;
    let nullable = parse_flag(nullable, "nullable")?;
    let is_identity = parse_flag(identity, "identity")?;
    let is_generated = parse_flag(generated, "generated")?;
    let ordinal = required(ordinal, "ordinal position")?;
    let ordinal_position = ordinal
        .parse::<usize>()
        .map_err(|_| format!("ordinal position '{ordinal}' for '{name}' is not a number"))?;
    let is_auto_generated =
        is_generated_column(&declared_type, default.as_deref(), is_identity, is_generated);
    Ok(ColumnInfo {
        name,
        declared_type,
        nullable,
        default_expression: default,
        is_auto_generated,
        ordinal_position,
    })
}

fn group_constraint_rows(rows: Vec<SqlRow>) -> Result<Vec<UniqueConstraint>, String> {
    let mut constraints: Vec<UniqueConstraint> = Vec::new();
    for row in rows {
        let [name, primary, column]: [Option<String>; 3] = row
            .try_into()
            .map_err(|row: SqlRow| format!("constraint row has {} cell(s), expected 3", row.len()))?;
        let name = required(name, "constraint name")?;
        let is_primary = parse_flag(primary, "primary key")?;
        let column = required(column, "constraint column")?;
        match constraints.last_mut() {
            Some(current) if current.name == name => current.columns.push(column),
            _ => constraints.push(UniqueConstraint {
                name,
                columns: vec![column],
                is_primary,
            }),
        }
    }
    Ok(constraints)
}
