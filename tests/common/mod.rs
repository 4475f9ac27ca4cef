#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use pg_upserter::{
    catalog::{ColumnInfo, TableSchema, UniqueConstraint},
    data::{FieldValue, Record},
    progress::ProgressObserver,
    store::{SqlRow, Store, StoreError},
};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// In-memory stand-in for a PostgreSQL session.
///
/// Catalog queries are answered from scripted rows. Temporary tables and
/// durable tables are tracked by name with a row count, which is enough to
/// follow a staging table from creation through promotion.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub closed: bool,
    pub session: String,
    pub table_exists: bool,
    pub column_rows: Vec<SqlRow>,
    pub constraint_rows: Vec<SqlRow>,
    /// Staging table name -> rows held.
    pub temp_tables: BTreeMap<String, u64>,
    /// Quoted, schema-qualified durable tables -> rows held.
    pub durable_tables: BTreeMap<String, u64>,
    pub executed: Vec<String>,
    /// `(statement, payload)` per bulk transfer.
    pub copies: Vec<(String, String)>,
    /// Fails the n-th (zero-based) bulk transfer.
    pub fail_copy: Option<(usize, StoreError)>,
    /// Fails any executed statement containing the pattern.
    pub fail_execute: Option<(String, StoreError)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            session: "4242".to_string(),
            ..Self::default()
        }
    }

    /// A store holding the `public.meta_ads_metrics` catalog from [`ads_column_rows`].
    pub fn with_ads_table() -> Self {
        Self {
            table_exists: true,
            column_rows: ads_column_rows(),
            constraint_rows: ads_constraint_rows(),
            ..Self::new()
        }
    }

    pub fn executed_matching(&self, pattern: &str) -> Vec<&str> {
        self.executed
            .iter()
            .map(String::as_str)
            .filter(|sql| sql.contains(pattern))
            .collect()
    }

    fn staged_rows(&self, sql: &str) -> Option<u64> {
        temp_table_name(sql).and_then(|name| self.temp_tables.get(&name).copied())
    }
}

/// Extracts `name` from the first `pg_temp."name"` reference.
pub fn temp_table_name(sql: &str) -> Option<String> {
    let start = sql.find("pg_temp.\"")? + "pg_temp.\"".len();
    let len = sql[start..].find('"')?;
    Some(sql[start..start + len].to_string())
}

fn single(value: Option<String>) -> Vec<SqlRow> {
    vec![vec![value]]
}

impl Store for MemoryStore {
    fn is_closed(&self) -> bool {
        self.closed
    }

    fn execute(&mut self, sql: &str, _params: &[Option<&str>]) -> Result<u64, StoreError> {
        if self.closed {
            return Err(StoreError::connection("connection closed"));
        }
        self.executed.push(sql.to_string());
        if let Some((pattern, err)) = &self.fail_execute {
            if sql.contains(pattern.as_str()) {
                return Err(err.clone());
            }
        }

        if let Some(rest) = sql.strip_prefix("CREATE TEMPORARY TABLE \"") {
            let name = rest.split('"').next().unwrap_or_default().to_string();
            self.temp_tables.insert(name, 0);
            return Ok(0);
        }
        if let Some(rest) = sql.strip_prefix("CREATE TABLE ") {
            let destination = rest.split(" AS TABLE ").next().unwrap_or_default().to_string();
            if self.durable_tables.contains_key(&destination) {
                return Err(StoreError::statement(
                    Some("42P07"),
                    format!("relation {destination} already exists"),
                ));
            }
            let rows = self.staged_rows(sql).ok_or_else(|| {
                StoreError::statement(Some("42P01"), "relation does not exist")
            })?;
            self.durable_tables.insert(destination, rows);
            return Ok(rows);
        }
        if sql.starts_with("DROP TABLE") {
            if let Some(name) = temp_table_name(sql) {
                self.temp_tables.remove(&name);
            }
            return Ok(0);
        }
        if sql.starts_with("INSERT INTO") {
            return Ok(self.staged_rows(sql).unwrap_or(0));
        }
        Ok(0)
    }

    fn query(&mut self, sql: &str, params: &[Option<&str>]) -> Result<Vec<SqlRow>, StoreError> {
        if self.closed {
            return Err(StoreError::connection("connection closed"));
        }
        if sql.contains("pg_backend_pid") {
            return Ok(single(Some(self.session.clone())));
        }
        if sql.contains("to_regclass") {
            let reference = params.first().copied().flatten().unwrap_or_default();
            let known = temp_table_name(reference)
                .is_some_and(|name| self.temp_tables.contains_key(&name));
            return Ok(single(known.then(|| reference.to_string())));
        }
        if sql.contains("count(*)") {
            return Ok(single(self.staged_rows(sql).map(|rows| rows.to_string())));
        }
        if sql.contains("pg_catalog.pg_constraint") {
            return Ok(self.constraint_rows.clone());
        }
        if sql.contains("pg_catalog.pg_attribute") {
            return Ok(self.column_rows.clone());
        }
        if sql.contains("pg_catalog.pg_class") {
            return Ok(if self.table_exists {
                single(Some("16384".to_string()))
            } else {
                Vec::new()
            });
        }
        Ok(Vec::new())
    }

    fn copy_in(&mut self, statement: &str, payload: &[u8]) -> Result<u64, StoreError> {
        if self.closed {
            return Err(StoreError::connection("connection closed"));
        }
        let call = self.copies.len();
        let payload = String::from_utf8(payload.to_vec()).expect("utf-8 payload");
        self.copies.push((statement.to_string(), payload.clone()));
        if let Some((failing, err)) = &self.fail_copy {
            if *failing == call {
                return Err(err.clone());
            }
        }
        let name = temp_table_name(statement).expect("COPY targets a staging table");
        let rows = payload.lines().count() as u64;
        let held = self
            .temp_tables
            .get_mut(&name)
            .ok_or_else(|| StoreError::statement(Some("42P01"), "relation does not exist"))?;
        *held += rows;
        Ok(rows)
    }
}

/// Records every observer callback.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    pub events: Vec<String>,
}

impl ProgressObserver for RecordingProgress {
    fn start(&mut self, total: usize) {
        self.events.push(format!("start:{total}"));
    }

    fn advance(&mut self, loaded: usize) {
        self.events.push(format!("advance:{loaded}"));
    }

    fn finish(&mut self, loaded: usize) {
        self.events.push(format!("finish:{loaded}"));
    }
}

pub fn column_row(
    name: &str,
    declared_type: &str,
    nullable: bool,
    default: Option<&str>,
    identity: bool,
    ordinal: usize,
) -> SqlRow {
    vec![
        Some(name.to_string()),
        Some(declared_type.to_string()),
        Some(nullable.to_string()),
        default.map(str::to_string),
        Some(identity.to_string()),
        Some("false".to_string()),
        Some(ordinal.to_string()),
    ]
}

pub fn constraint_row(name: &str, primary: bool, column: &str) -> SqlRow {
    vec![
        Some(name.to_string()),
        Some(if primary { "t" } else { "f" }.to_string()),
        Some(column.to_string()),
    ]
}

/// `id(auto), account_id, campaign_id, spend, impressions, last_update(auto)`
/// with a primary key on `id` and a unique key on `(account_id, campaign_id)`.
pub fn ads_column_rows() -> Vec<SqlRow> {
    vec![
        column_row(
            "id",
            "integer",
            false,
            Some("nextval('meta_ads_metrics_id_seq'::regclass)"),
            false,
            1,
        ),
        column_row("account_id", "text", false, None, false, 2),
        column_row("campaign_id", "text", true, None, false, 3),
        column_row("spend", "numeric(12,2)", true, None, false, 4),
        column_row("impressions", "integer", true, None, false, 5),
        column_row(
            "last_update",
            "timestamp without time zone",
            true,
            Some("CURRENT_TIMESTAMP"),
            false,
            6,
        ),
    ]
}

pub fn ads_constraint_rows() -> Vec<SqlRow> {
    vec![
        constraint_row("meta_ads_metrics_account_campaign_key", false, "account_id"),
        constraint_row("meta_ads_metrics_account_campaign_key", false, "campaign_id"),
        constraint_row("meta_ads_metrics_pkey", true, "id"),
    ]
}

pub fn ads_schema() -> TableSchema {
    TableSchema::new(
        "meta_ads_metrics",
        "public",
        vec![
            ColumnInfo::new(
                "id",
                "integer",
                false,
                Some("nextval('meta_ads_metrics_id_seq'::regclass)"),
                true,
                1,
            ),
            ColumnInfo::new("account_id", "text", false, None, false, 2),
            ColumnInfo::new("campaign_id", "text", true, None, false, 3),
            ColumnInfo::new("spend", "numeric(12,2)", true, None, false, 4),
            ColumnInfo::new("impressions", "integer", true, None, false, 5),
            ColumnInfo::new(
                "last_update",
                "timestamp without time zone",
                true,
                Some("CURRENT_TIMESTAMP"),
                true,
                6,
            ),
        ],
        vec![
            UniqueConstraint {
                name: "meta_ads_metrics_account_campaign_key".to_string(),
                columns: vec!["account_id".to_string(), "campaign_id".to_string()],
                is_primary: false,
            },
            UniqueConstraint {
                name: "meta_ads_metrics_pkey".to_string(),
                columns: vec!["id".to_string()],
                is_primary: true,
            },
        ],
    )
    .expect("valid ads schema")
}

pub fn record(fields: &[(&str, FieldValue)]) -> Record {
    fields
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

/// `count` records with `account_id`, `campaign_id` and `spend` set.
pub fn ads_records(count: usize) -> Vec<Record> {
    (0..count)
        .map(|idx| {
            record(&[
                ("account_id", FieldValue::from(format!("acct-{idx}"))),
                ("campaign_id", FieldValue::from("c-1")),
                ("spend", FieldValue::Float(idx as f64 / 4.0)),
            ])
        })
        .collect()
}
