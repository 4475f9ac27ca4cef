//! Connection seam between the loader and the relational store.
//!
//! Every catalog query, staging statement and bulk transfer goes through the
//! [`Store`] trait. [`PostgresStore`] adapts the synchronous `postgres`
//! client; tests substitute an in-memory double.
//!
//! Values cross the seam as text. Catalog queries cast their output columns
//! to `text` and the store performs its own coercion on insert.

use std::io::Write;

use log::debug;
use postgres::{Client, error::SqlState, types::ToSql};

pub type SqlRow = Vec<Option<String>>;

const CATALOG_NAME_INDEXES: &[&str] = &["pg_type_typname_nsp_index", "pg_class_relname_nsp_index"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The store is unreachable, the session was closed or authentication failed.
    Connection,
    /// The store received the statement and rejected it.
    Statement,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    /// SQLSTATE reported by the server, when there was one.
    pub code: Option<String>,
    pub message: String,
}

impl StoreError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Connection,
            code: None,
            message: message.into(),
        }
    }

    pub fn statement(code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Statement,
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn is_connection(&self) -> bool {
        self.kind == StoreErrorKind::Connection
    }

    pub fn is_duplicate_table(&self) -> bool {
        self.code.as_deref() == Some(SqlState::DUPLICATE_TABLE.code())
    }

    pub fn is_undefined_table(&self) -> bool {
        self.code.as_deref() == Some(SqlState::UNDEFINED_TABLE.code())
    }

    /// A concurrent `CREATE TABLE` that lost the race for a name surfaces as
    /// a unique violation on the catalog's own name indexes.
    pub fn is_catalog_name_collision(&self) -> bool {
        self.code.as_deref() == Some(SqlState::UNIQUE_VIOLATION.code())
            && CATALOG_NAME_INDEXES
                .iter()
                .any(|index| self.message.contains(index))
    }

    /// Class 22: a value could not be coerced into its destination type.
    pub fn is_data_exception(&self) -> bool {
        self.code.as_deref().is_some_and(|code| code.starts_with("22"))
    }
}

pub trait Store {
    fn is_closed(&self) -> bool;

    fn execute(&mut self, sql: &str, params: &[Option<&str>]) -> Result<u64, StoreError>;

    fn query(&mut self, sql: &str, params: &[Option<&str>]) -> Result<Vec<SqlRow>, StoreError>;

    /// Streams a COPY text-format payload through `statement`
    /// (`COPY .. FROM STDIN`) and returns the number of rows written.
    fn copy_in(&mut self, statement: &str, payload: &[u8]) -> Result<u64, StoreError>;

    /// Identifier of the current server session.
    fn session_id(&mut self) -> Result<String, StoreError> {
        let rows = self.query("SELECT pg_backend_pid()::text", &[])?;
        rows.into_iter()
            .next()
            .and_then(|row| row.into_iter().next().flatten())
            .ok_or_else(|| StoreError::connection("pg_backend_pid() returned no row"))
    }
}

impl<S: Store + ?Sized> Store for &mut S {
    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    fn execute(&mut self, sql: &str, params: &[Option<&str>]) -> Result<u64, StoreError> {
        (**self).execute(sql, params)
    }

    fn query(&mut self, sql: &str, params: &[Option<&str>]) -> Result<Vec<SqlRow>, StoreError> {
        (**self).query(sql, params)
    }

    fn copy_in(&mut self, statement: &str, payload: &[u8]) -> Result<u64, StoreError> {
        (**self).copy_in(statement, payload)
    }

    fn session_id(&mut self) -> Result<String, StoreError> {
        (**self).session_id()
    }
}

/// [`Store`] over a live PostgreSQL session.
pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn bind<'a>(params: &'a [Option<&'a str>]) -> Vec<&'a (dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

impl From<postgres::Error> for StoreError {
    fn from(err: postgres::Error) -> Self {
        if err.is_closed() {
            return StoreError::connection(err.to_string());
        }
        match err.as_db_error() {
            Some(db) => {
                let mut message = db.message().to_string();
                if let Some(detail) = db.detail() {
                    message.push_str(&format!(" ({detail})"));
                }
                if let Some(context) = db.where_() {
                    message.push_str(&format!(" [{context}]"));
                }
                StoreError::statement(Some(db.code().code()), message)
            }
            None => StoreError::connection(err.to_string()),
        }
    }
}

impl Store for PostgresStore {
    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    fn execute(&mut self, sql: &str, params: &[Option<&str>]) -> Result<u64, StoreError> {
        debug!("execute: {sql}");
        Ok(self.client.execute(sql, &bind(params))?)
    }

    fn query(&mut self, sql: &str, params: &[Option<&str>]) -> Result<Vec<SqlRow>, StoreError> {
        debug!("query: {sql}");
        let rows = self.client.query(sql, &bind(params))?;
        rows.iter()
            .map(|row| {
                (0..row.len())
                    .map(|idx| row.try_get::<_, Option<String>>(idx))
                    .collect::<Result<SqlRow, _>>()
                    .map_err(StoreError::from)
            })
            .collect()
    }

    fn copy_in(&mut self, statement: &str, payload: &[u8]) -> Result<u64, StoreError> {
        debug!("copy: {statement} ({} bytes)", payload.len());
        let mut writer = self.client.copy_in(statement)?;
        writer
            .write_all(payload)
            .map_err(|err| StoreError::connection(err.to_string()))?;
        Ok(writer.finish()?)
    }
}

/// Double-quotes an identifier, doubling any embedded quote.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}
