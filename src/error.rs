//! Failure taxonomy shared by every stage of a load cycle.
//!
//! Core operations return [`LoadError`]; the command handlers in
//! [`crate::run`] wrap them in `anyhow` with file and table context.

use thiserror::Error;

use crate::staging::StagingTable;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("table \"{schema}\".\"{table}\" does not exist")]
    TableNotFound { schema: String, table: String },
    #[error("malformed catalog data for \"{schema}\".\"{table}\": {message}")]
    Catalog {
        schema: String,
        table: String,
        message: String,
    },
    #[error("'{0}' is not a plain identifier")]
    InvalidIdentifier(String),
    #[error("reconciliation failed for \"{table}\": {message}")]
    Reconciliation { table: String, message: String },
    #[error("staging failed for {table}{}: {message}", row_suffix(.row))]
    Staging {
        table: String,
        row: Option<RowSpan>,
        message: String,
    },
    #[error("promotion of {staging} to \"{schema}\".\"{target}\" failed: {kind}: {message}")]
    Promotion {
        staging: String,
        schema: String,
        target: String,
        kind: PromotionFailure,
        message: String,
    },
    #[error("merge of {staging} into \"{schema}\".\"{target}\" failed: {message}")]
    Merge {
        staging: String,
        schema: String,
        target: String,
        message: String,
    },
}

/// Zero-based range of record indices covered by one failed bulk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSpan {
    pub first: usize,
    pub last: usize,
}

fn row_suffix(row: &Option<RowSpan>) -> String {
    match row {
        Some(span) if span.first == span.last => format!(" (record {})", span.first),
        Some(span) => format!(" (records {}..={})", span.first, span.last),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionFailure {
    NamingConflict,
    StaleHandle,
    Store,
}

impl std::fmt::Display for PromotionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PromotionFailure::NamingConflict => "destination already exists",
            PromotionFailure::StaleHandle => "staging table not found in this session",
            PromotionFailure::Store => "store rejected the statement",
        };
        f.write_str(label)
    }
}

impl LoadError {
    pub fn is_connection(&self) -> bool {
        matches!(self, LoadError::Connection(_))
    }

    pub fn promotion_failure(&self) -> Option<PromotionFailure> {
        match self {
            LoadError::Promotion { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// A promotion that did not happen. The staging table is untouched and is
/// handed back so the caller can retry under another name or discard it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct PromotionRejected {
    pub staging: StagingTable,
    #[source]
    pub error: LoadError,
}

impl PromotionRejected {
    pub fn into_parts(self) -> (StagingTable, LoadError) {
        (self.staging, self.error)
    }
}
