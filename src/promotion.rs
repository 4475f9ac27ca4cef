//! Turning a staging table into durable data.
//!
//! [`promote`] consumes a [`StagingTable`] and creates a new, independently
//! named table from it. [`merge`] upserts staged rows into the introspected
//! target table and leaves the staging table in place.

use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    catalog::{TableSchema, UniqueConstraint, ensure_identifier},
    error::{LoadError, PromotionFailure, PromotionRejected},
    staging::{StagedColumn, StagingTable},
    store::{Store, StoreError, qualified_name, quote_ident},
};

/// A durable table created by [`promote`]. Owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotedTable {
    pub schema_name: String,
    pub table_name: String,
    pub columns: Vec<StagedColumn>,
    pub row_count: u64,
}

impl PromotedTable {
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.schema_name, &self.table_name)
    }
}

fn rejected(
    staging: StagingTable,
    target_schema: &str,
    target_name: &str,
    kind: PromotionFailure,
    message: impl Into<String>,
) -> PromotionRejected {
    let error = LoadError::Promotion {
        staging: staging.name().to_string(),
        schema: target_schema.to_string(),
        target: target_name.to_string(),
        kind,
        message: message.into(),
    };
    PromotionRejected { staging, error }
}

fn classify(err: &StoreError) -> PromotionFailure {
    if err.is_duplicate_table() || err.is_catalog_name_collision() {
        PromotionFailure::NamingConflict
    } else if err.is_undefined_table() {
        PromotionFailure::StaleHandle
    } else {
        PromotionFailure::Store
    }
}

fn staging_exists<S: Store + ?Sized>(
    store: &mut S,
    staging: &StagingTable,
) -> Result<bool, StoreError> {
    let reference = staging.qualified_name();
    let rows = store.query("SELECT to_regclass($1::text)::text", &[Some(reference.as_str())])?;
    Ok(rows
        .into_iter()
        .next()
        .and_then(|row| row.into_iter().next().flatten())
        .is_some())
}

pub fn promote<S: Store + ?Sized>(
    store: &mut S,
    staging: StagingTable,
    target_name: &str,
    target_schema: &str,
) -> Result<PromotedTable, PromotionRejected> {
    if let Err(error) = ensure_identifier(target_name).and(ensure_identifier(target_schema)) {
        return Err(PromotionRejected { staging, error });
    }

    let session = match store.session_id() {
        Ok(session) => session,
        Err(err) => {
            let error = LoadError::Connection(err.message);
            return Err(PromotionRejected { staging, error });
        }
    };
    if session != staging.session() {
        let message = format!(
            "created in session {} but promoted from session {session}",
            staging.session()
        );
        return Err(rejected(
            staging,
            target_schema,
            target_name,
            PromotionFailure::StaleHandle,
            message,
        ));
    }
    match staging_exists(store, &staging) {
        Ok(true) => {}
        Ok(false) => {
            return Err(rejected(
                staging,
                target_schema,
                target_name,
                PromotionFailure::StaleHandle,
                "staging table no longer exists",
            ));
        }
        Err(err) if err.is_connection() => {
            let error = LoadError::Connection(err.message);
            return Err(PromotionRejected { staging, error });
        }
        Err(err) => {
            let kind = classify(&err);
            return Err(rejected(staging, target_schema, target_name, kind, err.message));
        }
    }

    let destination = qualified_name(target_schema, target_name);
    let sql = format!(
        "CREATE TABLE {destination} AS TABLE {}",
        staging.qualified_name()
    );
    debug!("{sql}");
    let row_count = match store.execute(&sql, &[]) {
        Ok(count) => count,
        Err(err) if err.is_connection() => {
            let error = LoadError::Connection(err.message);
            return Err(PromotionRejected { staging, error });
        }
        Err(err) => {
            let kind = classify(&err);
            return Err(rejected(staging, target_schema, target_name, kind, err.message));
        }
    };

    let drop_sql = format!("DROP TABLE {}", staging.qualified_name());
    if let Err(err) = store.execute(&drop_sql, &[]) {
        warn!(
            "Promoted {} but could not drop staging table {}: {}",
            destination,
            staging.name(),
            err
        );
    }
    info!(
        "Promoted staging table {} to {destination} ({row_count} row(s))",
        staging.name()
    );
    Ok(PromotedTable {
        schema_name: target_schema.to_string(),
        table_name: target_name.to_string(),
        columns: staging.into_columns(),
        row_count,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub rows_affected: u64,
    /// Constraint used as the `ON CONFLICT` target, if any.
    pub conflict_constraint: Option<String>,
}

/// Picks the `ON CONFLICT` target: the primary key when every one of its
/// columns is staged, else the first fully staged unique constraint by name.
pub fn conflict_target<'a>(
    schema: &'a TableSchema,
    staged_columns: &[&str],
) -> Option<&'a UniqueConstraint> {
    let covered = |uc: &&UniqueConstraint| {
        uc.columns
            .iter()
            .all(|c| staged_columns.contains(&c.as_str()))
    };
    schema
        .primary_key()
        .filter(covered)
        .or_else(|| {
            schema
                .unique_constraints()
                .iter()
                .filter(|uc| !uc.is_primary)
                .find(covered)
        })
}

pub fn merge_statement(schema: &TableSchema, staging: &StagingTable) -> (String, Option<String>) {
    let staged = staging.column_names();
    let column_list = staged
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "INSERT INTO {} ({column_list}) SELECT {column_list} FROM {}",
        schema.qualified_name(),
        staging.qualified_name()
    );
    let target = conflict_target(schema, &staged);
    if let Some(constraint) = target {
        let keys = constraint
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let updates = staged
            .iter()
            .filter(|c| !constraint.columns.iter().any(|k| k == **c))
            .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
            .collect::<Vec<_>>();
        if updates.is_empty() {
            sql.push_str(&format!(" ON CONFLICT ({keys}) DO NOTHING"));
        } else {
            sql.push_str(&format!(
                " ON CONFLICT ({keys}) DO UPDATE SET {}",
                updates.join(", ")
            ));
        }
    }
    (sql, target.map(|uc| uc.name.clone()))
}

pub fn merge<S: Store + ?Sized>(
    store: &mut S,
    staging: &StagingTable,
    schema: &TableSchema,
) -> Result<MergeOutcome, LoadError> {
    let merge_error = |message: String| LoadError::Merge {
        staging: staging.name().to_string(),
        schema: schema.schema_name().to_string(),
        target: schema.table_name().to_string(),
        message,
    };
    if let Some(column) = staging
        .columns()
        .iter()
        .find(|c| !schema.is_valid_column(&c.name))
    {
        return Err(merge_error(format!(
            "staged column '{}' is not insertable in {}",
            column.name,
            schema.qualified_name()
        )));
    }

    let (sql, conflict_constraint) = merge_statement(schema, staging);
    if conflict_constraint.is_none() {
        warn!(
            "No primary key or unique constraint of {} is fully staged; merging without conflict handling",
            schema.qualified_name()
        );
    }
    debug!("{sql}");
    let rows_affected = store.execute(&sql, &[]).map_err(|err| {
        if err.is_connection() {
            LoadError::Connection(err.message)
        } else {
            merge_error(err.message)
        }
    })?;
    info!(
        "Merged {rows_affected} row(s) from {} into {}",
        staging.name(),
        schema.qualified_name()
    );
    Ok(MergeOutcome {
        rows_affected,
        conflict_constraint,
    })
}
