//! One load cycle: `SchemaKnown → Reconciled → Staged → Promoted | Aborted`.
//!
//! Each state is its own type and each transition consumes the previous
//! state, so a promoted load cannot be staged into again. A failed
//! transition is the `Aborted` state: the error is returned and, when a
//! staging table already exists, the [`Staged`] value stays with the caller.

use log::{info, warn};
use serde::Serialize;

use crate::{
    catalog::{self, TableSchema},
    config::LoadConfig,
    data::Record,
    error::{LoadError, PromotionRejected},
    matcher::{ReconciliationReport, match_columns},
    progress::ProgressObserver,
    promotion::{self, MergeOutcome, PromotedTable},
    staging::{self, StagingTable},
    store::Store,
};

#[derive(Debug, Clone)]
pub struct SchemaKnown {
    schema: TableSchema,
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    schema: TableSchema,
    report: ReconciliationReport,
    columns: Vec<String>,
}

#[derive(Debug)]
pub struct Staged {
    schema: TableSchema,
    report: ReconciliationReport,
    columns: Vec<String>,
    staging: StagingTable,
}

impl SchemaKnown {
    pub fn inspect<S: Store + ?Sized>(
        store: &mut S,
        table_name: &str,
        schema_name: &str,
    ) -> Result<Self, LoadError> {
        catalog::inspect(store, table_name, schema_name).map(Self::from)
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Aborts when no observed field maps to an insertable column.
    pub fn reconcile<C: AsRef<str>>(
        self,
        records: &[Record],
        ignore_columns: &[C],
    ) -> Result<Reconciled, LoadError> {
        let report = match_columns(records, &self.schema, ignore_columns);
        if report.matched_columns.is_empty() {
            let message = if records.is_empty() {
                "no records to load".to_string()
            } else {
                format!(
                    "none of the {} observed field(s) match an insertable column",
                    report.observed_count()
                )
            };
            return Err(LoadError::Reconciliation {
                table: self.schema.qualified_name(),
                message,
            });
        }
        let columns = report.matched_in_schema_order(&self.schema);
        Ok(Reconciled {
            schema: self.schema,
            report,
            columns,
        })
    }
}

impl From<TableSchema> for SchemaKnown {
    fn from(schema: TableSchema) -> Self {
        Self { schema }
    }
}

impl Reconciled {
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn report(&self) -> &ReconciliationReport {
        &self.report
    }

    /// Matched columns in the table's ordinal order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn stage<S: Store + ?Sized>(self, store: &mut S) -> Result<Staged, LoadError> {
        let staging = staging::create_staging(store, &self.schema, &self.columns)?;
        Ok(Staged {
            schema: self.schema,
            report: self.report,
            columns: self.columns,
            staging,
        })
    }
}

impl Staged {
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn report(&self) -> &ReconciliationReport {
        &self.report
    }

    pub fn staging(&self) -> &StagingTable {
        &self.staging
    }

    pub fn load<S: Store + ?Sized>(
        &mut self,
        store: &mut S,
        records: &[Record],
        show_progress: bool,
        observer: &mut dyn ProgressObserver,
    ) -> Result<u64, LoadError> {
        staging::load(
            store,
            &mut self.staging,
            records,
            &self.columns,
            show_progress,
            observer,
        )
    }

    pub fn merge<S: Store + ?Sized>(&self, store: &mut S) -> Result<MergeOutcome, LoadError> {
        promotion::merge(store, &self.staging, &self.schema)
    }

    pub fn promote<S: Store + ?Sized>(
        self,
        store: &mut S,
        target_name: &str,
        target_schema: &str,
    ) -> Result<PromotedTable, PromotionRejected> {
        promotion::promote(store, self.staging, target_name, target_schema)
    }

    pub fn discard<S: Store + ?Sized>(self, store: &mut S) -> Result<(), LoadError> {
        staging::discard(store, self.staging)
    }
}

/// What to do with staged rows once loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadPlan {
    pub merge: bool,
    /// `(table, schema)` to promote the staging table to.
    pub promote_to: Option<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub table: String,
    pub report: ReconciliationReport,
    pub staging_table: String,
    pub rows_loaded: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promoted_to: Option<String>,
}

/// Runs a full cycle against `schema`. Staging tables left behind by a
/// failure are session-scoped and disappear with the connection.
pub fn run_cycle<S: Store + ?Sized>(
    store: &mut S,
    schema: TableSchema,
    config: &LoadConfig,
    records: &[Record],
    plan: &LoadPlan,
    observer: &mut dyn ProgressObserver,
) -> Result<LoadSummary, LoadError> {
    let reconciled = SchemaKnown::from(schema).reconcile(records, &config.ignore_columns)?;
    info!(
        "Matched {} column(s) for {}: {}",
        reconciled.columns().len(),
        reconciled.schema().qualified_name(),
        reconciled.columns().join(", ")
    );
    let mut staged = reconciled.stage(store)?;
    let rows_loaded = staged
        .load(store, records, config.show_progress, observer)
        .inspect_err(|_| {
            warn!(
                "Load aborted; {} row(s) remain in {}",
                staged.staging().rows_loaded(),
                staged.staging().name()
            );
        })?;

    let merge = if plan.merge {
        Some(staged.merge(store)?)
    } else {
        None
    };

    let mut summary = LoadSummary {
        table: staged.schema().qualified_name(),
        report: staged.report().clone(),
        staging_table: staged.staging().name().to_string(),
        rows_loaded,
        merge,
        promoted_to: None,
    };
    if let Some((target, target_schema)) = &plan.promote_to {
        let promoted = staged
            .promote(store, target, target_schema)
            .map_err(|rejected| rejected.error)?;
        summary.promoted_to = Some(promoted.qualified_name());
    }
    Ok(summary)
}
