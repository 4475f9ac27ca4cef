//! Column reconciliation between a batch of records and a table schema.

use std::collections::{BTreeSet, HashSet};

use log::{debug, warn};
use serde::Serialize;

use crate::{catalog::TableSchema, data::Record};

/// Classification of every field name observed in a batch. The three lists
/// partition the observed names and are sorted lexicographically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub matched_columns: Vec<String>,
    pub ignored_columns: Vec<String>,
    pub missing_columns: Vec<String>,
}

impl ReconciliationReport {
    pub fn is_empty(&self) -> bool {
        self.matched_columns.is_empty()
            && self.ignored_columns.is_empty()
            && self.missing_columns.is_empty()
    }

    pub fn observed_count(&self) -> usize {
        self.matched_columns.len() + self.ignored_columns.len() + self.missing_columns.len()
    }

    /// Matched columns re-ordered by the schema's ordinal positions.
    pub fn matched_in_schema_order(&self, schema: &TableSchema) -> Vec<String> {
        schema
            .valid_columns()
            .iter()
            .filter(|name| self.matched_columns.contains(*name))
            .cloned()
            .collect()
    }
}

/// Union of field names across every record, not just the first.
pub fn observed_fields(records: &[Record]) -> BTreeSet<&str> {
    records
        .iter()
        .flat_map(|record| record.keys().map(String::as_str))
        .collect()
}

pub fn match_columns<S: AsRef<str>>(
    records: &[Record],
    schema: &TableSchema,
    ignore_columns: &[S],
) -> ReconciliationReport {
    if records.is_empty() {
        return ReconciliationReport::default();
    }
    let ignored: HashSet<String> = ignore_columns
        .iter()
        .map(|name| name.as_ref().to_lowercase())
        .collect();

    let mut report = ReconciliationReport::default();
    for name in observed_fields(records) {
        let auto_generated = schema.column(name).is_some_and(|c| c.is_auto_generated);
        if schema.is_valid_column(name) {
            report.matched_columns.push(name.to_string());
        } else if !auto_generated && ignored.contains(&name.to_lowercase()) {
            report.ignored_columns.push(name.to_string());
        } else {
            report.missing_columns.push(name.to_string());
        }
    }

    debug!(
        "Reconciled {} field(s) against {}: matched {:?}, ignored {:?}",
        report.observed_count(),
        schema.qualified_name(),
        report.matched_columns,
        report.ignored_columns
    );
    if !report.missing_columns.is_empty() {
        warn!(
            "{} field(s) have no insertable column in {}: {}",
            report.missing_columns.len(),
            schema.qualified_name(),
            report.missing_columns.join(", ")
        );
    }
    report
}
