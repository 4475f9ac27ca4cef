use std::fmt::Write as _;

use itertools::Itertools;

use crate::{catalog::TableSchema, matcher::ReconciliationReport};

fn cell_width(value: &str) -> usize {
    value.chars().count()
}

fn flatten(value: &str) -> String {
    value.replace(['\n', '\r', '\t'], " ")
}

fn format_line(cells: &[&str], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .join("  ")
        .trim_end()
        .to_string()
}

/// Left-aligned columns separated by two spaces, with a dashed rule under
/// the header.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(|cell| flatten(cell)).collect())
        .collect();
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            rows.iter()
                .filter_map(|row| row.get(idx))
                .map(|cell| cell_width(cell))
                .fold(cell_width(header).max(3), usize::max)
        })
        .collect();

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_line(headers, &widths));
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let rule: Vec<&str> = rule.iter().map(String::as_str).collect();
    let _ = writeln!(output, "{}", format_line(&rule, &widths));
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        let _ = writeln!(output, "{}", format_line(&cells, &widths));
    }
    output
}

pub fn render_schema(schema: &TableSchema) -> String {
    let rows: Vec<Vec<String>> = schema
        .columns()
        .iter()
        .map(|column| {
            let key = schema
                .unique_constraints()
                .iter()
                .filter(|uc| uc.columns.contains(&column.name))
                .map(|uc| if uc.is_primary { "PK" } else { "UQ" })
                .unique()
                .join(",");
            vec![
                column.ordinal_position.to_string(),
                column.name.clone(),
                column.declared_type.clone(),
                if column.nullable { "yes" } else { "no" }.to_string(),
                if column.is_auto_generated { "auto" } else { "" }.to_string(),
                key,
                column.default_expression.clone().unwrap_or_default(),
            ]
        })
        .collect();
    render_table(
        &["#", "column", "type", "null", "gen", "key", "default"],
        &rows,
    )
}

pub fn render_report(report: &ReconciliationReport) -> String {
    let rows: Vec<Vec<String>> = [
        ("matched", &report.matched_columns),
        ("ignored", &report.ignored_columns),
        ("missing", &report.missing_columns),
    ]
    .into_iter()
    .flat_map(|(status, names)| {
        names
            .iter()
            .map(move |name| vec![name.clone(), status.to_string()])
    })
    .collect();
    render_table(&["field", "status"], &rows)
}
