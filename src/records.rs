//! Record sources.
//!
//! CSV/TSV rows become records with one text field per header. JSON input
//! (an array of objects, or one object per line) keeps its scalar types and
//! may carry a different field set on every row.

use std::{io::Read, path::Path};

use anyhow::{Context, Result, bail};
use itertools::Itertools;
use encoding_rs::Encoding;
use log::{debug, info};
use serde_json::Value as JsonValue;

use crate::{
    data::{FieldValue, Record},
    io_utils,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    Csv,
    Json,
    JsonLines,
}

impl RecordFormat {
    pub fn detect(path: &Path) -> Self {
        match io_utils::extension(path).as_deref() {
            Some("json") => RecordFormat::Json,
            Some("jsonl") | Some("ndjson") => RecordFormat::JsonLines,
            _ => RecordFormat::Csv,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub format: Option<RecordFormat>,
    pub delimiter: Option<u8>,
    pub encoding: &'static Encoding,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            format: None,
            delimiter: None,
            encoding: encoding_rs::UTF_8,
        }
    }
}

pub fn read_records(path: &Path, options: &SourceOptions) -> Result<Vec<Record>> {
    let format = options.format.unwrap_or_else(|| RecordFormat::detect(path));
    debug!("Reading {:?} as {:?}", path, format);
    let records = match format {
        RecordFormat::Csv => {
            let delimiter = io_utils::resolve_input_delimiter(path, options.delimiter);
            read_csv_records(path, delimiter, options.encoding)?
        }
        RecordFormat::Json | RecordFormat::JsonLines => {
            let mut raw = String::new();
            io_utils::open_input(path)?
                .read_to_string(&mut raw)
                .with_context(|| format!("Reading {path:?}"))?;
            let parsed = if format == RecordFormat::Json {
                parse_json_array(&raw)
            } else {
                parse_json_lines(&raw)
            };
            parsed.with_context(|| format!("Parsing JSON records from {path:?}"))?
        }
    };
    info!("Read {} record(s) from {:?}", records.len(), path);
    Ok(records)
}

pub fn read_csv_records(
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<Vec<Record>> {
    let mut reader = io_utils::open_csv_reader(path, delimiter)?;
    let headers = io_utils::reader_headers(&mut reader, encoding)?;
    let duplicates: Vec<&String> = headers.iter().duplicates().collect();
    if !duplicates.is_empty() {
        bail!(
            "Header row of {:?} repeats column(s): {}",
            path,
            duplicates.iter().join(", ")
        );
    }
    let mut records = Vec::new();
    for (row_idx, record) in reader.byte_records().enumerate() {
        let record =
            record.with_context(|| format!("Reading row {} in {:?}", row_idx + 2, path))?;
        let decoded = io_utils::decode_record(&record, encoding)
            .with_context(|| format!("Decoding row {} in {:?}", row_idx + 2, path))?;
        records.push(
            headers
                .iter()
                .cloned()
                .zip(decoded.into_iter().map(FieldValue::Text))
                .collect(),
        );
    }
    Ok(records)
}

/// Numbers outside `i64` keep their literal text so the store sees every digit.
fn scalar(value: JsonValue, field: &str, row: usize) -> Result<FieldValue> {
    Ok(match value {
        JsonValue::Null => FieldValue::Null,
        JsonValue::Bool(b) => FieldValue::Boolean(b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => FieldValue::Integer(i),
            None => FieldValue::Number(n.to_string()),
        },
        JsonValue::String(s) => FieldValue::Text(s),
        JsonValue::Array(_) | JsonValue::Object(_) => {
            bail!("Record {row} field '{field}': nested values are not supported")
        }
    })
}

fn object_to_record(value: JsonValue, row: usize) -> Result<Record> {
    let JsonValue::Object(map) = value else {
        bail!("Record {row} is not a JSON object");
    };
    map.into_iter()
        .map(|(field, value)| {
            let converted = scalar(value, &field, row)?;
            Ok((field, converted))
        })
        .collect()
}

pub fn parse_json_array(raw: &str) -> Result<Vec<Record>> {
    let value: JsonValue = serde_json::from_str(raw).context("Invalid JSON document")?;
    let JsonValue::Array(items) = value else {
        bail!("Expected a JSON array of objects");
    };
    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| object_to_record(item, idx))
        .collect()
}

pub fn parse_json_lines(raw: &str) -> Result<Vec<Record>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            let value: JsonValue = serde_json::from_str(line)
                .with_context(|| format!("Invalid JSON on line {}", idx + 1))?;
            object_to_record(value, idx)
        })
        .collect()
}
