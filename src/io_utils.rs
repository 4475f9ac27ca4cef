//! File access shared by the record readers, schema snapshots and config.
//!
//! - Delimiter resolution: `.tsv` reads tab-separated, everything else
//!   comma-separated, unless overridden.
//! - Input decoding through `encoding_rs`, UTF-8 by default.
//! - `-` as a path means stdin.
//! - YAML documents (configs, schema snapshots) via `serde_yaml`.

use std::{
    fs::{self, File},
    io::{BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};
use serde::{Serialize, de::DeserializeOwned};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    match label {
        Some(value) => Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'")),
        None => Ok(UTF_8),
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match extension(path).as_deref() {
        Some("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

/// Lowercased file extension, if any.
pub fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

pub fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    if is_dash(path) {
        Ok(Box::new(std::io::stdin().lock()))
    } else {
        let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

pub fn open_csv_reader(path: &Path, delimiter: u8) -> Result<csv::Reader<Box<dyn Read>>> {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(false);
    Ok(builder.from_reader(open_input(path)?))
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| {
            let (text, _, had_errors) = encoding.decode(field);
            if had_errors {
                Err(anyhow!("Failed to decode text with encoding {}", encoding.name()))
            } else {
                Ok(text.into_owned())
            }
        })
        .collect()
}

pub fn reader_headers<R: Read>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> Result<Vec<String>> {
    let headers = reader.byte_headers()?.clone();
    decode_record(&headers, encoding)
}

pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("Opening YAML file {path:?}"))?;
    serde_yaml::from_str(&raw).with_context(|| format!("Parsing YAML file {path:?}"))
}

pub fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let serialized = serde_yaml::to_string(value).context("Serializing YAML")?;
    fs::write(path, serialized).with_context(|| format!("Writing YAML file {path:?}"))
}
