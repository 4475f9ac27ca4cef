use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tokens that stand for a missing value in loosely-typed input. Compared
/// after trimming, ignoring ASCII case.
pub const NULL_TOKENS: &[&str] = &["", "null", "nan", "na", "none", "-"];

/// A scalar field value as supplied by a record source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// Numeric literal kept in its source spelling, for values that would
    /// lose digits as `i64` or `f64`.
    Number(String),
}

/// One input row: field name to value. Field sets may differ between rows.
pub type Record = BTreeMap<String, FieldValue>;

impl FieldValue {
    /// Text form handed to the store for its own type coercion.
    pub fn as_display(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Boolean(b) => Some(b.to_string()),
            FieldValue::Integer(i) => Some(i.to_string()),
            FieldValue::Float(f) => Some(f.to_string()),
            FieldValue::Text(s) | FieldValue::Number(s) => Some(s.clone()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

pub fn is_null_token(value: &str) -> bool {
    let trimmed = value.trim();
    NULL_TOKENS
        .iter()
        .any(|token| trimmed.eq_ignore_ascii_case(token))
}

/// Maps a field value to the text written into the staging table, or `None`
/// for SQL NULL. Non-token values pass through untrimmed.
pub fn normalize_value(value: &FieldValue) -> Option<String> {
    let text = value.as_display()?;
    if is_null_token(&text) { None } else { Some(text) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_tokens_normalize_in_any_case() {
        for token in ["", "null", "NaN", "NA", "none", "-", "NULL", " None ", "  "] {
            assert_eq!(normalize_value(&FieldValue::from(token)), None, "{token:?}");
        }
    }

    #[test]
    fn ordinary_values_pass_through_unchanged() {
        assert_eq!(normalize_value(&FieldValue::from("0")), Some("0".to_string()));
        assert_eq!(
            normalize_value(&FieldValue::from("N/A ")),
            Some("N/A ".to_string())
        );
        assert_eq!(
            normalize_value(&FieldValue::from(" 25.50")),
            Some(" 25.50".to_string())
        );
        assert_eq!(normalize_value(&FieldValue::from("--")), Some("--".to_string()));
    }

    #[test]
    fn sql_null_stays_null() {
        assert_eq!(normalize_value(&FieldValue::Null), None);
    }

    #[test]
    fn scalars_render_as_text() {
        assert_eq!(normalize_value(&FieldValue::Float(10.5)), Some("10.5".to_string()));
        assert_eq!(normalize_value(&FieldValue::Integer(1000)), Some("1000".to_string()));
        assert_eq!(normalize_value(&FieldValue::Boolean(true)), Some("true".to_string()));
        assert_eq!(normalize_value(&FieldValue::Float(f64::NAN)), None);
        assert_eq!(
            normalize_value(&FieldValue::Number("18446744073709551615".to_string())),
            Some("18446744073709551615".to_string())
        );
    }
}
