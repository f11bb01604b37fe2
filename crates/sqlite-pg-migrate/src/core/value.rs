//! Row values moved between the two engines.
//!
//! SQLite hands back one of five storage classes per cell regardless of the
//! declared column type, so values are read as [`SqlValue`] with the storage
//! class as the variant. Coercion then narrows them to what the target column
//! accepts (booleans, fixed-precision numbers, bounded strings).

/// One cell of a row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    /// Boolean. Never produced by SQLite directly; only by coercion.
    Bool(bool),

    /// 64-bit signed integer (SQLite INTEGER storage class).
    I64(i64),

    /// 64-bit float (SQLite REAL storage class).
    F64(f64),

    /// Text (SQLite TEXT storage class).
    Text(String),

    /// Binary data (SQLite BLOB storage class).
    Bytes(Vec<u8>),
}

/// A row aligned positionally to its table's column order.
pub type Row = Vec<SqlValue>;

impl SqlValue {
    /// Check if this value is NULL.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "boolean",
            SqlValue::I64(_) => "integer",
            SqlValue::F64(_) => "real",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "blob",
        }
    }

    /// Text rendering bound as a `text` parameter and cast server-side to the
    /// column's type. `None` binds SQL NULL.
    pub fn to_param_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(v) => Some(if *v { "true" } else { "false" }.to_string()),
            SqlValue::I64(v) => Some(v.to_string()),
            SqlValue::F64(v) => Some(v.to_string()),
            SqlValue::Text(v) => Some(v.clone()),
            SqlValue::Bytes(v) => Some(format!("\\x{}", hex::encode(v))),
        }
    }
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(SqlValue::Null, SqlValue::Text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_text() {
        assert_eq!(SqlValue::Null.to_param_text(), None);
        assert_eq!(SqlValue::Bool(true).to_param_text().as_deref(), Some("true"));
        assert_eq!(SqlValue::Bool(false).to_param_text().as_deref(), Some("false"));
        assert_eq!(SqlValue::I64(-42).to_param_text().as_deref(), Some("-42"));
        assert_eq!(
            SqlValue::F64(99_999_999.99).to_param_text().as_deref(),
            Some("99999999.99")
        );
        assert_eq!(
            SqlValue::Bytes(vec![0xde, 0xad]).to_param_text().as_deref(),
            Some("\\xdead")
        );
    }

    #[test]
    fn test_from_option() {
        assert!(SqlValue::from(None).is_null());
        assert_eq!(
            SqlValue::from(Some("x".to_string())),
            SqlValue::Text("x".to_string())
        );
    }
}
