//! Per-value conversion from SQLite storage classes to target representations.
//!
//! Rules are applied per column in a fixed priority order:
//!
//! 1. a null in a key column fails the row
//! 2. boolean target columns take a fixed token set; anything else is NULL
//! 3. decimal source or numeric target columns become floats; garbage is NULL
//! 4. integer-family source columns become integers; garbage fails the row
//! 5. fixed-width columns are truncated
//! 6. everything else passes through
//!
//! Boolean and numeric checks come first because an integer source column can
//! be boolean or numeric on the target.

use std::collections::BTreeMap;

use crate::core::{Row, SqlValue, TableDescriptor, TargetColumn};
use crate::error::{MigrateError, Result};
use crate::typemap::TypeFamily;

const TRUE_TOKENS: &[&str] = &["1", "true", "True", "TRUE", "t", "T"];
const FALSE_TOKENS: &[&str] = &["0", "false", "False", "FALSE", "f", "F"];

/// How one column is converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPlan {
    pub name: String,
    pub is_key: bool,
    pub source_family: Option<TypeFamily>,
    pub target_boolean: bool,
    pub target_numeric: bool,
    pub max_chars: Option<usize>,
}

/// Converts source rows into target rows for one table.
#[derive(Debug, Clone)]
pub struct RowCoercer {
    table: String,
    plans: Vec<ColumnPlan>,
}

impl RowCoercer {
    /// Plan conversions from the source descriptor and the live target columns.
    ///
    /// `target` must be aligned positionally with `table.columns`.
    pub fn new(
        table: &TableDescriptor,
        target: &[TargetColumn],
        truncations: Option<&BTreeMap<String, usize>>,
    ) -> Result<Self> {
        if target.len() != table.columns.len() {
            return Err(MigrateError::transfer(
                &table.name,
                format!(
                    "{} source columns but {} target columns",
                    table.columns.len(),
                    target.len()
                ),
            ));
        }

        let plans = table
            .columns
            .iter()
            .zip(target)
            .map(|(col, tgt)| ColumnPlan {
                name: col.name.clone(),
                is_key: table.is_key_column(&col.name),
                source_family: TypeFamily::of(&col.source_type),
                target_boolean: tgt.is_boolean(),
                target_numeric: tgt.is_decimal(),
                max_chars: truncations.and_then(|t| t.get(&col.name).copied()),
            })
            .collect();

        Ok(Self {
            table: table.name.clone(),
            plans,
        })
    }

    /// Column plans in row order.
    pub fn plans(&self) -> &[ColumnPlan] {
        &self.plans
    }

    /// Convert one row.
    pub fn coerce(&self, row: Row) -> Result<Row> {
        if row.len() != self.plans.len() {
            return Err(MigrateError::transfer(
                &self.table,
                format!("row has {} values for {} columns", row.len(), self.plans.len()),
            ));
        }
        row.into_iter()
            .zip(&self.plans)
            .map(|(value, plan)| self.coerce_value(value, plan))
            .collect()
    }

    /// Convert every row; the first failure aborts.
    pub fn coerce_all(&self, rows: Vec<Row>) -> Result<Vec<Row>> {
        rows.into_iter().map(|row| self.coerce(row)).collect()
    }

    fn coerce_value(&self, value: SqlValue, plan: &ColumnPlan) -> Result<SqlValue> {
        if plan.is_key && value.is_null() {
            return Err(MigrateError::coercion(
                &self.table,
                &plan.name,
                "primary key column cannot be null",
            ));
        }

        if plan.target_boolean {
            return Ok(to_bool(value));
        }

        if plan.source_family == Some(TypeFamily::Decimal) || plan.target_numeric {
            return Ok(to_float(value));
        }

        if plan.source_family == Some(TypeFamily::Integer) {
            return to_int(value).map_err(|found| {
                MigrateError::coercion(
                    &self.table,
                    &plan.name,
                    format!("cannot convert {} to integer", found),
                )
            });
        }

        if let Some(max) = plan.max_chars {
            return Ok(truncate(value, max));
        }

        Ok(value)
    }
}

fn to_bool(value: SqlValue) -> SqlValue {
    match value {
        SqlValue::Bool(b) => SqlValue::Bool(b),
        SqlValue::I64(1) => SqlValue::Bool(true),
        SqlValue::I64(0) => SqlValue::Bool(false),
        SqlValue::F64(f) if f == 1.0 => SqlValue::Bool(true),
        SqlValue::F64(f) if f == 0.0 => SqlValue::Bool(false),
        SqlValue::Text(ref s) if TRUE_TOKENS.contains(&s.as_str()) => SqlValue::Bool(true),
        SqlValue::Text(ref s) if FALSE_TOKENS.contains(&s.as_str()) => SqlValue::Bool(false),
        _ => SqlValue::Null,
    }
}

fn to_float(value: SqlValue) -> SqlValue {
    let parsed = match value {
        SqlValue::I64(v) => Some(v as f64),
        SqlValue::F64(v) => Some(v),
        SqlValue::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
        SqlValue::Text(ref s) => s.trim().parse::<f64>().ok(),
        SqlValue::Null | SqlValue::Bytes(_) => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .map_or(SqlValue::Null, SqlValue::F64)
}

/// Integer conversion. On failure returns a description of the offending value.
fn to_int(value: SqlValue) -> std::result::Result<SqlValue, String> {
    match value {
        SqlValue::Null => Ok(SqlValue::Null),
        SqlValue::I64(v) => Ok(SqlValue::I64(v)),
        SqlValue::Bool(b) => Ok(SqlValue::I64(i64::from(b))),
        SqlValue::F64(v) if v.is_finite() && v.abs() < 9.2e18 => {
            Ok(SqlValue::I64(v.trunc() as i64))
        }
        SqlValue::F64(v) => Err(format!("real {}", v)),
        SqlValue::Text(s) => s
            .trim()
            .parse::<i64>()
            .map(SqlValue::I64)
            .map_err(|_| format!("text {:?}", s)),
        SqlValue::Bytes(b) => Err(format!("blob of {} bytes", b.len())),
    }
}

fn truncate(value: SqlValue, max_chars: usize) -> SqlValue {
    match value {
        SqlValue::Null => SqlValue::Null,
        SqlValue::Text(s) => SqlValue::Text(take_chars(s, max_chars)),
        other => match other.to_param_text() {
            Some(text) => SqlValue::Text(take_chars(text, max_chars)),
            None => SqlValue::Null,
        },
    }
}

fn take_chars(s: String, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s,
    }
}
