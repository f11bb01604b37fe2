//! Identifier validation and quoting.
//!
//! SQL identifiers cannot be bound as parameters, so every table and column
//! name that reaches dynamic SQL goes through this module. Names are validated
//! (no null bytes, bounded length) and then quoted for the dialect.
//!
//! PostgreSQL column names are emitted bare when they are plain lowercase
//! identifiers and quoted when they are reserved words or would otherwise be
//! folded or rejected by the parser. The reserved-word check uses the fixed
//! list below, not a guess.

use crate::error::{MigrateError, Result};

/// Maximum identifier length accepted before quoting.
/// PostgreSQL truncates at 63 bytes; anything past 128 is rejected outright.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// PostgreSQL reserved key words (SQL Key Words appendix, "reserved" and
/// "reserved (can be function or type)" entries).
const PG_RESERVED: &[&str] = &[
    "all",
    "analyse",
    "analyze",
    "and",
    "any",
    "array",
    "as",
    "asc",
    "asymmetric",
    "authorization",
    "binary",
    "both",
    "case",
    "cast",
    "check",
    "collate",
    "collation",
    "column",
    "concurrently",
    "constraint",
    "create",
    "cross",
    "current_catalog",
    "current_date",
    "current_role",
    "current_schema",
    "current_time",
    "current_timestamp",
    "current_user",
    "default",
    "deferrable",
    "desc",
    "distinct",
    "do",
    "else",
    "end",
    "except",
    "false",
    "fetch",
    "for",
    "foreign",
    "freeze",
    "from",
    "full",
    "grant",
    "group",
    "having",
    "ilike",
    "in",
    "initially",
    "inner",
    "intersect",
    "into",
    "is",
    "isnull",
    "join",
    "lateral",
    "leading",
    "left",
    "like",
    "limit",
    "localtime",
    "localtimestamp",
    "natural",
    "not",
    "notnull",
    "null",
    "offset",
    "on",
    "only",
    "or",
    "order",
    "outer",
    "overlaps",
    "placing",
    "primary",
    "references",
    "returning",
    "right",
    "select",
    "session_user",
    "similar",
    "some",
    "symmetric",
    "system_user",
    "table",
    "tablesample",
    "then",
    "to",
    "trailing",
    "true",
    "union",
    "unique",
    "user",
    "using",
    "variadic",
    "verbose",
    "when",
    "where",
    "window",
    "with",
];

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes, and
/// identifiers longer than the maximum length.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Whether `name` is a PostgreSQL reserved word (case-insensitive).
pub fn is_pg_reserved(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    PG_RESERVED.binary_search(&lower.as_str()).is_ok()
}

/// Quote a PostgreSQL identifier unconditionally.
///
/// ```ignore
/// assert_eq!(quote_pg("users")?, "\"users\"");
/// assert_eq!(quote_pg("table\"name")?, "\"table\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Render a PostgreSQL identifier, quoting only when required.
///
/// ```ignore
/// assert_eq!(ident_pg("model")?, "model");
/// assert_eq!(ident_pg("group")?, "\"group\"");
/// assert_eq!(ident_pg("createdAt")?, "\"createdAt\"");
/// ```
pub fn ident_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    if is_plain_pg(name) && !is_pg_reserved(name) {
        Ok(name.to_string())
    } else {
        quote_pg(name)
    }
}

/// Qualify a PostgreSQL table name with schema.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

/// Quote a SQLite identifier.
///
/// SQLite accepts standard double-quoted identifiers.
pub fn quote_sqlite(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a string as a SQL literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn is_plain_pg(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$')
}
