//! Schema metadata on both sides of a migration.
//!
//! Source metadata ([`ColumnDescriptor`], [`TableDescriptor`]) is re-read from
//! SQLite on every run. Target metadata ([`TargetColumn`], [`SequenceBinding`])
//! is read from PostgreSQL after structure or data have been written.

use serde::{Deserialize, Serialize};

use super::identifier::{ident_pg, qualify_pg};
use crate::error::Result;

/// One source column as declared in SQLite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Owning table.
    pub table: String,

    /// Column name.
    pub name: String,

    /// Declared type, free-form (may be empty in SQLite).
    pub source_type: String,

    /// Whether the column allows NULL.
    pub nullable: bool,

    /// Raw default literal as stored in the schema.
    pub default: Option<String>,

    /// 1-based position within the primary key, if the column is part of it.
    pub pk_position: Option<u32>,
}

impl ColumnDescriptor {
    /// Whether the source flags this column as (part of) the primary key.
    pub fn is_primary_key(&self) -> bool {
        self.pk_position.is_some()
    }
}

/// A source table with its columns and key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name.
    pub name: String,

    /// Columns in declaration order.
    pub columns: Vec<ColumnDescriptor>,

    /// Key columns flagged in the source, in key order.
    pub derived_primary_key: Vec<String>,

    /// Hand-specified key replacing the derived one.
    pub structural_override: Option<Vec<String>>,
}

impl TableDescriptor {
    /// Build a descriptor, deriving the key from the columns' key positions.
    pub fn new(
        name: impl Into<String>,
        columns: Vec<ColumnDescriptor>,
        structural_override: Option<Vec<String>>,
    ) -> Self {
        let mut keyed: Vec<&ColumnDescriptor> =
            columns.iter().filter(|c| c.is_primary_key()).collect();
        keyed.sort_by_key(|c| c.pk_position);
        let derived_primary_key = keyed.into_iter().map(|c| c.name.clone()).collect();

        Self {
            name: name.into(),
            columns,
            derived_primary_key,
            structural_override,
        }
    }

    /// Key used for the target table and for null-key checks.
    pub fn primary_key(&self) -> &[String] {
        self.structural_override
            .as_deref()
            .unwrap_or(&self.derived_primary_key)
    }

    /// Whether `column` belongs to the effective primary key.
    pub fn is_key_column(&self, column: &str) -> bool {
        self.primary_key().iter().any(|k| k == column)
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// One column of a target CREATE TABLE statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    /// Rendered clause, e.g. `DEFAULT TRUE`.
    pub default_clause: Option<String>,
}

/// A target table (re)creation statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTable {
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
}

impl CreateTable {
    /// Render the CREATE TABLE statement.
    pub fn to_sql(&self) -> Result<String> {
        let mut parts = Vec::with_capacity(self.columns.len() + 1);
        for col in &self.columns {
            let mut def = format!("{} {}", ident_pg(&col.name)?, col.data_type);
            if let Some(default) = &col.default_clause {
                def.push(' ');
                def.push_str(default);
            }
            if col.not_null {
                def.push_str(" NOT NULL");
            }
            parts.push(def);
        }

        if !self.primary_key.is_empty() {
            let keys = self
                .primary_key
                .iter()
                .map(|k| ident_pg(k))
                .collect::<Result<Vec<_>>>()?;
            parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
        }

        Ok(format!(
            "CREATE TABLE {} (\n    {}\n)",
            qualify_pg(&self.schema, &self.table)?,
            parts.join(",\n    ")
        ))
    }
}

/// A live target column as reported by `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetColumn {
    pub name: String,
    /// `data_type`, e.g. `boolean`, `numeric`, `character varying`.
    pub data_type: String,
    /// `udt_name`, e.g. `bool`, `numeric`, `varchar`, `_int4`.
    pub udt_name: String,
}

impl TargetColumn {
    /// Type name usable in a `::cast`.
    pub fn cast_type(&self) -> String {
        match self.data_type.as_str() {
            "USER-DEFINED" => format!("\"{}\"", self.udt_name.replace('"', "\"\"")),
            "ARRAY" => format!("{}[]", self.udt_name.trim_start_matches('_')),
            other => other.to_string(),
        }
    }

    /// Whether the live column is boolean.
    pub fn is_boolean(&self) -> bool {
        self.data_type == "boolean"
    }

    /// Whether the live column is an exact or approximate numeric (not integer).
    pub fn is_decimal(&self) -> bool {
        matches!(
            self.data_type.as_str(),
            "numeric" | "real" | "double precision"
        )
    }
}

/// A target column whose default draws from a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceBinding {
    pub table: String,
    pub column: String,
    /// Current default expression, e.g. `nextval('users_id_seq'::regclass)`.
    pub default_expr: String,
}

impl SequenceBinding {
    /// Whether a default expression draws from a sequence.
    pub fn is_sequence_default(expr: &str) -> bool {
        expr.trim_start().to_ascii_lowercase().starts_with("nextval(")
    }

    /// Sequence named in the default expression, quoting preserved.
    pub fn sequence_name(&self) -> Option<&str> {
        let start = self.default_expr.find('\'')? + 1;
        let len = self.default_expr[start..].find('\'')?;
        Some(&self.default_expr[start..start + len])
    }
}
