//! Core types shared by every migration component.
//!
//! - [`identifier`]: identifier validation and dialect quoting
//! - [`schema`]: source and target table metadata
//! - [`value`]: row values

pub mod identifier;
pub mod schema;
pub mod value;

pub use schema::{
    ColumnDef, ColumnDescriptor, CreateTable, SequenceBinding, TableDescriptor, TargetColumn,
};
pub use value::{Row, SqlValue};
