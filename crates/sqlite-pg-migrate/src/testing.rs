//! In-memory target used by unit tests.
//!
//! Transactions work on a snapshot of the table map; commit swaps it in and
//! rollback (or drop) discards it, so atomicity is observable from tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::{CreateTable, Row, SequenceBinding, SqlValue, TargetColumn};
use crate::error::{MigrateError, Result};
use crate::target::{TargetPool, TargetTransaction};

#[derive(Debug, Clone, Default)]
struct FakeTable {
    columns: Vec<TargetColumn>,
    rows: Vec<Row>,
    create: Option<CreateTable>,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, FakeTable>,
    fail_create: BTreeSet<String>,
    fail_insert: BTreeSet<String>,
    fail_sequence: BTreeSet<String>,
    extra_bindings: Vec<SequenceBinding>,
    sequences: BTreeMap<(String, String), i64>,
}

/// Target pool backed by a shared map of tables.
#[derive(Debug, Clone, Default)]
pub struct FakeTarget {
    state: Arc<Mutex<State>>,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a committed table.
    pub fn with_table(self, name: &str, columns: Vec<TargetColumn>, rows: Vec<Row>) -> Self {
        self.state.lock().unwrap().tables.insert(
            name.to_string(),
            FakeTable {
                columns,
                rows,
                create: None,
            },
        );
        self
    }

    pub fn fail_create(&self, table: &str) {
        self.state.lock().unwrap().fail_create.insert(table.to_string());
    }

    pub fn fail_insert(&self, table: &str) {
        self.state.lock().unwrap().fail_insert.insert(table.to_string());
    }

    pub fn fail_sequence(&self, table: &str) {
        self.state.lock().unwrap().fail_sequence.insert(table.to_string());
    }

    pub fn add_binding(&self, binding: SequenceBinding) {
        self.state.lock().unwrap().extra_bindings.push(binding);
    }

    /// Committed CREATE for a table, if it exists and was created by DDL.
    pub fn created(&self, table: &str) -> Option<CreateTable> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .and_then(|t| t.create.clone())
    }

    /// Committed rows of a table.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Committed column types of a table.
    pub fn live_columns(&self, table: &str) -> Vec<TargetColumn> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default()
    }

    /// Last value set on a column's sequence.
    pub fn next_value(&self, table: &str, column: &str) -> Option<i64> {
        self.state
            .lock()
            .unwrap()
            .sequences
            .get(&(table.to_string(), column.to_string()))
            .copied()
    }
}

/// `information_schema` names for a declared target type.
pub fn live_type(declared: &str) -> (String, String) {
    let upper = declared.to_ascii_uppercase();
    let keyword = upper.split('(').next().unwrap_or_default().trim();
    let (data_type, udt) = match keyword {
        "BIGINT" | "BIGSERIAL" => ("bigint", "int8"),
        "INTEGER" | "SERIAL" => ("integer", "int4"),
        "BOOLEAN" => ("boolean", "bool"),
        "NUMERIC" => ("numeric", "numeric"),
        "REAL" => ("real", "float4"),
        "DOUBLE PRECISION" => ("double precision", "float8"),
        "VARCHAR" => ("character varying", "varchar"),
        "TIMESTAMP WITH TIME ZONE" => ("timestamp with time zone", "timestamptz"),
        "DATE" => ("date", "date"),
        "TIME" => ("time without time zone", "time"),
        "BYTEA" => ("bytea", "bytea"),
        "JSONB" => ("jsonb", "jsonb"),
        _ => ("text", "text"),
    };
    (data_type.to_string(), udt.to_string())
}

/// Shorthand for a live column.
pub fn column(name: &str, declared: &str) -> TargetColumn {
    let (data_type, udt_name) = live_type(declared);
    TargetColumn {
        name: name.to_string(),
        data_type,
        udt_name,
    }
}

/// Value as the fake "stores" it: what the server would do with the text cast.
fn store(value: &SqlValue, column: &TargetColumn) -> Result<SqlValue> {
    let Some(text) = value.to_param_text() else {
        return Ok(SqlValue::Null);
    };
    let bad = || MigrateError::transfer("fake", format!("invalid input for {}: {}", column.data_type, text));
    Ok(match column.data_type.as_str() {
        "bigint" | "integer" => SqlValue::I64(text.parse().map_err(|_| bad())?),
        "boolean" => match text.as_str() {
            "true" => SqlValue::Bool(true),
            "false" => SqlValue::Bool(false),
            _ => return Err(bad()),
        },
        "numeric" | "real" | "double precision" => SqlValue::F64(text.parse().map_err(|_| bad())?),
        _ => value.clone(),
    })
}

#[async_trait]
impl TargetPool for FakeTarget {
    fn schema(&self) -> &str {
        "public"
    }

    async fn begin(&self) -> Result<Box<dyn TargetTransaction>> {
        let staged = self.state.lock().unwrap().tables.clone();
        Ok(Box::new(FakeTransaction {
            state: Arc::clone(&self.state),
            staged,
        }))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().tables.contains_key(table))
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().tables.keys().cloned().collect())
    }

    async fn column_types(&self, table: &str) -> Result<Vec<TargetColumn>> {
        Ok(self.live_columns(table))
    }

    async fn read_table(&self, table: &str, columns: &[TargetColumn]) -> Result<Vec<Row>> {
        let state = self.state.lock().unwrap();
        let Some(t) = state.tables.get(table) else {
            return Err(MigrateError::transfer(table, "relation does not exist"));
        };
        let positions: Vec<usize> = columns
            .iter()
            .filter_map(|c| t.columns.iter().position(|live| live.name == c.name))
            .collect();
        Ok(t.rows
            .iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|&i| SqlValue::from(row[i].to_param_text()))
                    .collect()
            })
            .collect())
    }

    async fn sequence_bindings(&self) -> Result<Vec<SequenceBinding>> {
        let state = self.state.lock().unwrap();
        let mut bindings: Vec<SequenceBinding> = state
            .tables
            .iter()
            .filter_map(|(name, t)| t.create.as_ref().map(|c| (name, c)))
            .flat_map(|(name, create)| {
                create
                    .columns
                    .iter()
                    .filter(|c| c.data_type == "BIGSERIAL")
                    .map(move |c| SequenceBinding {
                        table: name.clone(),
                        column: c.name.clone(),
                        default_expr: format!("nextval('{}_{}_seq'::regclass)", name, c.name),
                    })
            })
            .collect();
        bindings.extend(state.extra_bindings.iter().cloned());
        Ok(bindings)
    }

    async fn sync_sequence(&self, binding: &SequenceBinding) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sequence.contains(&binding.table) {
            return Err(MigrateError::transfer(&binding.table, "sequence does not exist"));
        }
        let Some(t) = state.tables.get(&binding.table) else {
            return Err(MigrateError::transfer(&binding.table, "relation does not exist"));
        };
        let idx = t
            .columns
            .iter()
            .position(|c| c.name == binding.column)
            .ok_or_else(|| MigrateError::transfer(&binding.table, "column does not exist"))?;
        let max = t
            .rows
            .iter()
            .filter_map(|r| match r[idx] {
                SqlValue::I64(v) => Some(v),
                _ => None,
            })
            .max()
            .unwrap_or(0)
            .max(0);
        let next = max + 1;
        state
            .sequences
            .insert((binding.table.clone(), binding.column.clone()), next);
        Ok(next)
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "fake"
    }

    async fn close(&self) {}
}

struct FakeTransaction {
    state: Arc<Mutex<State>>,
    staged: BTreeMap<String, FakeTable>,
}

impl FakeTransaction {
    fn table_mut(&mut self, table: &str) -> Result<&mut FakeTable> {
        self.staged
            .get_mut(table)
            .ok_or_else(|| MigrateError::transfer(table, "relation does not exist"))
    }
}

#[async_trait]
impl TargetTransaction for FakeTransaction {
    async fn drop_table(&mut self, table: &str) -> Result<()> {
        self.staged.remove(table);
        Ok(())
    }

    async fn create_table(&mut self, create: &CreateTable) -> Result<()> {
        if self.state.lock().unwrap().fail_create.contains(&create.table) {
            return Err(MigrateError::transfer(&create.table, "syntax error in CREATE TABLE"));
        }
        if self.staged.contains_key(&create.table) {
            return Err(MigrateError::transfer(&create.table, "relation already exists"));
        }
        let columns = create
            .columns
            .iter()
            .map(|c| column(&c.name, &c.data_type))
            .collect();
        self.staged.insert(
            create.table.clone(),
            FakeTable {
                columns,
                rows: Vec::new(),
                create: Some(create.clone()),
            },
        );
        Ok(())
    }

    async fn truncate_table(&mut self, table: &str) -> Result<()> {
        self.table_mut(table)?.rows.clear();
        Ok(())
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        Ok(self.staged.contains_key(table))
    }

    async fn column_types(&mut self, table: &str) -> Result<Vec<TargetColumn>> {
        Ok(self
            .staged
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn insert_rows(
        &mut self,
        table: &str,
        columns: &[TargetColumn],
        rows: &[Row],
    ) -> Result<u64> {
        if self.state.lock().unwrap().fail_insert.contains(table) {
            return Err(MigrateError::transfer(table, "value violates a constraint"));
        }
        let target = self.table_mut(table)?;
        let positions: Vec<usize> = columns
            .iter()
            .map(|c| {
                target
                    .columns
                    .iter()
                    .position(|live| live.name == c.name)
                    .ok_or_else(|| MigrateError::transfer(table, format!("column {} does not exist", c.name)))
            })
            .collect::<Result<_>>()?;

        for row in rows {
            let mut stored = vec![SqlValue::Null; target.columns.len()];
            for (value, &pos) in row.iter().zip(&positions) {
                stored[pos] = store(value, &target.columns[pos])?;
            }
            target.rows.push(stored);
        }
        Ok(rows.len() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.state.lock().unwrap().tables = self.staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
