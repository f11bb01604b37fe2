//! Copies between PostgreSQL profiles, and from PostgreSQL back to SQLite.
//!
//! Both directions replace each destination table's rows inside one
//! transaction. Source values are read as text and cast by the destination,
//! so the copy does not depend on the two sides agreeing on types.

use std::fmt;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Profile;
use crate::core::{Row, SqlValue, TargetColumn};
use crate::error::{MigrateError, Result};
use crate::report::{MigrationReport, TableReport, TableStatus};
use crate::source::SqliteSource;
use crate::target::{TargetPool, TargetTransaction};

/// Which profile is copied onto which.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    CloudToLocal,
    LocalToCloud,
}

impl SyncDirection {
    /// (from, to) profiles.
    pub fn profiles(self) -> (Profile, Profile) {
        match self {
            SyncDirection::CloudToLocal => (Profile::Cloud, Profile::Local),
            SyncDirection::LocalToCloud => (Profile::Local, Profile::Cloud),
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (from, to) = self.profiles();
        write!(f, "{}-to-{}", from, to)
    }
}

/// Replaces every table of one PostgreSQL database with another's rows.
pub struct PgSync<'a> {
    source: &'a dyn TargetPool,
    destination: &'a dyn TargetPool,
}

impl<'a> PgSync<'a> {
    pub fn new(source: &'a dyn TargetPool, destination: &'a dyn TargetPool) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Sync every base table of the source schema.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let tables = self.source.list_tables().await?;
        info!("Syncing {} tables", tables.len());

        let mut reports = Vec::with_capacity(tables.len());
        let mut cancelled = false;
        for table in &tables {
            if cancel.is_cancelled() {
                cancelled = true;
                reports.push(TableReport::skipped(table, "cancelled before processing"));
                continue;
            }
            reports.push(self.sync_table(table).await);
        }
        Ok(finish(started_at, reports, cancelled))
    }

    /// Sync one table. Never fails; the outcome is in the report.
    pub async fn sync_table(&self, table: &str) -> TableReport {
        let mut tx = match self.destination.begin().await {
            Ok(tx) => tx,
            Err(e) => return TableReport::failed(table, TableStatus::DataFailure, e),
        };

        match self.load(tx.as_mut(), table).await {
            Ok(None) => {
                rollback(tx, table).await;
                warn!("Table {} does not exist in the destination, skipping", table);
                TableReport::skipped(table, "table does not exist in the destination")
            }
            Ok(Some(rows)) => match tx.commit().await {
                Ok(()) => {
                    info!("Synced {} rows to table {}", rows, table);
                    TableReport::success(table, rows, 0)
                }
                Err(e) => TableReport::failed(table, TableStatus::DataFailure, e),
            },
            Err(e) => {
                rollback(tx, table).await;
                error!("Error syncing table {}: {}", table, e);
                TableReport::failed(table, TableStatus::DataFailure, e)
            }
        }
    }

    async fn load(&self, tx: &mut dyn TargetTransaction, table: &str) -> Result<Option<u64>> {
        if !tx.table_exists(table).await? {
            return Ok(None);
        }
        let source_columns = self.source.column_types(table).await?;
        let live = tx.column_types(table).await?;

        // Columns the destination lacks are not copied.
        let (read, write): (Vec<TargetColumn>, Vec<TargetColumn>) = source_columns
            .into_iter()
            .filter_map(|src| {
                let dest = live.iter().find(|d| d.name == src.name)?.clone();
                Some((src, dest))
            })
            .unzip();
        if write.is_empty() {
            return Err(MigrateError::transfer(table, "no columns in common"));
        }

        let rows = self.source.read_table(table, &read).await?;
        tx.truncate_table(table).await?;
        let inserted = if rows.is_empty() {
            0
        } else {
            tx.insert_rows(table, &write, &rows).await?
        };
        Ok(Some(inserted))
    }
}

/// Copies every PostgreSQL table into a SQLite file.
pub struct SqliteExport<'a> {
    source: &'a dyn TargetPool,
    destination: &'a SqliteSource,
}

impl<'a> SqliteExport<'a> {
    pub fn new(source: &'a dyn TargetPool, destination: &'a SqliteSource) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Export every base table of the source schema.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let tables = self.source.list_tables().await?;
        info!("Exporting {} tables", tables.len());

        let mut reports = Vec::with_capacity(tables.len());
        let mut cancelled = false;
        for table in &tables {
            if cancel.is_cancelled() {
                cancelled = true;
                reports.push(TableReport::skipped(table, "cancelled before processing"));
                continue;
            }
            let report = match self.export_table(table).await {
                Ok(rows) => {
                    info!("Exported {} rows from table {}", rows, table);
                    TableReport::success(table, rows, 0)
                }
                Err(e) => {
                    error!("Error exporting table {}: {}", table, e);
                    TableReport::failed(table, TableStatus::DataFailure, e)
                }
            };
            reports.push(report);
        }
        Ok(finish(started_at, reports, cancelled))
    }

    /// Replace one SQLite table with the PostgreSQL table's rows.
    pub async fn export_table(&self, table: &str) -> Result<u64> {
        let columns = self.source.column_types(table).await?;
        if columns.is_empty() {
            return Err(MigrateError::transfer(table, "table has no columns"));
        }
        let rows = self.source.read_table(table, &columns).await?;

        let definitions: Vec<(String, String)> = columns
            .iter()
            .map(|c| (c.name.clone(), sqlite_type(c).to_string()))
            .collect();
        let converted: Vec<Row> = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(&columns)
                    .map(|(value, col)| to_sqlite(value, col))
                    .collect()
            })
            .collect();

        self.destination
            .replace_table(table, &definitions, &converted)
            .await
    }
}

/// SQLite column type for a PostgreSQL column.
pub fn sqlite_type(column: &TargetColumn) -> &'static str {
    match column.data_type.as_str() {
        "smallint" | "integer" | "bigint" | "boolean" => "INTEGER",
        "numeric" | "real" | "double precision" => "REAL",
        "bytea" => "BLOB",
        _ => "TEXT",
    }
}

/// Convert a text-rendered PostgreSQL value to its SQLite storage class.
/// Anything that does not parse is kept as text.
fn to_sqlite(value: SqlValue, column: &TargetColumn) -> SqlValue {
    let SqlValue::Text(text) = value else {
        return value;
    };
    match column.data_type.as_str() {
        "boolean" => {
            let flag = match text.as_str() {
                "true" | "t" => Some(1),
                "false" | "f" => Some(0),
                _ => None,
            };
            flag.map_or(SqlValue::Text(text), SqlValue::I64)
        }
        "smallint" | "integer" | "bigint" => match text.parse::<i64>() {
            Ok(v) => SqlValue::I64(v),
            Err(_) => SqlValue::Text(text),
        },
        "numeric" | "real" | "double precision" => match text.parse::<f64>() {
            Ok(v) if v.is_finite() => SqlValue::F64(v),
            _ => SqlValue::Text(text),
        },
        "bytea" => match text.strip_prefix("\\x").map(hex::decode) {
            Some(Ok(bytes)) => SqlValue::Bytes(bytes),
            _ => SqlValue::Text(text),
        },
        _ => SqlValue::Text(text),
    }
}

fn finish(started_at: DateTime<Utc>, reports: Vec<TableReport>, cancelled: bool) -> MigrationReport {
    MigrationReport::build(
        uuid::Uuid::new_v4().to_string(),
        started_at,
        reports,
        Vec::new(),
        cancelled,
    )
}

async fn rollback(tx: Box<dyn TargetTransaction>, table: &str) {
    if let Err(e) = tx.rollback().await {
        warn!("Rollback failed for {}: {}", table, e);
    }
}
