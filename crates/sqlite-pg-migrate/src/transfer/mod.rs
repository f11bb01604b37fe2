//! Data phase: copy each table's rows inside one target transaction.
//!
//! A table's load either commits in full or rolls back in full. Failures are
//! reported per table and never stop the remaining tables.

mod clamp;
mod coerce;

pub use clamp::{ValueRangeValidator, DEFAULT_CEILING};
pub use coerce::{ColumnPlan, RowCoercer};

use tracing::{error, info, warn};

use crate::config::MappingConfig;
use crate::core::{TableDescriptor, TargetColumn};
use crate::error::{MigrateError, Result};
use crate::report::{TableReport, TableStatus};
use crate::schema::describe_table;
use crate::source::SourcePool;
use crate::target::{TargetPool, TargetTransaction};

/// Rows and clamps committed for one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub rows: u64,
    pub clamped_values: u64,
}

/// Result of loading one table inside its transaction.
enum LoadOutcome {
    Loaded(TransferStats),
    TargetMissing,
}

/// Copies table data from the source to the target.
pub struct TableMigrator<'a> {
    source: &'a dyn SourcePool,
    target: &'a dyn TargetPool,
    mapping: &'a MappingConfig,
    validator: ValueRangeValidator,
}

impl<'a> TableMigrator<'a> {
    pub fn new(
        source: &'a dyn SourcePool,
        target: &'a dyn TargetPool,
        mapping: &'a MappingConfig,
        validator: ValueRangeValidator,
    ) -> Self {
        Self {
            source,
            target,
            mapping,
            validator,
        }
    }

    /// Load one table. Never fails; the outcome is in the report.
    pub async fn migrate_table(&self, table: &str) -> TableReport {
        let mut tx = match self.target.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!("Error migrating data to table {}: {}", table, e);
                return TableReport::failed(table, TableStatus::DataFailure, e);
            }
        };

        match self.load(tx.as_mut(), table).await {
            Ok(LoadOutcome::TargetMissing) => {
                rollback(tx, table).await;
                warn!(
                    "Table {} does not exist in the target, skipping data migration",
                    table
                );
                TableReport::skipped(table, "table does not exist in the target")
            }
            Ok(LoadOutcome::Loaded(stats)) => match tx.commit().await {
                Ok(()) => {
                    info!("Migrated {} rows to table {}", stats.rows, table);
                    TableReport::success(table, stats.rows, stats.clamped_values)
                }
                Err(e) => {
                    error!("Commit failed for table {}: {}", table, e);
                    TableReport::failed(table, TableStatus::DataFailure, e)
                }
            },
            Err(e) => {
                rollback(tx, table).await;
                error!("Error migrating data to table {}: {}", table, e);
                TableReport::failed(table, TableStatus::DataFailure, e)
            }
        }
    }

    /// Load every table in order.
    pub async fn migrate_all(&self, tables: &[String]) -> Vec<TableReport> {
        let mut reports = Vec::with_capacity(tables.len());
        for table in tables {
            reports.push(self.migrate_table(table).await);
        }
        reports
    }

    async fn load(&self, tx: &mut dyn TargetTransaction, table: &str) -> Result<LoadOutcome> {
        if !tx.table_exists(table).await? {
            return Ok(LoadOutcome::TargetMissing);
        }

        let descriptor = describe_table(self.source, self.mapping, table).await?;
        let clamped_values = self.validator.clamp(self.source, &descriptor).await?;

        let names: Vec<String> = descriptor.columns.iter().map(|c| c.name.clone()).collect();
        let rows = self.source.fetch_rows(table, &names).await?;

        let live = tx.column_types(table).await?;
        let target_columns = align_columns(&descriptor, &live)?;

        let coercer = RowCoercer::new(
            &descriptor,
            &target_columns,
            self.mapping.truncations(table),
        )?;
        let coerced = coercer.coerce_all(rows)?;

        let rows = if coerced.is_empty() {
            0
        } else {
            tx.insert_rows(table, &target_columns, &coerced).await?
        };

        Ok(LoadOutcome::Loaded(TransferStats {
            rows,
            clamped_values,
        }))
    }
}

/// Live target columns in source column order. Every source column must exist.
fn align_columns(table: &TableDescriptor, live: &[TargetColumn]) -> Result<Vec<TargetColumn>> {
    table
        .columns
        .iter()
        .map(|col| {
            live.iter()
                .find(|t| t.name == col.name)
                .cloned()
                .ok_or_else(|| {
                    MigrateError::transfer(
                        &table.name,
                        format!("column {} does not exist in the target table", col.name),
                    )
                })
        })
        .collect()
}

async fn rollback(tx: Box<dyn TargetTransaction>, table: &str) {
    if let Err(e) = tx.rollback().await {
        warn!("Rollback failed for {}: {}", table, e);
    }
}
