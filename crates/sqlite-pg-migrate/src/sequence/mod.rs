//! Post-load sequence synchronization.
//!
//! Rows are copied with their original key values, so every sequence backing a
//! column default still starts at 1. Each one is moved past the column's
//! current maximum so the next insert does not collide.

use tracing::{info, warn};

use crate::core::SequenceBinding;
use crate::error::Result;
use crate::report::{SequenceReport, SequenceStatus};
use crate::target::TargetPool;

/// Realigns target sequences with the data that was loaded.
pub struct SequenceSynchronizer<'a> {
    target: &'a dyn TargetPool,
}

impl<'a> SequenceSynchronizer<'a> {
    pub fn new(target: &'a dyn TargetPool) -> Self {
        Self { target }
    }

    /// Synchronize every sequence-backed column in the target schema.
    ///
    /// Only discovery errors are returned; a failure on one binding is
    /// reported and the rest continue.
    pub async fn sync_all(&self) -> Result<Vec<SequenceReport>> {
        let bindings = self.target.sequence_bindings().await?;
        info!("Synchronizing {} sequence(s)", bindings.len());

        let mut reports = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            reports.push(self.sync_one(binding).await);
        }
        Ok(reports)
    }

    /// Synchronize one binding. Tables missing from the target are skipped.
    pub async fn sync_one(&self, binding: &SequenceBinding) -> SequenceReport {
        let mut report = SequenceReport {
            table: binding.table.clone(),
            column: binding.column.clone(),
            status: SequenceStatus::Skipped,
            next_value: None,
            error: None,
        };

        match self.target.table_exists(&binding.table).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    "Table {} does not exist, skipping sequence for {}",
                    binding.table, binding.column
                );
                return report;
            }
            Err(e) => {
                warn!("Error checking table {}: {}", binding.table, e);
                report.status = SequenceStatus::Failed;
                report.error = Some(e.to_string());
                return report;
            }
        }

        match self.target.sync_sequence(binding).await {
            Ok(next) => {
                info!(
                    "Sequence for {}.{} set to {}",
                    binding.table, binding.column, next
                );
                report.status = SequenceStatus::Synchronized;
                report.next_value = Some(next);
            }
            Err(e) => {
                warn!(
                    "Error synchronizing sequence for {}.{}: {}",
                    binding.table, binding.column, e
                );
                report.status = SequenceStatus::Failed;
                report.error = Some(e.to_string());
            }
        }
        report
    }
}
