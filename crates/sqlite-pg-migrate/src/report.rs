//! Per-unit outcomes and the run report built from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Outcome of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    /// Structure and data committed.
    Success,
    /// Table (re)creation failed and was rolled back.
    StructuralFailure,
    /// Data load failed and was rolled back.
    DataFailure,
    /// Not processed (absent target table, cancellation, or already done).
    Skipped,
}

/// Report line for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableReport {
    pub table: String,
    pub status: TableStatus,
    /// Rows committed to the target.
    pub rows: u64,
    /// Source values lowered to the numeric ceiling.
    pub clamped_values: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableReport {
    pub fn success(table: impl Into<String>, rows: u64, clamped_values: u64) -> Self {
        Self {
            table: table.into(),
            status: TableStatus::Success,
            rows,
            clamped_values,
            error: None,
        }
    }

    pub fn failed(table: impl Into<String>, status: TableStatus, error: impl ToString) -> Self {
        Self {
            table: table.into(),
            status,
            rows: 0,
            clamped_values: 0,
            error: Some(error.to_string()),
        }
    }

    pub fn skipped(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            status: TableStatus::Skipped,
            rows: 0,
            clamped_values: 0,
            error: Some(reason.into()),
        }
    }

    /// Whether the table ended in a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.status,
            TableStatus::StructuralFailure | TableStatus::DataFailure
        )
    }
}

/// Outcome of one sequence binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    Synchronized,
    Skipped,
    Failed,
}

/// Report line for one sequence binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceReport {
    pub table: String,
    pub column: String,
    pub status: SequenceStatus,
    /// Value the next insert will draw.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every table succeeded or was skipped.
    Completed,
    /// At least one table failed; the others were processed.
    CompletedWithErrors,
    /// Stopped between tables on request.
    Cancelled,
}

/// Result of a migration, sync, or export run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: RunStatus,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Total tables processed.
    pub tables_total: usize,

    /// Tables successfully migrated.
    pub tables_success: usize,

    /// Tables that failed.
    pub tables_failed: usize,

    /// Total rows transferred.
    pub rows_transferred: u64,

    /// Per-table outcomes in processing order.
    pub tables: Vec<TableReport>,

    /// Per-sequence outcomes.
    #[serde(default)]
    pub sequences: Vec<SequenceReport>,

    /// First failure to write the resume state file, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_error: Option<String>,
}

impl MigrationReport {
    /// Aggregate unit outcomes into a report.
    pub fn build(
        run_id: String,
        started_at: DateTime<Utc>,
        tables: Vec<TableReport>,
        sequences: Vec<SequenceReport>,
        cancelled: bool,
    ) -> Self {
        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let tables_success = tables
            .iter()
            .filter(|t| t.status == TableStatus::Success)
            .count();
        let tables_failed = tables.iter().filter(|t| t.is_failure()).count();
        let rows_transferred = tables.iter().map(|t| t.rows).sum();

        let status = if cancelled {
            RunStatus::Cancelled
        } else if tables_failed > 0 {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Completed
        };

        Self {
            run_id,
            status,
            started_at,
            completed_at,
            duration_seconds,
            tables_total: tables.len(),
            tables_success,
            tables_failed,
            rows_transferred,
            tables,
            sequences,
            state_error: None,
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable report, one line per unit.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.tables.len() + self.sequences.len() + 1);
        for t in &self.tables {
            let line = match t.status {
                TableStatus::Success if t.clamped_values > 0 => format!(
                    "{}: migrated {} rows ({} values clamped)",
                    t.table, t.rows, t.clamped_values
                ),
                TableStatus::Success => format!("{}: migrated {} rows", t.table, t.rows),
                TableStatus::StructuralFailure => format!(
                    "{}: structure failed: {}",
                    t.table,
                    t.error.as_deref().unwrap_or_default()
                ),
                TableStatus::DataFailure => format!(
                    "{}: data failed: {}",
                    t.table,
                    t.error.as_deref().unwrap_or_default()
                ),
                TableStatus::Skipped => format!(
                    "{}: skipped: {}",
                    t.table,
                    t.error.as_deref().unwrap_or_default()
                ),
            };
            lines.push(line);
        }
        for s in &self.sequences {
            let line = match s.status {
                SequenceStatus::Synchronized => format!(
                    "sequence {}.{}: next value {}",
                    s.table,
                    s.column,
                    s.next_value.unwrap_or_default()
                ),
                SequenceStatus::Skipped => {
                    format!("sequence {}.{}: skipped (table absent)", s.table, s.column)
                }
                SequenceStatus::Failed => format!(
                    "sequence {}.{}: failed: {}",
                    s.table,
                    s.column,
                    s.error.as_deref().unwrap_or_default()
                ),
            };
            lines.push(line);
        }
        if let Some(err) = &self.state_error {
            lines.push(format!("state file not saved: {}", err));
        }
        lines.push(format!(
            "{:?}: {}/{} tables succeeded, {} failed, {} rows in {:.1}s",
            self.status,
            self.tables_success,
            self.tables_total,
            self.tables_failed,
            self.rows_transferred,
            self.duration_seconds
        ));
        lines
    }
}
