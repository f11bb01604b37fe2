//! Pre-extraction clamping of out-of-range decimals.
//!
//! Decimal-family columns land in `NUMERIC(10,2)` on the target, which cannot
//! hold values of 1e8 or more. Those values are overwritten with the ceiling in
//! the SQLite file itself before rows are read. This mutates the source
//! database; the change is committed and is not undone after migration.

use tracing::warn;

use crate::core::TableDescriptor;
use crate::error::Result;
use crate::source::SourcePool;
use crate::typemap::TypeFamily;

/// Largest value `NUMERIC(10,2)` holds.
pub const DEFAULT_CEILING: f64 = 99_999_999.99;

/// Clamps decimal-family source columns to a ceiling.
#[derive(Debug, Clone, Copy)]
pub struct ValueRangeValidator {
    ceiling: f64,
}

impl ValueRangeValidator {
    pub fn new(ceiling: f64) -> Self {
        Self { ceiling }
    }

    pub fn ceiling(&self) -> f64 {
        self.ceiling
    }

    /// Columns of `table` subject to clamping.
    pub fn clamped_columns<'a>(&self, table: &'a TableDescriptor) -> Vec<&'a str> {
        table
            .columns
            .iter()
            .filter(|c| TypeFamily::of(&c.source_type) == Some(TypeFamily::Decimal))
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Clamp every decimal-family column of `table` in the source.
    /// Returns the number of values changed.
    pub async fn clamp(&self, source: &dyn SourcePool, table: &TableDescriptor) -> Result<u64> {
        let mut changed = 0;
        for column in self.clamped_columns(table) {
            let n = source.clamp_column(&table.name, column, self.ceiling).await?;
            if n > 0 {
                warn!(
                    "{}.{}: clamped {} value(s) above {} in the source database",
                    table.name, column, n, self.ceiling
                );
            }
            changed += n;
        }
        Ok(changed)
    }
}

impl Default for ValueRangeValidator {
    fn default() -> Self {
        Self::new(DEFAULT_CEILING)
    }
}
