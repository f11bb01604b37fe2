//! # sqlite-pg-migrate
//!
//! SQLite to PostgreSQL schema and data migration library.
//!
//! This library recreates an embedded SQLite database on PostgreSQL with:
//!
//! - **Type mapping** with per-column overrides ahead of inference
//! - **Default translation** that drops defaults the target type cannot hold
//! - **Per-table transactions** so one table's failure never touches another
//! - **Row coercion** for booleans, bounded decimals and fixed-width strings
//! - **Sequence realignment** after keys are copied verbatim
//! - **Resume capability** via JSON state files
//!
//! ## Example
//!
//! ```rust,no_run
//! use sqlite_pg_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> sqlite_pg_migrate::Result<()> {
//!     let config = Config::resolve("config.yaml", None)?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let report = orchestrator.run(CancellationToken::new()).await?;
//!     println!("Migrated {} rows", report.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod schema;
pub mod sequence;
pub mod source;
pub mod state;
pub mod sync;
pub mod target;
pub mod transfer;
pub mod typemap;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use config::{Config, MappingConfig, MigrationConfig, PostgresConfig, Profile};
pub use crate::core::{Row, SqlValue};
pub use error::{MigrateError, Result};
pub use orchestrator::{health_check, HealthCheckResult, Orchestrator};
pub use report::{MigrationReport, RunStatus, TableReport, TableStatus};
pub use schema::SchemaTranslator;
pub use sequence::SequenceSynchronizer;
pub use source::{SourcePool, SqliteSource};
pub use state::MigrationState;
pub use sync::{PgSync, SqliteExport, SyncDirection};
pub use target::{PgPool, TargetPool};
pub use transfer::{RowCoercer, TableMigrator, ValueRangeValidator};
pub use typemap::TypeMapper;
