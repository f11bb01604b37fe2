//! Migration orchestrator - main workflow coordinator.
//!
//! A run has three phases, each over the same ordered table list:
//!
//! 1. structure: recreate every table on the target
//! 2. data: load every table whose structure succeeded
//! 3. sequences: advance every sequence past the loaded keys
//!
//! Cancellation is observed between tables, never inside one.

use crate::config::{Config, PostgresConfig, Profile};
use crate::error::{MigrateError, Result};
use crate::report::{MigrationReport, RunStatus, TableReport, TableStatus};
use crate::schema::SchemaTranslator;
use crate::sequence::SequenceSynchronizer;
use crate::source::{SourcePool, SqliteSource};
use crate::state::{self, MigrationState};
use crate::target::{PgPool, TargetPool};
use crate::transfer::{TableMigrator, ValueRangeValidator};
use crate::typemap::TypeMapper;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    state_file: Option<PathBuf>,
    state: Option<MigrationState>,
    source: Arc<dyn SourcePool>,
    target: Arc<dyn TargetPool>,
}

/// Connectivity of both databases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
    pub healthy: bool,
    /// Hints printed when the target is unreachable.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl Orchestrator {
    /// Create a new orchestrator connected to the SQLite file and the
    /// configured target profile.
    pub async fn new(config: Config) -> Result<Self> {
        let profile = config.migration.target;
        let pg = target_profile(&config, profile)?;
        let max_conns = config.migration.max_connections;

        let source = SqliteSource::open(&config.sqlite.path, max_conns as u32).await?;
        let target = match PgPool::new(pg, max_conns).await {
            Ok(target) => target,
            Err(e) => {
                source.close().await;
                return Err(e);
            }
        };

        Ok(Self::from_parts(config, Arc::new(source), Arc::new(target)))
    }

    /// Build an orchestrator over already-open pools.
    pub fn from_parts(
        config: Config,
        source: Arc<dyn SourcePool>,
        target: Arc<dyn TargetPool>,
    ) -> Self {
        Self {
            config,
            state_file: None,
            state: None,
            source,
            target,
        }
    }

    /// Set the state file path for resume capability.
    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        self.state_file = Some(path);
        self
    }

    /// Load existing state for resume.
    pub fn resume(mut self) -> Result<Self> {
        if let Some(ref path) = self.state_file {
            if path.exists() {
                let state = MigrationState::load(path)?;
                state.validate_config(&self.config.hash())?;
                self.state = Some(state);
                info!("Resuming from state file: {:?}", path);
            }
        }
        Ok(self)
    }

    /// Run the migration. Both pools are closed before returning.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<MigrationReport> {
        let result = self.run_phases(&cancel).await;
        self.source.close().await;
        self.target.close().await;
        result
    }

    async fn run_phases(&mut self, cancel: &CancellationToken) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let mut state = self
            .state
            .take()
            .unwrap_or_else(|| {
                MigrationState::new(uuid::Uuid::new_v4().to_string(), self.config.hash())
            });
        let run_id = state.run_id.clone();
        let mut state_error = None;
        info!("Starting migration run: {}", run_id);

        let tables: Vec<String> = self
            .source
            .list_tables()
            .await?
            .into_iter()
            .filter(|t| self.config.migration.includes_table(t))
            .collect();
        info!("Found {} tables to migrate", tables.len());

        let mut reports: Vec<Option<TableReport>> = vec![None; tables.len()];
        for (i, table) in tables.iter().enumerate() {
            if state.is_table_completed(table) {
                info!("Table {} already migrated, skipping", table);
                reports[i] = Some(TableReport::skipped(table, "already migrated"));
            }
        }

        // Phase 1: structure
        info!("Phase 1: Creating tables on the target");
        let translator = SchemaTranslator::new(
            TypeMapper::from_config(&self.config.mapping),
            self.config.mapping.clone(),
            self.config.migration.serial_primary_keys,
        );
        let mut structured = BTreeSet::new();
        for (i, table) in tables.iter().enumerate() {
            if reports[i].is_some() {
                continue;
            }
            if cancel.is_cancelled() {
                break;
            }
            match translator
                .translate(self.source.as_ref(), self.target.as_ref(), table)
                .await
            {
                Ok(_) => {
                    structured.insert(table.clone());
                }
                Err(e) => {
                    let report = TableReport::failed(table, TableStatus::StructuralFailure, e);
                    state.record(&report);
                    reports[i] = Some(report);
                }
            }
        }
        self.save_state(&state, &mut state_error);

        // Phase 2: data
        info!("Phase 2: Transferring data");
        let migrator = TableMigrator::new(
            self.source.as_ref(),
            self.target.as_ref(),
            &self.config.mapping,
            ValueRangeValidator::new(self.config.migration.numeric_ceiling),
        );
        for (i, table) in tables.iter().enumerate() {
            if reports[i].is_some() || !structured.contains(table) {
                continue;
            }
            if cancel.is_cancelled() {
                break;
            }
            let report = migrator.migrate_table(table).await;
            state.record(&report);
            self.save_state(&state, &mut state_error);
            reports[i] = Some(report);
        }

        // Tables left without an outcome were cut off by cancellation.
        let cancelled = reports.iter().any(Option::is_none);
        let tables: Vec<TableReport> = tables
            .iter()
            .zip(reports)
            .map(|(table, report)| {
                report.unwrap_or_else(|| TableReport::skipped(table, "cancelled before processing"))
            })
            .collect();

        // Phase 3: sequences
        let sequences = if cancelled {
            warn!("Migration cancelled, skipping sequence synchronization");
            Vec::new()
        } else {
            info!("Phase 3: Synchronizing sequences");
            match SequenceSynchronizer::new(self.target.as_ref()).sync_all().await {
                Ok(sequences) => sequences,
                Err(e) => {
                    error!("Error discovering sequences: {}", e);
                    Vec::new()
                }
            }
        };

        let mut report = MigrationReport::build(run_id, started_at, tables, sequences, cancelled);
        state.finish(match report.status {
            RunStatus::Completed => state::RunStatus::Completed,
            RunStatus::CompletedWithErrors => state::RunStatus::Failed,
            RunStatus::Cancelled => state::RunStatus::Cancelled,
        });
        self.save_state(&state, &mut state_error);
        report.state_error = state_error;

        info!(
            "Migration {:?}: {}/{} tables, {} rows",
            report.status, report.tables_success, report.tables_total, report.rows_transferred
        );
        Ok(report)
    }

    /// Persist the state file. A failed write never stops the run; the first
    /// failure is kept for the report.
    fn save_state(&self, state: &MigrationState, failure: &mut Option<String>) {
        let Some(path) = &self.state_file else {
            return;
        };
        if let Err(e) = state.save(path) {
            warn!("Could not save state file {}: {}", path.display(), e);
            failure.get_or_insert_with(|| e.to_string());
        }
    }
}

/// Connection settings of a profile, or a configuration error naming it.
pub fn target_profile(config: &Config, profile: Profile) -> Result<&PostgresConfig> {
    config.postgres.get(profile).ok_or_else(|| {
        MigrateError::Config(format!("postgres.{} is not configured", profile))
    })
}

/// Probe the SQLite file and a PostgreSQL profile, timing each connection.
pub async fn health_check(config: &Config, profile: Profile) -> HealthCheckResult {
    let started = Instant::now();
    let source = probe_source(&config.sqlite.path).await;
    let source_latency_ms = started.elapsed().as_millis() as u64;

    let started = Instant::now();
    let target = match target_profile(config, profile) {
        Ok(pg) => probe_target(pg).await,
        Err(e) => Err(e),
    };
    let target_latency_ms = started.elapsed().as_millis() as u64;

    let suggestions = if target.is_err() {
        troubleshooting_suggestions()
    } else {
        Vec::new()
    };

    HealthCheckResult {
        healthy: source.is_ok() && target.is_ok(),
        source_connected: source.is_ok(),
        source_latency_ms,
        source_error: source.err().map(|e| e.to_string()),
        target_connected: target.is_ok(),
        target_latency_ms,
        target_error: target.err().map(|e| e.to_string()),
        suggestions,
    }
}

async fn probe_source(path: &Path) -> Result<()> {
    let source = SqliteSource::open(path, 1).await?;
    let result = source.test_connection().await;
    source.close().await;
    result
}

async fn probe_target(config: &PostgresConfig) -> Result<()> {
    info!(
        "Testing PostgreSQL connection to {}:{} as {}",
        config.host, config.port, config.user
    );
    let target = PgPool::new(config, 1).await?;
    let result = target.test_connection().await;
    target.close().await;
    result
}

/// Hints shown when the target cannot be reached.
pub fn troubleshooting_suggestions() -> Vec<String> {
    [
        "Check that the PostgreSQL credentials are correct",
        "Ensure the database server is running and reachable from this network",
        "Verify the user has permission to create tables in the target schema",
        "For hosted databases, check the project's connection settings and SSL mode",
        "Or set PG_HOST, PG_PORT, PG_USER, PG_PASSWORD, PG_DATABASE and SQLITE_PATH and run again",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlValue;
    use crate::report::SequenceStatus;
    use crate::testing::FakeTarget;
    use tempfile::TempDir;

    const YAML: &str = r#"
sqlite:
  path: one-api.db
postgres:
  cloud:
    host: localhost
    database: oneapi
    user: postgres
    password: secret
mapping:
  type_overrides:
    tokens:
      unlimited_quota: BOOLEAN
  primary_key_overrides:
    abilities: [group, model, channel_id]
"#;

    async fn source() -> Arc<SqliteSource> {
        let db = SqliteSource::in_memory().await.unwrap();
        for sql in [
            "CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT NOT NULL, quota REAL DEFAULT 0)",
            "CREATE TABLE tokens (id INTEGER PRIMARY KEY, user_id INTEGER, unlimited_quota INTEGER DEFAULT 0)",
            "CREATE TABLE abilities (\"group\" varchar(32), model varchar(255), channel_id integer, enabled numeric)",
            "INSERT INTO users VALUES (3, 'root', 200000000), (7, 'guest', 1.5)",
            "INSERT INTO tokens VALUES (1, 3, 1), (2, 7, 0)",
            "INSERT INTO abilities VALUES ('default', 'gpt-4', 1, 1)",
        ] {
            db.execute(sql).await.unwrap();
        }
        Arc::new(db)
    }

    fn orchestrator(db: Arc<SqliteSource>, target: &FakeTarget) -> Orchestrator {
        let config = Config::from_yaml(YAML).unwrap();
        Orchestrator::from_parts(config, db, Arc::new(target.clone()))
    }

    fn statuses(report: &MigrationReport) -> Vec<(String, TableStatus)> {
        report
            .tables
            .iter()
            .map(|t| (t.table.clone(), t.status))
            .collect()
    }

    #[tokio::test]
    async fn test_full_run() {
        let target = FakeTarget::new();
        let report = orchestrator(source().await, &target)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.tables_success, 3);
        assert_eq!(report.rows_transferred, 5);
        assert_eq!(report.tables[0].clamped_values, 1);

        let users = target.rows("users");
        assert_eq!(users[0][2], SqlValue::F64(99_999_999.99));
        assert_eq!(target.rows("tokens")[0][2], SqlValue::Bool(true));
        assert_eq!(
            target.created("abilities").unwrap().primary_key,
            vec!["group", "model", "channel_id"]
        );

        // users.id and tokens.id became BIGSERIAL.
        assert_eq!(report.sequences.len(), 2);
        assert!(report
            .sequences
            .iter()
            .all(|s| s.status == SequenceStatus::Synchronized));
        assert_eq!(target.next_value("users", "id"), Some(8));
        assert_eq!(target.next_value("tokens", "id"), Some(3));
    }

    #[tokio::test]
    async fn test_structural_failure_skips_data_phase() {
        let target = FakeTarget::new();
        target.fail_create("tokens");
        let report = orchestrator(source().await, &target)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::CompletedWithErrors);
        assert_eq!(
            statuses(&report),
            vec![
                ("users".to_string(), TableStatus::Success),
                ("tokens".to_string(), TableStatus::StructuralFailure),
                ("abilities".to_string(), TableStatus::Success),
            ]
        );
        assert!(target.rows("tokens").is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let target = FakeTarget::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = orchestrator(source().await, &target).run(cancel).await.unwrap();

        assert_eq!(report.status, RunStatus::Cancelled);
        assert!(report
            .tables
            .iter()
            .all(|t| t.status == TableStatus::Skipped));
        assert!(report.sequences.is_empty());
        assert!(target.created("users").is_none());
    }

    #[tokio::test]
    async fn test_resume_skips_completed_tables() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");
        let config = Config::from_yaml(YAML).unwrap();

        let mut state = MigrationState::new("run-1".into(), config.hash());
        state.record(&TableReport::success("users", 2, 0));
        state.save(&state_path).unwrap();

        let target = FakeTarget::new();
        let report = orchestrator(source().await, &target)
            .with_state_file(state_path.clone())
            .resume()
            .unwrap()
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.run_id, "run-1");
        assert_eq!(report.tables[0].status, TableStatus::Skipped);
        assert!(target.created("users").is_none());
        assert_eq!(report.tables[1].status, TableStatus::Success);

        let saved = MigrationState::load(&state_path).unwrap();
        assert!(saved.is_table_completed("tokens"));
        assert_eq!(saved.status, state::RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_unwritable_state_file_does_not_stop_run() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("no-such-dir").join("state.json");

        let target = FakeTarget::new();
        let report = orchestrator(source().await, &target)
            .with_state_file(state_path.clone())
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.tables_success, 3);
        assert_eq!(report.sequences.len(), 2);
        assert!(report.state_error.is_some());
        assert!(report
            .summary_lines()
            .iter()
            .any(|l| l.starts_with("state file not saved")));
        assert!(!state_path.exists());
    }

    #[tokio::test]
    async fn test_resume_rejects_changed_config() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");
        MigrationState::new("run-1".into(), "other".into())
            .save(&state_path)
            .unwrap();

        let result = orchestrator(source().await, &FakeTarget::new())
            .with_state_file(state_path)
            .resume();
        assert!(matches!(result, Err(MigrateError::ConfigChanged)));
    }

    #[test]
    fn test_missing_local_profile() {
        let config = Config::from_yaml(YAML).unwrap();
        assert!(target_profile(&config, Profile::Cloud).is_ok());
        assert!(matches!(
            target_profile(&config, Profile::Local),
            Err(MigrateError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_health_check_reports_missing_source() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::from_yaml(YAML).unwrap();
        config.sqlite.path = dir.path().join("missing.db");

        let result = health_check(&config, Profile::Local).await;
        assert!(!result.source_connected);
        assert!(!result.target_connected);
        assert!(!result.healthy);
        assert!(!result.suggestions.is_empty());
    }
}
