//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Embedded SQLite database (migration source, export destination).
    pub sqlite: SqliteConfig,

    /// PostgreSQL connection profiles.
    pub postgres: PostgresProfiles,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Explicit type, key and width rules.
    #[serde(default)]
    pub mapping: MappingConfig,
}

/// SQLite file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file migrated from.
    pub path: PathBuf,

    /// Database file written by `export` (created if missing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_path: Option<PathBuf>,
}

/// Named PostgreSQL profiles. `cloud` is always required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresProfiles {
    pub cloud: PostgresConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<PostgresConfig>,
}

impl PostgresProfiles {
    /// Look up a profile by name.
    pub fn get(&self, profile: Profile) -> Option<&PostgresConfig> {
        match profile {
            Profile::Cloud => Some(&self.cloud),
            Profile::Local => self.local.as_ref(),
        }
    }
}

/// PostgreSQL profile selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Cloud,
    Local,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Cloud => write!(f, "cloud"),
            Profile::Local => write!(f, "local"),
        }
    }
}

/// PostgreSQL connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema tables are created in (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode: disable, prefer, require, verify-full (default: "prefer").
    #[serde(default = "default_prefer")]
    pub ssl_mode: String,
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Profile `migrate` writes to (default: cloud).
    #[serde(default)]
    pub target: Profile,

    /// Source tables never migrated. `sqlite_*` internals are always skipped.
    #[serde(default = "default_exclude_tables")]
    pub exclude_tables: Vec<String>,

    /// Largest value written to a fixed-precision numeric column.
    #[serde(default = "default_numeric_ceiling")]
    pub numeric_ceiling: f64,

    /// Give single-column integer primary keys a sequence (BIGSERIAL).
    #[serde(default = "default_true")]
    pub serial_primary_keys: bool,

    /// PostgreSQL pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            target: Profile::default(),
            exclude_tables: default_exclude_tables(),
            numeric_ceiling: default_numeric_ceiling(),
            serial_primary_keys: true,
            max_connections: default_max_connections(),
        }
    }
}

impl MigrationConfig {
    /// Whether a source table takes part in the migration.
    pub fn includes_table(&self, table: &str) -> bool {
        !table.starts_with("sqlite_") && !self.exclude_tables.iter().any(|t| t == table)
    }
}

/// Hand-written rules that take precedence over inference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingConfig {
    /// table -> column -> target type.
    #[serde(default)]
    pub type_overrides: BTreeMap<String, BTreeMap<String, String>>,

    /// table -> primary key columns replacing the ones flagged in the source.
    #[serde(default)]
    pub primary_key_overrides: BTreeMap<String, Vec<String>>,

    /// table -> column -> maximum length in characters.
    #[serde(default)]
    pub truncate_columns: BTreeMap<String, BTreeMap<String, usize>>,
}

impl MappingConfig {
    /// Rules used when no configuration file supplies a `mapping` section.
    pub fn builtin() -> crate::error::Result<Self> {
        Ok(serde_yaml::from_str(include_str!("default_mapping.yaml"))?)
    }

    /// Structural primary key override for a table, if any.
    pub fn primary_key_override(&self, table: &str) -> Option<&[String]> {
        self.primary_key_overrides.get(table).map(Vec::as_slice)
    }

    /// Fixed-width columns of a table.
    pub fn truncations(&self, table: &str) -> Option<&BTreeMap<String, usize>> {
        self.truncate_columns.get(table)
    }
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_prefer() -> String {
    "prefer".to_string()
}

fn default_exclude_tables() -> Vec<String> {
    vec!["sqlite_sequence".to_string()]
}

fn default_numeric_ceiling() -> f64 {
    99_999_999.99
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> usize {
    4
}
