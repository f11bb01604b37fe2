//! Environment-variable configuration source.

use super::{
    Config, MappingConfig, MigrationConfig, PostgresConfig, PostgresProfiles, Profile, SqliteConfig,
};
use crate::error::{MigrateError, Result};
use std::path::PathBuf;

/// Template values shipped in sample configuration files.
pub const PLACEHOLDER_VALUES: &[&str] = &[
    "your_cloud_user",
    "your_cloud_password",
    "your_cloud_db",
    "your_local_user",
    "your_local_password",
    "your_local_db",
];

const REQUIRED_VARS: &[&str] = &[
    "PG_HOST",
    "PG_PORT",
    "PG_USER",
    "PG_PASSWORD",
    "PG_DATABASE",
    "SQLITE_PATH",
];

/// Connection settings read from the environment.
pub(super) struct EnvSettings {
    pub sqlite_path: PathBuf,
    pub postgres: PostgresConfig,
}

/// Read connection settings; every missing variable is named in the error.
pub(super) fn read<F>(lookup: F) -> Result<EnvSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

    let missing: Vec<&str> = REQUIRED_VARS
        .iter()
        .copied()
        .filter(|key| get(key).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(MigrateError::Config(format!(
            "no usable config file and missing environment variables: {}",
            missing.join(", ")
        )));
    }

    let port_raw = get("PG_PORT").unwrap_or_default();
    let port = port_raw
        .parse::<u16>()
        .map_err(|_| MigrateError::Config(format!("PG_PORT is not a valid port: {}", port_raw)))?;

    Ok(EnvSettings {
        sqlite_path: PathBuf::from(get("SQLITE_PATH").unwrap_or_default()),
        postgres: PostgresConfig {
            host: get("PG_HOST").unwrap_or_default(),
            port,
            database: get("PG_DATABASE").unwrap_or_default(),
            user: get("PG_USER").unwrap_or_default(),
            password: get("PG_PASSWORD").unwrap_or_default(),
            schema: get("PG_SCHEMA").unwrap_or_else(|| "public".to_string()),
            ssl_mode: get("PG_SSLMODE").unwrap_or_else(|| "prefer".to_string()),
        },
    })
}

/// Build a full configuration from environment lookups alone.
///
/// The environment supplies the `target` profile; the `local` profile
/// additionally reuses it as `cloud`, which must always be present. Mapping
/// rules are the built-in ones.
pub fn from_env_map<F>(target: Profile, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let settings = read(lookup)?;
    let postgres = match target {
        Profile::Cloud => PostgresProfiles {
            cloud: settings.postgres,
            local: None,
        },
        Profile::Local => PostgresProfiles {
            cloud: settings.postgres.clone(),
            local: Some(settings.postgres),
        },
    };
    let config = Config {
        sqlite: SqliteConfig {
            path: settings.sqlite_path,
            export_path: None,
        },
        postgres,
        migration: MigrationConfig {
            target,
            ..MigrationConfig::default()
        },
        mapping: MappingConfig::builtin()?,
    };
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Replace the source path and the target profile with environment settings,
    /// keeping mapping rules and migration options from the file.
    pub(super) fn with_env(mut self, settings: EnvSettings) -> Result<Self> {
        self.sqlite.path = settings.sqlite_path;
        match self.migration.target {
            Profile::Cloud => self.postgres.cloud = settings.postgres,
            Profile::Local => self.postgres.local = Some(settings.postgres),
        }
        self.validate()?;
        Ok(self)
    }
}
