//! Configuration validation.

use super::{Config, PostgresConfig};
use crate::error::{MigrateError, Result};
use crate::target::tls::SslMode;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.sqlite.path.as_os_str().is_empty() {
        return Err(MigrateError::Config("sqlite.path is required".into()));
    }

    // Target validation
    validate_profile("postgres.cloud", &config.postgres.cloud)?;
    if let Some(local) = &config.postgres.local {
        validate_profile("postgres.local", local)?;
    }

    let target = config.migration.target;
    if config.postgres.get(target).is_none() {
        return Err(MigrateError::Config(format!(
            "migration.target is '{}' but postgres.{} is not configured",
            target, target
        )));
    }

    // Migration config validation
    if !(config.migration.numeric_ceiling > 0.0) {
        return Err(MigrateError::Config(
            "migration.numeric_ceiling must be positive".into(),
        ));
    }
    if config.migration.max_connections == 0 {
        return Err(MigrateError::Config(
            "migration.max_connections must be at least 1".into(),
        ));
    }

    // Mapping rules
    for (table, columns) in &config.mapping.primary_key_overrides {
        if columns.is_empty() {
            return Err(MigrateError::Config(format!(
                "mapping.primary_key_overrides.{} must list at least one column",
                table
            )));
        }
    }
    for (table, columns) in &config.mapping.truncate_columns {
        for (column, len) in columns {
            if *len == 0 {
                return Err(MigrateError::Config(format!(
                    "mapping.truncate_columns.{}.{} must be at least 1",
                    table, column
                )));
            }
        }
    }

    Ok(())
}

fn validate_profile(name: &str, profile: &PostgresConfig) -> Result<()> {
    if profile.host.is_empty() {
        return Err(MigrateError::Config(format!("{}.host is required", name)));
    }
    if profile.database.is_empty() {
        return Err(MigrateError::Config(format!("{}.database is required", name)));
    }
    if profile.user.is_empty() {
        return Err(MigrateError::Config(format!("{}.user is required", name)));
    }
    if profile.port == 0 {
        return Err(MigrateError::Config(format!("{}.port must be non-zero", name)));
    }
    if profile.schema.is_empty() {
        return Err(MigrateError::Config(format!("{}.schema is required", name)));
    }
    profile.ssl_mode.parse::<SslMode>()?;
    Ok(())
}
