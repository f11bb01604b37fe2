//! Configuration loading and validation.

mod env;
mod types;
mod validation;

pub use env::{from_env_map, PLACEHOLDER_VALUES};
pub use types::*;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{info, warn};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// File used when neither `--config` nor `CONFIG_PATH` is given.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from `PG_*` and `SQLITE_PATH` environment variables.
    pub fn from_env() -> Result<Self> {
        from_env_map(Profile::default(), |key| std::env::var(key).ok())
    }

    /// Resolve the configuration to use for a run.
    ///
    /// `target` overrides `migration.target` before anything is checked, so
    /// the placeholder test and the environment fallback apply to the profile
    /// the run will actually use. The file wins when it loads, validates, and
    /// carries no placeholder credentials for that profile. Otherwise the
    /// environment is used.
    pub fn resolve<P: AsRef<Path>>(path: P, target: Option<Profile>) -> Result<Self> {
        Self::resolve_with(path, target, |key| std::env::var(key).ok())
    }

    /// `resolve` with an injectable environment lookup.
    pub fn resolve_with<P, F>(path: P, target: Option<Profile>, lookup: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref();
        if !path.exists() {
            warn!(
                "{} does not exist; using environment variables",
                path.display()
            );
            return from_env_map(target.unwrap_or_default(), lookup);
        }

        let mut config = match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Could not use {}: {}; using environment variables",
                    path.display(),
                    e
                );
                return from_env_map(target.unwrap_or_default(), lookup);
            }
        };
        if let Some(target) = target {
            config.migration.target = target;
        }

        match config.placeholder_field() {
            None => {
                info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            Some(field) => {
                warn!(
                    "{} still has a placeholder {} for postgres.{}; using environment variables",
                    path.display(),
                    field,
                    config.migration.target
                );
                config.with_env(env::read(lookup)?)
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Name of the first field of the target profile still holding a template value.
    pub fn placeholder_field(&self) -> Option<&'static str> {
        let profile = self.postgres.get(self.migration.target)?;
        let fields: [(&'static str, &str); 3] = [
            ("user", &profile.user),
            ("password", &profile.password),
            ("database", &profile.database),
        ];
        fields
            .into_iter()
            .find(|(_, value)| PLACEHOLDER_VALUES.contains(value))
            .map(|(name, _)| name)
    }

    /// Compute a SHA256 hash of the configuration for resume validation.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl PostgresConfig {
    /// Build a connection string for tokio-postgres.
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={} sslmode={}",
            self.host, self.port, self.database, self.user, self.password, self.ssl_mode
        )
    }
}
