//! # Configuration Management for RelHaus
//!
//! This crate provides centralized configuration structures for all RelHaus components:
//! the database pool, the SQL dialect parameters and mapping defaults.
//!
//! ## Quick Start
//!
//! ### Programmatic Configuration
//! ```rust
//! use config::{DatabaseConfig, DialectConfig, DialectKind};
//!
//! // Database configuration
//! let db_config = DatabaseConfig::new(
//!     "localhost".to_string(), 5432, "myapp".to_string(),
//!     "postgres".to_string(), "password".to_string(),
//!     1, 10, 30, 600, 3600,
//! );
//!
//! // Dialect configuration with defaults for the chosen database
//! let dialect = DialectConfig::new(DialectKind::Postgres);
//! ```
//!
//! ### TOML File Configuration
//! ```toml
//! [database]
//! host = "localhost"
//! port = 5432
//! database = "myapp"
//! username = "postgres"
//! password = "password"
//! min_connections = 1
//! max_connections = 10
//! connection_timeout_seconds = 30
//! idle_timeout_seconds = 600
//! max_lifetime_seconds = 3600
//!
//! [dialect]
//! kind = "postgres"
//! identifier_quote = "\""
//! omit_identity_on_insert = true
//! stream_threshold = 6
//!
//! [mapping]
//! default_schema = "public"
//! ```
//!
//! Load configuration:
//! ```rust,no_run
//! use config::AppConfig;
//!
//! // Load from relhaus.toml
//! let config = AppConfig::load()?;
//!
//! // Or load from custom path
//! let config = AppConfig::from_file("config/production.toml")?;
//! # Ok::<(), config::ConfigError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::{env, path::Path};
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "./relhaus.toml";

/// Joined-table count above which SELECTs stream rows instead of prefetching them
pub const DEFAULT_STREAM_THRESHOLD: usize = 6;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Environment variable error: {0}")]
    Env(#[from] env::VarError),
    #[error("Dotenvy error: {0}")]
    Dotenvy(#[from] dotenvy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dialect: DialectConfig,
    #[serde(default)]
    pub mapping: MappingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub max_lifetime_seconds: u64,
}

/// Supported SQL dialect families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[default]
    Postgres,
    Mysql,
    Sqlite,
}

/// Dialect parameters. Unset optional values fall back to the defaults of `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DialectConfig {
    pub kind: DialectKind,
    #[serde(default)]
    pub identifier_quote: Option<char>,
    #[serde(default)]
    pub omit_identity_on_insert: Option<bool>,
    #[serde(default)]
    pub stream_threshold: Option<usize>,
}

/// Mapping defaults supplied by the caller
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MappingConfig {
    /// Schema used for entities whose table is not overridden by a resolver
    #[serde(default)]
    pub default_schema: Option<String>,
}

impl AppConfig {
    /// Load configuration from TOML file specified in .env or defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = {
            // A missing .env file is fine, the default path is tried next
            if let Err(e) = dotenvy::dotenv() {
                if !e.not_found() {
                    return Err(e.into());
                }
            }

            if let Ok(config_path) = env::var("RELHAUS_CONFIG") {
                Self::from_file(&config_path)
            } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
                Self::from_file(DEFAULT_CONFIG_PATH)
            } else {
                Err(ConfigError::Invalid(format!(
                    "Config path must be specified in .env file as RELHAUS_CONFIG or in {} file",
                    DEFAULT_CONFIG_PATH
                )))
            }
        }?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.host.is_empty() {
            return Err(ConfigError::Invalid(
                "Database host cannot be empty".to_string(),
            ));
        }
        if self.database.port == 0 {
            return Err(ConfigError::Invalid(
                "Database port cannot be zero".to_string(),
            ));
        }
        if self.database.database.is_empty() {
            return Err(ConfigError::Invalid(
                "Database name cannot be empty".to_string(),
            ));
        }
        if self.database.username.is_empty() {
            return Err(ConfigError::Invalid(
                "Database username cannot be empty".to_string(),
            ));
        }
        if self.database.min_connections == 0 {
            return Err(ConfigError::Invalid(
                "Database min_connections must be greater than 0".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "Database max_connections must be greater than 0".to_string(),
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid(
                "Database min_connections cannot be greater than max_connections".to_string(),
            ));
        }
        if self.database.connection_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "Database connection_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        self.dialect.validate()?;

        if let Some(schema) = &self.mapping.default_schema {
            if schema.is_empty() {
                return Err(ConfigError::Invalid(
                    "Mapping default_schema cannot be empty when set".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl DatabaseConfig {
    /// Create a new database configuration
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: String,
        port: u16,
        database: String,
        username: String,
        password: String,
        min_connections: u32,
        max_connections: u32,
        connection_timeout_seconds: u64,
        idle_timeout_seconds: u64,
        max_lifetime_seconds: u64,
    ) -> Self {
        Self {
            host,
            port,
            database,
            username,
            password,
            min_connections,
            max_connections,
            connection_timeout_seconds,
            idle_timeout_seconds,
            max_lifetime_seconds,
        }
    }

    /// Build connection string
    pub fn connection_string(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

impl DialectConfig {
    /// Create a dialect configuration that uses every default of `kind`
    pub fn new(kind: DialectKind) -> Self {
        Self {
            kind,
            identifier_quote: None,
            omit_identity_on_insert: None,
            stream_threshold: None,
        }
    }

    /// Override the identifier quoting character
    pub fn with_identifier_quote(mut self, quote: char) -> Self {
        self.identifier_quote = Some(quote);
        self
    }

    /// Override whether generated identity columns are left out of INSERTs
    pub fn with_omit_identity_on_insert(mut self, omit: bool) -> Self {
        self.omit_identity_on_insert = Some(omit);
        self
    }

    /// Override the streaming threshold
    pub fn with_stream_threshold(mut self, threshold: usize) -> Self {
        self.stream_threshold = Some(threshold);
        self
    }

    /// Effective identifier quote
    pub fn identifier_quote(&self) -> char {
        self.identifier_quote.unwrap_or(match self.kind {
            DialectKind::Mysql => '`',
            DialectKind::Postgres | DialectKind::Sqlite => '"',
        })
    }

    /// Effective identity-omission flag
    pub fn omit_identity_on_insert(&self) -> bool {
        self.omit_identity_on_insert.unwrap_or(true)
    }

    /// Effective streaming threshold
    pub fn stream_threshold(&self) -> usize {
        self.stream_threshold.unwrap_or(DEFAULT_STREAM_THRESHOLD)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(quote) = self.identifier_quote {
            if quote.is_alphanumeric() || quote.is_whitespace() {
                return Err(ConfigError::Invalid(format!(
                    "Dialect identifier_quote '{}' must be a punctuation character",
                    quote
                )));
            }
        }
        if self.stream_threshold == Some(0) {
            return Err(ConfigError::Invalid(
                "Dialect stream_threshold must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[database]
host = "localhost"
port = 5432
database = "shop"
username = "postgres"
password = "secret"
min_connections = 1
max_connections = 5
connection_timeout_seconds = 30
idle_timeout_seconds = 600
max_lifetime_seconds = 3600

[dialect]
kind = "mysql"
stream_threshold = 4

[mapping]
default_schema = "sales"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.database.database, "shop");
        assert_eq!(config.dialect.kind, DialectKind::Mysql);
        assert_eq!(config.dialect.identifier_quote(), '`');
        assert_eq!(config.dialect.stream_threshold(), 4);
        assert!(config.dialect.omit_identity_on_insert());
        assert_eq!(config.mapping.default_schema.as_deref(), Some("sales"));
    }

    #[test]
    fn test_dialect_and_mapping_sections_are_optional() {
        let database_only = SAMPLE.split("[dialect]").next().unwrap();
        let config = AppConfig::from_toml_str(database_only).unwrap();
        assert_eq!(config.dialect.kind, DialectKind::Postgres);
        assert_eq!(config.dialect.identifier_quote(), '"');
        assert_eq!(config.dialect.stream_threshold(), DEFAULT_STREAM_THRESHOLD);
        assert!(config.mapping.default_schema.is_none());
    }

    #[test]
    fn test_invalid_pool_bounds_rejected() {
        let broken = SAMPLE.replace("min_connections = 1", "min_connections = 9");
        let err = AppConfig::from_toml_str(&broken).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_stream_threshold_rejected() {
        let broken = SAMPLE.replace("stream_threshold = 4", "stream_threshold = 0");
        let err = AppConfig::from_toml_str(&broken).unwrap_err();
        assert!(err.to_string().contains("stream_threshold"));
    }

    #[test]
    fn test_connection_string() {
        let db = DatabaseConfig::new(
            "db".to_string(),
            5433,
            "shop".to_string(),
            "app".to_string(),
            "pw".to_string(),
            1,
            2,
            30,
            600,
            0,
        );
        assert_eq!(db.connection_string(), "postgresql://app:pw@db:5433/shop");
    }
}
