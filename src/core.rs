//! Core RelHaus functionality
//!
//! This module contains the main RelHaus struct, which owns the connection pool,
//! the schema catalog and the dialect, and hands out per-entity stores.

use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::RelHausError;
use config::{AppConfig, DatabaseConfig};
use object_mapper::{ConnectionSource, Dialect, EntityStore, PgConnectionSource, SchemaCatalog};

/// Main RelHaus coordinator
pub struct RelHaus {
    pool: PgPool,
    catalog: Arc<SchemaCatalog>,
    dialect: Dialect,
    source: Arc<dyn ConnectionSource>,
}

impl RelHaus {
    /// Connect using the database and dialect sections of `config`
    pub async fn new(config: &AppConfig, catalog: SchemaCatalog) -> Result<Self, RelHausError> {
        let pool = Self::connect(&config.database).await?;
        Ok(Self::with_pool(pool, catalog, Dialect::from_config(&config.dialect)))
    }

    /// Wrap an existing pool
    pub fn with_pool(pool: PgPool, catalog: SchemaCatalog, dialect: Dialect) -> Self {
        let source: Arc<dyn ConnectionSource> = Arc::new(PgConnectionSource::new(pool.clone()));
        Self {
            pool,
            catalog: Arc::new(catalog),
            dialect,
            source,
        }
    }

    async fn connect(config: &DatabaseConfig) -> Result<PgPool, RelHausError> {
        let connection_string = config.connection_string();

        let mut pool_options = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds));

        if config.max_lifetime_seconds > 0 {
            pool_options =
                pool_options.max_lifetime(Duration::from_secs(config.max_lifetime_seconds));
        }

        let pool = pool_options.connect(&connection_string).await?;
        tracing::info!(
            host = %config.host,
            database = %config.database,
            "connected to database"
        );
        Ok(pool)
    }

    /// Get database pool reference
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// Store for the entity type `entity`; fails when the catalog does not declare it
    pub fn store(&self, entity: &str) -> Result<EntityStore, RelHausError> {
        crate::debug_log!("creating store for entity {}", entity);
        Ok(EntityStore::new(
            entity,
            self.catalog.clone(),
            self.dialect.clone(),
            self.source.clone(),
        )?)
    }

    /// Check database connection health
    pub async fn health_check(&self) -> Result<(), RelHausError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
