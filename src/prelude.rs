//! Convenience re-exports for common RelHaus usage
//!
//! ```rust
//! use relhaus::prelude::*;
//! ```

// Core RelHaus components
pub use crate::core::RelHaus;
pub use crate::errors::RelHausError;

// Re-export centralized config
pub use config::{AppConfig, DatabaseConfig, DialectConfig, DialectKind, MappingConfig};

// Mapper types: catalog, graph, stores and queries
pub use object_mapper::prelude::*;
pub use object_mapper::{ConnectionSource, Dialect, PgConnectionSource, SqlRow};

// Common external dependencies
pub use async_trait;
pub use sqlx;
pub use tokio;

pub use sqlx::PgPool;
