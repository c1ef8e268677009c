//! Error types for the RelHaus crate
//!
//! This module contains all error types that can be returned by RelHaus operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelHausError {
    #[error("Database connection error: {0}")]
    DatabaseConnection(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Mapper error: {0}")]
    Mapper(#[from] object_mapper::MapperError),
}
