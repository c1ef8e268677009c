//! Traits for database operations
//!
//! This module contains the traits that define the store interface of the
//! object mapper.

pub mod core;

pub use self::core::GraphStore;
