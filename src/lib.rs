//! # RelHaus
//!
//! An object-relational mapping engine for entity graphs. Entities and their
//! relationships are declared at runtime in a [`SchemaCatalog`]; reads join
//! every requested attribute path into one statement and rebuild the graph
//! from the rows, writes diff the graph against its loaded snapshot.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relhaus::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = SchemaCatalog::builder()
//!         .entity(
//!             EntityDescriptor::builder("Customer")
//!                 .table("customers")
//!                 .scalar("name", "name")
//!                 .build()?,
//!         )
//!         .build()?;
//!
//!     let config = AppConfig::load()?;
//!     let relhaus = RelHaus::new(&config, catalog).await?;
//!     let customers = relhaus.store("Customer")?;
//!
//!     let mut graph = ObjectGraph::new();
//!     let ada = graph.add(Entity::new("Customer").with("name", "Ada"));
//!     customers.persist(&mut graph, ada).await?;
//!
//!     let id = graph.get(ada).id().cloned().unwrap_or(Value::Null);
//!     if let Some(loaded) = customers.find_by_id(&id, &["name"]).await? {
//!         println!("{}", loaded.to_json());
//!     }
//!     Ok(())
//! }
//! ```

/// Conditional debug logging macros
/// These macros only compile in code when the `debug-logging` feature is enabled
#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

pub mod core;
pub mod errors;
pub mod prelude;

// Re-export the main public types for convenience
pub use self::core::RelHaus;
pub use errors::RelHausError;

// Re-export centralized config
pub use config::{AppConfig, DatabaseConfig, DialectConfig, DialectKind, MappingConfig};

// Re-export internal crates used by the public API
pub use object_mapper;
pub use type_mapping;

// Re-export external dependencies used in public API
pub use async_trait;
pub use sqlx;
