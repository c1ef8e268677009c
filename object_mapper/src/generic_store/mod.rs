pub mod core;
pub mod graph_store;

pub use self::core::{EntityStore, LoadedGraph};
