//! Query builder utilities
//!
//! Filters, orderings and projections over attribute paths, rendered to SQL
//! against a [`Mapping`](crate::mapping::Mapping) by [`SqlGenerator`].

pub mod aggregation;
pub mod builder;
pub mod filter;
pub mod grouping;
pub mod join;
pub mod ordering;
pub mod pagination;
pub mod sql_generation;
pub mod statement;
pub mod update;
pub mod write_generation;


pub use aggregation::{AggregateFunction, ArithmeticOperator, DatePart, Expression};
pub use builder::{AttributeMode, Projection, QueryBuilder};
pub use filter::{LogicalOperator, QueryCondition, QueryFilter, QueryOperator};
pub use grouping::{GroupBy, HavingCondition};
pub use join::JoinType;
pub use ordering::{OrderBy, SortOrder};
pub use pagination::Pagination;
pub use sql_generation::SqlGenerator;
pub use statement::{column_label, expression_label, Statement};
pub use update::{UpdateOperation, UpdateSet};
pub use write_generation::{CollectionRow, RowValues};
