//! Fluent description of a SELECT over a mapping

use crate::query_builder::aggregation::Expression;
use crate::query_builder::filter::QueryFilter;
use crate::query_builder::grouping::GroupBy;
use crate::query_builder::join::JoinType;
use crate::query_builder::ordering::{OrderBy, SortOrder};
use crate::query_builder::pagination::Pagination;

/// Which attribute columns an attribute projection selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributeMode {
    /// Every registered field node (ids, scalars and binding columns)
    #[default]
    Named,
    /// Every column of every touched entity table
    Expand,
    /// Only the explicitly registered scalar fields
    Strict,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Id and every scalar column of the root table
    RootRow,
    Attributes(AttributeMode),
    /// Distinct root ids plus the ordering columns
    RootIds,
    Expressions(Vec<Expression>),
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Attributes(AttributeMode::Named)
    }
}

/// Query builder for constructing complex database queries
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    pub(crate) projection: Projection,
    pub(crate) conditions: Vec<QueryFilter>,
    pub(crate) order_by: Vec<OrderBy>,
    pub(crate) group_by: Option<GroupBy>,
    pub(crate) pagination: Pagination,
    pub(crate) join_type: JoinType,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Add a filter condition
    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.conditions.push(filter);
        self
    }

    /// Add multiple filters (combined with AND)
    pub fn filters(mut self, filters: Vec<QueryFilter>) -> Self {
        self.conditions.extend(filters);
        self
    }

    /// Add ordering on an attribute path
    pub fn order_by(mut self, path: &str, order: SortOrder) -> Self {
        self.order_by.push(OrderBy {
            path: path.to_string(),
            order,
        });
        self
    }

    pub fn group_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = Some(group_by);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.pagination.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.pagination.offset = Some(offset);
        self
    }

    pub fn paginate(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn join_type(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }

    /// Conditions combined with AND, or `None` when there are none
    pub fn combined_filter(&self) -> Option<QueryFilter> {
        match self.conditions.len() {
            0 => None,
            1 => Some(self.conditions[0].clone()),
            _ => Some(QueryFilter::and(self.conditions.clone())),
        }
    }

    /// Attribute paths the mapping must bind before the query can be rendered
    pub fn referenced_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        for filter in &self.conditions {
            paths.extend(filter.paths().into_iter().map(str::to_string));
        }
        paths.extend(self.order_by.iter().map(|o| o.path.clone()));
        if let Some(group_by) = &self.group_by {
            paths.extend(group_by.referenced_paths().into_iter().map(str::to_string));
        }
        if let Projection::Expressions(expressions) = &self.projection {
            for expression in expressions {
                paths.extend(expression.attribute_paths().into_iter().map(str::to_string));
            }
        }
        paths
    }

    pub fn pagination(&self) -> Pagination {
        self.pagination
    }

    pub fn orderings(&self) -> &[OrderBy] {
        &self.order_by
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_referenced_paths() {
        let query = QueryBuilder::new()
            .filter(QueryFilter::eq("customer.name", json!("Ada")))
            .order_by("number", SortOrder::Desc)
            .projection(Projection::Expressions(vec![Expression::sum(Expression::attr(
                "items.qty",
            ))]));
        assert_eq!(
            query.referenced_paths(),
            vec!["customer.name", "number", "items.qty"]
        );
    }

    #[test]
    fn test_combined_filter() {
        assert!(QueryBuilder::new().combined_filter().is_none());
        let query = QueryBuilder::new()
            .filter(QueryFilter::eq("a", json!(1)))
            .filter(QueryFilter::eq("b", json!(2)));
        assert!(matches!(query.combined_filter(), Some(QueryFilter::Group { .. })));
    }
}
