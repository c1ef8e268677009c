use serde_json::Value;

use super::aggregation::Expression;
use super::filter::QueryOperator;

/// Condition on an aggregate in the HAVING clause
#[derive(Debug, Clone, PartialEq)]
pub struct HavingCondition {
    pub expression: Expression,
    pub operator: QueryOperator,
    pub value: Option<Value>,
}

/// Represents a GROUP BY clause with optional HAVING conditions
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    /// Attribute paths to group by
    pub paths: Vec<String>,
    pub having: Option<Vec<HavingCondition>>,
}

impl GroupBy {
    pub fn new(paths: Vec<String>) -> Self {
        Self {
            paths,
            having: None,
        }
    }

    pub fn single(path: impl Into<String>) -> Self {
        Self {
            paths: vec![path.into()],
            having: None,
        }
    }

    /// Add a single HAVING condition
    pub fn having(mut self, expression: Expression, operator: QueryOperator, value: Value) -> Self {
        let condition = HavingCondition {
            expression,
            operator,
            value: Some(value),
        };
        match &mut self.having {
            Some(conditions) => conditions.push(condition),
            None => self.having = Some(vec![condition]),
        }
        self
    }

    pub fn has_having(&self) -> bool {
        self.having
            .as_ref()
            .map(|h| !h.is_empty())
            .unwrap_or(false)
    }

    /// Attribute paths referenced by the grouping and its HAVING conditions
    pub fn referenced_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.paths.iter().map(String::as_str).collect();
        for condition in self.having.iter().flatten() {
            paths.extend(condition.expression.attribute_paths());
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_group_by_single() {
        let group_by = GroupBy::single("status");
        assert_eq!(group_by.paths, vec!["status".to_string()]);
        assert!(!group_by.has_having());
    }

    #[test]
    fn test_group_by_having_chain() {
        let group_by = GroupBy::single("customer.name")
            .having(Expression::count_all(), QueryOperator::Gt, json!(5))
            .having(Expression::sum(Expression::attr("items.qty")), QueryOperator::Lt, json!(100));

        assert!(group_by.has_having());
        assert_eq!(group_by.having.as_ref().unwrap().len(), 2);
        assert_eq!(group_by.referenced_paths(), vec!["customer.name", "items.qty"]);
    }

    #[test]
    fn test_has_having_empty() {
        let group_by = GroupBy {
            paths: vec!["status".to_string()],
            having: Some(vec![]),
        };
        assert!(!group_by.has_having());
    }
}
