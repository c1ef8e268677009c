//! Computed projection expressions

use serde_json::Value;

/// Represents SQL aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn to_sql(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ArithmeticOperator {
    pub fn to_sql(&self) -> &'static str {
        match self {
            ArithmeticOperator::Add => "+",
            ArithmeticOperator::Subtract => "-",
            ArithmeticOperator::Multiply => "*",
            ArithmeticOperator::Divide => "/",
        }
    }
}

/// Calendar component extracted from a timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Year,
    Month,
    Day,
    Hour,
    /// Monday = 0 .. Sunday = 6 on every dialect
    Weekday,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Column bound to an attribute path
    Attribute(String),
    /// Numbers and booleans render inline, other values bind as parameters
    Constant(Value),
    CountAll,
    Aggregate {
        function: AggregateFunction,
        argument: Box<Expression>,
    },
    /// DISTINCT modifier, meaningful inside an aggregate
    Distinct(Box<Expression>),
    Coalesce(Vec<Expression>),
    Concat(Vec<Expression>),
    Arithmetic {
        operator: ArithmeticOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    DatePart {
        part: DatePart,
        argument: Box<Expression>,
    },
}

impl Expression {
    pub fn attr(path: &str) -> Self {
        Expression::Attribute(path.to_string())
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Expression::Constant(value.into())
    }

    pub fn count_all() -> Self {
        Expression::CountAll
    }

    fn aggregate(function: AggregateFunction, argument: Expression) -> Self {
        Expression::Aggregate {
            function,
            argument: Box::new(argument),
        }
    }

    pub fn count(argument: Expression) -> Self {
        Self::aggregate(AggregateFunction::Count, argument)
    }

    pub fn sum(argument: Expression) -> Self {
        Self::aggregate(AggregateFunction::Sum, argument)
    }

    pub fn avg(argument: Expression) -> Self {
        Self::aggregate(AggregateFunction::Avg, argument)
    }

    pub fn min(argument: Expression) -> Self {
        Self::aggregate(AggregateFunction::Min, argument)
    }

    pub fn max(argument: Expression) -> Self {
        Self::aggregate(AggregateFunction::Max, argument)
    }

    pub fn distinct(argument: Expression) -> Self {
        Expression::Distinct(Box::new(argument))
    }

    pub fn coalesce(arguments: Vec<Expression>) -> Self {
        Expression::Coalesce(arguments)
    }

    pub fn concat(arguments: Vec<Expression>) -> Self {
        Expression::Concat(arguments)
    }

    fn arithmetic(operator: ArithmeticOperator, left: Expression, right: Expression) -> Self {
        Expression::Arithmetic {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn add(left: Expression, right: Expression) -> Self {
        Self::arithmetic(ArithmeticOperator::Add, left, right)
    }

    pub fn subtract(left: Expression, right: Expression) -> Self {
        Self::arithmetic(ArithmeticOperator::Subtract, left, right)
    }

    pub fn multiply(left: Expression, right: Expression) -> Self {
        Self::arithmetic(ArithmeticOperator::Multiply, left, right)
    }

    pub fn divide(left: Expression, right: Expression) -> Self {
        Self::arithmetic(ArithmeticOperator::Divide, left, right)
    }

    pub fn date_part(part: DatePart, argument: Expression) -> Self {
        Expression::DatePart {
            part,
            argument: Box::new(argument),
        }
    }

    pub fn year(argument: Expression) -> Self {
        Self::date_part(DatePart::Year, argument)
    }

    pub fn month(argument: Expression) -> Self {
        Self::date_part(DatePart::Month, argument)
    }

    pub fn day(argument: Expression) -> Self {
        Self::date_part(DatePart::Day, argument)
    }

    pub fn hour(argument: Expression) -> Self {
        Self::date_part(DatePart::Hour, argument)
    }

    pub fn weekday(argument: Expression) -> Self {
        Self::date_part(DatePart::Weekday, argument)
    }

    /// Attribute paths used anywhere in the tree, in rendering order
    pub fn attribute_paths(&self) -> Vec<&str> {
        match self {
            Expression::Attribute(path) => vec![path.as_str()],
            Expression::Constant(_) | Expression::CountAll => Vec::new(),
            Expression::Aggregate { argument, .. }
            | Expression::Distinct(argument)
            | Expression::DatePart { argument, .. } => argument.attribute_paths(),
            Expression::Coalesce(arguments) | Expression::Concat(arguments) => {
                arguments.iter().flat_map(|a| a.attribute_paths()).collect()
            }
            Expression::Arithmetic { left, right, .. } => {
                let mut paths = left.attribute_paths();
                paths.extend(right.attribute_paths());
                paths
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_aggregate_function_to_sql() {
        assert_eq!(AggregateFunction::Count.to_sql(), "COUNT");
        assert_eq!(AggregateFunction::Sum.to_sql(), "SUM");
        assert_eq!(AggregateFunction::Avg.to_sql(), "AVG");
        assert_eq!(AggregateFunction::Min.to_sql(), "MIN");
        assert_eq!(AggregateFunction::Max.to_sql(), "MAX");
    }

    #[test]
    fn test_attribute_paths_walks_whole_tree() {
        let expr = Expression::coalesce(vec![
            Expression::sum(Expression::multiply(
                Expression::attr("items.qty"),
                Expression::attr("items.price"),
            )),
            Expression::constant(json!(0)),
        ]);
        assert_eq!(expr.attribute_paths(), vec!["items.qty", "items.price"]);
        assert!(Expression::count_all().attribute_paths().is_empty());
    }
}
