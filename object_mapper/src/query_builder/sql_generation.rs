//! SELECT rendering over a mapping
//!
//! Every builder is a pure function of its inputs: the same mapping, query
//! and dialect always yield byte-identical SQL and parameter order.

use serde_json::Value;
use std::collections::HashSet;

use crate::catalog::SchemaCatalog;
use crate::dialect::Dialect;
use crate::errors::MapperError;
use crate::mapping::{FieldNode, FieldRole, Mapping, NodeKind, TableNode};
use crate::query_builder::aggregation::Expression;
use crate::query_builder::builder::{AttributeMode, Projection, QueryBuilder};
use crate::query_builder::filter::{LogicalOperator, QueryCondition, QueryFilter, QueryOperator};
use crate::query_builder::grouping::GroupBy;
use crate::query_builder::join::JoinType;
use crate::query_builder::ordering::SortOrder;
use crate::query_builder::statement::{column_label, expression_label, Statement};

/// Collects bound values and hands out placeholders in binding order
pub(crate) struct Params<'d> {
    dialect: &'d Dialect,
    values: Vec<Value>,
}

impl<'d> Params<'d> {
    pub(crate) fn new(dialect: &'d Dialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    /// Placeholder for `value`; nulls render as a literal so they stay untyped
    pub(crate) fn bind(&mut self, value: Value) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        self.values.push(value);
        self.dialect.placeholder(self.values.len())
    }

    pub(crate) fn into_values(self) -> Vec<Value> {
        self.values
    }
}

pub struct SqlGenerator<'a> {
    pub(crate) catalog: &'a SchemaCatalog,
    pub(crate) dialect: &'a Dialect,
}

impl<'a> SqlGenerator<'a> {
    pub fn new(catalog: &'a SchemaCatalog, dialect: &'a Dialect) -> Self {
        Self { catalog, dialect }
    }

    pub(crate) fn column_ref(&self, alias: &str, column: &str) -> String {
        format!("{}.{}", alias, self.dialect.quote(column))
    }

    fn select_item(&self, alias: &str, column: &str) -> String {
        format!(
            "{} AS {}",
            self.column_ref(alias, column),
            self.dialect.quote(&column_label(alias, column))
        )
    }

    /// Per-root sort key of a page cut: the first value a root would sort by
    fn page_sort_key(&self, field: &FieldNode, order: SortOrder) -> String {
        let aggregate = match order {
            SortOrder::Asc => "MIN",
            SortOrder::Desc => "MAX",
        };
        format!("{}({})", aggregate, self.column_ref(&field.alias, &field.column))
    }

    pub(crate) fn node_table(&self, node: &TableNode) -> String {
        self.dialect.table_ref(node.schema.as_deref(), &node.table)
    }

    /// Build a SELECT over every table of `mapping`
    pub fn build_select(&self, mapping: &Mapping, query: &QueryBuilder) -> Result<Statement, MapperError> {
        let root = mapping.root()?;
        let root_id = mapping
            .id_field("")
            .ok_or_else(|| MapperError::UnknownPath(mapping.root_entity().to_string()))?;
        let mut params = Params::new(self.dialect);

        let (select_list, distinct) = self.render_projection(mapping, query, &mut params)?;

        let mut sql = format!(
            "SELECT {}{} FROM {}",
            if distinct { "DISTINCT " } else { "" },
            select_list.join(", "),
            self.render_from(mapping, query.join_type)?
        );

        if let Some(filter) = query.combined_filter() {
            let predicate = self.render_filter(mapping, &filter, &mut params)?;
            sql.push_str(" WHERE ");
            sql.push_str(&predicate);
        }

        let page_cut = matches!(query.projection, Projection::RootIds) && !query.order_by.is_empty();
        if page_cut {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.column_ref(&root_id.alias, &root_id.column));
        } else if let Some(group_by) = &query.group_by {
            sql.push_str(&self.render_group_by(mapping, group_by, &mut params)?);
        }

        if !query.order_by.is_empty() {
            let mut items = Vec::with_capacity(query.order_by.len() + 1);
            let mut has_root_id = false;
            for order in &query.order_by {
                let field = mapping.resolve_attribute(&order.path)?;
                let is_root_id = field.path.is_empty() && field.role == FieldRole::Id;
                has_root_id |= is_root_id;
                let key = if page_cut && !is_root_id {
                    self.page_sort_key(field, order.order)
                } else {
                    self.column_ref(&field.alias, &field.column)
                };
                items.push(format!("{} {}", key, order.order.to_sql()));
            }
            if !has_root_id && !matches!(query.projection, Projection::Expressions(_)) {
                items.push(format!(
                    "{} ASC",
                    self.column_ref(&root_id.alias, &root_id.column)
                ));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&items.join(", "));
        }

        let page = query.pagination;
        sql.push_str(&self.dialect.limit_clause(page.offset, page.limit));

        let mut statement = Statement::new(sql, params.into_values());
        statement.streaming = mapping.tables().len() > self.dialect.stream_threshold();
        crate::debug_log!(
            "Built SELECT for {} over {} tables: {}",
            root.table,
            mapping.tables().len(),
            statement.sql
        );
        Ok(statement)
    }

    /// `COUNT(DISTINCT root id)` under the query's filter
    pub fn build_count(&self, mapping: &Mapping, query: &QueryBuilder) -> Result<Statement, MapperError> {
        let root_id = mapping
            .id_field("")
            .ok_or_else(|| MapperError::UnknownPath(mapping.root_entity().to_string()))?;
        let count = QueryBuilder {
            projection: Projection::Expressions(vec![Expression::count(Expression::distinct(
                Expression::attr(&root_id.field),
            ))]),
            conditions: query.conditions.clone(),
            join_type: query.join_type,
            ..QueryBuilder::default()
        };
        self.build_select(mapping, &count)
    }

    fn render_projection(
        &self,
        mapping: &Mapping,
        query: &QueryBuilder,
        params: &mut Params<'_>,
    ) -> Result<(Vec<String>, bool), MapperError> {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut items = Vec::new();
        let mut push = |alias: &str, column: &str, items: &mut Vec<String>| {
            if seen.insert((alias.to_string(), column.to_string())) {
                items.push(self.select_item(alias, column));
            }
        };

        match &query.projection {
            Projection::RootRow => {
                let root = mapping.root()?;
                for column in self.entity_columns(root)? {
                    push(&root.alias, &column, &mut items);
                }
            }
            Projection::Attributes(AttributeMode::Named) => {
                for field in mapping.fields() {
                    push(&field.alias, &field.column, &mut items);
                }
            }
            Projection::Attributes(AttributeMode::Strict) => {
                for field in mapping.fields().iter().filter(|f| f.role == FieldRole::Scalar) {
                    push(&field.alias, &field.column, &mut items);
                }
            }
            Projection::Attributes(AttributeMode::Expand) => {
                for node in mapping.tables() {
                    if matches!(node.kind(), NodeKind::Root | NodeKind::Entity) {
                        for column in self.entity_columns(node)? {
                            push(&node.alias, &column, &mut items);
                        }
                    }
                    for field in mapping.fields_of(&node.path) {
                        push(&field.alias, &field.column, &mut items);
                    }
                }
            }
            Projection::RootIds => {
                let root_id = mapping
                    .id_field("")
                    .ok_or_else(|| MapperError::UnknownPath(mapping.root_entity().to_string()))?;
                push(&root_id.alias, &root_id.column, &mut items);
                // Ordered cuts group by root so a root joined to many rows
                // still counts once toward LIMIT
                for order in &query.order_by {
                    let field = mapping.resolve_attribute(&order.path)?;
                    if field.path.is_empty() && field.role == FieldRole::Id {
                        continue;
                    }
                    items.push(format!(
                        "{} AS {}",
                        self.page_sort_key(field, order.order),
                        self.dialect.quote(&column_label(&field.alias, &field.column))
                    ));
                }
                return Ok((items, query.order_by.is_empty()));
            }
            Projection::Expressions(expressions) => {
                for (index, expression) in expressions.iter().enumerate() {
                    let rendered = self.render_expression(mapping, expression, params)?;
                    items.push(format!(
                        "{} AS {}",
                        rendered,
                        self.dialect.quote(&expression_label(index))
                    ));
                }
            }
        }
        Ok((items, false))
    }

    /// Id column followed by every scalar column of the node's entity
    fn entity_columns(&self, node: &TableNode) -> Result<Vec<String>, MapperError> {
        let entity = node
            .entity
            .as_deref()
            .ok_or_else(|| MapperError::UnknownPath(node.path.clone()))?;
        let descriptor = self.catalog.entity(entity)?;
        let mut columns = vec![descriptor.id_column.clone()];
        for field in descriptor.scalar_fields() {
            if let Some(column) = self.catalog.column_for(descriptor, field) {
                columns.push(column);
            }
        }
        Ok(columns)
    }

    /// FROM clause: the root table followed by one join per node in registration order
    pub(crate) fn render_from(&self, mapping: &Mapping, join_type: JoinType) -> Result<String, MapperError> {
        let root = mapping.root()?;
        let mut from = format!("{} {}", self.node_table(root), root.alias);
        for node in mapping.tables().iter().filter(|t| !t.path.is_empty()) {
            let (Some(join_alias), Some(join_column), Some(column)) =
                (&node.join_alias, &node.join_column, &node.column)
            else {
                return Err(MapperError::configuration(format!(
                    "Table node '{}' has no join binding",
                    node.path
                )));
            };
            from.push_str(&format!(
                " {} {} {} ON {} = {}",
                join_type.to_sql(),
                self.node_table(node),
                node.alias,
                self.column_ref(join_alias, join_column),
                self.column_ref(&node.alias, column)
            ));
        }
        Ok(from)
    }

    pub(crate) fn render_filter(
        &self,
        mapping: &Mapping,
        filter: &QueryFilter,
        params: &mut Params<'_>,
    ) -> Result<String, MapperError> {
        match filter {
            QueryFilter::Condition(condition) => self.render_condition(mapping, condition, params),
            QueryFilter::Group { operator, filters } => {
                let parts = filters
                    .iter()
                    .map(|f| self.render_filter(mapping, f, params))
                    .collect::<Result<Vec<_>, _>>()?;
                let (joiner, empty) = match operator {
                    LogicalOperator::And => (" AND ", "1=1"),
                    LogicalOperator::Or => (" OR ", "1=0"),
                };
                Ok(match parts.len() {
                    0 => empty.to_string(),
                    1 => parts[0].clone(),
                    _ => format!("({})", parts.join(joiner)),
                })
            }
        }
    }

    fn render_condition(
        &self,
        mapping: &Mapping,
        condition: &QueryCondition,
        params: &mut Params<'_>,
    ) -> Result<String, MapperError> {
        let field = mapping.resolve_attribute(&condition.field)?;
        let column = self.column_ref(&field.alias, &field.column);

        if field.encryption_key.is_some() && condition.operator.needs_plaintext() {
            return Err(MapperError::UnsupportedOperator {
                field: condition.field.clone(),
                operator: condition.operator.as_str().to_string(),
            });
        }

        let value = condition.value.as_ref().unwrap_or(&Value::Null);
        match condition.operator {
            QueryOperator::IsNull => Ok(format!("{} IS NULL", column)),
            QueryOperator::IsNotNull => Ok(format!("{} IS NOT NULL", column)),
            QueryOperator::Eq if value.is_null() => Ok(format!("{} IS NULL", column)),
            QueryOperator::Ne if value.is_null() => Ok(format!("{} IS NOT NULL", column)),
            QueryOperator::In | QueryOperator::NotIn => {
                let values = match value {
                    Value::Array(values) => values.clone(),
                    Value::Null => Vec::new(),
                    other => vec![other.clone()],
                };
                let negated = condition.operator == QueryOperator::NotIn;
                if values.is_empty() {
                    return Ok(if negated { "1=1" } else { "1=0" }.to_string());
                }
                let placeholders = values
                    .iter()
                    .map(|v| self.encode_operand(field, v).map(|e| params.bind(e)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!(
                    "{} {} ({})",
                    column,
                    if negated { "NOT IN" } else { "IN" },
                    placeholders.join(", ")
                ))
            }
            QueryOperator::Like => {
                if value.is_null() {
                    return Err(MapperError::configuration(format!(
                        "LIKE on '{}' needs a pattern",
                        condition.field
                    )));
                }
                Ok(format!("{} LIKE {}", column, params.bind(value.clone())))
            }
            operator => {
                let token = operator.comparison().unwrap_or("=");
                if value.is_null() {
                    return Err(MapperError::configuration(format!(
                        "{} on '{}' needs a value",
                        operator.as_str(),
                        condition.field
                    )));
                }
                let encoded = self.encode_operand(field, value)?;
                Ok(format!("{} {} {}", column, token, params.bind(encoded)))
            }
        }
    }

    fn encode_operand(&self, field: &FieldNode, value: &Value) -> Result<Value, MapperError> {
        self.catalog.encode(
            &field.field,
            field.converter.as_deref(),
            field.encryption_key.as_deref(),
            value,
        )
    }

    fn render_group_by(
        &self,
        mapping: &Mapping,
        group_by: &GroupBy,
        params: &mut Params<'_>,
    ) -> Result<String, MapperError> {
        let mut sql = String::new();
        if !group_by.paths.is_empty() {
            let columns = group_by
                .paths
                .iter()
                .map(|path| {
                    mapping
                        .resolve_attribute(path)
                        .map(|f| self.column_ref(&f.alias, &f.column))
                })
                .collect::<Result<Vec<_>, _>>()?;
            sql.push_str(" GROUP BY ");
            sql.push_str(&columns.join(", "));
        }
        if group_by.has_having() {
            let mut conditions = Vec::new();
            for condition in group_by.having.iter().flatten() {
                let expression = self.render_expression(mapping, &condition.expression, params)?;
                let rendered = match (condition.operator, condition.value.as_ref()) {
                    (QueryOperator::IsNull, _) => format!("{} IS NULL", expression),
                    (QueryOperator::IsNotNull, _) => format!("{} IS NOT NULL", expression),
                    (operator, Some(value)) => {
                        let token = operator.comparison().ok_or_else(|| {
                            MapperError::configuration(format!(
                                "{} is not supported in HAVING",
                                operator.as_str()
                            ))
                        })?;
                        format!("{} {} {}", expression, token, params.bind(value.clone()))
                    }
                    (operator, None) => {
                        return Err(MapperError::configuration(format!(
                            "HAVING {} needs a value",
                            operator.as_str()
                        )));
                    }
                };
                conditions.push(rendered);
            }
            sql.push_str(" HAVING ");
            sql.push_str(&conditions.join(" AND "));
        }
        Ok(sql)
    }

    pub(crate) fn render_expression(
        &self,
        mapping: &Mapping,
        expression: &Expression,
        params: &mut Params<'_>,
    ) -> Result<String, MapperError> {
        Ok(match expression {
            Expression::Attribute(path) => {
                let field = mapping.resolve_attribute(path)?;
                self.column_ref(&field.alias, &field.column)
            }
            Expression::Constant(value) => match value {
                Value::Number(n) => n.to_string(),
                Value::Bool(true) => "TRUE".to_string(),
                Value::Bool(false) => "FALSE".to_string(),
                other => params.bind(other.clone()),
            },
            Expression::CountAll => "COUNT(*)".to_string(),
            Expression::Aggregate { function, argument } => format!(
                "{}({})",
                function.to_sql(),
                self.render_expression(mapping, argument, params)?
            ),
            Expression::Distinct(argument) => {
                format!("DISTINCT {}", self.render_expression(mapping, argument, params)?)
            }
            Expression::Coalesce(arguments) => format!(
                "COALESCE({})",
                self.render_list(mapping, arguments, params)?.join(", ")
            ),
            Expression::Concat(arguments) => {
                let parts = self.render_list(mapping, arguments, params)?;
                self.dialect.concat(&parts)
            }
            Expression::Arithmetic {
                operator,
                left,
                right,
            } => format!(
                "({} {} {})",
                self.render_expression(mapping, left, params)?,
                operator.to_sql(),
                self.render_expression(mapping, right, params)?
            ),
            Expression::DatePart { part, argument } => {
                let inner = self.render_expression(mapping, argument, params)?;
                self.dialect.date_part(*part, &inner)
            }
        })
    }

    fn render_list(
        &self,
        mapping: &Mapping,
        expressions: &[Expression],
        params: &mut Params<'_>,
    ) -> Result<Vec<String>, MapperError> {
        expressions
            .iter()
            .map(|e| self.render_expression(mapping, e, params))
            .collect()
    }
}
