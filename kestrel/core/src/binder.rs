// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! The binder: parsed AST to typed logical plan.
//!
//! Dataset references resolve through the catalog, column references
//! resolve to stable 64-bit identities (ambiguous or unknown names fail
//! with suggestions), aliases rewrite downstream references, types are
//! inferred for projections and constants, and function calls resolve
//! against the registry. Parameters substitute here: positional `?` in
//! order, named `:name` by lookup; any mismatch is a `ParameterError`.
//!
//! Uncorrelated `IN (SELECT …)` and `NOT IN (SELECT …)` lower to semi and
//! null-aware anti joins during binding, so the optimizer sees plain join
//! shapes.

use std::collections::HashMap;

use arrow::datatypes::DataType;
use kestrel_common::error::{Error, Result};
use kestrel_common::stats::RelationStatistics;
use kestrel_expr::expr::{AggregateKind, Expr, Operator};
use kestrel_expr::logical::*;
use kestrel_expr::registry::FunctionRegistry;
use kestrel_expr::schema::{ColumnDef, ColumnId, RelationSchema};
use kestrel_expr::value::Value;
use sqlparser::ast;

use crate::catalog::Catalog;

/// Query parameters supplied by the caller.
#[derive(Debug, Clone, Default)]
pub enum Params {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(HashMap<String, Value>),
}

struct ParamState {
    params: Params,
    positional_cursor: usize,
}

impl ParamState {
    fn next_positional(&mut self) -> Result<Value> {
        match &self.params {
            Params::Positional(values) => {
                let value = values.get(self.positional_cursor).cloned().ok_or_else(|| {
                    Error::Parameter(format!(
                        "statement expects more than {} positional parameters",
                        values.len()
                    ))
                })?;
                self.positional_cursor += 1;
                Ok(value)
            }
            _ => Err(Error::Parameter(
                "statement uses positional placeholders but no positional parameters were supplied"
                    .to_string(),
            )),
        }
    }

    fn named(&self, name: &str) -> Result<Value> {
        match &self.params {
            Params::Named(values) => values.get(name).cloned().ok_or_else(|| {
                Error::Parameter(format!("no value supplied for parameter ':{name}'"))
            }),
            _ => Err(Error::Parameter(
                "statement uses named placeholders but no named parameters were supplied"
                    .to_string(),
            )),
        }
    }

    fn finish(&self) -> Result<()> {
        if let Params::Positional(values) = &self.params {
            if self.positional_cursor != values.len() {
                return Err(Error::Parameter(format!(
                    "{} positional parameters supplied but the statement uses {}",
                    values.len(),
                    self.positional_cursor
                )));
            }
        }
        Ok(())
    }
}

/// Binds one statement into a logical plan.
pub struct Binder<'a> {
    catalog: &'a dyn Catalog,
    registry: &'a FunctionRegistry,
    params: ParamState,
    next_column_id: ColumnId,
}

impl<'a> Binder<'a> {
    pub fn new(catalog: &'a dyn Catalog, registry: &'a FunctionRegistry, params: Params) -> Self {
        Self {
            catalog,
            registry,
            params: ParamState {
                params,
                positional_cursor: 0,
            },
            next_column_id: 1,
        }
    }

    fn fresh_id(&mut self) -> ColumnId {
        let id = self.next_column_id;
        self.next_column_id += 1;
        id
    }

    pub fn bind(mut self, statement: ast::Statement) -> Result<LogicalPlan> {
        let mut plan = LogicalPlan::new();
        match statement {
            ast::Statement::Query(query) => {
                self.bind_query(&mut plan, *query)?;
            }
            ast::Statement::Explain {
                statement, analyze, ..
            } => {
                if analyze {
                    return Err(Error::UnsupportedSyntax(
                        "EXPLAIN ANALYZE is not supported".to_string(),
                    ));
                }
                let inner = match *statement {
                    ast::Statement::Query(query) => query,
                    other => {
                        return Err(Error::UnsupportedSyntax(format!(
                            "EXPLAIN of {other} is not supported"
                        )))
                    }
                };
                let (child, _) = self.bind_query(&mut plan, *inner)?;
                let schema = RelationSchema::new(vec![ColumnDef::new(
                    self.fresh_id(),
                    "plan",
                    DataType::Utf8,
                )]);
                let explain = plan.push(LogicalNode::Explain(ExplainNode { schema }));
                plan.graph.add_edge(child, explain);
            }
            ast::Statement::SetVariable {
                variables, value, ..
            } => {
                let variable = match &variables {
                    ast::OneOrManyWithParens::One(name) => name.to_string(),
                    _ => {
                        return Err(Error::UnsupportedSyntax(
                            "SET supports a single variable".to_string(),
                        ))
                    }
                };
                let value = match value.first() {
                    Some(expr) => match self.bind_expr(expr, &RelationSchema::empty())? {
                        Expr::Literal(value) => value,
                        _ => {
                            return Err(Error::UnsupportedSyntax(
                                "SET values must be literals".to_string(),
                            ))
                        }
                    },
                    None => Value::Null,
                };
                plan.push(LogicalNode::Set(SetNode { variable, value }));
            }
            ast::Statement::ShowColumns { table_name, .. } => {
                self.bind_show_columns(&mut plan, &table_name.to_string())?;
            }
            other => {
                return Err(Error::UnsupportedSyntax(format!(
                    "statement type is not supported: {}",
                    statement_kind(&other)
                )))
            }
        }
        self.params.finish()?;
        plan.validate()?;
        Ok(plan)
    }

    fn bind_show_columns(&mut self, plan: &mut LogicalPlan, dataset: &str) -> Result<()> {
        let source = self.catalog.dataset(dataset)?;
        let source_schema = source.schema();
        let rows: Vec<Vec<Value>> = source_schema
            .fields()
            .iter()
            .map(|field| {
                vec![
                    Value::Utf8(field.name().clone()),
                    Value::Utf8(field.data_type().to_string()),
                    Value::Utf8(if field.is_nullable() { "YES" } else { "NO" }.to_string()),
                ]
            })
            .collect();
        let schema = RelationSchema::new(vec![
            ColumnDef::new(self.fresh_id(), "name", DataType::Utf8),
            ColumnDef::new(self.fresh_id(), "type", DataType::Utf8),
            ColumnDef::new(self.fresh_id(), "nullable", DataType::Utf8),
        ]);
        plan.push(LogicalNode::Show(ShowNode {
            variant: ShowVariant::Columns {
                dataset: dataset.to_string(),
            },
            schema,
            rows,
        }));
        Ok(())
    }

    /// Bind a query; returns the plan node id and its schema.
    fn bind_query(
        &mut self,
        plan: &mut LogicalPlan,
        query: ast::Query,
    ) -> Result<(String, RelationSchema)> {
        if query.with.is_some() {
            return Err(Error::UnsupportedSyntax(
                "common table expressions are not supported".to_string(),
            ));
        }
        let order_exprs: Vec<ast::OrderByExpr> = query.order_by.clone();

        let (mut node, mut schema) = match *query.body {
            // SELECT handles ORDER BY itself so keys can reference columns
            // the projection drops
            ast::SetExpr::Select(select) => self.bind_select(plan, *select, &order_exprs)?,
            other => {
                let (mut node, schema) = self.bind_set_expr(plan, other)?;
                if !order_exprs.is_empty() {
                    let keys = self.bind_order_by(&order_exprs, &schema)?;
                    let sort = plan.push(LogicalNode::Sort(SortNode {
                        keys,
                        limit: None,
                        schema: schema.clone(),
                    }));
                    plan.graph.add_edge(node, sort.clone());
                    node = sort;
                }
                (node, schema)
            }
        };

        let limit = query
            .limit
            .as_ref()
            .map(|expr| self.bind_count(expr, "LIMIT"))
            .transpose()?;
        let offset = query
            .offset
            .as_ref()
            .map(|offset| self.bind_count(&offset.value, "OFFSET"))
            .transpose()?
            .unwrap_or(0);
        if limit.is_some() || offset > 0 {
            let limit_node = plan.push(LogicalNode::Limit(LimitNode {
                limit,
                offset,
                schema: schema.clone(),
            }));
            plan.graph.add_edge(node, limit_node.clone());
            node = limit_node;
        }

        schema = plan
            .node(&node)
            .map(|n| n.schema())
            .unwrap_or_else(|| schema.clone());
        Ok((node, schema))
    }

    fn bind_count(&mut self, expr: &ast::Expr, clause: &str) -> Result<usize> {
        match self.bind_expr(expr, &RelationSchema::empty())? {
            Expr::Literal(Value::Int64(n)) if n >= 0 => Ok(n as usize),
            other => Err(Error::InvalidSyntax(format!(
                "{clause} must be a non-negative integer, got {other}"
            ))),
        }
    }

    fn bind_set_expr(
        &mut self,
        plan: &mut LogicalPlan,
        body: ast::SetExpr,
    ) -> Result<(String, RelationSchema)> {
        match body {
            ast::SetExpr::Select(select) => self.bind_select(plan, *select, &[]),
            ast::SetExpr::Query(query) => self.bind_query(plan, *query),
            ast::SetExpr::Values(values) => self.bind_values(plan, values, None),
            ast::SetExpr::SetOperation {
                op: ast::SetOperator::Union,
                set_quantifier,
                left,
                right,
            } => self.bind_union(plan, *left, *right, set_quantifier),
            other => Err(Error::UnsupportedSyntax(format!(
                "query body is not supported: {other}"
            ))),
        }
    }

    fn bind_union(
        &mut self,
        plan: &mut LogicalPlan,
        left: ast::SetExpr,
        right: ast::SetExpr,
        quantifier: ast::SetQuantifier,
    ) -> Result<(String, RelationSchema)> {
        let all = matches!(
            quantifier,
            ast::SetQuantifier::All | ast::SetQuantifier::AllByName
        );
        let (left_node, left_schema) = self.bind_set_expr(plan, left)?;
        let (right_node, right_schema) = self.bind_set_expr(plan, right)?;
        if left_schema.len() != right_schema.len() {
            return Err(Error::InvalidSyntax(format!(
                "UNION branches have {} and {} columns",
                left_schema.len(),
                right_schema.len()
            )));
        }

        // both branches project onto one shared set of output identities
        let output: Vec<ColumnDef> = left_schema
            .columns()
            .iter()
            .map(|column| {
                ColumnDef::new(self.fresh_id(), column.name.clone(), column.data_type.clone())
            })
            .collect();
        let union_schema = RelationSchema::new(output);

        let mut align = |branch: &str, branch_schema: &RelationSchema| -> String {
            let exprs: Vec<Expr> = branch_schema
                .columns()
                .iter()
                .map(|c| Expr::column(c.id, c.name.clone()))
                .collect();
            let project = plan.push(LogicalNode::Project(ProjectNode {
                exprs,
                schema: union_schema.clone(),
            }));
            plan.graph.add_edge(branch, project.clone());
            project
        };
        let left_aligned = align(&left_node, &left_schema);
        let right_aligned = align(&right_node, &right_schema);

        let union = plan.push(LogicalNode::Union(UnionNode {
            all,
            schema: union_schema.clone(),
        }));
        plan.graph.add_edge(left_aligned, union.clone());
        plan.graph.add_edge(right_aligned, union.clone());

        if all {
            return Ok((union, union_schema));
        }
        let distinct = plan.push(LogicalNode::Distinct(DistinctNode {
            schema: union_schema.clone(),
        }));
        plan.graph.add_edge(union, distinct.clone());
        Ok((distinct, union_schema))
    }

    fn bind_values(
        &mut self,
        plan: &mut LogicalPlan,
        values: ast::Values,
        alias: Option<&ast::TableAlias>,
    ) -> Result<(String, RelationSchema)> {
        let mut rows: Vec<Vec<Value>> = Vec::with_capacity(values.rows.len());
        for row in &values.rows {
            let mut bound = Vec::with_capacity(row.len());
            for cell in row {
                match self.bind_expr(cell, &RelationSchema::empty())? {
                    Expr::Literal(value) => bound.push(value),
                    other => {
                        return Err(Error::UnsupportedSyntax(format!(
                            "VALUES cells must be literals, got {other}"
                        )))
                    }
                }
            }
            rows.push(bound);
        }
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|row| row.len() != width) {
            return Err(Error::InvalidSyntax(
                "VALUES rows have unequal arity".to_string(),
            ));
        }

        let relation = alias.map(|a| a.name.value.clone());
        let mut columns = Vec::with_capacity(width);
        for ordinal in 0..width {
            let name = alias
                .and_then(|a| a.columns.get(ordinal))
                .map(|ident| ident.value.clone())
                .unwrap_or_else(|| format!("col{}", ordinal + 1));
            let data_type = rows
                .iter()
                .map(|row| &row[ordinal])
                .find(|value| !value.is_null())
                .map(Value::data_type)
                .unwrap_or(DataType::Null);
            let mut column = ColumnDef::new(self.fresh_id(), name, data_type);
            if let Some(relation) = &relation {
                column = column.with_relation(relation.clone());
            }
            columns.push(column);
        }
        let schema = RelationSchema::new(columns);
        let node = plan.push(LogicalNode::Values(ValuesNode {
            rows,
            schema: schema.clone(),
        }));
        Ok((node, schema))
    }

    fn bind_select(
        &mut self,
        plan: &mut LogicalPlan,
        select: ast::Select,
        order_exprs: &[ast::OrderByExpr],
    ) -> Result<(String, RelationSchema)> {
        // FROM: relations and joins, cross-joining multiple FROM items
        let (mut node, mut scope) = match select.from.len() {
            0 => {
                // SELECT without FROM is a single-row VALUES
                let schema = RelationSchema::empty();
                let values = plan.push(LogicalNode::Values(ValuesNode {
                    rows: vec![vec![]],
                    schema: schema.clone(),
                }));
                (values, schema)
            }
            _ => {
                let mut bound: Option<(String, RelationSchema)> = None;
                for table in &select.from {
                    let (node, schema) = self.bind_table_with_joins(plan, table)?;
                    bound = Some(match bound {
                        None => (node, schema),
                        Some((left_node, left_schema)) => {
                            let joined = left_schema.join(&schema, false, false);
                            let join = plan.push(LogicalNode::Join(JoinNode {
                                join_type: JoinType::Cross,
                                condition: JoinCondition::None,
                                schema: joined.clone(),
                            }));
                            plan.graph.add_labelled_edge(left_node, join.clone(), "left");
                            plan.graph.add_labelled_edge(node, join.clone(), "right");
                            (join, joined)
                        }
                    });
                }
                bound.ok_or_else(|| Error::Internal("FROM bound nothing".to_string()))?
            }
        };

        // WHERE, with IN-subqueries peeled off into semi/anti joins
        if let Some(selection) = &select.selection {
            let (subquery_joins, residual) = self.split_subquery_conditions(selection)?;
            for condition in subquery_joins {
                (node, scope) =
                    self.bind_in_subquery_join(plan, node, scope, condition)?;
            }
            if let Some(residual) = residual {
                let predicate = self.bind_expr(&residual, &scope)?;
                let filter = plan.push(LogicalNode::Filter(FilterNode {
                    predicate,
                    schema: scope.clone(),
                }));
                plan.graph.add_edge(node, filter.clone());
                node = filter;
            }
        }

        // aggregation
        let has_aggregates = select
            .projection
            .iter()
            .any(|item| match item {
                ast::SelectItem::UnnamedExpr(expr) | ast::SelectItem::ExprWithAlias { expr, .. } => {
                    self.expr_has_aggregate(expr)
                }
                _ => false,
            })
            || select.having.is_some();
        let group_by_exprs: Vec<ast::Expr> = match &select.group_by {
            ast::GroupByExpr::All => select
                .projection
                .iter()
                .filter_map(|item| match item {
                    ast::SelectItem::UnnamedExpr(expr)
                    | ast::SelectItem::ExprWithAlias { expr, .. }
                        if !self.expr_has_aggregate(expr) =>
                    {
                        Some(expr.clone())
                    }
                    _ => None,
                })
                .collect(),
            ast::GroupByExpr::Expressions(exprs) => exprs.clone(),
        };

        let mut aggregate_outputs: Vec<(Expr, ColumnId)> = Vec::new();
        let pre_aggregate_scope = scope.clone();
        let aggregated = has_aggregates || !group_by_exprs.is_empty();
        if aggregated {
            (node, scope, aggregate_outputs) = self.bind_aggregate(
                plan,
                node,
                scope,
                &group_by_exprs,
                &select.projection,
                select.having.as_ref(),
            )?;
        }

        // SELECT list projection; aggregate calls bind against the
        // pre-aggregate columns, everything else against the current scope
        let pre_scope = aggregated.then_some(&pre_aggregate_scope);
        let (exprs, output) =
            self.bind_projection(&select.projection, &scope, pre_scope, &aggregate_outputs)?;
        let pre_projection_node = node.clone();
        let pre_projection_scope = scope.clone();
        let project = plan.push(LogicalNode::Project(ProjectNode {
            exprs,
            schema: output.clone(),
        }));
        plan.graph.add_edge(node, project.clone());
        node = project.clone();
        scope = output;

        // ORDER BY keys resolve against the output first, then against the
        // columns the projection dropped; the latter sort before projecting
        if !order_exprs.is_empty() {
            match self.bind_order_by(order_exprs, &scope) {
                Ok(keys) => {
                    let sort = plan.push(LogicalNode::Sort(SortNode {
                        keys,
                        limit: None,
                        schema: scope.clone(),
                    }));
                    plan.graph.add_edge(node.clone(), sort.clone());
                    node = sort;
                }
                Err(Error::ColumnNotFound { .. }) => {
                    let keys = self.bind_order_by(order_exprs, &pre_projection_scope)?;
                    let sort = plan.push(LogicalNode::Sort(SortNode {
                        keys,
                        limit: None,
                        schema: pre_projection_scope.clone(),
                    }));
                    plan.graph.remove_edge(&pre_projection_node, &project);
                    plan.graph.add_edge(pre_projection_node, sort.clone());
                    plan.graph.add_edge(sort, project.clone());
                }
                Err(other) => return Err(other),
            }
        }

        if select.distinct.is_some() {
            let distinct = plan.push(LogicalNode::Distinct(DistinctNode {
                schema: scope.clone(),
            }));
            plan.graph.add_edge(node, distinct.clone());
            node = distinct;
        }

        Ok((node, scope))
    }

    fn bind_table_with_joins(
        &mut self,
        plan: &mut LogicalPlan,
        table: &ast::TableWithJoins,
    ) -> Result<(String, RelationSchema)> {
        let (mut node, mut schema) = self.bind_table_factor(plan, &table.relation)?;
        for join in &table.joins {
            (node, schema) = self.bind_join(plan, node, schema, join)?;
        }
        Ok((node, schema))
    }

    fn bind_table_factor(
        &mut self,
        plan: &mut LogicalPlan,
        factor: &ast::TableFactor,
    ) -> Result<(String, RelationSchema)> {
        match factor {
            ast::TableFactor::Table { name, alias, .. } => {
                let dataset_name = name.to_string();
                let relation = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| dataset_name.clone());
                let dataset = self.catalog.dataset(&dataset_name)?;
                let source_schema = dataset.schema();

                let mut columns = Vec::with_capacity(source_schema.fields().len());
                let mut id_by_ordinal = Vec::with_capacity(source_schema.fields().len());
                for field in source_schema.fields() {
                    let id = self.fresh_id();
                    id_by_ordinal.push(id);
                    columns.push(
                        ColumnDef::new(id, field.name().clone(), field.data_type().clone())
                            .with_relation(relation.clone())
                            .with_nullable(field.is_nullable()),
                    );
                }
                let schema = RelationSchema::new(columns);
                let statistics = rekey_statistics(dataset.statistics(), &id_by_ordinal);
                let node = plan.push(LogicalNode::Scan(ScanNode {
                    dataset: dataset_name,
                    alias: alias.as_ref().map(|a| a.name.value.clone()),
                    schema: schema.clone(),
                    projection: None,
                    predicates: vec![],
                    limit: None,
                    pruned_empty: false,
                    statistics,
                }));
                Ok((node, schema))
            }
            ast::TableFactor::Derived {
                subquery, alias, ..
            } => {
                // VALUES lists keep their alias column names
                if let ast::SetExpr::Values(values) = subquery.body.as_ref() {
                    return self.bind_values(plan, values.clone(), alias.as_ref());
                }
                let (node, schema) = self.bind_query(plan, *subquery.clone())?;
                let Some(alias) = alias else {
                    return Ok((node, schema));
                };
                let mut columns = schema.columns().to_vec();
                for (ordinal, column) in columns.iter_mut().enumerate() {
                    column.relation = Some(alias.name.value.clone());
                    if let Some(renamed) = alias.columns.get(ordinal) {
                        column.name = renamed.value.clone();
                    }
                }
                let aliased = RelationSchema::new(columns);
                let marker = plan.push(LogicalNode::Subquery(SubqueryNode {
                    alias: alias.name.value.clone(),
                    schema: aliased.clone(),
                }));
                plan.graph.add_edge(node, marker.clone());
                Ok((marker, aliased))
            }
            other => Err(Error::UnsupportedSyntax(format!(
                "table factor is not supported: {other}"
            ))),
        }
    }

    fn bind_join(
        &mut self,
        plan: &mut LogicalPlan,
        left_node: String,
        left_schema: RelationSchema,
        join: &ast::Join,
    ) -> Result<(String, RelationSchema)> {
        // CROSS JOIN UNNEST(expr) explodes in place instead of joining
        if let ast::TableFactor::UNNEST {
            alias, array_exprs, ..
        } = &join.relation
        {
            return self.bind_unnest(plan, left_node, left_schema, array_exprs, alias.as_ref());
        }

        let (right_node, right_schema) = self.bind_table_factor(plan, &join.relation)?;
        let (join_type, constraint) = match &join.join_operator {
            ast::JoinOperator::Inner(constraint) => (JoinType::Inner, Some(constraint)),
            ast::JoinOperator::LeftOuter(constraint) => (JoinType::Left, Some(constraint)),
            ast::JoinOperator::RightOuter(constraint) => (JoinType::Right, Some(constraint)),
            ast::JoinOperator::FullOuter(constraint) => (JoinType::Full, Some(constraint)),
            ast::JoinOperator::CrossJoin => (JoinType::Cross, None),
            other => {
                return Err(Error::UnsupportedSyntax(format!(
                    "join type is not supported: {other:?}"
                )))
            }
        };

        let combined = match join_type {
            JoinType::Left => left_schema.join(&right_schema, false, true),
            JoinType::Right => left_schema.join(&right_schema, true, false),
            JoinType::Full => left_schema.join(&right_schema, true, true),
            _ => left_schema.join(&right_schema, false, false),
        };
        let condition = match constraint {
            None | Some(ast::JoinConstraint::None) => JoinCondition::None,
            Some(ast::JoinConstraint::On(on)) => {
                self.bind_join_condition(on, &left_schema, &right_schema)?
            }
            Some(ast::JoinConstraint::Using(columns)) => {
                let mut left = Vec::with_capacity(columns.len());
                let mut right = Vec::with_capacity(columns.len());
                for ident in columns {
                    let l = left_schema.resolve(None, &ident.value)?;
                    let r = right_schema.resolve(None, &ident.value)?;
                    left.push(ColumnRef::new(l.id, l.name.clone()));
                    right.push(ColumnRef::new(r.id, r.name.clone()));
                }
                JoinCondition::Equi { left, right }
            }
            Some(other) => {
                return Err(Error::UnsupportedSyntax(format!(
                    "join constraint is not supported: {other:?}"
                )))
            }
        };

        let join_node = plan.push(LogicalNode::Join(JoinNode {
            join_type,
            condition,
            schema: combined.clone(),
        }));
        plan.graph
            .add_labelled_edge(left_node, join_node.clone(), "left");
        plan.graph
            .add_labelled_edge(right_node, join_node.clone(), "right");
        Ok((join_node, combined))
    }

    /// ON clauses: a conjunction of column equalities becomes an equi
    /// condition; a single other comparator becomes a non-equi condition.
    fn bind_join_condition(
        &mut self,
        on: &ast::Expr,
        left_schema: &RelationSchema,
        right_schema: &RelationSchema,
    ) -> Result<JoinCondition> {
        let mut conjuncts = Vec::new();
        collect_conjuncts(on, &mut conjuncts);

        let mut left_keys = Vec::new();
        let mut right_keys = Vec::new();
        let mut non_equi: Option<(ColumnRef, Operator, ColumnRef)> = None;

        for conjunct in &conjuncts {
            let ast::Expr::BinaryOp { left, op, right } = conjunct else {
                return Err(Error::UnsupportedSyntax(format!(
                    "join condition is not supported: {conjunct}"
                )));
            };
            let operator = bind_operator(op)?;
            if !operator.is_comparison() {
                return Err(Error::UnsupportedSyntax(format!(
                    "join condition is not supported: {conjunct}"
                )));
            }
            let left_column = self.resolve_side(left, left_schema, right_schema)?;
            let right_column = self.resolve_side(right, left_schema, right_schema)?;
            // orient each pair as (left side, right side)
            let ((left_ref, left_is_left), (right_ref, right_is_left)) =
                (left_column, right_column);
            if left_is_left == right_is_left {
                return Err(Error::UnsupportedSyntax(format!(
                    "join condition must compare the two join inputs: {conjunct}"
                )));
            }
            let (build, probe, operator) = if left_is_left {
                (left_ref, right_ref, operator)
            } else {
                let swapped = operator.swap().ok_or_else(|| {
                    Error::UnsupportedSyntax(format!(
                        "join comparator {operator} cannot be reoriented"
                    ))
                })?;
                (right_ref, left_ref, swapped)
            };
            if operator == Operator::Eq {
                left_keys.push(build);
                right_keys.push(probe);
            } else if non_equi.is_none() && conjuncts.len() == 1 {
                non_equi = Some((build, operator, probe));
            } else {
                return Err(Error::UnsupportedSyntax(
                    "mixed equality and inequality join conditions are not supported"
                        .to_string(),
                ));
            }
        }

        if let Some((left, op, right)) = non_equi {
            return Ok(JoinCondition::NonEqui { left, op, right });
        }
        if left_keys.is_empty() {
            return Err(Error::UnsupportedSyntax(
                "join requires at least one condition".to_string(),
            ));
        }
        Ok(JoinCondition::Equi {
            left: left_keys,
            right: right_keys,
        })
    }

    /// Resolve one side of a join comparator to a column and which input it
    /// belongs to (true = left).
    fn resolve_side(
        &mut self,
        expr: &ast::Expr,
        left_schema: &RelationSchema,
        right_schema: &RelationSchema,
    ) -> Result<(ColumnRef, bool)> {
        let (relation, name) = match expr {
            ast::Expr::Identifier(ident) => (None, ident.value.clone()),
            ast::Expr::CompoundIdentifier(parts) if parts.len() == 2 => {
                (Some(parts[0].value.clone()), parts[1].value.clone())
            }
            other => {
                return Err(Error::UnsupportedSyntax(format!(
                    "join conditions must compare columns, got {other}"
                )))
            }
        };
        match left_schema.resolve(relation.as_deref(), &name) {
            Ok(column) => Ok((ColumnRef::new(column.id, column.name.clone()), true)),
            Err(Error::AmbiguousIdentifier { .. }) => Err(Error::AmbiguousIdentifier {
                identifier: name,
                candidates: vec![],
            }),
            Err(_) => {
                let column = right_schema.resolve(relation.as_deref(), &name)?;
                Ok((ColumnRef::new(column.id, column.name.clone()), false))
            }
        }
    }

    fn bind_unnest(
        &mut self,
        plan: &mut LogicalPlan,
        left_node: String,
        left_schema: RelationSchema,
        array_exprs: &[ast::Expr],
        alias: Option<&ast::TableAlias>,
    ) -> Result<(String, RelationSchema)> {
        let [array_expr] = array_exprs else {
            return Err(Error::UnsupportedSyntax(
                "UNNEST takes exactly one array expression".to_string(),
            ));
        };
        let bound = self.bind_expr(array_expr, &left_schema)?;
        let (source, element_type) = match bound {
            Expr::Column { id, name } => {
                let column = left_schema
                    .column_by_id(id)
                    .ok_or_else(|| Error::column_not_found(&name))?;
                let DataType::List(element) = &column.data_type else {
                    return Err(Error::InvalidSyntax(format!(
                        "UNNEST argument '{name}' is not an array"
                    )));
                };
                (
                    UnnestSource::Column(ColumnRef::new(id, name)),
                    element.data_type().clone(),
                )
            }
            Expr::Literal(Value::List(items)) => {
                let element_type = items
                    .iter()
                    .find(|v| !v.is_null())
                    .map(Value::data_type)
                    .unwrap_or(DataType::Null);
                (UnnestSource::Literal(items), element_type)
            }
            Expr::Literal(value) => {
                // a bare literal behaves as a one-element array
                let element_type = value.data_type();
                (UnnestSource::Literal(vec![value]), element_type)
            }
            other => {
                return Err(Error::UnsupportedSyntax(format!(
                    "UNNEST argument is not supported: {other}"
                )))
            }
        };

        let target_name = alias
            .and_then(|a| a.columns.first().map(|c| c.value.clone()))
            .or_else(|| alias.map(|a| a.name.value.clone()))
            .unwrap_or_else(|| "unnest".to_string());
        let target = ColumnDef::new(self.fresh_id(), target_name, element_type);

        let mut columns = left_schema.columns().to_vec();
        columns.push(target.clone());
        let schema = RelationSchema::new(columns);

        let unnest = plan.push(LogicalNode::Unnest(UnnestNode {
            source,
            target,
            distinct: false,
            filters: None,
            single_column: false,
            schema: schema.clone(),
        }));
        plan.graph.add_edge(left_node, unnest.clone());
        Ok((unnest, schema))
    }

    /// Peel `IN (SELECT …)` conditions out of a WHERE conjunction.
    fn split_subquery_conditions(
        &mut self,
        selection: &ast::Expr,
    ) -> Result<(Vec<SubqueryCondition>, Option<ast::Expr>)> {
        let mut conjuncts = Vec::new();
        collect_conjuncts(selection, &mut conjuncts);

        let mut subqueries = Vec::new();
        let mut residual: Option<ast::Expr> = None;
        for conjunct in conjuncts {
            if let ast::Expr::InSubquery {
                expr,
                subquery,
                negated,
            } = &conjunct
            {
                subqueries.push(SubqueryCondition {
                    expr: (**expr).clone(),
                    subquery: (**subquery).clone(),
                    negated: *negated,
                });
                continue;
            }
            residual = Some(match residual {
                None => conjunct.clone(),
                Some(previous) => ast::Expr::BinaryOp {
                    left: Box::new(previous),
                    op: ast::BinaryOperator::And,
                    right: Box::new(conjunct.clone()),
                },
            });
        }
        Ok((subqueries, residual))
    }

    /// `x IN (SELECT …)` is a semi join; `x NOT IN (SELECT …)` is a
    /// null-aware anti join.
    fn bind_in_subquery_join(
        &mut self,
        plan: &mut LogicalPlan,
        left_node: String,
        left_schema: RelationSchema,
        condition: SubqueryCondition,
    ) -> Result<(String, RelationSchema)> {
        let probe = match self.bind_expr(&condition.expr, &left_schema)? {
            Expr::Column { id, name } => ColumnRef::new(id, name),
            other => {
                return Err(Error::UnsupportedSyntax(format!(
                    "IN subquery operand must be a column, got {other}"
                )))
            }
        };
        let (subquery_node, subquery_schema) = self.bind_query(plan, condition.subquery)?;
        if subquery_schema.len() != 1 {
            return Err(Error::InvalidSyntax(format!(
                "IN subquery must return one column, returns {}",
                subquery_schema.len()
            )));
        }
        let key = &subquery_schema.columns()[0];

        let join_type = if condition.negated {
            JoinType::Anti
        } else {
            JoinType::Semi
        };
        let join = plan.push(LogicalNode::Join(JoinNode {
            join_type,
            condition: JoinCondition::Equi {
                left: vec![probe],
                right: vec![ColumnRef::new(key.id, key.name.clone())],
            },
            schema: left_schema.clone(),
        }));
        plan.graph
            .add_labelled_edge(left_node, join.clone(), "left");
        plan.graph
            .add_labelled_edge(subquery_node, join.clone(), "right");
        Ok((join, left_schema))
    }

    #[allow(clippy::type_complexity)]
    fn bind_aggregate(
        &mut self,
        plan: &mut LogicalPlan,
        input: String,
        scope: RelationSchema,
        group_by: &[ast::Expr],
        projection: &[ast::SelectItem],
        having: Option<&ast::Expr>,
    ) -> Result<(String, RelationSchema, Vec<(Expr, ColumnId)>)> {
        // group keys must resolve to columns of the input
        let mut keys = Vec::with_capacity(group_by.len());
        for expr in group_by {
            match self.bind_expr(expr, &scope)? {
                Expr::Column { id, name } => keys.push(ColumnRef::new(id, name)),
                other => {
                    return Err(Error::UnsupportedSyntax(format!(
                        "GROUP BY expressions must be columns, got {other}"
                    )))
                }
            }
        }

        // collect every aggregate call in the select list and HAVING
        let mut calls: Vec<Expr> = Vec::new();
        for item in projection {
            if let ast::SelectItem::UnnamedExpr(expr)
            | ast::SelectItem::ExprWithAlias { expr, .. } = item
            {
                let bound = self.bind_expr(expr, &scope)?;
                collect_aggregates(&bound, &mut calls);
            }
        }
        if let Some(having) = having {
            let bound = self.bind_expr(having, &scope)?;
            collect_aggregates(&bound, &mut calls);
        }
        calls.dedup();

        let mut specs = Vec::with_capacity(calls.len());
        let mut outputs = Vec::with_capacity(calls.len());
        for call in &calls {
            let Expr::Aggregate {
                kind,
                arg,
                distinct,
            } = call
            else {
                continue;
            };
            let arg_ref = match arg.as_deref() {
                None => None,
                Some(Expr::Column { id, name }) => Some(ColumnRef::new(*id, name.clone())),
                Some(other) => {
                    return Err(Error::UnsupportedSyntax(format!(
                        "aggregate arguments must be columns, got {other}"
                    )))
                }
            };
            let output_type = aggregate_output_type(*kind, arg_ref.as_ref(), &scope);
            let output =
                ColumnDef::new(self.fresh_id(), call.to_string(), output_type);
            outputs.push((call.clone(), output.id));
            specs.push(AggregateSpec {
                kind: *kind,
                arg: arg_ref,
                distinct: *distinct,
                output,
            });
        }

        // output: aggregates first, then the group keys
        let mut columns: Vec<ColumnDef> =
            specs.iter().map(|spec| spec.output.clone()).collect();
        for key in &keys {
            let column = scope
                .column_by_id(key.id)
                .ok_or_else(|| Error::column_not_found(&key.name))?;
            columns.push(column.clone());
        }
        let aggregate_schema = RelationSchema::new(columns);

        let aggregate = plan.push(LogicalNode::Aggregate(AggregateNode {
            group_by: keys,
            aggregates: specs,
            schema: aggregate_schema.clone(),
        }));
        plan.graph.add_edge(input, aggregate.clone());
        let mut node = aggregate;

        if let Some(having) = having {
            let bound = self.bind_expr(having, &scope)?;
            let rewritten = substitute_aggregates(bound, &outputs);
            let filter = plan.push(LogicalNode::Filter(FilterNode {
                predicate: rewritten,
                schema: aggregate_schema.clone(),
            }));
            plan.graph.add_edge(node, filter.clone());
            node = filter;
        }

        Ok((node, aggregate_schema, outputs))
    }

    fn bind_projection(
        &mut self,
        projection: &[ast::SelectItem],
        scope: &RelationSchema,
        pre_scope: Option<&RelationSchema>,
        aggregate_outputs: &[(Expr, ColumnId)],
    ) -> Result<(Vec<Expr>, RelationSchema)> {
        let mut exprs = Vec::new();
        let mut columns = Vec::new();
        for item in projection {
            match item {
                ast::SelectItem::Wildcard(_) => {
                    for column in scope.columns() {
                        exprs.push(Expr::column(column.id, column.name.clone()));
                        columns.push(column.clone());
                    }
                }
                ast::SelectItem::QualifiedWildcard(qualifier, _) => {
                    let qualifier = qualifier.to_string();
                    let mut any = false;
                    for column in scope.columns() {
                        if column
                            .relation
                            .as_deref()
                            .is_some_and(|r| r.eq_ignore_ascii_case(&qualifier))
                        {
                            exprs.push(Expr::column(column.id, column.name.clone()));
                            columns.push(column.clone());
                            any = true;
                        }
                    }
                    if !any {
                        return Err(Error::DatasetNotFound(qualifier));
                    }
                }
                ast::SelectItem::UnnamedExpr(expr) => {
                    let bound =
                        self.bind_select_expr(expr, scope, pre_scope, aggregate_outputs)?;
                    let name = display_name(expr);
                    self.push_output(bound, name, scope, &mut exprs, &mut columns)?;
                }
                ast::SelectItem::ExprWithAlias { expr, alias } => {
                    let bound =
                        self.bind_select_expr(expr, scope, pre_scope, aggregate_outputs)?;
                    self.push_output(
                        bound,
                        alias.value.clone(),
                        scope,
                        &mut exprs,
                        &mut columns,
                    )?;
                }
            }
        }
        Ok((exprs, RelationSchema::new(columns)))
    }

    fn bind_select_expr(
        &mut self,
        expr: &ast::Expr,
        scope: &RelationSchema,
        pre_scope: Option<&RelationSchema>,
        aggregate_outputs: &[(Expr, ColumnId)],
    ) -> Result<Expr> {
        // aggregate calls reference pre-aggregate columns
        if let Some(pre_scope) = pre_scope {
            if self.expr_has_aggregate(expr) {
                let bound = self.bind_expr(expr, pre_scope)?;
                return Ok(substitute_aggregates(bound, aggregate_outputs));
            }
        }
        let bound = self.bind_expr(expr, scope)?;
        Ok(substitute_aggregates(bound, aggregate_outputs))
    }

    fn push_output(
        &mut self,
        bound: Expr,
        name: String,
        scope: &RelationSchema,
        exprs: &mut Vec<Expr>,
        columns: &mut Vec<ColumnDef>,
    ) -> Result<()> {
        let column = match &bound {
            // plain columns keep their identity through the projection
            Expr::Column { id, .. } => {
                let source = scope
                    .column_by_id(*id)
                    .ok_or_else(|| Error::column_not_found(&name))?;
                let mut column = source.clone();
                column.name = name;
                column
            }
            other => ColumnDef::new(
                self.fresh_id(),
                name,
                infer_type(other, scope, self.registry),
            ),
        };
        exprs.push(bound);
        columns.push(column);
        Ok(())
    }

    fn bind_order_by(
        &mut self,
        order_by: &[ast::OrderByExpr],
        scope: &RelationSchema,
    ) -> Result<Vec<SortKey>> {
        let mut keys = Vec::with_capacity(order_by.len());
        for item in order_by {
            let column = match self.bind_expr(&item.expr, scope)? {
                Expr::Column { id, name } => ColumnRef::new(id, name),
                other => {
                    return Err(Error::UnsupportedSyntax(format!(
                        "ORDER BY expressions must be output columns, got {other}"
                    )))
                }
            };
            let ascending = item.asc.unwrap_or(true);
            // default NULL placement follows the sort direction
            let nulls_first = item.nulls_first.unwrap_or(!ascending);
            keys.push(SortKey {
                column,
                ascending,
                nulls_first,
            });
        }
        Ok(keys)
    }

    fn expr_has_aggregate(&self, expr: &ast::Expr) -> bool {
        match expr {
            ast::Expr::Function(function) => {
                let name = function.name.to_string();
                FunctionRegistry::resolve_aggregate(&name, false).is_some()
            }
            ast::Expr::BinaryOp { left, right, .. } => {
                self.expr_has_aggregate(left) || self.expr_has_aggregate(right)
            }
            ast::Expr::UnaryOp { expr, .. } | ast::Expr::Nested(expr) => {
                self.expr_has_aggregate(expr)
            }
            _ => false,
        }
    }

    /// Bind one scalar expression against a scope.
    fn bind_expr(&mut self, expr: &ast::Expr, scope: &RelationSchema) -> Result<Expr> {
        match expr {
            ast::Expr::Identifier(ident) => {
                let column = scope.resolve(None, &ident.value)?;
                Ok(Expr::column(column.id, column.name.clone()))
            }
            ast::Expr::CompoundIdentifier(parts) => {
                if parts.len() != 2 {
                    return Err(Error::UnsupportedSyntax(format!(
                        "deeply qualified identifier: {expr}"
                    )));
                }
                let column = scope.resolve(Some(&parts[0].value), &parts[1].value)?;
                Ok(Expr::column(column.id, column.name.clone()))
            }
            ast::Expr::Value(value) => self.bind_value(value),
            ast::Expr::BinaryOp { left, op, right } => Ok(Expr::binary(
                self.bind_expr(left, scope)?,
                bind_operator(op)?,
                self.bind_expr(right, scope)?,
            )),
            ast::Expr::UnaryOp { op, expr } => {
                let inner = self.bind_expr(expr, scope)?;
                match op {
                    ast::UnaryOperator::Not => Ok(Expr::Not(Box::new(inner))),
                    ast::UnaryOperator::Minus => Ok(Expr::Negative(Box::new(inner))),
                    ast::UnaryOperator::Plus => Ok(inner),
                    other => Err(Error::UnsupportedSyntax(format!(
                        "unary operator is not supported: {other}"
                    ))),
                }
            }
            ast::Expr::Nested(inner) => self.bind_expr(inner, scope),
            ast::Expr::IsNull(inner) => {
                Ok(Expr::IsNull(Box::new(self.bind_expr(inner, scope)?)))
            }
            ast::Expr::IsNotNull(inner) => {
                Ok(Expr::IsNotNull(Box::new(self.bind_expr(inner, scope)?)))
            }
            ast::Expr::IsTrue(inner) => {
                Ok(Expr::IsTrue(Box::new(self.bind_expr(inner, scope)?)))
            }
            ast::Expr::IsNotTrue(inner) => {
                Ok(Expr::IsNotTrue(Box::new(self.bind_expr(inner, scope)?)))
            }
            ast::Expr::IsFalse(inner) => {
                Ok(Expr::IsFalse(Box::new(self.bind_expr(inner, scope)?)))
            }
            ast::Expr::IsNotFalse(inner) => {
                Ok(Expr::IsNotFalse(Box::new(self.bind_expr(inner, scope)?)))
            }
            ast::Expr::InList {
                expr,
                list,
                negated,
            } => {
                let bound = self.bind_expr(expr, scope)?;
                let items = list
                    .iter()
                    .map(|item| self.bind_expr(item, scope))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expr::InList {
                    expr: Box::new(bound),
                    list: items,
                    negated: *negated,
                })
            }
            ast::Expr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let bound = self.bind_expr(expr, scope)?;
                let low = self.bind_expr(low, scope)?;
                let high = self.bind_expr(high, scope)?;
                let range = Expr::and(
                    Expr::binary(bound.clone(), Operator::GtEq, low),
                    Expr::binary(bound, Operator::LtEq, high),
                );
                Ok(if *negated {
                    Expr::Not(Box::new(range))
                } else {
                    range
                })
            }
            ast::Expr::Like {
                negated,
                expr,
                pattern,
                ..
            } => Ok(Expr::binary(
                self.bind_expr(expr, scope)?,
                if *negated {
                    Operator::NotLike
                } else {
                    Operator::Like
                },
                self.bind_expr(pattern, scope)?,
            )),
            ast::Expr::ILike {
                negated,
                expr,
                pattern,
                ..
            } => Ok(Expr::binary(
                self.bind_expr(expr, scope)?,
                if *negated {
                    Operator::NotILike
                } else {
                    Operator::ILike
                },
                self.bind_expr(pattern, scope)?,
            )),
            ast::Expr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                let operand = operand
                    .as_ref()
                    .map(|o| self.bind_expr(o, scope).map(Box::new))
                    .transpose()?;
                let mut when_then = Vec::with_capacity(conditions.len());
                for (condition, result) in conditions.iter().zip(results) {
                    when_then.push((
                        self.bind_expr(condition, scope)?,
                        self.bind_expr(result, scope)?,
                    ));
                }
                let else_expr = else_result
                    .as_ref()
                    .map(|e| self.bind_expr(e, scope).map(Box::new))
                    .transpose()?;
                Ok(Expr::Case {
                    operand,
                    when_then,
                    else_expr,
                })
            }
            ast::Expr::Function(function) => self.bind_function(function, scope),
            ast::Expr::Tuple(items) | ast::Expr::Array(ast::Array { elem: items, .. }) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match self.bind_expr(item, scope)? {
                        Expr::Literal(value) => values.push(value),
                        other => {
                            return Err(Error::UnsupportedSyntax(format!(
                                "array literals must contain literals, got {other}"
                            )))
                        }
                    }
                }
                Ok(Expr::Literal(Value::List(values)))
            }
            other => Err(Error::UnsupportedSyntax(format!(
                "expression is not supported: {other}"
            ))),
        }
    }

    fn bind_value(&mut self, value: &ast::Value) -> Result<Expr> {
        let bound = match value {
            ast::Value::Number(text, _) => {
                if let Ok(int) = text.parse::<i64>() {
                    Value::Int64(int)
                } else {
                    let float = text.parse::<f64>().map_err(|_| {
                        Error::InvalidSyntax(format!("invalid numeric literal '{text}'"))
                    })?;
                    Value::Float64(float)
                }
            }
            ast::Value::SingleQuotedString(text) | ast::Value::DoubleQuotedString(text) => {
                Value::Utf8(text.clone())
            }
            ast::Value::Boolean(value) => Value::Boolean(*value),
            ast::Value::Null => Value::Null,
            ast::Value::Placeholder(marker) => {
                if marker == "?" {
                    self.params.next_positional()?
                } else {
                    let name = marker.trim_start_matches([':', '$']);
                    self.params.named(name)?
                }
            }
            other => {
                return Err(Error::UnsupportedSyntax(format!(
                    "literal is not supported: {other}"
                )))
            }
        };
        Ok(Expr::Literal(bound))
    }

    fn bind_function(&mut self, function: &ast::Function, scope: &RelationSchema) -> Result<Expr> {
        let name = function.name.to_string();

        let (args, distinct) = match &function.args {
            ast::FunctionArguments::None => (Vec::new(), false),
            ast::FunctionArguments::List(list) => {
                let distinct = matches!(
                    list.duplicate_treatment,
                    Some(ast::DuplicateTreatment::Distinct)
                );
                (list.args.clone(), distinct)
            }
            ast::FunctionArguments::Subquery(_) => {
                return Err(Error::UnsupportedSyntax(format!(
                    "subquery arguments to {name} are not supported"
                )))
            }
        };

        if let Some(kind) = FunctionRegistry::resolve_aggregate(&name, distinct) {
            let arg = match args.first() {
                None => None,
                Some(ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard)) => None,
                Some(ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(expr))) => {
                    Some(Box::new(self.bind_expr(expr, scope)?))
                }
                Some(other) => {
                    return Err(Error::UnsupportedSyntax(format!(
                        "aggregate argument is not supported: {other}"
                    )))
                }
            };
            // COUNT(x) and COUNT(*) differ in null handling
            let distinct = distinct || kind == AggregateKind::CountDistinct;
            return Ok(Expr::Aggregate {
                kind,
                arg,
                distinct,
            });
        }

        let mut bound_args = Vec::with_capacity(args.len());
        for arg in &args {
            match arg {
                ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(expr)) => {
                    bound_args.push(self.bind_expr(expr, scope)?);
                }
                other => {
                    return Err(Error::UnsupportedSyntax(format!(
                        "function argument is not supported: {other}"
                    )))
                }
            }
        }
        // the null-steering trio is evaluated specially but still
        // arity-checked here
        let upper = name.to_uppercase();
        if !matches!(upper.as_str(), "COALESCE" | "IFNULL" | "NULLIF") {
            self.registry.resolve(&name, bound_args.len())?;
        } else if bound_args.is_empty()
            || (upper == "NULLIF" && bound_args.len() != 2)
            || (upper == "IFNULL" && bound_args.len() != 2)
        {
            return Err(Error::InvalidSyntax(format!(
                "wrong number of arguments to {upper}"
            )));
        }
        Ok(Expr::Function {
            name: upper,
            args: bound_args,
        })
    }
}

struct SubqueryCondition {
    expr: ast::Expr,
    subquery: ast::Query,
    negated: bool,
}

fn statement_kind(statement: &ast::Statement) -> &'static str {
    match statement {
        ast::Statement::Insert { .. } => "INSERT",
        ast::Statement::Update { .. } => "UPDATE",
        ast::Statement::Delete { .. } => "DELETE",
        ast::Statement::CreateTable { .. } => "CREATE TABLE",
        ast::Statement::Drop { .. } => "DROP",
        _ => "this statement",
    }
}

fn collect_conjuncts<'e>(expr: &'e ast::Expr, out: &mut Vec<&'e ast::Expr>) {
    match expr {
        ast::Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_conjuncts(left, out);
            collect_conjuncts(right, out);
        }
        other => out.push(other),
    }
}

fn bind_operator(op: &ast::BinaryOperator) -> Result<Operator> {
    Ok(match op {
        ast::BinaryOperator::Eq => Operator::Eq,
        ast::BinaryOperator::NotEq => Operator::NotEq,
        ast::BinaryOperator::Lt => Operator::Lt,
        ast::BinaryOperator::LtEq => Operator::LtEq,
        ast::BinaryOperator::Gt => Operator::Gt,
        ast::BinaryOperator::GtEq => Operator::GtEq,
        ast::BinaryOperator::Plus => Operator::Plus,
        ast::BinaryOperator::Minus => Operator::Minus,
        ast::BinaryOperator::Multiply => Operator::Multiply,
        ast::BinaryOperator::Divide => Operator::Divide,
        ast::BinaryOperator::Modulo => Operator::Modulo,
        ast::BinaryOperator::And => Operator::And,
        ast::BinaryOperator::Or => Operator::Or,
        other => {
            return Err(Error::UnsupportedSyntax(format!(
                "operator is not supported: {other}"
            )))
        }
    })
}

fn collect_aggregates(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Aggregate { .. } => {
            if !out.contains(expr) {
                out.push(expr.clone());
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_aggregates(left, out);
            collect_aggregates(right, out);
        }
        Expr::Not(inner)
        | Expr::Negative(inner)
        | Expr::IsNull(inner)
        | Expr::IsNotNull(inner)
        | Expr::IsTrue(inner)
        | Expr::IsNotTrue(inner)
        | Expr::IsFalse(inner)
        | Expr::IsNotFalse(inner) => collect_aggregates(inner, out),
        Expr::Function { args, .. } => {
            for arg in args {
                collect_aggregates(arg, out);
            }
        }
        _ => {}
    }
}

/// Replace aggregate calls with references to their computed columns.
fn substitute_aggregates(expr: Expr, outputs: &[(Expr, ColumnId)]) -> Expr {
    expr.transform(&|node| {
        if let Expr::Aggregate { .. } = &node {
            if let Some((call, id)) = outputs.iter().find(|(call, _)| call == &node) {
                return Expr::column(*id, call.to_string());
            }
        }
        node
    })
}

/// Display name of an unaliased select item.
fn display_name(expr: &ast::Expr) -> String {
    match expr {
        ast::Expr::Identifier(ident) => ident.value.clone(),
        ast::Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|p| p.value.clone())
            .unwrap_or_else(|| expr.to_string()),
        other => other.to_string(),
    }
}

/// Rekey ordinal-keyed catalog statistics onto the bound column ids.
fn rekey_statistics(
    source: RelationStatistics,
    id_by_ordinal: &[ColumnId],
) -> RelationStatistics {
    let mut statistics = RelationStatistics::new();
    statistics.record_count = source.record_count;
    statistics.record_count_estimate = source.record_count_estimate;
    for (ordinal, id) in id_by_ordinal.iter().enumerate() {
        let ordinal = ordinal as u64;
        if let Some(lower) = source.lower_bounds.get(&ordinal) {
            statistics.update_lower(*id, *lower);
        }
        if let Some(upper) = source.upper_bounds.get(&ordinal) {
            statistics.update_upper(*id, *upper);
        }
        if let Some(nulls) = source.null_counts.get(&ordinal) {
            statistics.add_null(*id, *nulls);
        }
        if let Some(cardinality) = source.cardinality_estimates.get(&ordinal) {
            statistics.set_cardinality(*id, *cardinality);
        }
    }
    statistics
}

/// Best-effort output type inference for computed projections.
fn infer_type(expr: &Expr, scope: &RelationSchema, registry: &FunctionRegistry) -> DataType {
    match expr {
        Expr::Column { id, .. } => scope
            .column_by_id(*id)
            .map(|c| c.data_type.clone())
            .unwrap_or(DataType::Null),
        Expr::Literal(value) => value.data_type(),
        Expr::BinaryOp { left, op, right } => {
            if op.is_comparison() || matches!(op, Operator::And | Operator::Or) {
                DataType::Boolean
            } else {
                let left = infer_type(left, scope, registry);
                let right = infer_type(right, scope, registry);
                if left == DataType::Float64 || right == DataType::Float64 {
                    DataType::Float64
                } else if left == DataType::Null {
                    right
                } else {
                    left
                }
            }
        }
        Expr::Not(_)
        | Expr::IsNull(_)
        | Expr::IsNotNull(_)
        | Expr::IsTrue(_)
        | Expr::IsNotTrue(_)
        | Expr::IsFalse(_)
        | Expr::IsNotFalse(_)
        | Expr::InList { .. } => DataType::Boolean,
        Expr::Negative(inner) => infer_type(inner, scope, registry),
        Expr::Case {
            when_then,
            else_expr,
            ..
        } => when_then
            .first()
            .map(|(_, then)| infer_type(then, scope, registry))
            .or_else(|| {
                else_expr
                    .as_deref()
                    .map(|e| infer_type(e, scope, registry))
            })
            .unwrap_or(DataType::Null),
        Expr::Function { name, args } => match name.as_str() {
            "COALESCE" | "IFNULL" | "NULLIF" => args
                .iter()
                .map(|a| infer_type(a, scope, registry))
                .find(|t| *t != DataType::Null)
                .unwrap_or(DataType::Null),
            _ => {
                let arg_types: Vec<DataType> = args
                    .iter()
                    .map(|a| infer_type(a, scope, registry))
                    .collect();
                registry
                    .resolve(name, args.len())
                    .map(|entry| (entry.return_type)(&arg_types))
                    .unwrap_or(DataType::Null)
            }
        },
        Expr::Aggregate { .. } => DataType::Int64,
    }
}

/// Aggregate result types per SQL convention.
fn aggregate_output_type(
    kind: AggregateKind,
    arg: Option<&ColumnRef>,
    scope: &RelationSchema,
) -> DataType {
    let arg_type = arg
        .and_then(|a| scope.column_by_id(a.id))
        .map(|c| c.data_type.clone());
    match kind {
        AggregateKind::Count | AggregateKind::CountDistinct => DataType::Int64,
        AggregateKind::Avg => DataType::Float64,
        AggregateKind::Sum => match arg_type {
            Some(DataType::Float64 | DataType::Float32) => DataType::Float64,
            _ => DataType::Int64,
        },
        AggregateKind::Min | AggregateKind::Max | AggregateKind::HashOne => {
            arg_type.unwrap_or(DataType::Null)
        }
    }
}
