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

//! The typed logical plan.
//!
//! A plan is a [`Graph`] of [`LogicalNode`] payloads with exactly one exit.
//! Every node publishes its output schema at bind time; the optimizer
//! rewrites nodes and edges in place.

use std::fmt;

use kestrel_common::error::{Error, Result};
use kestrel_common::stats::RelationStatistics;

use crate::dnf::Clause;
use crate::expr::{AggregateKind, Expr, Operator};
use crate::graph::Graph;
use crate::schema::{ColumnDef, ColumnId, RelationSchema};
use crate::value::Value;

/// A resolved column reference with its display name.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub id: ColumnId,
    pub name: String,
}

impl ColumnRef {
    pub fn new(id: ColumnId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
    /// Keep left rows with at least one match.
    Semi,
    /// Keep left rows with no match.
    Anti,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT OUTER",
            JoinType::Right => "RIGHT OUTER",
            JoinType::Full => "FULL OUTER",
            JoinType::Cross => "CROSS",
            JoinType::Semi => "SEMI",
            JoinType::Anti => "ANTI",
        };
        write!(f, "{name}")
    }
}

/// The ON condition of a join.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinCondition {
    /// Cross join: no condition.
    None,
    /// Conjunction of equalities, column-aligned left to right.
    Equi {
        left: Vec<ColumnRef>,
        right: Vec<ColumnRef>,
    },
    /// A single non-equality comparator.
    NonEqui {
        left: ColumnRef,
        op: Operator,
        right: ColumnRef,
    },
}

/// Dataset scan. Projection, predicates and limit are filled in by the
/// optimizer's pushdown passes; `pruned_empty` is set by statistics pruning
/// when the scan provably yields nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanNode {
    pub dataset: String,
    pub alias: Option<String>,
    pub schema: RelationSchema,
    pub projection: Option<Vec<ColumnId>>,
    pub predicates: Vec<Clause>,
    pub limit: Option<usize>,
    pub pruned_empty: bool,
    pub statistics: RelationStatistics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectNode {
    /// One expression per output column, aligned with `schema`.
    pub exprs: Vec<Expr>,
    pub schema: RelationSchema,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterNode {
    pub predicate: Expr,
    pub schema: RelationSchema,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinNode {
    pub join_type: JoinType,
    pub condition: JoinCondition,
    pub schema: RelationSchema,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpec {
    pub kind: AggregateKind,
    /// None for COUNT(*).
    pub arg: Option<ColumnRef>,
    pub distinct: bool,
    pub output: ColumnDef,
}

impl fmt::Display for AggregateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{}({})", self.kind.name(), arg),
            None => write!(f, "{}(*)", self.kind.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateNode {
    pub group_by: Vec<ColumnRef>,
    pub aggregates: Vec<AggregateSpec>,
    pub schema: RelationSchema,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistinctNode {
    pub schema: RelationSchema,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub column: ColumnRef,
    pub ascending: bool,
    pub nulls_first: bool,
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}",
            self.column,
            if self.ascending { "ASC" } else { "DESC" },
            if self.nulls_first { " NULLS FIRST" } else { "" },
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortNode {
    pub keys: Vec<SortKey>,
    /// Top-N bound when a downstream limit was pushed into the sort.
    pub limit: Option<usize>,
    pub schema: RelationSchema,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitNode {
    pub limit: Option<usize>,
    pub offset: usize,
    pub schema: RelationSchema,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionNode {
    pub all: bool,
    pub schema: RelationSchema,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValuesNode {
    pub rows: Vec<Vec<Value>>,
    pub schema: RelationSchema,
}

/// What a CROSS JOIN UNNEST explodes.
#[derive(Debug, Clone, PartialEq)]
pub enum UnnestSource {
    Column(ColumnRef),
    Literal(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnnestNode {
    pub source: UnnestSource,
    pub target: ColumnDef,
    pub distinct: bool,
    /// Element-level inclusion conditions applied during the unnest.
    pub filters: Option<Vec<Value>>,
    /// The downstream query uses only the unnested column.
    pub single_column: bool,
    pub schema: RelationSchema,
}

/// Derived-table marker kept for alias scoping; behaves as identity.
#[derive(Debug, Clone, PartialEq)]
pub struct SubqueryNode {
    pub alias: String,
    pub schema: RelationSchema,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShowVariant {
    Columns { dataset: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShowNode {
    pub variant: ShowVariant,
    pub schema: RelationSchema,
    /// Pre-rendered result rows.
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExplainNode {
    pub schema: RelationSchema,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetNode {
    pub variable: String,
    pub value: Value,
}

/// Tagged variant over every logical operator.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalNode {
    Scan(ScanNode),
    Project(ProjectNode),
    Filter(FilterNode),
    Join(JoinNode),
    Aggregate(AggregateNode),
    Distinct(DistinctNode),
    Sort(SortNode),
    Limit(LimitNode),
    Union(UnionNode),
    Values(ValuesNode),
    Unnest(UnnestNode),
    Subquery(SubqueryNode),
    Show(ShowNode),
    Explain(ExplainNode),
    Set(SetNode),
}

impl LogicalNode {
    /// The output schema this node publishes.
    pub fn schema(&self) -> RelationSchema {
        match self {
            LogicalNode::Scan(node) => match &node.projection {
                Some(ids) => node
                    .schema
                    .project(ids)
                    .unwrap_or_else(|_| node.schema.clone()),
                None => node.schema.clone(),
            },
            LogicalNode::Project(node) => node.schema.clone(),
            LogicalNode::Filter(node) => node.schema.clone(),
            LogicalNode::Join(node) => node.schema.clone(),
            LogicalNode::Aggregate(node) => node.schema.clone(),
            LogicalNode::Distinct(node) => node.schema.clone(),
            LogicalNode::Sort(node) => node.schema.clone(),
            LogicalNode::Limit(node) => node.schema.clone(),
            LogicalNode::Union(node) => node.schema.clone(),
            LogicalNode::Values(node) => node.schema.clone(),
            LogicalNode::Unnest(node) => node.schema.clone(),
            LogicalNode::Subquery(node) => node.schema.clone(),
            LogicalNode::Show(node) => node.schema.clone(),
            LogicalNode::Explain(node) => node.schema.clone(),
            LogicalNode::Set(_) => RelationSchema::empty(),
        }
    }

    /// Node-type tag used by `epitomize` and EXPLAIN.
    pub fn node_type(&self) -> &'static str {
        match self {
            LogicalNode::Scan(_) => "SCAN",
            LogicalNode::Project(_) => "PROJECT",
            LogicalNode::Filter(_) => "FILTER",
            LogicalNode::Join(_) => "JOIN",
            LogicalNode::Aggregate(_) => "AGGREGATE",
            LogicalNode::Distinct(_) => "DISTINCT",
            LogicalNode::Sort(_) => "SORT",
            LogicalNode::Limit(_) => "LIMIT",
            LogicalNode::Union(_) => "UNION",
            LogicalNode::Values(_) => "VALUES",
            LogicalNode::Unnest(_) => "CROSS JOIN UNNEST",
            LogicalNode::Subquery(_) => "SUBQUERY",
            LogicalNode::Show(_) => "SHOW",
            LogicalNode::Explain(_) => "EXPLAIN",
            LogicalNode::Set(_) => "SET",
        }
    }

    /// True for nodes allowed at the leaves of a plan.
    pub fn is_leaf_kind(&self) -> bool {
        matches!(
            self,
            LogicalNode::Scan(_)
                | LogicalNode::Values(_)
                | LogicalNode::Show(_)
                | LogicalNode::Set(_)
        )
    }
}

/// A logical plan: a DAG of [`LogicalNode`]s with exactly one exit.
#[derive(Debug, Clone, Default)]
pub struct LogicalPlan {
    pub graph: Graph<LogicalNode>,
    next_id: usize,
}

impl LogicalPlan {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            next_id: 0,
        }
    }

    /// Add a node under a generated id, returning the id.
    pub fn push(&mut self, node: LogicalNode) -> String {
        let id = format!("{}_{}", node.node_type().to_lowercase().replace(' ', "_"), self.next_id);
        self.next_id += 1;
        self.graph.add_node(id.clone(), node);
        id
    }

    pub fn node(&self, id: &str) -> Option<&LogicalNode> {
        self.graph.node(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut LogicalNode> {
        self.graph.node_mut(id)
    }

    /// The single exit node of the plan.
    pub fn exit(&self) -> Result<String> {
        let exits = self.graph.exit_points();
        match exits.len() {
            1 => Ok(exits.into_iter().next().unwrap_or_default()),
            n => Err(Error::Internal(format!(
                "logical plan has {n} exit points, expected exactly 1"
            ))),
        }
    }

    /// The upstream node feeding `id` (single-input operators).
    pub fn input_of(&self, id: &str) -> Option<String> {
        self.graph
            .incoming_edges(id)
            .first()
            .map(|(source, _, _)| source.clone())
    }

    /// Check structural invariants: acyclic, one exit, leaves of a scan-like
    /// kind.
    pub fn validate(&self) -> Result<()> {
        if !self.graph.is_acyclic() {
            return Err(Error::Internal("logical plan contains a cycle".to_string()));
        }
        self.exit()?;
        for entry in self.graph.entry_points() {
            let Some(node) = self.graph.node(&entry) else {
                continue;
            };
            if !node.is_leaf_kind() {
                return Err(Error::Internal(format!(
                    "logical plan leaf '{entry}' is a {} node",
                    node.node_type()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::DataType;

    fn scan(dataset: &str, first_id: ColumnId) -> LogicalNode {
        LogicalNode::Scan(ScanNode {
            dataset: dataset.to_string(),
            alias: None,
            schema: RelationSchema::new(vec![ColumnDef::new(
                first_id,
                "id",
                DataType::Int64,
            )]),
            projection: None,
            predicates: vec![],
            limit: None,
            pruned_empty: false,
            statistics: RelationStatistics::default(),
        })
    }

    #[test]
    fn plans_generate_typed_ids() {
        let mut plan = LogicalPlan::new();
        let scan_id = plan.push(scan("planets", 1));
        assert!(scan_id.starts_with("scan_"));
        let limit_id = plan.push(LogicalNode::Limit(LimitNode {
            limit: Some(5),
            offset: 0,
            schema: RelationSchema::empty(),
        }));
        plan.graph.add_edge(scan_id, limit_id.clone());
        assert_eq!(plan.exit().unwrap(), limit_id);
        plan.validate().unwrap();
    }

    #[test]
    fn validation_rejects_non_scan_leaves() {
        let mut plan = LogicalPlan::new();
        plan.push(LogicalNode::Filter(FilterNode {
            predicate: Expr::literal(Value::Boolean(true)),
            schema: RelationSchema::empty(),
        }));
        assert!(plan.validate().is_err());
    }

    #[test]
    fn validation_requires_single_exit() {
        let mut plan = LogicalPlan::new();
        plan.push(scan("planets", 1));
        plan.push(scan("satellites", 2));
        assert!(plan.validate().is_err());
    }

    #[test]
    fn scan_schema_respects_projection() {
        let LogicalNode::Scan(mut node) = scan("planets", 1) else {
            unreachable!()
        };
        node.schema = RelationSchema::new(vec![
            ColumnDef::new(1, "id", DataType::Int64),
            ColumnDef::new(2, "name", DataType::Utf8),
        ]);
        node.projection = Some(vec![2]);
        let schema = LogicalNode::Scan(node).schema();
        assert_eq!(schema.len(), 1);
        assert_eq!(schema.columns()[0].name, "name");
    }
}
