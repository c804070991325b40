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

//! Redundant operator removal: identity projections, always-true filters,
//! derived-table markers, and sorts feeding order-insensitive aggregates.

use kestrel_common::error::Result;
use kestrel_expr::expr::Expr;
use kestrel_expr::logical::{LogicalNode, LogicalPlan};
use kestrel_expr::value::Value;

use crate::{OptimizerContext, OptimizerStrategy};

pub struct OperatorRemoval;

impl OptimizerStrategy for OperatorRemoval {
    fn name(&self) -> &'static str {
        "operator_removal"
    }

    fn optimize(&self, mut plan: LogicalPlan, ctx: &mut OptimizerContext) -> Result<LogicalPlan> {
        for id in plan.graph.nodes() {
            let Some(node) = plan.node(&id) else {
                continue;
            };
            let removable = match node {
                LogicalNode::Project(project) => {
                    is_identity_projection(&plan, &id, project)
                }
                LogicalNode::Filter(filter) => {
                    filter.predicate == Expr::Literal(Value::Boolean(true))
                }
                LogicalNode::Subquery(_) => true,
                LogicalNode::Sort(_) => feeds_order_insensitive_aggregate(&plan, &id),
                _ => false,
            };
            if removable {
                plan.graph.remove_node(&id, true);
                ctx.bump("optimization_operator_removal");
            }
        }

        // a DISTINCT directly over a single-column unnest folds into the
        // unnest's distinct mode
        for id in plan.graph.nodes() {
            let Some(LogicalNode::Distinct(_)) = plan.node(&id) else {
                continue;
            };
            let Some(input) = plan.input_of(&id) else {
                continue;
            };
            let folds = matches!(
                plan.node(&input),
                Some(LogicalNode::Unnest(unnest)) if unnest.single_column
            );
            if folds {
                if let Some(LogicalNode::Unnest(unnest)) = plan.graph.node_mut(&input) {
                    unnest.distinct = true;
                }
                plan.graph.remove_node(&id, true);
                ctx.bump("optimization_operator_removal");
            }
        }
        Ok(plan)
    }
}

/// A projection is identity when its output columns are exactly its
/// input's columns: same ids, same order, same display names.
fn is_identity_projection(
    plan: &LogicalPlan,
    node_id: &str,
    project: &kestrel_expr::logical::ProjectNode,
) -> bool {
    let all_plain = project
        .exprs
        .iter()
        .all(|expr| matches!(expr, Expr::Column { .. }));
    if !all_plain {
        return false;
    }
    let Some(input) = plan.input_of(node_id) else {
        return false;
    };
    let Some(input_node) = plan.node(&input) else {
        return false;
    };
    let input_schema = input_node.schema();
    if input_schema.len() != project.schema.len() {
        return false;
    }
    input_schema
        .columns()
        .iter()
        .zip(project.schema.columns())
        .all(|(a, b)| a.id == b.id && a.name == b.name && a.data_type == b.data_type)
}

/// Sorts upstream of an aggregate are wasted work; none of the supported
/// aggregators depend on input order.
fn feeds_order_insensitive_aggregate(plan: &LogicalPlan, node_id: &str) -> bool {
    let consumers = plan.graph.outgoing_edges(node_id);
    !consumers.is_empty()
        && consumers.iter().all(|(_, target, _)| {
            match plan.node(target) {
                Some(LogicalNode::Aggregate(aggregate)) => aggregate
                    .aggregates
                    .iter()
                    .all(|spec| !spec.kind.requires_ordered_input()),
                Some(LogicalNode::Distinct(_)) => true,
                _ => false,
            }
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::datatypes::DataType;
    use kestrel_expr::expr::AggregateKind;
    use kestrel_expr::logical::{
        AggregateNode, AggregateSpec, ColumnRef, FilterNode, ProjectNode, ScanNode, SortKey,
        SortNode,
    };
    use kestrel_expr::registry::FunctionRegistry;
    use kestrel_expr::schema::{ColumnDef, RelationSchema};

    use super::*;

    fn scan(id: u64) -> LogicalNode {
        LogicalNode::Scan(ScanNode {
            dataset: "t".into(),
            alias: None,
            schema: RelationSchema::new(vec![ColumnDef::new(id, "id", DataType::Int64)]),
            projection: None,
            predicates: vec![],
            limit: None,
            pruned_empty: false,
            statistics: Default::default(),
        })
    }

    fn ctx() -> OptimizerContext {
        OptimizerContext::new(Arc::new(FunctionRegistry::standard()))
    }

    #[test]
    fn identity_projections_are_dropped() {
        let mut plan = LogicalPlan::new();
        let scan_id = plan.push(scan(1));
        let project = plan.push(LogicalNode::Project(ProjectNode {
            exprs: vec![Expr::column(1, "id")],
            schema: RelationSchema::new(vec![ColumnDef::new(1, "id", DataType::Int64)]),
        }));
        plan.graph.add_edge(scan_id, project.clone());

        let mut ctx = ctx();
        let plan = OperatorRemoval.optimize(plan, &mut ctx).unwrap();
        assert!(plan.node(&project).is_none());
        assert_eq!(ctx.counter("optimization_operator_removal"), 1);
    }

    #[test]
    fn renaming_projections_survive() {
        let mut plan = LogicalPlan::new();
        let scan_id = plan.push(scan(1));
        let project = plan.push(LogicalNode::Project(ProjectNode {
            exprs: vec![Expr::column(1, "id")],
            schema: RelationSchema::new(vec![ColumnDef::new(1, "planet_id", DataType::Int64)]),
        }));
        plan.graph.add_edge(scan_id, project.clone());

        let plan = OperatorRemoval.optimize(plan, &mut ctx()).unwrap();
        assert!(plan.node(&project).is_some());
    }

    #[test]
    fn true_filters_are_dropped() {
        let mut plan = LogicalPlan::new();
        let scan_id = plan.push(scan(1));
        let filter = plan.push(LogicalNode::Filter(FilterNode {
            predicate: Expr::Literal(Value::Boolean(true)),
            schema: RelationSchema::empty(),
        }));
        plan.graph.add_edge(scan_id, filter.clone());

        let plan = OperatorRemoval.optimize(plan, &mut ctx()).unwrap();
        assert!(plan.node(&filter).is_none());
    }

    #[test]
    fn false_filters_stay() {
        let mut plan = LogicalPlan::new();
        let scan_id = plan.push(scan(1));
        let filter = plan.push(LogicalNode::Filter(FilterNode {
            predicate: Expr::Literal(Value::Boolean(false)),
            schema: RelationSchema::empty(),
        }));
        plan.graph.add_edge(scan_id, filter.clone());

        let plan = OperatorRemoval.optimize(plan, &mut ctx()).unwrap();
        assert!(plan.node(&filter).is_some());
    }

    #[test]
    fn sort_under_aggregate_is_dropped() {
        let mut plan = LogicalPlan::new();
        let scan_id = plan.push(scan(1));
        let sort = plan.push(LogicalNode::Sort(SortNode {
            keys: vec![SortKey {
                column: ColumnRef::new(1, "id"),
                ascending: true,
                nulls_first: false,
            }],
            limit: None,
            schema: RelationSchema::empty(),
        }));
        let aggregate = plan.push(LogicalNode::Aggregate(AggregateNode {
            group_by: vec![],
            aggregates: vec![AggregateSpec {
                kind: AggregateKind::Count,
                arg: None,
                distinct: false,
                output: ColumnDef::new(9, "count", DataType::Int64),
            }],
            schema: RelationSchema::new(vec![ColumnDef::new(9, "count", DataType::Int64)]),
        }));
        plan.graph.add_edge(scan_id, sort.clone());
        plan.graph.add_edge(sort.clone(), aggregate);

        let plan = OperatorRemoval.optimize(plan, &mut ctx()).unwrap();
        assert!(plan.node(&sort).is_none());
    }

    #[test]
    fn sort_at_the_sink_survives() {
        let mut plan = LogicalPlan::new();
        let scan_id = plan.push(scan(1));
        let sort = plan.push(LogicalNode::Sort(SortNode {
            keys: vec![SortKey {
                column: ColumnRef::new(1, "id"),
                ascending: false,
                nulls_first: true,
            }],
            limit: None,
            schema: RelationSchema::empty(),
        }));
        plan.graph.add_edge(scan_id, sort.clone());

        let plan = OperatorRemoval.optimize(plan, &mut ctx()).unwrap();
        assert!(plan.node(&sort).is_some());
    }
}
