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

//! Projection pushdown: propagate the set of required column identities
//! from the sink to the scans, so decoders materialize only what the query
//! touches.

use kestrel_common::error::Result;
use kestrel_expr::logical::{LogicalNode, LogicalPlan, UnnestSource};
use kestrel_expr::schema::ColumnId;

use crate::{OptimizerContext, OptimizerStrategy};

pub struct ProjectionPushdown;

impl OptimizerStrategy for ProjectionPushdown {
    fn name(&self) -> &'static str {
        "projection_pushdown"
    }

    fn optimize(&self, mut plan: LogicalPlan, ctx: &mut OptimizerContext) -> Result<LogicalPlan> {
        let Ok(exit) = plan.exit() else {
            return Ok(plan);
        };
        let needed = plan
            .node(&exit)
            .map(|node| node.schema().column_ids())
            .unwrap_or_default();
        let mut pruned = 0u64;
        require(&mut plan, &exit, needed, &mut pruned);
        for _ in 0..pruned {
            ctx.bump("optimization_projection_pushdown");
        }
        Ok(plan)
    }
}

fn union_with(mut base: Vec<ColumnId>, extra: impl IntoIterator<Item = ColumnId>) -> Vec<ColumnId> {
    for id in extra {
        if !base.contains(&id) {
            base.push(id);
        }
    }
    base
}

/// Walk downstream-to-upstream, accumulating the columns each node needs
/// from its inputs, and fix scan projections at the leaves.
fn require(plan: &mut LogicalPlan, node_id: &str, needed: Vec<ColumnId>, pruned: &mut u64) {
    let inputs: Vec<String> = plan
        .graph
        .incoming_edges(node_id)
        .into_iter()
        .map(|(source, _, _)| source)
        .collect();

    // compute per-input requirements first; no borrow survives into the
    // recursion below
    let recursions: Vec<(String, Vec<ColumnId>)> = match plan.node(node_id) {
        None => return,
        Some(LogicalNode::Scan(_)) => {
            fix_scan_projection(plan, node_id, &needed, pruned);
            return;
        }
        Some(LogicalNode::Project(project)) => {
            let mut input_needs = Vec::new();
            for expr in &project.exprs {
                input_needs = union_with(input_needs, expr.column_ids());
            }
            inputs
                .into_iter()
                .map(|input| (input, input_needs.clone()))
                .collect()
        }
        Some(LogicalNode::Filter(filter)) => {
            let input_needs = union_with(needed, filter.predicate.column_ids());
            inputs
                .into_iter()
                .map(|input| (input, input_needs.clone()))
                .collect()
        }
        Some(LogicalNode::Join(join)) => {
            let mut condition_columns = Vec::new();
            match &join.condition {
                kestrel_expr::logical::JoinCondition::Equi { left, right } => {
                    condition_columns.extend(left.iter().map(|c| c.id));
                    condition_columns.extend(right.iter().map(|c| c.id));
                }
                kestrel_expr::logical::JoinCondition::NonEqui { left, right, .. } => {
                    condition_columns.push(left.id);
                    condition_columns.push(right.id);
                }
                kestrel_expr::logical::JoinCondition::None => {}
            }
            let needed = union_with(needed, condition_columns);
            inputs
                .into_iter()
                .map(|input| {
                    let side_ids = plan
                        .node(&input)
                        .map(|n| n.schema().column_ids())
                        .unwrap_or_default();
                    let side_needs: Vec<ColumnId> = needed
                        .iter()
                        .copied()
                        .filter(|id| side_ids.contains(id))
                        .collect();
                    (input, side_needs)
                })
                .collect()
        }
        Some(LogicalNode::Aggregate(aggregate)) => {
            let mut input_needs: Vec<ColumnId> =
                aggregate.group_by.iter().map(|c| c.id).collect();
            for spec in &aggregate.aggregates {
                if let Some(arg) = &spec.arg {
                    if !input_needs.contains(&arg.id) {
                        input_needs.push(arg.id);
                    }
                }
            }
            inputs
                .into_iter()
                .map(|input| (input, input_needs.clone()))
                .collect()
        }
        Some(LogicalNode::Sort(sort)) => {
            let keys: Vec<ColumnId> = sort.keys.iter().map(|k| k.column.id).collect();
            let input_needs = union_with(needed, keys);
            inputs
                .into_iter()
                .map(|input| (input, input_needs.clone()))
                .collect()
        }
        Some(LogicalNode::Unnest(unnest)) => {
            let target = unnest.target.clone();
            let mut input_needs: Vec<ColumnId> = needed
                .iter()
                .copied()
                .filter(|id| *id != target.id)
                .collect();
            if let UnnestSource::Column(column) = &unnest.source {
                if !input_needs.contains(&column.id) {
                    input_needs.push(column.id);
                }
            }
            // downstream touches only the unnested column: skip the
            // replication and emit the flat element list
            let only_target = needed == vec![target.id];
            if only_target {
                if let Some(LogicalNode::Unnest(unnest)) = plan.graph.node_mut(node_id) {
                    if !unnest.single_column {
                        unnest.single_column = true;
                        unnest.schema =
                            kestrel_expr::schema::RelationSchema::new(vec![target]);
                        *pruned += 1;
                    }
                }
            }
            inputs
                .into_iter()
                .map(|input| (input, input_needs.clone()))
                .collect()
        }
        Some(
            LogicalNode::Distinct(_)
            | LogicalNode::Limit(_)
            | LogicalNode::Union(_)
            | LogicalNode::Subquery(_)
            | LogicalNode::Explain(_),
        ) => inputs
            .into_iter()
            .map(|input| (input, needed.clone()))
            .collect(),
        Some(LogicalNode::Values(_) | LogicalNode::Show(_) | LogicalNode::Set(_)) => {
            return
        }
    };

    for (input, input_needs) in recursions {
        require(plan, &input, input_needs, pruned);
    }
}

fn fix_scan_projection(
    plan: &mut LogicalPlan,
    node_id: &str,
    needed: &[ColumnId],
    pruned: &mut u64,
) {
    let Some(LogicalNode::Scan(scan)) = plan.graph.node_mut(node_id) else {
        return;
    };
    let schema_ids = scan.schema.column_ids();
    let mut wanted: Vec<ColumnId> = schema_ids
        .iter()
        .copied()
        .filter(|id| needed.contains(id))
        .collect();
    // predicates evaluated inside the scan need their columns too
    for clause in &scan.predicates {
        for predicate in clause {
            if schema_ids.contains(&predicate.column) && !wanted.contains(&predicate.column) {
                wanted.push(predicate.column);
            }
        }
    }
    if wanted.is_empty() {
        // COUNT(*)-style queries still need one column for the row count
        if let Some(first) = schema_ids.first() {
            wanted.push(*first);
        }
    }
    if wanted.len() < schema_ids.len() {
        *pruned += 1;
    }
    scan.projection = Some(wanted);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::datatypes::DataType;
    use kestrel_expr::expr::Expr;
    use kestrel_expr::logical::{ProjectNode, ScanNode};
    use kestrel_expr::registry::FunctionRegistry;
    use kestrel_expr::schema::{ColumnDef, RelationSchema};

    use super::*;

    #[test]
    fn scans_keep_only_referenced_columns() {
        let mut plan = LogicalPlan::new();
        let scan_schema = RelationSchema::new(vec![
            ColumnDef::new(1, "id", DataType::Int64),
            ColumnDef::new(2, "name", DataType::Utf8),
            ColumnDef::new(3, "mass", DataType::Float64),
        ]);
        let scan = plan.push(LogicalNode::Scan(ScanNode {
            dataset: "planets".into(),
            alias: None,
            schema: scan_schema.clone(),
            projection: None,
            predicates: vec![],
            limit: None,
            pruned_empty: false,
            statistics: Default::default(),
        }));
        let project = plan.push(LogicalNode::Project(ProjectNode {
            exprs: vec![Expr::column(2, "name")],
            schema: RelationSchema::new(vec![ColumnDef::new(2, "name", DataType::Utf8)]),
        }));
        plan.graph.add_edge(scan.clone(), project);

        let mut ctx = OptimizerContext::new(Arc::new(FunctionRegistry::standard()));
        let plan = ProjectionPushdown.optimize(plan, &mut ctx).unwrap();

        let Some(LogicalNode::Scan(node)) = plan.node(&scan) else {
            panic!("scan vanished")
        };
        assert_eq!(node.projection, Some(vec![2]));
        assert_eq!(ctx.counter("optimization_projection_pushdown"), 1);
    }

    #[test]
    fn empty_requirements_keep_one_column() {
        let mut plan = LogicalPlan::new();
        let scan = plan.push(LogicalNode::Scan(ScanNode {
            dataset: "planets".into(),
            alias: None,
            schema: RelationSchema::new(vec![
                ColumnDef::new(1, "id", DataType::Int64),
                ColumnDef::new(2, "name", DataType::Utf8),
            ]),
            projection: None,
            predicates: vec![],
            limit: None,
            pruned_empty: false,
            statistics: Default::default(),
        }));
        let project = plan.push(LogicalNode::Project(ProjectNode {
            exprs: vec![Expr::literal(kestrel_expr::value::Value::Int64(1))],
            schema: RelationSchema::new(vec![ColumnDef::new(9, "one", DataType::Int64)]),
        }));
        plan.graph.add_edge(scan.clone(), project);

        let mut ctx = OptimizerContext::new(Arc::new(FunctionRegistry::standard()));
        let plan = ProjectionPushdown.optimize(plan, &mut ctx).unwrap();

        let Some(LogicalNode::Scan(node)) = plan.node(&scan) else {
            panic!("scan vanished")
        };
        assert_eq!(node.projection, Some(vec![1]));
    }
}
