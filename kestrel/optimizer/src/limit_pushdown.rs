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

//! Limit pushdown.
//!
//! A LIMIT travels through projections and derived-table markers, turns a
//! stable sort into a Top-N, stops inside scans, and crosses joins only
//! where a row of the pushed side guarantees at least one output row: the
//! preserved side of an outer join, or either side of a CROSS JOIN (where
//! the smaller side is preferred). The limit operator itself always stays
//! in place; pushing only caps how much the upstream produces.

use kestrel_common::error::Result;
use kestrel_expr::logical::{JoinType, LogicalNode, LogicalPlan};

use crate::{OptimizerContext, OptimizerStrategy};

pub struct LimitPushdown;

impl OptimizerStrategy for LimitPushdown {
    fn name(&self) -> &'static str {
        "limit_pushdown"
    }

    fn optimize(&self, mut plan: LogicalPlan, ctx: &mut OptimizerContext) -> Result<LogicalPlan> {
        for id in plan.graph.nodes() {
            let Some(LogicalNode::Limit(limit)) = plan.graph.node(&id) else {
                continue;
            };
            let Some(limit_rows) = limit.limit else {
                continue;
            };
            // the upstream must deliver offset + limit rows
            let target = limit_rows.saturating_add(limit.offset);
            if let Some(input) = plan.input_of(&id) {
                push_limit(&mut plan, &input, target, ctx);
            }
        }
        Ok(plan)
    }
}

fn push_limit(plan: &mut LogicalPlan, node_id: &str, target: usize, ctx: &mut OptimizerContext) {
    let Some(node) = plan.node(node_id) else {
        return;
    };
    match node {
        LogicalNode::Scan(_) => {
            if let Some(LogicalNode::Scan(scan)) = plan.graph.node_mut(node_id) {
                let new_limit = scan.limit.map_or(target, |existing| existing.min(target));
                if scan.limit != Some(new_limit) {
                    scan.limit = Some(new_limit);
                    ctx.bump("optimization_limit_pushdown");
                }
            }
        }
        LogicalNode::Sort(_) => {
            // the sort stays blocking but only keeps a Top-N heap
            if let Some(LogicalNode::Sort(sort)) = plan.graph.node_mut(node_id) {
                let new_limit = sort.limit.map_or(target, |existing| existing.min(target));
                if sort.limit != Some(new_limit) {
                    sort.limit = Some(new_limit);
                    ctx.bump("optimization_limit_pushdown");
                }
            }
        }
        LogicalNode::Project(_) | LogicalNode::Subquery(_) => {
            if let Some(input) = plan.input_of(node_id) {
                push_limit(plan, &input, target, ctx);
            }
        }
        LogicalNode::Limit(_) => {
            if let Some(LogicalNode::Limit(inner)) = plan.graph.node_mut(node_id) {
                let combined = inner.limit.map_or(target, |existing| existing.min(target));
                inner.limit = Some(combined);
            }
        }
        LogicalNode::Join(join) => {
            let preserved = match join.join_type {
                JoinType::Left => vec!["left"],
                JoinType::Right => vec!["right"],
                JoinType::Cross => {
                    // prefer the smaller side; fall back to the left
                    let smaller = smaller_cross_side(plan, node_id);
                    vec![smaller]
                }
                _ => vec![],
            };
            for leg in preserved {
                let child = plan
                    .graph
                    .incoming_edges(node_id)
                    .into_iter()
                    .find(|(_, _, label)| label.as_deref() == Some(leg))
                    .map(|(source, _, _)| source);
                if let Some(child) = child {
                    push_limit(plan, &child, target, ctx);
                }
            }
        }
        _ => {}
    }
}

/// Estimated record counts decide which cross-join side receives the
/// limit.
fn smaller_cross_side(plan: &LogicalPlan, join_id: &str) -> &'static str {
    let side_estimate = |leg: &str| -> u64 {
        let Some(child) = plan
            .graph
            .incoming_edges(join_id)
            .into_iter()
            .find(|(_, _, label)| label.as_deref() == Some(leg))
            .map(|(source, _, _)| source)
        else {
            return u64::MAX;
        };
        subtree_record_estimate(plan, &child)
    };
    if side_estimate("right") < side_estimate("left") {
        "right"
    } else {
        "left"
    }
}

fn subtree_record_estimate(plan: &LogicalPlan, node_id: &str) -> u64 {
    let mut total = 0u64;
    let mut stack = vec![node_id.to_string()];
    while let Some(id) = stack.pop() {
        match plan.node(&id) {
            Some(LogicalNode::Scan(scan)) => {
                total = total.saturating_add(
                    scan.statistics
                        .record_count
                        .max(scan.statistics.record_count_estimate),
                );
            }
            Some(LogicalNode::Values(values)) => {
                total = total.saturating_add(values.rows.len() as u64);
            }
            _ => {}
        }
        for (source, _, _) in plan.graph.incoming_edges(&id) {
            stack.push(source);
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::datatypes::DataType;
    use kestrel_expr::logical::{
        JoinCondition, JoinNode, LimitNode, ProjectNode, ScanNode, SortKey, SortNode,
    };
    use kestrel_expr::registry::FunctionRegistry;
    use kestrel_expr::schema::{ColumnDef, RelationSchema};

    use super::*;

    fn scan(dataset: &str, id: u64, rows: u64) -> LogicalNode {
        let mut statistics = kestrel_common::stats::RelationStatistics::new();
        statistics.record_count = rows;
        LogicalNode::Scan(ScanNode {
            dataset: dataset.into(),
            alias: None,
            schema: RelationSchema::new(vec![ColumnDef::new(id, "id", DataType::Int64)]),
            projection: None,
            predicates: vec![],
            limit: None,
            pruned_empty: false,
            statistics,
        })
    }

    fn ctx() -> OptimizerContext {
        OptimizerContext::new(Arc::new(FunctionRegistry::standard()))
    }

    #[test]
    fn limits_reach_scans_through_projections() {
        let mut plan = LogicalPlan::new();
        let scan_id = plan.push(scan("planets", 1, 9));
        let project = plan.push(LogicalNode::Project(ProjectNode {
            exprs: vec![kestrel_expr::expr::Expr::column(1, "id")],
            schema: RelationSchema::new(vec![ColumnDef::new(1, "id", DataType::Int64)]),
        }));
        let limit = plan.push(LogicalNode::Limit(LimitNode {
            limit: Some(5),
            offset: 2,
            schema: RelationSchema::empty(),
        }));
        plan.graph.add_edge(scan_id.clone(), project.clone());
        plan.graph.add_edge(project, limit);

        let mut ctx = ctx();
        let plan = LimitPushdown.optimize(plan, &mut ctx).unwrap();
        let Some(LogicalNode::Scan(node)) = plan.node(&scan_id) else {
            panic!("scan vanished")
        };
        // offset 2 limit 5 pushes 7
        assert_eq!(node.limit, Some(7));
        assert_eq!(ctx.counter("optimization_limit_pushdown"), 1);
    }

    #[test]
    fn sorts_become_top_n() {
        let mut plan = LogicalPlan::new();
        let scan_id = plan.push(scan("planets", 1, 9));
        let sort = plan.push(LogicalNode::Sort(SortNode {
            keys: vec![SortKey {
                column: kestrel_expr::logical::ColumnRef::new(1, "id"),
                ascending: true,
                nulls_first: false,
            }],
            limit: None,
            schema: RelationSchema::empty(),
        }));
        let limit = plan.push(LogicalNode::Limit(LimitNode {
            limit: Some(3),
            offset: 0,
            schema: RelationSchema::empty(),
        }));
        plan.graph.add_edge(scan_id.clone(), sort.clone());
        plan.graph.add_edge(sort.clone(), limit);

        let plan = LimitPushdown.optimize(plan, &mut ctx()).unwrap();
        let Some(LogicalNode::Sort(node)) = plan.node(&sort) else {
            panic!("sort vanished")
        };
        assert_eq!(node.limit, Some(3));
        // the scan is behind a blocking sort, so it keeps producing all rows
        let Some(LogicalNode::Scan(node)) = plan.node(&scan_id) else {
            panic!("scan vanished")
        };
        assert_eq!(node.limit, None);
    }

    #[test]
    fn cross_joins_limit_the_smaller_side() {
        let mut plan = LogicalPlan::new();
        let big = plan.push(scan("big", 1, 1_000_000));
        let small = plan.push(scan("small", 2, 10));
        let join = plan.push(LogicalNode::Join(JoinNode {
            join_type: JoinType::Cross,
            condition: JoinCondition::None,
            schema: RelationSchema::empty(),
        }));
        plan.graph.add_labelled_edge(big.clone(), join.clone(), "left");
        plan.graph
            .add_labelled_edge(small.clone(), join.clone(), "right");
        let limit = plan.push(LogicalNode::Limit(LimitNode {
            limit: Some(5),
            offset: 0,
            schema: RelationSchema::empty(),
        }));
        plan.graph.add_edge(join, limit);

        let plan = LimitPushdown.optimize(plan, &mut ctx()).unwrap();
        let Some(LogicalNode::Scan(small_scan)) = plan.node(&small) else {
            panic!("scan vanished")
        };
        assert_eq!(small_scan.limit, Some(5));
        let Some(LogicalNode::Scan(big_scan)) = plan.node(&big) else {
            panic!("scan vanished")
        };
        assert_eq!(big_scan.limit, None);
    }

    #[test]
    fn inner_joins_block_limit_pushdown() {
        let mut plan = LogicalPlan::new();
        let left = plan.push(scan("a", 1, 100));
        let right = plan.push(scan("b", 2, 100));
        let join = plan.push(LogicalNode::Join(JoinNode {
            join_type: JoinType::Inner,
            condition: JoinCondition::Equi {
                left: vec![kestrel_expr::logical::ColumnRef::new(1, "id")],
                right: vec![kestrel_expr::logical::ColumnRef::new(2, "id")],
            },
            schema: RelationSchema::empty(),
        }));
        plan.graph.add_labelled_edge(left.clone(), join.clone(), "left");
        plan.graph
            .add_labelled_edge(right.clone(), join.clone(), "right");
        let limit = plan.push(LogicalNode::Limit(LimitNode {
            limit: Some(5),
            offset: 0,
            schema: RelationSchema::empty(),
        }));
        plan.graph.add_edge(join, limit);

        let plan = LimitPushdown.optimize(plan, &mut ctx()).unwrap();
        for scan_id in [&left, &right] {
            let Some(LogicalNode::Scan(node)) = plan.node(scan_id) else {
                panic!("scan vanished")
            };
            assert_eq!(node.limit, None);
        }
    }
}
