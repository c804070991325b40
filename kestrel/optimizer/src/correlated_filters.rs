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

//! Correlated filter synthesis for inner equi-joins.
//!
//! The build side's column bounds bound every possible match, so the probe
//! side gains a synthesized range predicate: `build.id ∈ [lo, hi]` implies
//! `probe.key >= lo AND probe.key <= hi`. The probe scan then benefits from
//! statistics pruning and decoder pushdown without touching the join
//! itself. Only exact integer-family keys participate.

use arrow::datatypes::DataType;
use kestrel_common::error::Result;
use kestrel_expr::dnf::{CmpOp, Predicate};
use kestrel_expr::logical::{JoinCondition, JoinType, LogicalNode, LogicalPlan};
use kestrel_expr::schema::ColumnId;
use kestrel_expr::value::Value;
use log::debug;

use crate::predicate_pushdown::merge_dnf;
use crate::{OptimizerContext, OptimizerStrategy};

pub struct CorrelatedFilters;

impl OptimizerStrategy for CorrelatedFilters {
    fn name(&self) -> &'static str {
        "correlated_filters"
    }

    fn optimize(&self, mut plan: LogicalPlan, ctx: &mut OptimizerContext) -> Result<LogicalPlan> {
        for id in plan.graph.nodes() {
            let Some(LogicalNode::Join(join)) = plan.graph.node(&id) else {
                continue;
            };
            if join.join_type != JoinType::Inner {
                continue;
            }
            let JoinCondition::Equi { left, right } = join.condition.clone() else {
                continue;
            };
            let Some(build_leg) = leg_of(&plan, &id, "left") else {
                continue;
            };
            let Some(probe_leg) = leg_of(&plan, &id, "right") else {
                continue;
            };

            for (build_key, probe_key) in left.iter().zip(right.iter()) {
                let Some((lo, hi)) = column_bounds(&plan, &build_leg, build_key.id) else {
                    continue;
                };
                let Some(probe_scan) = scan_with_column(&plan, &probe_leg, probe_key.id) else {
                    continue;
                };
                let clause = vec![
                    Predicate::new(
                        probe_key.id,
                        probe_key.name.clone(),
                        CmpOp::GtEq,
                        Value::Int64(lo),
                    ),
                    Predicate::new(
                        probe_key.id,
                        probe_key.name.clone(),
                        CmpOp::LtEq,
                        Value::Int64(hi),
                    ),
                ];
                if let Some(LogicalNode::Scan(scan)) = plan.graph.node_mut(&probe_scan) {
                    scan.predicates =
                        merge_dnf(std::mem::take(&mut scan.predicates), vec![clause]);
                    debug!(
                        "synthesized correlated filter {} in [{lo}, {hi}] on scan of '{}'",
                        probe_key.name, scan.dataset
                    );
                    ctx.bump("optimization_inner_join_correlated_filter");
                }
            }
        }
        Ok(plan)
    }
}

fn leg_of(plan: &LogicalPlan, join_id: &str, leg: &str) -> Option<String> {
    plan.graph
        .incoming_edges(join_id)
        .into_iter()
        .find(|(_, _, label)| label.as_deref() == Some(leg))
        .map(|(source, _, _)| source)
}

/// Walk the subtree rooted at `node_id` upstream and find the bounds of
/// `column` in a scan's statistics. Integer-family columns only.
fn column_bounds(plan: &LogicalPlan, node_id: &str, column: ColumnId) -> Option<(i64, i64)> {
    for scan_id in scans_upstream(plan, node_id) {
        let Some(LogicalNode::Scan(scan)) = plan.node(&scan_id) else {
            continue;
        };
        let Some(def) = scan.schema.column_by_id(column) else {
            continue;
        };
        if !matches!(
            def.data_type,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
        ) {
            return None;
        }
        let lo = scan.statistics.lower_bound(column)?;
        let hi = scan.statistics.upper_bound(column)?;
        return Some((lo, hi));
    }
    None
}

/// The scan in the subtree whose source schema carries `column`.
fn scan_with_column(plan: &LogicalPlan, node_id: &str, column: ColumnId) -> Option<String> {
    scans_upstream(plan, node_id).into_iter().find(|scan_id| {
        matches!(
            plan.node(scan_id),
            Some(LogicalNode::Scan(scan)) if scan.schema.column_by_id(column).is_some()
        )
    })
}

fn scans_upstream(plan: &LogicalPlan, node_id: &str) -> Vec<String> {
    let mut scans = Vec::new();
    let mut stack = vec![node_id.to_string()];
    while let Some(id) = stack.pop() {
        if matches!(plan.node(&id), Some(LogicalNode::Scan(_))) {
            scans.push(id.clone());
        }
        for (source, _, _) in plan.graph.incoming_edges(&id) {
            stack.push(source);
        }
    }
    scans
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kestrel_expr::logical::{ColumnRef, JoinNode, ScanNode};
    use kestrel_expr::registry::FunctionRegistry;
    use kestrel_expr::schema::{ColumnDef, RelationSchema};

    use super::*;

    #[test]
    fn inner_equi_joins_gain_probe_range_filters() {
        let mut plan = LogicalPlan::new();

        let mut planet_stats = kestrel_common::stats::RelationStatistics::new();
        planet_stats.record_count = 9;
        planet_stats.update_lower(1, 1);
        planet_stats.update_upper(1, 9);
        let planets = plan.push(LogicalNode::Scan(ScanNode {
            dataset: "planets".into(),
            alias: None,
            schema: RelationSchema::new(vec![ColumnDef::new(1, "id", DataType::Int64)]),
            projection: None,
            predicates: vec![],
            limit: None,
            pruned_empty: false,
            statistics: planet_stats,
        }));
        let satellites = plan.push(LogicalNode::Scan(ScanNode {
            dataset: "satellites".into(),
            alias: None,
            schema: RelationSchema::new(vec![ColumnDef::new(2, "planetId", DataType::Int64)]),
            projection: None,
            predicates: vec![],
            limit: None,
            pruned_empty: false,
            statistics: Default::default(),
        }));
        let join = plan.push(LogicalNode::Join(JoinNode {
            join_type: JoinType::Inner,
            condition: JoinCondition::Equi {
                left: vec![ColumnRef::new(1, "id")],
                right: vec![ColumnRef::new(2, "planetId")],
            },
            schema: RelationSchema::empty(),
        }));
        plan.graph.add_labelled_edge(planets, join.clone(), "left");
        plan.graph
            .add_labelled_edge(satellites.clone(), join, "right");

        let mut ctx = OptimizerContext::new(Arc::new(FunctionRegistry::standard()));
        let plan = CorrelatedFilters.optimize(plan, &mut ctx).unwrap();

        let Some(LogicalNode::Scan(scan)) = plan.node(&satellites) else {
            panic!("satellites scan vanished")
        };
        assert_eq!(scan.predicates.len(), 1);
        let clause = &scan.predicates[0];
        assert_eq!(clause.len(), 2);
        assert_eq!(clause[0].op, CmpOp::GtEq);
        assert_eq!(clause[0].value, Value::Int64(1));
        assert_eq!(clause[1].op, CmpOp::LtEq);
        assert_eq!(clause[1].value, Value::Int64(9));
        assert_eq!(ctx.counter("optimization_inner_join_correlated_filter"), 1);
    }

    #[test]
    fn outer_joins_are_left_alone() {
        let mut plan = LogicalPlan::new();
        let left = plan.push(LogicalNode::Scan(ScanNode {
            dataset: "a".into(),
            alias: None,
            schema: RelationSchema::new(vec![ColumnDef::new(1, "id", DataType::Int64)]),
            projection: None,
            predicates: vec![],
            limit: None,
            pruned_empty: false,
            statistics: Default::default(),
        }));
        let right = plan.push(LogicalNode::Scan(ScanNode {
            dataset: "b".into(),
            alias: None,
            schema: RelationSchema::new(vec![ColumnDef::new(2, "ref", DataType::Int64)]),
            projection: None,
            predicates: vec![],
            limit: None,
            pruned_empty: false,
            statistics: Default::default(),
        }));
        let join = plan.push(LogicalNode::Join(JoinNode {
            join_type: JoinType::Left,
            condition: JoinCondition::Equi {
                left: vec![ColumnRef::new(1, "id")],
                right: vec![ColumnRef::new(2, "ref")],
            },
            schema: RelationSchema::empty(),
        }));
        plan.graph.add_labelled_edge(left, join.clone(), "left");
        plan.graph.add_labelled_edge(right.clone(), join, "right");

        let mut ctx = OptimizerContext::new(Arc::new(FunctionRegistry::standard()));
        let plan = CorrelatedFilters.optimize(plan, &mut ctx).unwrap();
        let Some(LogicalNode::Scan(scan)) = plan.node(&right) else {
            panic!("scan vanished")
        };
        assert!(scan.predicates.is_empty());
    }
}
