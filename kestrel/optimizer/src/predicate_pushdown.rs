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

//! Predicate pushdown: move filter clauses toward the scans.
//!
//! Predicates push through projections (when the referenced columns pass
//! through unchanged), sorts, other filters, DISTINCT and derived-table
//! markers. They push through aggregates only when every referenced column
//! is a grouping column, and through joins only to a side that an outer
//! join cannot re-extend with nulls. At the scan they merge into the
//! pushed-down DNF, where statistics pruning and the decoders see them.
//!
//! Absorption is checked with a dry run before any mutation, so a
//! predicate is never half-pushed.

use kestrel_common::error::{Error, Result};
use kestrel_expr::dnf::Clause;
use kestrel_expr::logical::{JoinType, LogicalNode, LogicalPlan};
use kestrel_expr::schema::ColumnId;

use crate::predicate_rewriter::{dnf_to_expr, to_dnf};
use crate::{OptimizerContext, OptimizerStrategy};

/// Pushing stops absorbing once the AND-distribution at a scan would grow
/// past this many clauses.
const MAX_SCAN_CLAUSES: usize = 64;

pub struct PredicatePushdown;

impl OptimizerStrategy for PredicatePushdown {
    fn name(&self) -> &'static str {
        "predicate_pushdown"
    }

    fn optimize(&self, mut plan: LogicalPlan, ctx: &mut OptimizerContext) -> Result<LogicalPlan> {
        for id in plan.graph.nodes() {
            let Some(LogicalNode::Filter(filter)) = plan.graph.node(&id) else {
                continue;
            };
            let Some(clauses) = to_dnf(&filter.predicate) else {
                continue;
            };
            if clauses.is_empty() {
                continue;
            }
            let Some(input) = plan.input_of(&id) else {
                continue;
            };

            if clauses.len() == 1 {
                // a single AND-clause pushes predicate by predicate
                let mut remaining = Vec::new();
                for predicate in clauses.into_iter().next().unwrap_or_default() {
                    let single = vec![vec![predicate.clone()]];
                    if can_absorb(&plan, &input, &single) {
                        absorb(&mut plan, &input, single)?;
                        ctx.bump("optimization_predicate_pushdown");
                    } else {
                        remaining.push(predicate);
                    }
                }
                if remaining.is_empty() {
                    plan.graph.remove_node(&id, true);
                } else if let Some(LogicalNode::Filter(filter)) = plan.graph.node_mut(&id) {
                    filter.predicate = dnf_to_expr(&[remaining]);
                }
            } else {
                // an OR of clauses only moves as a unit
                if can_absorb(&plan, &input, &clauses) {
                    absorb(&mut plan, &input, clauses)?;
                    ctx.bump("optimization_predicate_pushdown");
                    plan.graph.remove_node(&id, true);
                }
            }
        }
        Ok(plan)
    }
}

fn clause_columns(clauses: &[Clause]) -> Vec<ColumnId> {
    let mut columns = Vec::new();
    for clause in clauses {
        for predicate in clause {
            if !columns.contains(&predicate.column) {
                columns.push(predicate.column);
            }
        }
    }
    columns
}

fn join_leg(plan: &LogicalPlan, join_id: &str, leg: &str) -> Option<String> {
    plan.graph
        .incoming_edges(join_id)
        .into_iter()
        .find(|(_, _, label)| label.as_deref() == Some(leg))
        .map(|(source, _, _)| source)
}

fn schema_covers(plan: &LogicalPlan, node_id: &str, columns: &[ColumnId]) -> bool {
    plan.node(node_id)
        .map(|node| {
            let ids = node.schema().column_ids();
            columns.iter().all(|c| ids.contains(c))
        })
        .unwrap_or(false)
}

/// Dry run: would `absorb` succeed at this node?
fn can_absorb(plan: &LogicalPlan, node_id: &str, clauses: &[Clause]) -> bool {
    let Some(node) = plan.node(node_id) else {
        return false;
    };
    let columns = clause_columns(clauses);
    match node {
        LogicalNode::Scan(scan) => {
            let ids = scan.schema.column_ids();
            if !columns.iter().all(|c| ids.contains(c)) {
                return false;
            }
            let merged = scan.predicates.len().max(1) * clauses.len();
            merged <= MAX_SCAN_CLAUSES
        }
        LogicalNode::Project(project) => {
            // only plain pass-through columns allow the predicate below
            let passes = columns.iter().all(|column| {
                project.exprs.iter().any(
                    |expr| matches!(expr, kestrel_expr::expr::Expr::Column { id, .. } if id == column),
                )
            });
            passes
                && plan
                    .input_of(node_id)
                    .map(|input| can_absorb(plan, &input, clauses))
                    .unwrap_or(false)
        }
        LogicalNode::Filter(_)
        | LogicalNode::Sort(_)
        | LogicalNode::Distinct(_)
        | LogicalNode::Subquery(_) => plan
            .input_of(node_id)
            .map(|input| can_absorb(plan, &input, clauses))
            .unwrap_or(false),
        LogicalNode::Aggregate(aggregate) => {
            let group_ids: Vec<ColumnId> =
                aggregate.group_by.iter().map(|c| c.id).collect();
            columns.iter().all(|c| group_ids.contains(c))
                && plan
                    .input_of(node_id)
                    .map(|input| can_absorb(plan, &input, clauses))
                    .unwrap_or(false)
        }
        LogicalNode::Join(join) => {
            let Some(left) = join_leg(plan, node_id, "left") else {
                return false;
            };
            let Some(right) = join_leg(plan, node_id, "right") else {
                return false;
            };
            // never past an outer join that could null-extend the side
            if schema_covers(plan, &left, &columns) {
                let left_pushable = matches!(
                    join.join_type,
                    JoinType::Inner
                        | JoinType::Left
                        | JoinType::Cross
                        | JoinType::Semi
                        | JoinType::Anti
                );
                return left_pushable && can_absorb(plan, &left, clauses);
            }
            if schema_covers(plan, &right, &columns) {
                let right_pushable = matches!(
                    join.join_type,
                    JoinType::Inner | JoinType::Right | JoinType::Cross
                );
                return right_pushable && can_absorb(plan, &right, clauses);
            }
            false
        }
        _ => false,
    }
}

/// Mutating twin of [`can_absorb`]; only called after the dry run agreed.
fn absorb(plan: &mut LogicalPlan, node_id: &str, clauses: Vec<Clause>) -> Result<()> {
    let node_kind = plan
        .node(node_id)
        .map(|n| n.node_type())
        .ok_or_else(|| Error::Internal(format!("pushdown lost node '{node_id}'")))?;
    match node_kind {
        "SCAN" => {
            if let Some(LogicalNode::Scan(scan)) = plan.graph.node_mut(node_id) {
                scan.predicates = merge_dnf(std::mem::take(&mut scan.predicates), clauses);
            }
            Ok(())
        }
        "JOIN" => {
            let columns = clause_columns(&clauses);
            let left = join_leg(plan, node_id, "left");
            let right = join_leg(plan, node_id, "right");
            if let Some(left) = left {
                if schema_covers(plan, &left, &columns) {
                    return absorb(plan, &left, clauses);
                }
            }
            if let Some(right) = right {
                if schema_covers(plan, &right, &columns) {
                    return absorb(plan, &right, clauses);
                }
            }
            Err(Error::Internal(
                "pushdown dry run and absorb disagreed at a join".to_string(),
            ))
        }
        _ => {
            let input = plan.input_of(node_id).ok_or_else(|| {
                Error::Internal("pushdown absorb reached a node without input".to_string())
            })?;
            absorb(plan, &input, clauses)
        }
    }
}

/// AND of two DNFs by distribution. An empty existing DNF means TRUE.
pub fn merge_dnf(existing: Vec<Clause>, incoming: Vec<Clause>) -> Vec<Clause> {
    if existing.is_empty() {
        return incoming;
    }
    if incoming.is_empty() {
        return existing;
    }
    let mut merged = Vec::with_capacity(existing.len() * incoming.len());
    for left in &existing {
        for right in &incoming {
            let mut clause = left.clone();
            clause.extend(right.iter().cloned());
            merged.push(clause);
        }
    }
    merged
}
