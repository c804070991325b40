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

//! Predicate normalization: lift filter predicates into flat DNF.
//!
//! A predicate converts when every leaf is a `(column, op, literal)` triple
//! under AND/OR; conversion distributes AND over OR. Predicates with other
//! shapes (function calls, IS NULL, column-to-column comparisons) stay as
//! residual expression filters and are untouched here. `WHERE` coerces NULL
//! to false downstream; the triples themselves follow three-valued logic at
//! evaluation time.

use kestrel_common::error::Result;
use kestrel_expr::dnf::{self, Clause, CmpOp, Predicate};
use kestrel_expr::expr::{Expr, Operator};
use kestrel_expr::logical::{LogicalNode, LogicalPlan};
use kestrel_expr::value::Value;

use crate::{OptimizerContext, OptimizerStrategy};

/// Split a predicate on top-level ANDs.
pub fn split_conjunction(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::BinaryOp {
            left,
            op: Operator::And,
            right,
        } => {
            let mut parts = split_conjunction(left);
            parts.extend(split_conjunction(right));
            parts
        }
        other => vec![other],
    }
}

/// Convert `col op literal` (either orientation) into a triple.
pub fn to_triple(expr: &Expr) -> Option<Predicate> {
    let Expr::BinaryOp { left, op, right } = expr else {
        return None;
    };
    let cmp = CmpOp::from_operator(*op)?;
    match (left.as_ref(), right.as_ref()) {
        (Expr::Column { id, name }, Expr::Literal(value)) => {
            Some(Predicate::new(*id, name.clone(), cmp, value.clone()))
        }
        (Expr::Literal(value), Expr::Column { id, name }) => {
            let swapped = CmpOp::from_operator(op.swap()?)?;
            Some(Predicate::new(*id, name.clone(), swapped, value.clone()))
        }
        _ => None,
    }
}

/// Full conversion of an expression into flat DNF clauses; None when any
/// leaf is not a triple.
pub fn to_dnf(expr: &Expr) -> Option<Vec<Clause>> {
    if let Some(triple) = to_triple(expr) {
        return Some(vec![vec![triple]]);
    }
    match expr {
        Expr::BinaryOp {
            left,
            op: Operator::Or,
            right,
        } => {
            let mut clauses = to_dnf(left)?;
            clauses.extend(to_dnf(right)?);
            Some(clauses)
        }
        Expr::BinaryOp {
            left,
            op: Operator::And,
            right,
        } => {
            // distribute AND over OR
            let left = to_dnf(left)?;
            let right = to_dnf(right)?;
            let mut clauses = Vec::with_capacity(left.len() * right.len());
            for l in &left {
                for r in &right {
                    let mut clause = l.clone();
                    clause.extend(r.iter().cloned());
                    clauses.push(clause);
                }
            }
            Some(clauses)
        }
        // IN-lists over literals expand to one equality clause per item
        Expr::InList {
            expr,
            list,
            negated: false,
        } => {
            let Expr::Column { id, name } = expr.as_ref() else {
                return None;
            };
            let mut clauses = Vec::with_capacity(list.len());
            for item in list {
                let Expr::Literal(value) = item else {
                    return None;
                };
                if value.is_null() {
                    // x IN (… NULL …) never matches on the NULL branch
                    continue;
                }
                clauses.push(vec![Predicate::new(
                    *id,
                    name.clone(),
                    CmpOp::Eq,
                    value.clone(),
                )]);
            }
            Some(clauses)
        }
        _ => None,
    }
}

/// Rebuild an expression from flat DNF clauses.
pub fn dnf_to_expr(clauses: &[Clause]) -> Expr {
    clauses
        .iter()
        .filter_map(|clause| Expr::conjunction(clause.iter().map(Predicate::to_expr)))
        .reduce(Expr::or)
        .unwrap_or(Expr::Literal(Value::Boolean(false)))
}

/// Normalization pass: rewrite convertible filter predicates into their
/// canonical flat-DNF form (deduplicated, deterministically ordered).
pub struct PredicateNormalization;

impl OptimizerStrategy for PredicateNormalization {
    fn name(&self) -> &'static str {
        "predicate_normalization"
    }

    fn optimize(&self, mut plan: LogicalPlan, ctx: &mut OptimizerContext) -> Result<LogicalPlan> {
        for id in plan.graph.nodes() {
            let Some(LogicalNode::Filter(filter)) = plan.graph.node(&id) else {
                continue;
            };
            let Some(clauses) = to_dnf(&filter.predicate) else {
                continue;
            };
            let normalised = dnf::normalise(clauses);
            let rewritten = dnf_to_expr(&normalised);
            if let Some(LogicalNode::Filter(filter)) = plan.graph.node_mut(&id) {
                if filter.predicate != rewritten {
                    ctx.bump("optimization_predicate_normalization");
                }
                filter.predicate = rewritten;
            }
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(id: u64, name: &str) -> Expr {
        Expr::column(id, name)
    }

    fn lit(v: i64) -> Expr {
        Expr::literal(Value::Int64(v))
    }

    #[test]
    fn triples_convert_in_both_orientations() {
        let forward = Expr::binary(col(1, "id"), Operator::Gt, lit(4));
        let p = to_triple(&forward).unwrap();
        assert_eq!(p.op, CmpOp::Gt);
        assert_eq!(p.value, Value::Int64(4));

        // 4 < id  ≡  id > 4
        let reversed = Expr::binary(lit(4), Operator::Lt, col(1, "id"));
        let p = to_triple(&reversed).unwrap();
        assert_eq!(p.op, CmpOp::Gt);
    }

    #[test]
    fn and_over_or_distributes() {
        // a = 1 AND (b = 2 OR c = 3) → [[a,b],[a,c]]
        let expr = Expr::and(
            Expr::binary(col(1, "a"), Operator::Eq, lit(1)),
            Expr::or(
                Expr::binary(col(2, "b"), Operator::Eq, lit(2)),
                Expr::binary(col(3, "c"), Operator::Eq, lit(3)),
            ),
        );
        let clauses = to_dnf(&expr).unwrap();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].len(), 2);
        assert_eq!(clauses[1].len(), 2);
        assert_eq!(clauses[0][0].column, 1);
        assert_eq!(clauses[1][1].column, 3);
    }

    #[test]
    fn residual_shapes_do_not_convert() {
        let is_null = Expr::IsNull(Box::new(col(1, "a")));
        assert!(to_dnf(&is_null).is_none());

        let col_to_col = Expr::binary(col(1, "a"), Operator::Eq, col(2, "b"));
        assert!(to_dnf(&col_to_col).is_none());
    }

    #[test]
    fn in_list_expands_to_equality_clauses() {
        let expr = Expr::InList {
            expr: Box::new(col(1, "id")),
            list: vec![lit(1), lit(2), Expr::literal(Value::Null)],
            negated: false,
        };
        let clauses = to_dnf(&expr).unwrap();
        assert_eq!(clauses.len(), 2);
        assert!(clauses.iter().all(|c| c[0].op == CmpOp::Eq));
    }
}
