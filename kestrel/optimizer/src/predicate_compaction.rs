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

//! Predicate compaction: merge range predicates on the same column within
//! a clause.
//!
//! The strongest lower bound wins (`>` beats `>=` at the same value), the
//! strongest upper bound wins (`<` beats `<=`), equality dominates
//! compatible ranges, and contradictions rewrite the clause to `False`
//! while preserving the schema.

use std::cmp::Ordering;

use kestrel_common::error::Result;
use kestrel_expr::dnf::{Clause, CmpOp, Predicate};
use kestrel_expr::expr::Expr;
use kestrel_expr::logical::{LogicalNode, LogicalPlan};
use kestrel_expr::value::Value;

use crate::predicate_rewriter::{dnf_to_expr, to_dnf};
use crate::{OptimizerContext, OptimizerStrategy};

pub struct PredicateCompaction;

impl OptimizerStrategy for PredicateCompaction {
    fn name(&self) -> &'static str {
        "predicate_compaction"
    }

    fn optimize(&self, mut plan: LogicalPlan, ctx: &mut OptimizerContext) -> Result<LogicalPlan> {
        for id in plan.graph.nodes() {
            let Some(LogicalNode::Filter(filter)) = plan.graph.node(&id) else {
                continue;
            };
            let Some(clauses) = to_dnf(&filter.predicate) else {
                continue;
            };
            let mut changed = false;
            let mut compacted = Vec::with_capacity(clauses.len());
            for clause in clauses {
                match compact_clause(clause.clone()) {
                    Some(new_clause) => {
                        if new_clause != clause {
                            changed = true;
                        }
                        compacted.push(new_clause);
                    }
                    None => {
                        // contradiction: the clause can never be true
                        changed = true;
                    }
                }
            }
            if !changed {
                continue;
            }
            ctx.bump("optimization_predicate_compaction");
            let rewritten = if compacted.is_empty() {
                // every clause was contradictory; keep the filter, schema
                // intact, as a constant-false predicate
                Expr::Literal(Value::Boolean(false))
            } else {
                dnf_to_expr(&compacted)
            };
            if let Some(LogicalNode::Filter(filter)) = plan.graph.node_mut(&id) {
                filter.predicate = rewritten;
            }
        }
        Ok(plan)
    }
}

struct Range {
    /// (value, strict) for the strongest bound seen so far.
    lower: Option<(Value, bool)>,
    upper: Option<(Value, bool)>,
    equal: Option<Value>,
    not_equal: Vec<Value>,
}

/// Compact one clause. Returns None when the clause is contradictory.
/// Predicates whose values cannot be ordered against the tracked bounds
/// (mixed type families) are kept verbatim rather than merged.
pub fn compact_clause(clause: Clause) -> Option<Clause> {
    let mut out: Clause = Vec::with_capacity(clause.len());
    let mut open: Vec<(u64, String, Range)> = Vec::new();

    for predicate in clause {
        let range_op = matches!(
            predicate.op,
            CmpOp::Eq | CmpOp::NotEq | CmpOp::Lt | CmpOp::LtEq | CmpOp::Gt | CmpOp::GtEq
        );
        if !range_op || predicate.value.is_null() {
            out.push(predicate);
            continue;
        }
        let entry = match open.iter_mut().find(|(id, _, _)| *id == predicate.column) {
            Some((_, _, range)) => range,
            None => {
                open.push((
                    predicate.column,
                    predicate.column_name.clone(),
                    Range {
                        lower: None,
                        upper: None,
                        equal: None,
                        not_equal: Vec::new(),
                    },
                ));
                &mut open.last_mut()?.2
            }
        };
        let merged = match predicate.op {
            CmpOp::Eq => match &entry.equal {
                Some(existing) => match existing.partial_cmp_sql(&predicate.value) {
                    Some(Ordering::Equal) => true,
                    Some(_) => return None,
                    None => false,
                },
                None => {
                    entry.equal = Some(predicate.value.clone());
                    true
                }
            },
            CmpOp::NotEq => {
                entry.not_equal.push(predicate.value.clone());
                true
            }
            CmpOp::Gt => strengthen_lower(&mut entry.lower, &predicate.value, true),
            CmpOp::GtEq => strengthen_lower(&mut entry.lower, &predicate.value, false),
            CmpOp::Lt => strengthen_upper(&mut entry.upper, &predicate.value, true),
            CmpOp::LtEq => strengthen_upper(&mut entry.upper, &predicate.value, false),
            _ => false,
        };
        if !merged {
            out.push(predicate);
        }
    }

    for (column, name, range) in open {
        // equality dominates a compatible range and contradicts an
        // incompatible one; incomparable bounds are emitted alongside
        if let Some(equal) = range.equal {
            if let Some((bound, strict)) = &range.lower {
                match equal.partial_cmp_sql(bound) {
                    Some(Ordering::Less) => return None,
                    Some(Ordering::Equal) if *strict => return None,
                    None => {
                        let op = if *strict { CmpOp::Gt } else { CmpOp::GtEq };
                        out.push(Predicate::new(column, name.clone(), op, bound.clone()));
                    }
                    _ => {}
                }
            }
            if let Some((bound, strict)) = &range.upper {
                match equal.partial_cmp_sql(bound) {
                    Some(Ordering::Greater) => return None,
                    Some(Ordering::Equal) if *strict => return None,
                    None => {
                        let op = if *strict { CmpOp::Lt } else { CmpOp::LtEq };
                        out.push(Predicate::new(column, name.clone(), op, bound.clone()));
                    }
                    _ => {}
                }
            }
            for excluded in &range.not_equal {
                match equal.partial_cmp_sql(excluded) {
                    Some(Ordering::Equal) => return None,
                    None => out.push(Predicate::new(
                        column,
                        name.clone(),
                        CmpOp::NotEq,
                        excluded.clone(),
                    )),
                    _ => {}
                }
            }
            out.push(Predicate::new(column, name, CmpOp::Eq, equal));
            continue;
        }

        if let (Some((lower, lower_strict)), Some((upper, upper_strict))) =
            (&range.lower, &range.upper)
        {
            match lower.partial_cmp_sql(upper) {
                Some(Ordering::Greater) => return None,
                Some(Ordering::Equal) if *lower_strict || *upper_strict => return None,
                _ => {}
            }
        }

        if let Some((value, strict)) = range.lower {
            let op = if strict { CmpOp::Gt } else { CmpOp::GtEq };
            out.push(Predicate::new(column, name.clone(), op, value));
        }
        if let Some((value, strict)) = range.upper {
            let op = if strict { CmpOp::Lt } else { CmpOp::LtEq };
            out.push(Predicate::new(column, name.clone(), op, value));
        }
        for value in range.not_equal {
            out.push(Predicate::new(column, name.clone(), CmpOp::NotEq, value));
        }
    }

    Some(out)
}

/// Merge a candidate lower bound; returns false when the candidate cannot
/// be ordered against the existing bound and must be kept separately.
fn strengthen_lower(current: &mut Option<(Value, bool)>, value: &Value, strict: bool) -> bool {
    let Some((existing, existing_strict)) = current.as_mut() else {
        *current = Some((value.clone(), strict));
        return true;
    };
    match value.partial_cmp_sql(existing) {
        Some(Ordering::Greater) => {
            *existing = value.clone();
            *existing_strict = strict;
            true
        }
        // at the same value, the strict comparison is stronger
        Some(Ordering::Equal) => {
            if strict {
                *existing_strict = true;
            }
            true
        }
        Some(Ordering::Less) => true,
        None => false,
    }
}

fn strengthen_upper(current: &mut Option<(Value, bool)>, value: &Value, strict: bool) -> bool {
    let Some((existing, existing_strict)) = current.as_mut() else {
        *current = Some((value.clone(), strict));
        return true;
    };
    match value.partial_cmp_sql(existing) {
        Some(Ordering::Less) => {
            *existing = value.clone();
            *existing_strict = strict;
            true
        }
        Some(Ordering::Equal) => {
            if strict {
                *existing_strict = true;
            }
            true
        }
        Some(Ordering::Greater) => true,
        None => false,
    }
}
